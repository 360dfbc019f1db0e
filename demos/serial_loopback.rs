//! Serial loopback example.
//!
//! A clock generator drives `sys_clk` and a `serial2tcp` bridge exposes the
//! UART on a TCP port. The hardware model echoes every byte it receives, so
//! a client writing to the socket reads its own text back, one byte per
//! simulated clock edge. This example plays both the host and the client.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use litesim::{
    HostOptions, LoopbackModel, Message, ModuleRegistry, SessionId, SimConfig, SimResult,
    Simulation,
};

const CONFIG: &str = r#"[
    {"timebase": 2500},
    {"module": "clocker", "interface": ["sys_clk"]},
    {"module": "serial2tcp", "interface": ["serial", "sys_clk"], "args": {"port": 0, "bind": "127.0.0.1"}}
]"#;

const GREETING: &[u8] = b"Hello from the host side!\n";

fn main() -> SimResult<()> {
    litesim::init_logging("info");

    let config = SimConfig::from_json(CONFIG)?;
    let registry = ModuleRegistry::with_builtin_modules()?;
    let model = LoopbackModel::for_config(&config)?;
    let options = HostOptions {
        batch_size: 64,
        ..Default::default()
    };
    let mut sim = Simulation::from_config(&config, &registry, Box::new(model), options)?;

    let status = sim
        .send(SessionId(1), &Message::get())
        .map_err(|e| litesim::SimError::Generic(e.to_string()))?;
    let port = status["port"].as_u64().unwrap_or(0) as u16;
    println!("serial2tcp listening on 127.0.0.1:{port}");

    let mut client = TcpStream::connect(("127.0.0.1", port))?;
    client.set_read_timeout(Some(Duration::from_millis(1)))?;
    client.write_all(GREETING)?;

    let mut echoed = Vec::new();
    let mut buf = [0u8; 128];
    while echoed.len() < GREETING.len() {
        sim.run_batch()?;
        match client.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => echoed.extend_from_slice(&buf[..n]),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => return Err(e.into()),
        }
    }

    print!("echo: {}", String::from_utf8_lossy(&echoed));
    sim.close();

    let stats = sim.stats().with_name("serial_loopback");
    println!("\n{}", stats.summary());
    Ok(())
}
