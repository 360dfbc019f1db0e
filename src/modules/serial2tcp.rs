//! Serial bridge to a TCP socket.
//!
//! Listens on `port` (default 1111) and serves one client at a time. The
//! listener and the client socket are non-blocking and serviced from the
//! poll hook, so a tick never waits on the network.
//!
//! Hardware output waits for the client in a queue of at most
//! [`MAX_PENDING`] bytes; a client that stops reading loses the oldest
//! bytes. Output produced while no client is connected is discarded and
//! counted.
//!
//! Arguments: `port`, `bind` (default `0.0.0.0`).

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

use crate::error::{SimError, SimResult};
use crate::message::{Message, MessageError, MessageOp, MessageResult};
use crate::module::{Module, ModuleArgs, ModuleDescriptor, SimContext};
use crate::modules::serial::{SerialBridge, RING_CAPACITY};
use crate::pads::PadList;
use crate::registry::ModuleRegistry;

/// Module name.
pub const NAME: &str = "serial2tcp";

/// Default listening port.
pub const DEFAULT_PORT: u16 = 1111;

/// Capacity of the hardware-to-client queue.
pub const MAX_PENDING: usize = RING_CAPACITY;

/// Registers the serial2tcp descriptor.
pub fn init(registry: &mut ModuleRegistry) -> SimResult<()> {
    registry.register(
        ModuleDescriptor::new(NAME, |args| {
            Ok(Box::new(Serial2Tcp::from_args(args)?) as Box<dyn Module>)
        })
        .with_messages()
        .with_close(),
    )
}

/// TCP bridge session.
#[derive(Debug)]
pub struct Serial2Tcp {
    bridge: SerialBridge,
    listener: TcpListener,
    client: Option<TcpStream>,
    tx_pending: VecDeque<u8>,
    tx_overflow: u64,
    tx_discarded: u64,
    stalled: bool,
    connections: u64,
}

impl Serial2Tcp {
    /// Binds the listener described by the JSON argument string.
    pub fn from_args(args: &str) -> SimResult<Self> {
        let args = ModuleArgs::parse(args)?;
        let port = args.u64_or("port", u64::from(DEFAULT_PORT))?;
        let port = u16::try_from(port)
            .map_err(|_| SimError::InvalidArgument(format!("port {port} out of range")))?;
        let bind = args.get_str("bind")?.unwrap_or("0.0.0.0");
        Self::bind(&format!("{bind}:{port}"))
    }

    /// Binds a listener on `addr`.
    pub fn bind(addr: &str) -> SimResult<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        tracing::info!(addr = %listener.local_addr()?, "serial2tcp listening");
        Ok(Self {
            bridge: SerialBridge::new(),
            listener,
            client: None,
            tx_pending: VecDeque::with_capacity(MAX_PENDING),
            tx_overflow: 0,
            tx_discarded: 0,
            stalled: false,
            connections: 0,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SimResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Bytes waiting to be written to the client.
    pub fn tx_pending(&self) -> usize {
        self.tx_pending.len()
    }

    /// Queues a hardware byte for the client, evicting the oldest byte when
    /// the queue is full.
    fn queue_tx(&mut self, byte: u8) {
        if self.tx_pending.len() >= MAX_PENDING {
            self.tx_pending.pop_front();
            self.tx_overflow += 1;
            if !self.stalled {
                self.stalled = true;
                tracing::warn!(
                    capacity = MAX_PENDING,
                    "serial2tcp client not reading, dropping oldest output"
                );
            }
        }
        self.tx_pending.push_back(byte);
    }

    fn accept(&mut self) -> SimResult<()> {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(true)?;
                stream.set_nodelay(true)?;
                tracing::info!(%peer, "serial2tcp client connected");
                self.client = Some(stream);
                self.connections += 1;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn service_client(&mut self) {
        let Some(client) = self.client.as_mut() else {
            return;
        };

        let mut disconnected = false;

        // Only read what the ring can hold; TCP flow control throttles the rest.
        let free = self.bridge.free();
        if free > 0 {
            let mut buf = [0u8; 512];
            let want = free.min(buf.len());
            match client.read(&mut buf[..want]) {
                Ok(0) => disconnected = true,
                Ok(n) => {
                    self.bridge.feed(&buf[..n]);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => {
                    tracing::warn!(error = %e, "serial2tcp read failed");
                    disconnected = true;
                }
            }
        }

        if !disconnected && !self.tx_pending.is_empty() {
            let (head, _) = self.tx_pending.as_slices();
            match client.write(head) {
                Ok(n) => {
                    self.tx_pending.drain(..n);
                    if n > 0 {
                        self.stalled = false;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => {
                    tracing::warn!(error = %e, "serial2tcp write failed");
                    disconnected = true;
                }
            }
        }

        if disconnected {
            tracing::info!("serial2tcp client disconnected");
            self.client = None;
            self.tx_pending.clear();
            self.stalled = false;
        }
    }
}

impl Module for Serial2Tcp {
    fn add_pads(&mut self, pads: &PadList) -> SimResult<()> {
        self.bridge.add_pads(pads)
    }

    fn poll(&mut self, _ctx: &mut SimContext<'_>) -> SimResult<()> {
        if self.client.is_none() {
            self.accept()?;
        }
        self.service_client();
        Ok(())
    }

    fn tick(&mut self, _ctx: &mut SimContext<'_>) -> SimResult<()> {
        if let Some(byte) = self.bridge.tick()? {
            if self.client.is_some() {
                self.queue_tx(byte);
            } else {
                self.tx_discarded += 1;
                if self.tx_discarded.is_power_of_two() {
                    tracing::debug!(
                        discarded = self.tx_discarded,
                        "serial2tcp output discarded, no client"
                    );
                }
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some(client) = self.client.take() {
            let _ = client.shutdown(std::net::Shutdown::Both);
        }
    }

    fn message(&mut self, msg: &Message) -> MessageResult {
        match msg.op {
            MessageOp::Get => {
                let mut status = self.bridge.status();
                status["connected"] = serde_json::json!(self.client.is_some());
                status["connections"] = serde_json::json!(self.connections);
                status["tx_pending"] = serde_json::json!(self.tx_pending.len());
                status["tx_overflow"] = serde_json::json!(self.tx_overflow);
                status["tx_discarded"] = serde_json::json!(self.tx_discarded);
                status["port"] =
                    serde_json::json!(self.listener.local_addr().map(|a| a.port()).ok());
                Ok(status)
            }
            _ => Err(MessageError::Unsupported),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::with_test_context;
    use crate::pads::Pad;

    #[test]
    fn test_bind_ephemeral_port() {
        let tcp = Serial2Tcp::from_args(r#"{"port": 0, "bind": "127.0.0.1"}"#).unwrap();
        assert_ne!(tcp.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_port_out_of_range() {
        assert!(matches!(
            Serial2Tcp::from_args(r#"{"port": 70000}"#),
            Err(SimError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_status_message() {
        let mut tcp = Serial2Tcp::bind("127.0.0.1:0").unwrap();
        let status = tcp.message(&Message::get()).unwrap();
        assert_eq!(status["connected"], false);
        assert_eq!(status["pending"], 0);
    }

    #[test]
    fn test_pending_output_is_bounded() {
        let mut tcp = Serial2Tcp::bind("127.0.0.1:0").unwrap();
        for i in 0..MAX_PENDING + 100 {
            tcp.queue_tx(i as u8);
            assert!(tcp.tx_pending() <= MAX_PENDING);
        }
        assert_eq!(tcp.tx_pending(), MAX_PENDING);
        // The oldest bytes went first.
        assert_eq!(tcp.tx_pending.front(), Some(&100u8));
        let status = tcp.message(&Message::get()).unwrap();
        assert_eq!(status["tx_overflow"], 100);
        assert_eq!(status["tx_pending"], MAX_PENDING);
    }

    #[test]
    fn test_output_without_client_is_counted() {
        let serial = PadList {
            interface: "serial".to_string(),
            index: 0,
            pads: [
                ("source_valid", 1),
                ("source_ready", 1),
                ("source_data", 8),
                ("sink_valid", 1),
                ("sink_ready", 1),
                ("sink_data", 8),
            ]
            .iter()
            .map(|(n, w)| Pad::new(*n, *w))
            .collect(),
        };
        let clk = PadList {
            interface: "sys_clk".to_string(),
            index: 0,
            pads: vec![Pad::new("sys_clk", 1)],
        };

        let mut tcp = Serial2Tcp::bind("127.0.0.1:0").unwrap();
        tcp.add_pads(&serial).unwrap();
        tcp.add_pads(&clk).unwrap();

        let sys_clk = clk.signal("sys_clk").unwrap();
        serial.signal("source_valid").unwrap().set_bool(true);
        serial.signal("source_data").unwrap().set(u64::from(b'x'));
        for _ in 0..3 {
            sys_clk.set_bool(true);
            with_test_context(|ctx| tcp.tick(ctx)).unwrap();
            sys_clk.set_bool(false);
            with_test_context(|ctx| tcp.tick(ctx)).unwrap();
        }

        assert_eq!(tcp.tx_pending(), 0);
        let status = tcp.message(&Message::get()).unwrap();
        assert_eq!(status["tx_discarded"], 3);
        assert_eq!(status["connected"], false);
    }
}
