//! Serial bridge to the host console.
//!
//! Bytes the hardware transmits go to stdout. Bytes typed on stdin are read
//! by one background thread, started by the module's start hook, and drained
//! into the session's ring on every poll.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, OnceLock};

use crate::error::SimResult;
use crate::message::{Message, MessageError, MessageOp, MessageResult};
use crate::module::{Module, ModuleArgs, ModuleDescriptor, SimContext, StartContext};
use crate::modules::serial::SerialBridge;
use crate::pads::PadList;
use crate::registry::ModuleRegistry;

/// Module name.
pub const NAME: &str = "serial2console";

/// Bytes read from stdin, waiting for a session to take them.
pub type InputQueue = Arc<Mutex<VecDeque<u8>>>;

static STDIN_QUEUE: OnceLock<InputQueue> = OnceLock::new();

/// Registers the serial2console descriptor.
pub fn init(registry: &mut ModuleRegistry) -> SimResult<()> {
    registry.register(
        ModuleDescriptor::new(NAME, |args| {
            ModuleArgs::parse(args)?;
            Ok(Box::new(Serial2Console::new(
                stdin_queue(),
                Box::new(std::io::stdout()),
            )) as Box<dyn Module>)
        })
        .with_start(start)
        .with_messages(),
    )
}

fn start(ctx: &StartContext) -> SimResult<()> {
    if ctx.instances > 1 {
        tracing::warn!(instances = ctx.instances, "several console bridges share one stdin");
    }
    stdin_queue();
    Ok(())
}

/// Returns the process-wide stdin queue, spawning its reader on first use.
fn stdin_queue() -> InputQueue {
    STDIN_QUEUE
        .get_or_init(|| {
            let queue = InputQueue::default();
            let feed = queue.clone();
            let spawned = std::thread::Builder::new()
                .name("litesim-stdin".to_string())
                .spawn(move || {
                    let mut stdin = std::io::stdin().lock();
                    let mut buf = [0u8; 256];
                    loop {
                        match stdin.read(&mut buf) {
                            Ok(0) => break,
                            Ok(n) => feed.lock().extend(&buf[..n]),
                            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                            Err(e) => {
                                tracing::warn!(error = %e, "stdin reader stopped");
                                break;
                            }
                        }
                    }
                });
            if let Err(e) = spawned {
                tracing::error!(error = %e, "cannot spawn stdin reader");
            }
            queue
        })
        .clone()
}

/// Console bridge session.
pub struct Serial2Console {
    bridge: SerialBridge,
    input: InputQueue,
    output: Box<dyn Write + Send>,
}

impl Serial2Console {
    /// Creates a bridge over an arbitrary input queue and output sink.
    pub fn new(input: InputQueue, output: Box<dyn Write + Send>) -> Self {
        Self {
            bridge: SerialBridge::new(),
            input,
            output,
        }
    }
}

impl Module for Serial2Console {
    fn add_pads(&mut self, pads: &PadList) -> SimResult<()> {
        self.bridge.add_pads(pads)
    }

    fn poll(&mut self, _ctx: &mut SimContext<'_>) -> SimResult<()> {
        let free = self.bridge.free();
        if free == 0 {
            return Ok(());
        }
        let mut input = self.input.lock();
        let n = free.min(input.len());
        if n > 0 {
            let bytes: Vec<u8> = input.drain(..n).collect();
            self.bridge.feed(&bytes);
        }
        Ok(())
    }

    fn tick(&mut self, _ctx: &mut SimContext<'_>) -> SimResult<()> {
        if let Some(byte) = self.bridge.tick()? {
            self.output.write_all(&[byte])?;
            self.output.flush()?;
        }
        Ok(())
    }

    fn message(&mut self, msg: &Message) -> MessageResult {
        match &msg.op {
            MessageOp::Get => Ok(self.bridge.status()),
            MessageOp::Custom(op) if op == "inject" => {
                let text = msg
                    .data
                    .get("data")
                    .and_then(|d| d.as_str())
                    .ok_or_else(|| MessageError::Failed("inject needs a string `data`".to_string()))?;
                let accepted = self.bridge.feed(text.as_bytes());
                Ok(serde_json::json!({ "accepted": accepted }))
            }
            _ => Err(MessageError::Unsupported),
        }
    }
}

impl std::fmt::Debug for Serial2Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Serial2Console")
            .field("bridge", &self.bridge)
            .finish()
    }
}
