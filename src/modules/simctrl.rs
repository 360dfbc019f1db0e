//! Simulation control channel.
//!
//! A TCP listener (default port 7777) accepting newline-delimited JSON
//! requests, each tagged by `_type`:
//!
//! ```text
//! {"_type": "time"}                        -> {"_type": "time", "time_ps": 1000}
//! {"_type": "halt_state"}                  -> {"_type": "halt_state", "halted": false}
//! {"_type": "halt", "halt": true}          -> {"_type": "ack"}
//! {"_type": "sessions"}                    -> {"_type": "sessions", "sessions": [...]}
//! {"_type": "message", "session": 1,
//!  "op": "get", "data": {}}                -> {"_type": "reply", "session": 1, "data": {...}}
//! ```
//!
//! Failures are answered with `{"_type": "error", "message": ...}`. Clients
//! are serviced from the poll hook, so the channel keeps answering while
//! the simulation is halted. At most one instance may exist.

use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

use crate::error::{SimError, SimResult};
use crate::message::{Message, MessageError, MessageOp, MessageResult};
use crate::module::{Module, ModuleArgs, ModuleDescriptor, SimContext};
use crate::pads::PadList;
use crate::registry::ModuleRegistry;
use crate::session::SessionInfo;
use crate::types::{SessionId, SimTime};

/// Module name.
pub const NAME: &str = "simctrl";

/// Default listening port.
pub const DEFAULT_PORT: u16 = 7777;

/// Longest request line accepted before the client is dropped.
const MAX_LINE: usize = 64 * 1024;

/// Registers the simctrl descriptor.
pub fn init(registry: &mut ModuleRegistry) -> SimResult<()> {
    registry.register(
        ModuleDescriptor::new(NAME, |args| {
            Ok(Box::new(SimCtrl::from_args(args)?) as Box<dyn Module>)
        })
        .with_messages()
        .with_close()
        .singleton(),
    )
}

/// A control request.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "_type", rename_all = "snake_case")]
pub enum Request {
    /// Current simulated time
    Time,
    /// Whether a halt is requested
    HaltState,
    /// Request or clear a halt
    Halt {
        /// New halt flag
        halt: bool,
    },
    /// List the sessions
    Sessions,
    /// Forward a message to a session
    Message {
        /// Destination session
        session: SessionId,
        /// Operation name
        op: String,
        /// Operation payload
        #[serde(default)]
        data: serde_json::Value,
    },
}

/// A control reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_type", rename_all = "snake_case")]
pub enum Response {
    /// Current simulated time
    Time {
        /// Picoseconds since start
        time_ps: SimTime,
    },
    /// Halt flag
    HaltState {
        /// True if halted
        halted: bool,
    },
    /// Request applied
    Ack,
    /// Session list
    Sessions {
        /// Every session
        sessions: Vec<SessionInfo>,
    },
    /// A session's reply to a forwarded message
    Reply {
        /// Replying session
        session: SessionId,
        /// Reply payload
        data: serde_json::Value,
    },
    /// The request failed
    Error {
        /// Description
        message: String,
    },
}

/// Parses one request line and executes it against the simulation.
pub fn handle_line(ctx: &mut SimContext<'_>, line: &str) -> Response {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => handle_request(ctx, request),
        Err(e) => Response::Error {
            message: format!("bad request: {e}"),
        },
    }
}

/// Executes one request.
pub fn handle_request(ctx: &mut SimContext<'_>, request: Request) -> Response {
    match request {
        Request::Time => Response::Time {
            time_ps: ctx.time_ps(),
        },
        Request::HaltState => Response::HaltState {
            halted: ctx.is_halted(),
        },
        Request::Halt { halt } => {
            ctx.set_halt(halt);
            Response::Ack
        }
        Request::Sessions => Response::Sessions {
            sessions: ctx.sessions(),
        },
        Request::Message { session, op, data } => {
            let msg = Message::new(MessageOp::parse(&op), data);
            match ctx.send(session, &msg) {
                Ok(data) => Response::Reply { session, data },
                Err(e) => Response::Error {
                    message: e.to_string(),
                },
            }
        }
    }
}

#[derive(Debug)]
struct Client {
    stream: TcpStream,
    peer: SocketAddr,
    inbound: Vec<u8>,
    outbound: Vec<u8>,
}

impl Client {
    /// Reads what is available; returns false once the client is gone.
    fn fill(&mut self) -> bool {
        let mut buf = [0u8; 1024];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return false,
                Ok(n) => {
                    self.inbound.extend_from_slice(&buf[..n]);
                    if self.inbound.len() > MAX_LINE {
                        tracing::warn!(peer = %self.peer, "control request too long");
                        return false;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return true,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::warn!(peer = %self.peer, error = %e, "control read failed");
                    return false;
                }
            }
        }
    }

    fn next_line(&mut self) -> Option<String> {
        let end = self.inbound.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.inbound.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }

    /// Writes pending replies; returns false once the client is gone.
    fn flush(&mut self) -> bool {
        while !self.outbound.is_empty() {
            match self.stream.write(&self.outbound) {
                Ok(0) => return false,
                Ok(n) => {
                    self.outbound.drain(..n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return true,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::warn!(peer = %self.peer, error = %e, "control write failed");
                    return false;
                }
            }
        }
        true
    }
}

/// Control channel session.
#[derive(Debug)]
pub struct SimCtrl {
    listener: TcpListener,
    clients: Vec<Client>,
    requests: u64,
}

impl SimCtrl {
    /// Binds the listener described by the JSON argument string.
    pub fn from_args(args: &str) -> SimResult<Self> {
        let args = ModuleArgs::parse(args)?;
        let port = args.u64_or("port", u64::from(DEFAULT_PORT))?;
        let port = u16::try_from(port)
            .map_err(|_| SimError::InvalidArgument(format!("port {port} out of range")))?;
        let bind = args.get_str("bind")?.unwrap_or("127.0.0.1");
        Self::bind(&format!("{bind}:{port}"))
    }

    /// Binds a listener on `addr`.
    pub fn bind(addr: &str) -> SimResult<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        tracing::info!(addr = %listener.local_addr()?, "control channel listening");
        Ok(Self {
            listener,
            clients: Vec::new(),
            requests: 0,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SimResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Requests served so far.
    pub fn requests(&self) -> u64 {
        self.requests
    }

    fn accept(&mut self) -> SimResult<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(true)?;
                    stream.set_nodelay(true)?;
                    tracing::info!(%peer, "control client connected");
                    self.clients.push(Client {
                        stream,
                        peer,
                        inbound: Vec::new(),
                        outbound: Vec::new(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Module for SimCtrl {
    fn add_pads(&mut self, pads: &PadList) -> SimResult<()> {
        tracing::debug!(interface = %pads.interface, "simctrl has no pads");
        Ok(())
    }

    fn poll(&mut self, ctx: &mut SimContext<'_>) -> SimResult<()> {
        self.accept()?;
        let mut served = 0;
        self.clients.retain_mut(|client| {
            let alive = client.fill();
            while let Some(line) = client.next_line() {
                if line.is_empty() {
                    continue;
                }
                let response = handle_line(ctx, &line);
                served += 1;
                match serde_json::to_vec(&response) {
                    Ok(mut bytes) => {
                        bytes.push(b'\n');
                        client.outbound.extend_from_slice(&bytes);
                    }
                    Err(e) => tracing::error!(error = %e, "cannot encode control reply"),
                }
            }
            let alive = client.flush() && alive;
            if !alive {
                tracing::info!(peer = %client.peer, "control client disconnected");
            }
            alive
        });
        self.requests += served;
        Ok(())
    }

    fn tick(&mut self, _ctx: &mut SimContext<'_>) -> SimResult<()> {
        Ok(())
    }

    fn close(&mut self) {
        for client in self.clients.drain(..) {
            let _ = client.stream.shutdown(std::net::Shutdown::Both);
        }
    }

    fn message(&mut self, msg: &Message) -> MessageResult {
        match msg.op {
            MessageOp::Get => Ok(serde_json::json!({
                "port": self.listener.local_addr().map(|a| a.port()).ok(),
                "clients": self.clients.len(),
                "requests": self.requests,
            })),
            _ => Err(MessageError::Unsupported),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::with_test_context;

    #[test]
    fn test_request_wire_format() {
        let req: Request = serde_json::from_str(r#"{"_type": "halt", "halt": true}"#).unwrap();
        assert_eq!(req, Request::Halt { halt: true });
        let req: Request =
            serde_json::from_str(r#"{"_type": "message", "session": 2, "op": "get"}"#).unwrap();
        assert_eq!(
            req,
            Request::Message {
                session: SessionId(2),
                op: "get".to_string(),
                data: serde_json::Value::Null,
            }
        );
        let reply = serde_json::to_value(Response::Time { time_ps: 1000 }).unwrap();
        assert_eq!(reply, serde_json::json!({"_type": "time", "time_ps": 1000}));
    }

    #[test]
    fn test_halt_round_trip_through_context() {
        with_test_context(|ctx| {
            assert_eq!(
                handle_line(ctx, r#"{"_type": "halt_state"}"#),
                Response::HaltState { halted: false }
            );
            assert_eq!(handle_line(ctx, r#"{"_type": "halt", "halt": true}"#), Response::Ack);
            assert!(ctx.is_halted());
            assert_eq!(handle_line(ctx, r#"{"_type": "time"}"#), Response::Time { time_ps: 0 });
        });
    }

    #[test]
    fn test_errors_are_replies() {
        with_test_context(|ctx| {
            assert!(matches!(handle_line(ctx, "not json"), Response::Error { .. }));
            assert!(matches!(
                handle_line(ctx, r#"{"_type": "reboot"}"#),
                Response::Error { .. }
            ));
            let missing = handle_line(ctx, r#"{"_type": "message", "session": 9, "op": "get"}"#);
            assert_eq!(
                missing,
                Response::Error {
                    message: MessageError::NotFound(SessionId(9)).to_string()
                }
            );
        });
    }

    #[test]
    fn test_bind_ephemeral_port() {
        let ctrl = SimCtrl::from_args(r#"{"port": 0}"#).unwrap();
        assert_ne!(ctrl.local_addr().unwrap().port(), 0);
        assert_eq!(ctrl.requests(), 0);
    }

    #[test]
    fn test_status_reports_port() {
        let mut ctrl = SimCtrl::from_args(r#"{"port": 0}"#).unwrap();
        let port = ctrl.local_addr().unwrap().port();
        let status = ctrl.message(&Message::get()).unwrap();
        assert_eq!(status["port"], port);
        assert_eq!(status["clients"], 0);
        assert_eq!(ctrl.message(&Message::describe()), Err(MessageError::Unsupported));
    }
}
