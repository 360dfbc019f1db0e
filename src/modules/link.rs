//! Host-side packet transports for the Ethernet modules.
//!
//! A [`PacketLink`] moves whole Ethernet frames (no preamble, no FCS)
//! between a module and the host. [`TapDevice`] talks to a Linux TAP
//! interface; [`MemoryLink`] is an in-process pair used by tests and demos.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use crate::error::{SimError, SimResult};
use crate::module::ModuleArgs;

/// A non-blocking frame transport.
pub trait PacketLink: Send {
    /// Sends one frame to the host.
    fn send(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Receives one frame from the host, if one is waiting.
    fn recv(&mut self) -> io::Result<Option<Vec<u8>>>;

    /// Human-readable name of the link.
    fn name(&self) -> &str;
}

/// Opens the link described by a module's arguments.
///
/// `{"interface": "tap0"}` opens a TAP device; `{"link": "loopback"}`
/// returns every frame sent back to the sender.
pub fn open_from_args(args: &ModuleArgs) -> SimResult<Box<dyn PacketLink>> {
    match args.get_str("link")? {
        Some("loopback") => return Ok(Box::new(MemoryLink::loopback())),
        Some("tap") | None => {}
        Some(other) => {
            return Err(SimError::InvalidArgument(format!("unknown link kind {other}")))
        }
    }
    let name = args
        .get_str("interface")?
        .ok_or_else(|| SimError::InvalidArgument("missing tap `interface` argument".to_string()))?;
    if let Some(ip) = args.get_str("ip")? {
        tracing::info!(tap = name, ip, "host address must be configured on the tap externally");
    }
    Ok(Box::new(TapDevice::open(name)?))
}

type FrameQueue = Arc<Mutex<VecDeque<Vec<u8>>>>;

/// One end of an in-process frame link.
#[derive(Debug, Clone)]
pub struct MemoryLink {
    name: String,
    tx: FrameQueue,
    rx: FrameQueue,
}

impl MemoryLink {
    /// Creates two connected ends: frames sent on one are received on the other.
    pub fn pair() -> (Self, Self) {
        let a = FrameQueue::default();
        let b = FrameQueue::default();
        (
            Self {
                name: "memory:a".to_string(),
                tx: a.clone(),
                rx: b.clone(),
            },
            Self {
                name: "memory:b".to_string(),
                tx: b,
                rx: a,
            },
        )
    }

    /// Creates a link that returns every sent frame to its sender.
    pub fn loopback() -> Self {
        let q = FrameQueue::default();
        Self {
            name: "memory:loopback".to_string(),
            tx: q.clone(),
            rx: q,
        }
    }

    /// Number of frames waiting to be received on this end.
    pub fn pending(&self) -> usize {
        self.rx.lock().len()
    }
}

impl PacketLink for MemoryLink {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        self.tx.lock().push_back(frame.to_vec());
        Ok(())
    }

    fn recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        Ok(self.rx.lock().pop_front())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A Linux TAP interface opened through `/dev/net/tun`.
#[derive(Debug)]
pub struct TapDevice {
    name: String,
    #[cfg(target_os = "linux")]
    file: std::fs::File,
}

#[cfg(target_os = "linux")]
mod sys {
    pub const TUNSETIFF: u64 = 0x4004_54ca;
    pub const IFF_TAP: libc::c_short = 0x0002;
    pub const IFF_NO_PI: libc::c_short = 0x1000;
    pub const IFNAMSIZ: usize = 16;

    #[repr(C)]
    pub struct IfReq {
        pub name: [u8; IFNAMSIZ],
        pub flags: libc::c_short,
        pub _pad: [u8; 22],
    }
}

impl TapDevice {
    /// Attaches to (or creates) the TAP interface `name`.
    #[cfg(target_os = "linux")]
    pub fn open(name: &str) -> SimResult<Self> {
        use std::os::unix::fs::OpenOptionsExt;
        use std::os::unix::io::AsRawFd;

        if name.is_empty() || name.len() >= sys::IFNAMSIZ {
            return Err(SimError::InvalidArgument(format!("bad tap name {name:?}")));
        }

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open("/dev/net/tun")?;

        let mut req = sys::IfReq {
            name: [0; sys::IFNAMSIZ],
            flags: sys::IFF_TAP | sys::IFF_NO_PI,
            _pad: [0; 22],
        };
        req.name[..name.len()].copy_from_slice(name.as_bytes());

        // SAFETY: `req` is a properly sized, initialized ifreq and the fd is open.
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), sys::TUNSETIFF as _, &mut req) };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }

        tracing::info!(tap = name, "tap device attached");
        Ok(Self {
            name: name.to_string(),
            file,
        })
    }

    /// TAP devices are only available on Linux.
    #[cfg(not(target_os = "linux"))]
    pub fn open(name: &str) -> SimResult<Self> {
        Err(SimError::InvalidArgument(format!(
            "tap device {name} is not supported on this platform"
        )))
    }
}

impl PacketLink for TapDevice {
    #[cfg(target_os = "linux")]
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        use std::io::Write;
        match self.file.write(frame) {
            Ok(_) => Ok(()),
            // The kernel queue is full; the frame is lost as on a real wire.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    #[cfg(target_os = "linux")]
    fn recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        use std::io::Read;
        let mut buf = vec![0u8; 2048];
        match self.file.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn send(&mut self, _frame: &[u8]) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    #[cfg(not(target_os = "linux"))]
    fn recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_delivers_in_order() {
        let (mut a, mut b) = MemoryLink::pair();
        a.send(&[1, 2]).unwrap();
        a.send(&[3]).unwrap();
        assert_eq!(b.pending(), 2);
        assert_eq!(b.recv().unwrap(), Some(vec![1, 2]));
        assert_eq!(b.recv().unwrap(), Some(vec![3]));
        assert_eq!(b.recv().unwrap(), None);
        assert_eq!(a.recv().unwrap(), None);
    }

    #[test]
    fn test_loopback() {
        let mut link = MemoryLink::loopback();
        link.send(b"frame").unwrap();
        assert_eq!(link.recv().unwrap(), Some(b"frame".to_vec()));
    }

    #[test]
    fn test_open_from_args() {
        let args = ModuleArgs::parse(r#"{"link": "loopback"}"#).unwrap();
        assert_eq!(open_from_args(&args).unwrap().name(), "memory:loopback");

        let missing = ModuleArgs::parse("{}").unwrap();
        assert!(matches!(open_from_args(&missing), Err(SimError::InvalidArgument(_))));

        let bad = ModuleArgs::parse(r#"{"link": "pigeon"}"#).unwrap();
        assert!(open_from_args(&bad).is_err());
    }
}
