//! AF_VSOCK client transport for hypervisor guest↔host links.

#![allow(unsafe_code)]

use std::fs::File;
use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};

use tracing::debug;

use crate::transport::{StreamSlot, Transport};

/// Well-known CID of the host.
pub const VMADDR_CID_HOST: u32 = 2;

/// Vsock stream transport connecting to `(cid, port)`.
#[derive(Debug)]
pub struct VsockTransport {
    cid: u32,
    port: u32,
    // Socket fds support read(2)/write(2), so a `File` gives us the std
    // I/O traits on `&File`.
    slot: StreamSlot<File>,
}

impl VsockTransport {
    /// Creates a transport connecting to `cid:port` on open.
    pub const fn new(cid: u32, port: u32) -> Self {
        Self {
            cid,
            port,
            slot: StreamSlot::new(),
        }
    }

    fn connect(&self) -> io::Result<OwnedFd> {
        // SAFETY: socket() has no memory-safety preconditions.
        let fd = unsafe { libc::socket(libc::AF_VSOCK, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: fd is a freshly created, owned socket.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        // SAFETY: sockaddr_vm is plain old data; all-zero is a valid value.
        let mut addr: libc::sockaddr_vm = unsafe { mem::zeroed() };
        addr.svm_family = libc::AF_VSOCK as libc::sa_family_t;
        addr.svm_cid = self.cid;
        addr.svm_port = self.port;

        #[allow(clippy::cast_possible_truncation)]
        let len = mem::size_of::<libc::sockaddr_vm>() as libc::socklen_t;
        // SAFETY: addr is a valid sockaddr_vm and len matches its size.
        let ret = unsafe {
            libc::connect(
                fd.as_raw_fd(),
                (&raw const addr).cast::<libc::sockaddr>(),
                len,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(fd)
    }
}

impl Transport for VsockTransport {
    fn open(&self) -> io::Result<()> {
        let fd = self.connect()?;
        debug!(cid = self.cid, port = self.port, "vsock transport connected");
        self.slot.set(File::from(fd));
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        if let Some(file) = self.slot.take() {
            // SAFETY: the fd stays open for as long as `file` lives.
            let ret = unsafe { libc::shutdown(file.as_raw_fd(), libc::SHUT_RDWR) };
            if ret != 0 {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::NotConnected {
                    return Err(err);
                }
            }
            debug!(cid = self.cid, port = self.port, "vsock transport closed");
        }
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.slot.is_set()
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<()> {
        self.slot.read_exact(buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<()> {
        self.slot.write_all(buf)
    }
}
