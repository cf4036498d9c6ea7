//! Common test utilities: in-memory transports and channels.

#![allow(dead_code)]

pub mod certs;

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use edgelink::{Channel, Error, LinkConfig, Result, Transport};
use edgelink_proto::{FrameHeader, HEADER_SIZE, MAX_FRAME_DATA};

/// Generous upper bound for anything a test waits on.
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Fast-reconnecting configuration for tests.
pub fn test_config() -> LinkConfig {
    LinkConfig::default()
        .with_reconnect_period(Duration::from_millis(10))
        .with_wait_read_timeout(Duration::from_secs(2))
}

/// Polls `cond` until it holds or [`TIMEOUT`] elapses.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[derive(Default)]
struct PipeState {
    buf: VecDeque<u8>,
    closed: bool,
}

/// One-directional in-memory byte pipe.
#[derive(Default)]
pub struct Pipe {
    state: Mutex<PipeState>,
    cond: Condvar,
}

impl Pipe {
    pub fn write(&self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        state.buf.extend(data);
        self.cond.notify_all();
        Ok(())
    }

    /// Blocks until `buf` can be filled completely.
    pub fn read_exact(&self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<()> {
        let need = buf.len();
        let state = self.state.lock().unwrap();
        let pending = |s: &mut PipeState| !s.closed && s.buf.len() < need;
        let mut state = match timeout {
            Some(timeout) => {
                let (state, res) = self.cond.wait_timeout_while(state, timeout, pending).unwrap();
                if res.timed_out() {
                    return Err(io::ErrorKind::TimedOut.into());
                }
                state
            }
            None => self.cond.wait_while(state, pending).unwrap(),
        };
        if state.buf.len() < need {
            return Err(io::ErrorKind::ConnectionReset.into());
        }
        for (dst, src) in buf.iter_mut().zip(state.buf.drain(..need)) {
            *dst = src;
        }
        Ok(())
    }

    /// Blocks until at least one byte is available; `Ok(0)` once closed.
    pub fn read_some(&self, buf: &mut [u8]) -> io::Result<usize> {
        let state = self.state.lock().unwrap();
        let mut state = self
            .cond
            .wait_while(state, |s| !s.closed && s.buf.is_empty())
            .unwrap();
        let n = buf.len().min(state.buf.len());
        for (dst, src) in buf.iter_mut().zip(state.buf.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.cond.notify_all();
    }

    /// Drops buffered bytes and accepts traffic again.
    pub fn reopen(&self) {
        let mut state = self.state.lock().unwrap();
        state.buf.clear();
        state.closed = false;
    }
}

/// Node side of an in-memory link, handed to the channel manager.
pub struct PipeTransport {
    to_remote: Arc<Pipe>,
    from_remote: Arc<Pipe>,
    opened: AtomicBool,
    fail_opens: AtomicUsize,
    attempts: AtomicUsize,
    opens: AtomicUsize,
}

impl PipeTransport {
    /// Makes the next `n` opens fail.
    pub fn fail_next_opens(&self, n: usize) {
        self.fail_opens.store(n, Ordering::SeqCst);
    }

    /// Open attempts so far, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Successful opens so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl Transport for PipeTransport {
    fn open(&self) -> io::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(io::ErrorKind::ConnectionRefused.into());
        }
        self.from_remote.reopen();
        self.opened.store(true, Ordering::SeqCst);
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        self.opened.store(false, Ordering::SeqCst);
        self.from_remote.close();
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<()> {
        self.from_remote.read_exact(buf, None)
    }

    fn write(&self, buf: &[u8]) -> io::Result<()> {
        if !self.is_opened() {
            return Err(io::ErrorKind::NotConnected.into());
        }
        self.to_remote.write(buf)
    }
}

/// Endpoint side of an in-memory link.
#[derive(Clone)]
pub struct Remote {
    to_node: Arc<Pipe>,
    from_node: Arc<Pipe>,
}

impl Remote {
    /// Sends one well-formed frame.
    pub fn send_frame(&self, port: u32, payload: &[u8]) {
        let header = FrameHeader::for_payload(port, payload).unwrap();
        self.send_raw(&header.encode());
        self.send_raw(payload);
    }

    /// Sends a frame whose checksum does not match its payload.
    pub fn send_corrupted_frame(&self, port: u32, payload: &[u8]) {
        let mut header = FrameHeader::for_payload(port, payload).unwrap().encode();
        header[HEADER_SIZE - 1] ^= 0xff;
        self.send_raw(&header);
        self.send_raw(payload);
    }

    /// Sends a header claiming `size` payload bytes, without payload.
    pub fn send_header(&self, port: u32, size: u32) {
        let mut header = FrameHeader::for_payload(port, &[]).unwrap().encode();
        header[4..8].copy_from_slice(&size.to_le_bytes());
        self.send_raw(&header);
    }

    pub fn send_raw(&self, data: &[u8]) {
        self.to_node.write(data).unwrap();
    }

    /// Receives one frame, checking its checksum.
    pub fn recv_frame(&self) -> (u32, Vec<u8>) {
        self.recv_frame_timeout(TIMEOUT).expect("no frame from node")
    }

    /// Like [`recv_frame`](Self::recv_frame), but `None` if no frame
    /// starts within `timeout`.
    pub fn recv_frame_timeout(&self, timeout: Duration) -> Option<(u32, Vec<u8>)> {
        let mut raw = [0u8; HEADER_SIZE];
        match self.from_node.read_exact(&mut raw, Some(timeout)) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::TimedOut => return None,
            Err(err) => panic!("link failed: {err}"),
        }
        let header = FrameHeader::decode(&raw);
        let mut payload = vec![0u8; header.len()];
        self.from_node
            .read_exact(&mut payload, Some(TIMEOUT))
            .expect("truncated frame from node");
        header.verify(&payload).unwrap();
        Some((header.port, payload))
    }

    /// Receives frames until one arrives for `port`.
    pub fn recv_frame_on(&self, port: u32) -> Vec<u8> {
        loop {
            let (p, payload) = self.recv_frame();
            if p == port {
                return payload;
            }
        }
    }
}

/// Byte stream over the frames of one port, endpoint side.
pub struct FrameStream {
    remote: Remote,
    port: u32,
    pending: VecDeque<u8>,
}

impl FrameStream {
    pub fn new(remote: Remote, port: u32) -> Self {
        Self {
            remote,
            port,
            pending: VecDeque::new(),
        }
    }
}

impl io::Read for FrameStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pending.is_empty() {
            match self.remote.recv_frame_timeout(TIMEOUT) {
                Some((port, payload)) if port == self.port => self.pending.extend(payload),
                Some(_) => {}
                None => return Err(io::ErrorKind::TimedOut.into()),
            }
        }
        let n = buf.len().min(self.pending.len());
        for (dst, src) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl io::Write for FrameStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for chunk in buf.chunks(MAX_FRAME_DATA) {
            self.remote.send_frame(self.port, chunk);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Creates a linked transport/remote pair.
pub fn pipe_transport() -> (Arc<PipeTransport>, Remote) {
    let to_remote = Arc::new(Pipe::default());
    let from_remote = Arc::new(Pipe::default());
    let transport = Arc::new(PipeTransport {
        to_remote: Arc::clone(&to_remote),
        from_remote: Arc::clone(&from_remote),
        opened: AtomicBool::new(false),
        fail_opens: AtomicUsize::new(0),
        attempts: AtomicUsize::new(0),
        opens: AtomicUsize::new(0),
    });
    let remote = Remote {
        to_node: from_remote,
        from_node: to_remote,
    };
    (transport, remote)
}

/// Channel over a pipe pair, always connected.
pub struct PipeChannel {
    rx: Arc<Pipe>,
    tx: Arc<Pipe>,
    pub connects: AtomicUsize,
}

impl Channel for PipeChannel {
    fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.rx.close();
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.rx
            .read_exact(buf, None)
            .map_err(|_| Error::ConnectionReset)?;
        Ok(buf.len())
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        self.tx.write(buf)?;
        Ok(buf.len())
    }
}

/// Peer end of a [`PipeChannel`] with plain `io::Read`/`io::Write`.
pub struct PipeStream {
    rx: Arc<Pipe>,
    tx: Arc<Pipe>,
}

impl PipeStream {
    pub fn read_exact_timeout(&self, buf: &mut [u8]) -> io::Result<()> {
        self.rx.read_exact(buf, Some(TIMEOUT))
    }
}

impl io::Read for PipeStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.rx.read_some(buf)
    }
}

impl io::Write for PipeStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx.write(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Creates a connected channel/stream pair.
pub fn pipe_channel() -> (Arc<PipeChannel>, PipeStream) {
    let a = Arc::new(Pipe::default());
    let b = Arc::new(Pipe::default());
    let channel = Arc::new(PipeChannel {
        rx: Arc::clone(&a),
        tx: Arc::clone(&b),
        connects: AtomicUsize::new(0),
    });
    (channel, PipeStream { rx: b, tx: a })
}
