//! Pumping a remote pseudo-terminal through the decoder.
//!
//! [`ShellSession::spawn`] moves a non-blocking stream onto its own thread.
//! Every quantum the thread writes queued input, then reads whatever output
//! is pending and feeds it through an [`EscapeDecoder`] into a
//! [`DecoderSink`]. The returned [`ShellHandle`] queues input and watches a
//! short transcript of raw output.
//!
//! # Example
//!
//! ```rust,ignore
//! let forwarding = Arc::new(Forwarding::new());
//! let channel = SshConnection::new(options).open_shell(80, 24, true)?;
//! let shell = ShellSession::spawn(channel, ConsoleSink::new(forwarding.clone()))?;
//! shell.send_line("uname -a");
//! ```

use std::io::{self, Read, Stdout, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use crossterm::QueueableCommand;
use crossterm::style::{ResetColor, SetBackgroundColor, SetForegroundColor};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::decoder::{DecodedEvent, EscapeDecoder};
use super::sgr::{EscapeCommand, interpret};

const PUMP_QUANTUM: Duration = Duration::from_millis(10);
const READ_CHUNK: usize = 4096;
const TRANSCRIPT_LIMIT: usize = 64 * 1024;

/// The two console toggles of an interactive session.
///
/// `output` controls whether remote output reaches the local console;
/// `input` whether local keystrokes are sent to the remote shell.
#[derive(Debug)]
pub struct Forwarding {
    output: AtomicBool,
    input: AtomicBool,
}

impl Default for Forwarding {
    fn default() -> Self {
        Self::new()
    }
}

impl Forwarding {
    /// Output on, input off.
    pub fn new() -> Self {
        Self {
            output: AtomicBool::new(true),
            input: AtomicBool::new(false),
        }
    }

    pub fn output(&self) -> bool {
        self.output.load(Ordering::SeqCst)
    }

    pub fn set_output(&self, enabled: bool) {
        self.output.store(enabled, Ordering::SeqCst);
    }

    pub fn input(&self) -> bool {
        self.input.load(Ordering::SeqCst)
    }

    pub fn set_input(&self, enabled: bool) {
        self.input.store(enabled, Ordering::SeqCst);
    }

    /// Flip input forwarding and return the new state.
    pub fn toggle_input(&self) -> bool {
        !self.input.fetch_xor(true, Ordering::SeqCst)
    }
}

/// Receives decoded terminal output on the session thread.
pub trait DecoderSink: Send {
    fn on_event(&mut self, event: DecodedEvent);

    /// Called after each chunk of output has been decoded.
    fn flush(&mut self) {}

    fn on_error(&mut self, error: &io::Error) {
        crate::console::error(&format!("Shell stream error: {error}"));
    }
}

/// Writes remote output to a local terminal, honouring output forwarding.
pub struct ConsoleSink<W: Write + Send = Stdout> {
    out: W,
    forwarding: Arc<Forwarding>,
}

impl ConsoleSink<Stdout> {
    pub fn new(forwarding: Arc<Forwarding>) -> Self {
        Self::with_writer(io::stdout(), forwarding)
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn with_writer(out: W, forwarding: Arc<Forwarding>) -> Self {
        Self { out, forwarding }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn apply(&mut self, command: EscapeCommand) -> io::Result<()> {
        let EscapeCommand::Sgr(sgr) = command else {
            return Ok(());
        };
        if sgr.is_reset() {
            self.out.queue(ResetColor)?;
            return Ok(());
        }
        if let Some(color) = sgr.foreground_color() {
            self.out.queue(SetForegroundColor(color.to_crossterm()))?;
        }
        if let Some(color) = sgr.background_color() {
            self.out.queue(SetBackgroundColor(color.to_crossterm()))?;
        }
        Ok(())
    }
}

impl<W: Write + Send> DecoderSink for ConsoleSink<W> {
    fn on_event(&mut self, event: DecodedEvent) {
        // Sequences are still interpreted while output is muted so that
        // unhandled ones show up in the debug log.
        let result = match event {
            DecodedEvent::Sequence(seq) => {
                let command = interpret(&seq);
                if self.forwarding.output() {
                    self.apply(command)
                } else {
                    Ok(())
                }
            }
            _ if !self.forwarding.output() => Ok(()),
            DecodedEvent::Char(byte) => self.out.write_all(&[byte]),
            DecodedEvent::Bell => self.out.write_all(&[super::decoder::BEL]),
            DecodedEvent::Unprintable(byte) => write!(self.out, "[NPC {byte}]"),
        };
        if let Err(e) = result {
            warn!(error = %e, "failed to write shell output");
        }
    }

    fn flush(&mut self) {
        let _ = self.out.flush();
    }
}

/// Handle to a running session thread.
pub struct ShellHandle {
    input: Sender<Vec<u8>>,
    transcript: Arc<Mutex<Vec<u8>>>,
    closed: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ShellHandle {
    /// Queue raw bytes for the remote shell. Returns `false` once the
    /// session has ended.
    pub fn send(&self, bytes: impl Into<Vec<u8>>) -> bool {
        !self.is_closed() && self.input.send(bytes.into()).is_ok()
    }

    /// Send `line` followed by CR LF.
    pub fn send_line(&self, line: &str) -> bool {
        self.send(format!("{line}\r\n"))
    }

    /// Send `line` and wait until the output received afterwards contains
    /// `pattern`.
    ///
    /// Returns the output seen so far, or `None` if the pattern did not
    /// show up within `timeout`. A session that ends while waiting returns
    /// what it produced.
    pub fn send_line_and_expect(
        &self,
        line: &str,
        pattern: &str,
        timeout: Duration,
    ) -> Option<String> {
        self.transcript.lock().clear();
        if !self.send_line(line) {
            return None;
        }

        let deadline = Instant::now() + timeout;
        loop {
            let seen = String::from_utf8_lossy(&self.transcript.lock()).into_owned();
            if seen.contains(pattern) || self.is_closed() {
                return Some(seen);
            }
            if Instant::now() >= deadline {
                debug!(pattern, "expected shell output did not arrive");
                return None;
            }
            thread::sleep(PUMP_QUANTUM);
        }
    }

    /// Whether the session thread has finished (EOF, error or stop).
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop the session thread and wait for it.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("shell session thread panicked");
        }
    }
}

impl Drop for ShellHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct ShellSession;

impl ShellSession {
    pub fn spawn<S, K>(stream: S, sink: K) -> io::Result<ShellHandle>
    where
        S: Read + Write + Send + 'static,
        K: DecoderSink + 'static,
    {
        let (tx, rx) = crossbeam_channel::unbounded();
        let transcript = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));

        let pump = Pump {
            stream,
            sink,
            input: rx,
            decoder: EscapeDecoder::new(),
            transcript: transcript.clone(),
            stop: stop.clone(),
        };
        let thread_closed = closed.clone();
        let thread = thread::Builder::new()
            .name("shell-session".into())
            .spawn(move || {
                pump.run();
                thread_closed.store(true, Ordering::SeqCst);
            })?;

        Ok(ShellHandle {
            input: tx,
            transcript,
            closed,
            stop,
            thread: Some(thread),
        })
    }
}

struct Pump<S, K> {
    stream: S,
    sink: K,
    input: Receiver<Vec<u8>>,
    decoder: EscapeDecoder,
    transcript: Arc<Mutex<Vec<u8>>>,
    stop: Arc<AtomicBool>,
}

impl<S: Read + Write, K: DecoderSink> Pump<S, K> {
    fn run(mut self) {
        let mut buf = [0u8; READ_CHUNK];
        while !self.stop.load(Ordering::SeqCst) {
            if let Err(e) = self.write_pending() {
                self.sink.on_error(&e);
                break;
            }

            match self.stream.read(&mut buf) {
                Ok(0) => {
                    debug!("shell stream reached end of file");
                    break;
                }
                Ok(n) => self.receive(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(PUMP_QUANTUM),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.sink.on_error(&e);
                    break;
                }
            }
        }
        self.sink.flush();
    }

    fn receive(&mut self, bytes: &[u8]) {
        {
            let mut transcript = self.transcript.lock();
            transcript.extend_from_slice(bytes);
            if transcript.len() > TRANSCRIPT_LIMIT {
                let excess = transcript.len() - TRANSCRIPT_LIMIT;
                transcript.drain(..excess);
            }
        }
        let sink = &mut self.sink;
        self.decoder.feed(bytes, |event| sink.on_event(event));
        self.sink.flush();
    }

    fn write_pending(&mut self) -> io::Result<()> {
        loop {
            match self.input.try_recv() {
                Ok(bytes) => write_all_nonblocking(&mut self.stream, &bytes)?,
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return Ok(()),
            }
        }
    }
}

fn write_all_nonblocking<S: Write>(stream: &mut S, mut bytes: &[u8]) -> io::Result<()> {
    while !bytes.is_empty() {
        match stream.write(bytes) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => bytes = &bytes[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(Duration::from_millis(1)),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    loop {
        match stream.flush() {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(Duration::from_millis(1)),
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Non-blocking in-process stand-in for a pty channel.
    struct FakePty {
        output: Receiver<Vec<u8>>,
        pending: Vec<u8>,
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl Read for FakePty {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pending.is_empty() {
                match self.output.try_recv() {
                    Ok(chunk) => self.pending = chunk,
                    Err(TryRecvError::Empty) => return Err(io::ErrorKind::WouldBlock.into()),
                    Err(TryRecvError::Disconnected) => return Ok(0),
                }
            }
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            Ok(n)
        }
    }

    impl Write for FakePty {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn fake_pty() -> (FakePty, Sender<Vec<u8>>, Arc<Mutex<Vec<u8>>>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let written = Arc::new(Mutex::new(Vec::new()));
        let pty = FakePty {
            output: rx,
            pending: Vec::new(),
            written: written.clone(),
        };
        (pty, tx, written)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn toggle_input_returns_new_state() {
        let forwarding = Forwarding::new();
        assert!(forwarding.output());
        assert!(!forwarding.input());
        assert!(forwarding.toggle_input());
        assert!(forwarding.input());
        assert!(!forwarding.toggle_input());
    }

    #[test]
    fn output_is_forwarded_without_escape_bytes() {
        let (pty, remote_out, _) = fake_pty();
        let screen = SharedBuf::default();
        let forwarding = Arc::new(Forwarding::new());
        let mut handle =
            ShellSession::spawn(pty, ConsoleSink::with_writer(screen.clone(), forwarding)).unwrap();

        remote_out.send(b"\x1b]0;title\x07hello\r\n".to_vec()).unwrap();
        wait_for(|| screen.0.lock().ends_with(b"hello\r\n"));
        handle.stop();

        assert_eq!(screen.0.lock().as_slice(), b"hello\r\n");
    }

    #[test]
    fn muted_output_is_not_written() {
        let (pty, remote_out, _) = fake_pty();
        let screen = SharedBuf::default();
        let forwarding = Arc::new(Forwarding::new());
        forwarding.set_output(false);
        let handle = ShellSession::spawn(
            pty,
            ConsoleSink::with_writer(screen.clone(), forwarding.clone()),
        )
        .unwrap();

        remote_out.send(b"secret".to_vec()).unwrap();
        drop(remote_out);
        wait_for(|| handle.is_closed());
        assert!(screen.0.lock().is_empty());
    }

    #[test]
    fn input_is_written_to_stream() {
        let (pty, _remote_out, written) = fake_pty();
        let forwarding = Arc::new(Forwarding::new());
        let handle =
            ShellSession::spawn(pty, ConsoleSink::with_writer(io::sink(), forwarding)).unwrap();

        assert!(handle.send_line("ls -la"));
        wait_for(|| written.lock().as_slice() == b"ls -la\r\n");
    }

    #[test]
    fn expect_sees_output_after_send() {
        let (pty, remote_out, written) = fake_pty();
        let forwarding = Arc::new(Forwarding::new());
        let handle =
            ShellSession::spawn(pty, ConsoleSink::with_writer(io::sink(), forwarding)).unwrap();

        let responder = thread::spawn(move || {
            wait_for(|| written.lock().ends_with(b"exit\r\n"));
            remote_out.send(b"exit\r\nlogout\r\n".to_vec()).unwrap();
            remote_out
        });

        let seen = handle.send_line_and_expect("exit", "logout", Duration::from_secs(5));
        assert!(seen.is_some_and(|text| text.trim_end().ends_with("logout")));
        drop(responder.join().unwrap());
    }

    #[test]
    fn expect_times_out() {
        let (pty, _remote_out, _) = fake_pty();
        let forwarding = Arc::new(Forwarding::new());
        let handle =
            ShellSession::spawn(pty, ConsoleSink::with_writer(io::sink(), forwarding)).unwrap();
        let seen = handle.send_line_and_expect("exit", "logout", Duration::from_millis(50));
        assert_eq!(seen, None);
    }

    #[test]
    fn eof_closes_session() {
        let (pty, remote_out, _) = fake_pty();
        let forwarding = Arc::new(Forwarding::new());
        let handle =
            ShellSession::spawn(pty, ConsoleSink::with_writer(io::sink(), forwarding)).unwrap();
        drop(remote_out);
        wait_for(|| handle.is_closed());
        assert!(!handle.send("late"));
    }
}
