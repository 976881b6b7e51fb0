//! SSH/SFTP implementation of the remote traits on top of `ssh2`.
//!
//! One [`SshConnection`] carries the command channel and the SFTP subsystem.
//! The interactive shell needs a non-blocking session, so it gets a dedicated
//! connection via [`SshConnection::open_shell`].

use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use ssh2::{Channel, ErrorCode, PtyModeOpcode, PtyModes, Session, Sftp};
use tracing::{debug, info};

use super::{
    CommandOutput, RemoteCommand, RemoteEntry, RemoteError, RemoteFiles, RemoteKind,
    RemoteSession, remote_join,
};

/// Terminal type requested for the remote pseudo-terminal.
pub const TERMINAL_NAME: &str = "xterm";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const KEEPALIVE_INTERVAL_SECS: u32 = 30;
const DRAIN_POLL: Duration = Duration::from_millis(5);
/// `LIBSSH2_FX_NO_SUCH_FILE`
const SFTP_NO_SUCH_FILE: i32 = 2;

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl ConnectionOptions {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A password-authenticated SSH session with lazily opened SFTP.
pub struct SshConnection {
    options: ConnectionOptions,
    session: Option<Session>,
    sftp: Option<Sftp>,
}

impl SshConnection {
    pub fn new(options: ConnectionOptions) -> Self {
        Self {
            options,
            session: None,
            sftp: None,
        }
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Open the TCP connection, handshake and authenticate.
    pub fn connect(&mut self) -> Result<(), RemoteError> {
        self.disconnect();

        let address = self.options.address();
        let connect_err = |message: String| RemoteError::Connect {
            host: address.clone(),
            message,
        };

        let socket_addr = address
            .to_socket_addrs()
            .map_err(|e| connect_err(e.to_string()))?
            .next()
            .ok_or_else(|| connect_err("host did not resolve".into()))?;
        let tcp = TcpStream::connect_timeout(&socket_addr, CONNECT_TIMEOUT)
            .map_err(|e| connect_err(e.to_string()))?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| connect_err(e.to_string()))?;
        session
            .userauth_password(&self.options.username, &self.options.password)
            .map_err(|_| self.auth_failed())?;
        if !session.authenticated() {
            return Err(self.auth_failed());
        }
        session.set_keepalive(true, KEEPALIVE_INTERVAL_SECS);

        debug!(address = %address, user = %self.options.username, "ssh session established");
        self.session = Some(session);
        Ok(())
    }

    fn auth_failed(&self) -> RemoteError {
        RemoteError::AuthenticationFailed {
            user: self.options.username.clone(),
            host: self.options.address(),
        }
    }

    /// Whether the session is authenticated and still answers keepalives.
    pub fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.authenticated() && s.keepalive_send().is_ok())
    }

    pub fn disconnect(&mut self) {
        self.sftp = None;
        if let Some(session) = self.session.take() {
            let _ = session.disconnect(None, "sshdeploy closing", None);
        }
    }

    fn session(&self) -> Result<&Session, RemoteError> {
        self.session
            .as_ref()
            .ok_or_else(|| RemoteError::NotConnected(self.options.address()))
    }

    fn sftp(&mut self) -> Result<&Sftp, RemoteError> {
        if self.sftp.is_none() {
            let sftp = self.session()?.sftp()?;
            self.sftp = Some(sftp);
        }
        self.sftp
            .as_ref()
            .ok_or_else(|| RemoteError::NotConnected(self.options.address()))
    }

    /// Turn this connection into an interactive shell.
    ///
    /// `echo` controls whether the remote pty echoes input back. The session
    /// is switched to non-blocking mode, so it cannot be used for anything
    /// else afterwards.
    pub fn open_shell(
        mut self,
        columns: u32,
        rows: u32,
        echo: bool,
    ) -> Result<ShellChannel, RemoteError> {
        if !self.is_connected() {
            self.connect()?;
        }
        let session = self
            .session
            .take()
            .ok_or_else(|| RemoteError::NotConnected(self.options.address()))?;

        let mut modes = PtyModes::new();
        modes.set_boolean(PtyModeOpcode::ECHO, echo);
        modes.set_boolean(PtyModeOpcode::IGNCR, true);

        let mut channel = session.channel_session()?;
        channel.request_pty(TERMINAL_NAME, Some(modes), Some((columns, rows, 0, 0)))?;
        channel.shell()?;
        session.set_blocking(false);

        info!(address = %self.options.address(), columns, rows, echo, "interactive shell opened");
        Ok(ShellChannel {
            _session: session,
            channel,
        })
    }
}

impl Drop for SshConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn is_no_such_file(err: &ssh2::Error) -> bool {
    matches!(err.code(), ErrorCode::SFTP(code) if code == SFTP_NO_SUCH_FILE)
}

impl RemoteCommand for SshConnection {
    fn execute(&mut self, command: &str) -> Result<CommandOutput, RemoteError> {
        let session = self.session()?;
        let mut channel = session.channel_session()?;
        channel.exec(command)?;

        // Both streams are drained together; a full stderr window would
        // otherwise stall the remote before stdout reaches EOF.
        session.set_blocking(false);
        let drained = drain_output(&mut channel.stream(0), &mut channel.stderr(), || {
            channel.eof()
        });
        session.set_blocking(true);
        let (stdout, stderr) = drained?;

        channel.wait_close()?;
        let exit_status = channel.exit_status()?;
        Ok(CommandOutput {
            exit_status,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

/// Read `stdout` and `stderr` of a non-blocking channel until both are
/// exhausted and `at_eof` reports the remote end closed.
fn drain_output<O: Read, E: Read>(
    stdout: &mut O,
    stderr: &mut E,
    mut at_eof: impl FnMut() -> bool,
) -> io::Result<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    let mut err = Vec::new();
    let mut buf = [0u8; 16 * 1024];
    loop {
        let read = read_available(stdout, &mut buf, &mut out)?
            + read_available(stderr, &mut buf, &mut err)?;
        if read > 0 {
            continue;
        }
        if at_eof() {
            read_available(stdout, &mut buf, &mut out)?;
            read_available(stderr, &mut buf, &mut err)?;
            return Ok((out, err));
        }
        std::thread::sleep(DRAIN_POLL);
    }
}

/// Append whatever `reader` has ready to `sink` without blocking.
fn read_available<R: Read>(reader: &mut R, buf: &mut [u8], sink: &mut Vec<u8>) -> io::Result<usize> {
    let mut total = 0;
    loop {
        match reader.read(buf) {
            Ok(0) => return Ok(total),
            Ok(n) => {
                sink.extend_from_slice(&buf[..n]);
                total += n;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(total),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

impl RemoteFiles for SshConnection {
    fn stat(&mut self, path: &str) -> Result<Option<RemoteKind>, RemoteError> {
        match self.sftp()?.stat(Path::new(path)) {
            Ok(stat) if stat.is_dir() => Ok(Some(RemoteKind::Directory)),
            Ok(_) => Ok(Some(RemoteKind::File)),
            Err(e) if is_no_such_file(&e) => Ok(None),
            Err(e) => Err(RemoteError::operation("stat", path, e)),
        }
    }

    fn list_dir(&mut self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let listing = self
            .sftp()?
            .readdir(Path::new(path))
            .map_err(|e| RemoteError::operation("readdir", path, e))?;

        Ok(listing
            .into_iter()
            .filter_map(|(child, stat)| {
                let name = child.file_name()?.to_string_lossy().into_owned();
                Some(RemoteEntry {
                    path: remote_join(path, &name),
                    name,
                    kind: if stat.is_dir() {
                        RemoteKind::Directory
                    } else {
                        RemoteKind::File
                    },
                })
            })
            .collect())
    }

    fn create_dir(&mut self, path: &str) -> Result<(), RemoteError> {
        self.sftp()?
            .mkdir(Path::new(path), 0o755)
            .map_err(|e| RemoteError::operation("mkdir", path, e))
    }

    fn remove_file(&mut self, path: &str) -> Result<(), RemoteError> {
        self.sftp()?
            .unlink(Path::new(path))
            .map_err(|e| RemoteError::operation("rm", path, e))
    }

    fn remove_dir(&mut self, path: &str) -> Result<(), RemoteError> {
        self.sftp()?
            .rmdir(Path::new(path))
            .map_err(|e| RemoteError::operation("rmdir", path, e))
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, RemoteError> {
        let mut source = File::open(local).map_err(|e| RemoteError::local_io(local, e))?;
        let mut target = self
            .sftp()?
            .create(Path::new(remote))
            .map_err(|e| RemoteError::operation("put", remote, e))?;
        let written = io::copy(&mut source, &mut target)
            .map_err(|e| RemoteError::operation("put", remote, e))?;
        target.flush()?;
        Ok(written)
    }
}

impl RemoteSession for SshConnection {
    fn ensure_connected(&mut self) -> Result<(), RemoteError> {
        if self.is_connected() {
            return Ok(());
        }
        crate::console::line(&format!(
            "Connecting to host {} via SSH.",
            self.options.address()
        ));
        self.connect()
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.options.username, self.options.address())
    }
}

/// Non-blocking pseudo-terminal stream of a remote login shell.
///
/// Reads return `WouldBlock` when no output is pending.
pub struct ShellChannel {
    _session: Session,
    channel: Channel,
}

impl ShellChannel {
    pub fn is_eof(&self) -> bool {
        self.channel.eof()
    }
}

impl Read for ShellChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.channel.read(buf)
    }
}

impl Write for ShellChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.channel.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.channel.flush()
    }
}
