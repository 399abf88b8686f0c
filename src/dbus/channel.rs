//! Typed channels for the proxy's two-pipe protocol.
//!
//! ```text
//!   busgate                                   xdg-dbus-proxy
//!   ConfigSink       --- args pipe ----->     --args=<fd>
//!     "arg\0" "arg\0" ... close = end of configuration
//!   ReadinessChannel <-- status pipe ---      --fd=<fd>
//!     one byte = ready, EOF = failed; our close = shutdown cue
//! ```

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::OwnedFd;

use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use tracing::debug;

use super::error::ProxyError;

/// Writer half of the arguments pipe.
///
/// Each argument is framed as its bytes followed by a NUL. Dropping or
/// calling [`ConfigSink::finish`] closes the pipe, which the proxy reads as
/// the end of its configuration.
#[derive(Debug)]
pub struct ConfigSink<W: Write = File> {
    writer: W,
    sent: usize,
}

impl<W: Write> ConfigSink<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self { writer, sent: 0 }
    }

    /// Send one NUL-terminated argument.
    pub fn send(&mut self, arg: &str) -> Result<(), ProxyError> {
        if arg.as_bytes().contains(&0) {
            return Err(ProxyError::NulInArgument(arg.to_string()));
        }
        debug!("xdg-dbus-proxy arg: {}", arg);

        let mut frame = Vec::with_capacity(arg.len() + 1);
        frame.extend_from_slice(arg.as_bytes());
        frame.push(0);
        self.writer.write_all(&frame).map_err(ProxyError::WriteArgs)?;
        self.sent += 1;
        Ok(())
    }

    /// Send several arguments in order.
    pub fn send_all<I, S>(&mut self, args: I) -> Result<(), ProxyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.send(arg.as_ref())?;
        }
        Ok(())
    }

    /// Number of arguments sent so far.
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Flush and close the channel, returning the writer.
    pub fn finish(mut self) -> Result<W, ProxyError> {
        self.writer.flush().map_err(ProxyError::WriteArgs)?;
        Ok(self.writer)
    }
}

/// What the proxy reported on the status pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// One byte arrived: the proxy is listening.
    Ready,
    /// EOF: the proxy exited before becoming ready.
    Failed,
}

/// Reader half of the status pipe.
///
/// Read once for readiness, then held open as the proxy's control channel
/// until teardown.
#[derive(Debug)]
pub struct ReadinessChannel<R: Read = File> {
    reader: R,
}

impl<R: Read> ReadinessChannel<R> {
    /// Wrap a reader.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Block until the proxy reports readiness or closes the pipe.
    pub fn wait(&mut self) -> Result<Readiness, ProxyError> {
        let mut buf = [0u8; 1];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => return Ok(Readiness::Failed),
                Ok(_) => return Ok(Readiness::Ready),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(ProxyError::ReadStatus(e)),
            }
        }
    }

    /// Close the channel. The proxy may treat this as its shutdown cue.
    pub fn close(self) {
        drop(self.reader);
    }
}

/// Both pipes of the protocol. The parent ends are close-on-exec; the child
/// ends are handed to the spawned proxy and must be dropped by the parent
/// once the child exists.
#[derive(Debug)]
pub struct ProxyPipes {
    /// Parent end of the status pipe.
    pub status: ReadinessChannel,
    /// Parent end of the arguments pipe.
    pub config: ConfigSink,
    /// Child end of the status pipe (write).
    pub child_status: OwnedFd,
    /// Child end of the arguments pipe (read).
    pub child_args: OwnedFd,
}

impl ProxyPipes {
    /// Create the status and arguments pipes.
    pub fn new() -> Result<Self, ProxyError> {
        let (status_read, status_write) = pipe2(OFlag::O_CLOEXEC).map_err(|e| ProxyError::Pipe {
            which: "status",
            source: e,
        })?;
        let (args_read, args_write) = pipe2(OFlag::O_CLOEXEC).map_err(|e| ProxyError::Pipe {
            which: "arguments",
            source: e,
        })?;

        Ok(Self {
            status: ReadinessChannel::new(File::from(status_read)),
            config: ConfigSink::new(File::from(args_write)),
            child_status: status_write,
            child_args: args_read,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_config_sink_framing() {
        let mut sink = ConfigSink::new(Vec::new());
        sink.send("unix:path=/run/user/1000/bus").unwrap();
        sink.send_all(["--filter", "--talk=org.foo"]).unwrap();
        assert_eq!(sink.sent(), 3);

        let bytes = sink.finish().unwrap();
        assert_eq!(
            bytes,
            b"unix:path=/run/user/1000/bus\0--filter\0--talk=org.foo\0".to_vec()
        );
    }

    #[test]
    fn test_config_sink_rejects_nul() {
        let mut sink = ConfigSink::new(Vec::new());
        let err = sink.send("bad\0arg").unwrap_err();
        assert!(matches!(err, ProxyError::NulInArgument(_)));
        assert_eq!(sink.sent(), 0);
    }

    #[test]
    fn test_readiness() {
        let mut ready = ReadinessChannel::new(Cursor::new(vec![b'x']));
        assert_eq!(ready.wait().unwrap(), Readiness::Ready);

        let mut failed = ReadinessChannel::new(Cursor::new(Vec::new()));
        assert_eq!(failed.wait().unwrap(), Readiness::Failed);
    }

    #[test]
    fn test_pipes_round_trip() {
        let pipes = ProxyPipes::new().unwrap();
        let ProxyPipes {
            mut status,
            config,
            child_status,
            child_args,
        } = pipes;

        let mut child_writer = File::from(child_status);
        child_writer.write_all(b"x").unwrap();
        assert_eq!(status.wait().unwrap(), Readiness::Ready);

        drop(child_writer);
        assert_eq!(status.wait().unwrap(), Readiness::Failed);

        let mut config = config;
        config.send("--filter").unwrap();
        drop(config.finish().unwrap());

        let mut received = Vec::new();
        File::from(child_args).read_to_end(&mut received).unwrap();
        assert_eq!(received, b"--filter\0");
    }
}
