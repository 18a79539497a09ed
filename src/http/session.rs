//! Transport session abstraction
//!
//! The HTTP/2 engine never opens connections itself. It is handed an
//! already-established duplex byte stream and splits it into a reader half,
//! owned by the connection's reader thread, and a writer half, shared by
//! application threads behind a lock. Plain TCP and Unix sockets are
//! supported out of the box; TLS layers plug in by implementing [`Session`].

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::unix::net::UnixStream;
use std::time::Duration;

/// Boxed reader half of a session
pub type SessionReader = Box<dyn Read + Send>;

/// Boxed writer half of a session
pub type SessionWriter = Box<dyn Write + Send>;

/// A duplex byte stream that can be split into independent halves
pub trait Session: Send + 'static {
    /// Split into owned reader and writer halves
    fn split(self) -> io::Result<(SessionReader, SessionWriter)>;

    /// Bound on how long a single write may block
    ///
    /// The default does nothing; socket sessions forward to the OS.
    fn set_write_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    /// Handle that can tear the session down from another thread
    ///
    /// Used to unblock the reader thread on shutdown.
    fn shutdown_handle(&self) -> io::Result<Option<Box<dyn ShutdownHandle>>> {
        Ok(None)
    }
}

/// Closes both directions of a session
pub trait ShutdownHandle: Send + Sync {
    /// Shut down reads and writes; a thread parked in `read` wakes with EOF or an error
    fn shutdown(&self) -> io::Result<()>;
}

impl Session for TcpStream {
    fn split(self) -> io::Result<(SessionReader, SessionWriter)> {
        self.set_nodelay(true)?;
        let reader = self.try_clone()?;
        Ok((Box::new(reader), Box::new(self)))
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_write_timeout(self, timeout)
    }

    fn shutdown_handle(&self) -> io::Result<Option<Box<dyn ShutdownHandle>>> {
        Ok(Some(Box::new(self.try_clone()?)))
    }
}

impl ShutdownHandle for TcpStream {
    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

impl Session for UnixStream {
    fn split(self) -> io::Result<(SessionReader, SessionWriter)> {
        let reader = self.try_clone()?;
        Ok((Box::new(reader), Box::new(self)))
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        UnixStream::set_write_timeout(self, timeout)
    }

    fn shutdown_handle(&self) -> io::Result<Option<Box<dyn ShutdownHandle>>> {
        Ok(Some(Box::new(self.try_clone()?)))
    }
}

impl ShutdownHandle for UnixStream {
    fn shutdown(&self) -> io::Result<()> {
        UnixStream::shutdown(self, Shutdown::Both)
    }
}
