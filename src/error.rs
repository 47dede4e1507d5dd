use std::fmt;
use std::io;
use std::result::Result as StdResult;

pub type Result<T> = StdResult<T, Error>;

/// Errors surfaced by the fallible constructors in this crate.
///
/// Runtime failures inside the reactor core follow a two-tier policy
/// instead of flowing through this type: conditions the loop cannot
/// recover from (event-registration failures, a broken poll call)
/// panic on the loop thread after logging, while transient conditions
/// (interrupted polls, failed unregistrations, per-connection accept
/// errors) are logged and absorbed where they occur.
#[derive(Debug)]
pub enum Error {
    /// Creating or driving the OS polling context failed.
    Io(io::Error),
    /// Setting up the listening socket (socket/bind/listen) failed.
    Listen(io::Error),
    /// Spawning an OS thread failed.
    ThreadSpawn(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Listen(e) => write!(f, "Listen error: {}", e),
            Error::ThreadSpawn(e) => write!(f, "Thread spawn error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) | Error::Listen(e) | Error::ThreadSpawn(e) => Some(e),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}
