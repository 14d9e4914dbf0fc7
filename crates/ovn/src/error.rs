use std::io;

#[derive(Debug, thiserror::Error)]
pub enum OvnError {
    #[error("unknown destination: {0}")]
    UnknownDestination(crate::identity::DestinationHash),

    #[error("transport is shut down")]
    Shutdown,

    #[error("announce failed: {0}")]
    Announce(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}
