use std::{io, path::PathBuf};

use thiserror::Error;

use crate::thread_pool::{EnqueueError, StartError};

/// Failures that stop the server. All but `Pool` can only happen at startup.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind and listen on {addr}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to read the listening address")]
    LocalAddr(#[source] io::Error),
    #[error("server root {} is not a readable directory", .path.display())]
    Root {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to start the connection pool")]
    Start(#[from] StartError),
    #[error("connection pool refused work")]
    Pool(#[from] EnqueueError),
    #[error("failed to install signal handlers")]
    Signals(#[source] io::Error),
}
