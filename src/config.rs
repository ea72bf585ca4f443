use std::{fs, io, num::NonZeroUsize, path::PathBuf, thread};

use clap::{ArgAction, Parser};

use crate::error::ServerError;

/// Workers used when neither `--workers` nor the available parallelism is known.
const FALLBACK_WORKERS: usize = 4;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "staticd",
    version,
    about = "Serves files from a directory over HTTP/1.0",
    disable_help_flag = true
)]
pub struct Config {
    /// IP or host name to bind (e.g. 127.0.0.1)
    #[arg(short = 'h', long, env = "STATICD_HOST")]
    pub host: String,

    /// Port to listen on (use 1024..65535 without privileges)
    #[arg(short, long, env = "STATICD_PORT")]
    pub port: u16,

    /// Directory whose files are served
    #[arg(short, long, env = "STATICD_DIRECTORY")]
    pub directory: PathBuf,

    /// Worker threads [default: available parallelism]
    #[arg(short, long, env = "STATICD_WORKERS")]
    pub workers: Option<NonZeroUsize>,

    /// Queued connections before new ones are refused; 0 disables the limit
    #[arg(long, env = "STATICD_MAX_PENDING", default_value_t = 1024)]
    pub max_pending: usize,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,
}

impl Config {
    pub fn worker_count(&self) -> usize {
        self.workers.map(NonZeroUsize::get).unwrap_or_else(|| {
            thread::available_parallelism().map_or(FALLBACK_WORKERS, NonZeroUsize::get)
        })
    }

    /// Canonical absolute form of `directory`; fails unless it is a directory.
    pub fn server_root(&self) -> Result<PathBuf, ServerError> {
        let root_error = |source| ServerError::Root {
            path: self.directory.clone(),
            source,
        };

        let root = fs::canonicalize(&self.directory).map_err(root_error)?;
        if !root.is_dir() {
            return Err(root_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a directory",
            )));
        }

        Ok(root)
    }

    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}
