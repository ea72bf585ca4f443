//! Cooperative shutdown: a flag that signal handlers and fatal paths set, a
//! wake-up for the blocked acceptor, and the final termination report.

use std::{
    any::Any,
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream},
    process::ExitCode,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use log::{error, info, warn};
use signal_hook::{
    consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM},
    iterator::{Handle, Signals},
};

const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct Shutdown {
    requested: Arc<AtomicBool>,
    wake_addr: SocketAddr,
}

impl Shutdown {
    /// `listen_addr` is the acceptor's bound address; a wildcard address is
    /// reached through loopback.
    pub fn new(listen_addr: SocketAddr) -> Self {
        let mut wake_addr = listen_addr;
        if wake_addr.ip().is_unspecified() {
            wake_addr.set_ip(match wake_addr.ip() {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            });
        }

        Self {
            requested: Arc::new(AtomicBool::new(false)),
            wake_addr,
        }
    }

    /// Sets the flag and unblocks `accept` with a throwaway connection. Only
    /// the first call does anything.
    pub fn request(&self) {
        if self.requested.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Err(e) = TcpStream::connect_timeout(&self.wake_addr, WAKE_TIMEOUT) {
            warn!("Failed to wake the acceptor at {}: {}", self.wake_addr, e);
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Spawns a thread that turns the first termination-class signal into a
/// shutdown request. The signal handler itself only writes to a self-pipe.
pub fn watch_signals(shutdown: Shutdown) -> io::Result<Handle> {
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGQUIT, SIGHUP])?;
    let handle = signals.handle();

    thread::Builder::new()
        .name("staticd-signals".to_owned())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!("Interrupted by signal {signal}, finishing the work and shutting down");
                shutdown.request();
            }
        })?;

    Ok(handle)
}

/// Why the process is about to exit.
#[derive(Debug)]
pub enum Termination {
    /// Signal or other explicit shutdown request.
    Requested,
    /// Startup or serving failed with an error.
    Failed(anyhow::Error),
    /// A panic with a readable message reached the top.
    Panicked(String),
    /// A panic whose payload carries no message.
    UnknownPanic,
    /// The acceptor returned without anybody asking it to.
    Abnormal,
}

impl Termination {
    /// Classifies the result of the serving routine, which reports whether a
    /// shutdown had been requested when it returned.
    pub fn from_run(result: thread::Result<anyhow::Result<bool>>) -> Self {
        match result {
            Ok(Ok(true)) => Self::Requested,
            Ok(Ok(false)) => Self::Abnormal,
            Ok(Err(e)) => Self::Failed(e),
            Err(payload) => match payload_message(payload.as_ref()) {
                Some(message) => Self::Panicked(message.to_owned()),
                None => Self::UnknownPanic,
            },
        }
    }

    pub fn report(&self) {
        let now = httpdate::fmt_http_date(std::time::SystemTime::now());
        match self {
            Self::Requested => info!("Exiting. {now}"),
            Self::Failed(e) => error!("Terminating at {now} because of an error: {e:#}"),
            Self::Panicked(message) => {
                error!("Terminating at {now} because of an unhandled panic: {message}")
            }
            Self::UnknownPanic => {
                error!("Terminating at {now} because of a panic with an unknown payload")
            }
            Self::Abnormal => {
                error!("Terminating at {now}: acceptor stopped without a shutdown request")
            }
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Requested => ExitCode::SUCCESS,
            _ => ExitCode::FAILURE,
        }
    }
}

fn payload_message(payload: &(dyn Any + Send)) -> Option<&str> {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload_message(payload).unwrap_or("non-string panic payload")
}
