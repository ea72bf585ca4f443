use std::{
    net::{SocketAddr, TcpListener},
    path::PathBuf,
    sync::Arc,
    thread,
    time::Duration,
};

use log::{debug, info, warn};
use nix::sys::resource::{getrlimit, setrlimit, Resource};

use crate::{
    connection::Connection,
    error::ServerError,
    handlers::process_connection,
    shutdown::Shutdown,
    thread_pool::{EnqueueError, ThreadPool},
};

/// Pause after the first failed `accept`; doubled per consecutive failure.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(5);
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Delay before the next `accept` after `failures` consecutive errors.
fn accept_backoff(failures: u32) -> Duration {
    ACCEPT_BACKOFF
        .saturating_mul(1 << failures.saturating_sub(1).min(16))
        .min(MAX_ACCEPT_BACKOFF)
}

/// Binds and listens on the first address `addr` resolves to that accepts a bind.
pub fn bind(addr: &str) -> Result<TcpListener, ServerError> {
    let listener = TcpListener::bind(addr).map_err(|source| ServerError::Bind {
        addr: addr.to_owned(),
        source,
    })?;

    info!(
        "Listening on {}",
        listener.local_addr().map_err(ServerError::LocalAddr)?
    );
    Ok(listener)
}

/// Raises the soft open-file limit to the hard limit and returns the limit in
/// effect afterwards.
pub fn raise_fd_limit() -> nix::Result<u64> {
    let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE)?;

    match setrlimit(Resource::RLIMIT_NOFILE, hard, hard) {
        Ok(()) => Ok(hard),
        Err(e) => {
            warn!("setrlimit to {hard} open files failed: {e}");
            Ok(soft)
        }
    }
}

/// Owns the listening socket and feeds accepted connections to the pool.
pub struct Server {
    listener: TcpListener,
    root: Arc<PathBuf>,
    pool: Arc<ThreadPool>,
    shutdown: Shutdown,
}

impl Server {
    pub fn new(
        listener: TcpListener,
        root: PathBuf,
        pool: Arc<ThreadPool>,
    ) -> Result<Self, ServerError> {
        let shutdown = Shutdown::new(listener.local_addr().map_err(ServerError::LocalAddr)?);

        Ok(Self {
            listener,
            root: Arc::new(root),
            pool,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::LocalAddr)
    }

    /// Handle that stops `run` from any thread.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Accept loop. Returns once a shutdown was requested, or with an error if
    /// the pool no longer takes work.
    pub fn run(&self) -> Result<(), ServerError> {
        info!("Serving files from {}", self.root.display());

        let mut failures: u32 = 0;

        loop {
            let accepted = Connection::accept(&self.listener);

            if self.shutdown.is_requested() {
                debug!("Acceptor observed shutdown request");
                return Ok(());
            }

            let client = match accepted {
                Ok(client) => {
                    failures = 0;
                    client
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let pause = accept_backoff(failures);
                    if failures == 1 {
                        warn!("Failed to accept a connection: {e}");
                    } else {
                        debug!("accept failed {failures} times in a row, pausing {pause:?}: {e}");
                    }
                    thread::sleep(pause);
                    continue;
                }
            };

            let peer = client.peer_addr();
            let root = Arc::clone(&self.root);

            match self.pool.enqueue(move || process_connection(client, &root)) {
                Ok(()) => {}
                Err(EnqueueError::Saturated(pending)) => {
                    warn!("Refusing {peer:?}: {pending} connections already waiting");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Write},
        net::TcpStream,
    };

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::test_support::ScratchDir;

    fn get(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(request.as_bytes()).unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    #[test]
    fn serves_until_shutdown() {
        let site = ScratchDir::new("server-run");
        site.write("index.html", "hello world!");

        let pool = Arc::new(ThreadPool::new(0));
        pool.start(2).unwrap();

        let listener = bind("127.0.0.1:0").unwrap();
        let server = Server::new(listener, site.path().to_path_buf(), Arc::clone(&pool)).unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let acceptor = thread::spawn(move || server.run());

        let clients: Vec<_> = (0..16)
            .map(|_| thread::spawn(move || get(addr, "GET /index.html HTTP/1.0\r\n\r\n")))
            .collect();
        for client in clients {
            let response = client.join().unwrap();
            assert!(response.starts_with("HTTP/1.0 200 OK\r\n"));
            assert!(response.ends_with("\r\n\r\nhello world!"));
        }

        assert_eq!(
            get(addr, "GET /missing.html HTTP/1.0\r\n\r\n"),
            "HTTP/1.0 404 Not Found\r\n"
        );

        shutdown.request();
        assert!(acceptor.join().unwrap().is_ok());
        pool.stop();
    }

    #[test]
    fn stopped_pool_ends_the_acceptor() {
        let site = ScratchDir::new("server-stopped");
        let pool = Arc::new(ThreadPool::new(0));
        pool.start(1).unwrap();
        pool.stop();

        let listener = bind("127.0.0.1:0").unwrap();
        let server = Server::new(listener, site.path().to_path_buf(), pool).unwrap();
        let addr = server.local_addr().unwrap();
        let acceptor = thread::spawn(move || server.run());

        let _client = TcpStream::connect(addr).unwrap();
        let result = acceptor.join().unwrap();

        assert!(matches!(result, Err(ServerError::Pool(EnqueueError::Stopped))));
    }

    #[test]
    fn bind_failure_names_the_address() {
        let taken = bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        match bind(&addr) {
            Err(ServerError::Bind { addr: reported, .. }) => assert_eq!(reported, addr),
            other => panic!("expected a bind error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn accept_backoff_grows_and_is_capped() {
        assert_eq!(accept_backoff(1), Duration::from_millis(5));
        assert_eq!(accept_backoff(2), Duration::from_millis(10));
        assert_eq!(accept_backoff(4), Duration::from_millis(40));
        assert_eq!(accept_backoff(9), Duration::from_secs(1));
        assert_eq!(accept_backoff(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn fd_limit_is_reported() {
        assert!(raise_fd_limit().unwrap() > 0);
    }
}
