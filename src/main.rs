use std::{
    panic::{self, AssertUnwindSafe},
    process::ExitCode,
    sync::Arc,
};

use anyhow::Context;
use clap::Parser;
use log::{info, warn, LevelFilter};

use staticd::{
    config::Config,
    error::ServerError,
    server::{self, Server},
    shutdown::{self, Termination},
    thread_pool::ThreadPool,
};

fn main() -> ExitCode {
    pretty_env_logger::formatted_timed_builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let config = Config::parse();
    let pool = Arc::new(ThreadPool::new(config.max_pending));

    let result = panic::catch_unwind(AssertUnwindSafe(|| run(&config, &pool)));

    // Every exit path goes through here, so the workers are always joined.
    pool.stop();

    let termination = Termination::from_run(result);
    termination.report();
    termination.exit_code()
}

/// Starts everything and blocks in the acceptor. Returns whether the acceptor
/// stopped because a shutdown was requested.
fn run(config: &Config, pool: &Arc<ThreadPool>) -> anyhow::Result<bool> {
    info!(
        "Server host {}, port {}, directory {}",
        config.host,
        config.port,
        config.directory.display()
    );

    let root = config.server_root()?;

    match server::raise_fd_limit() {
        Ok(limit) => info!("Processing at most {limit} file descriptors at a time"),
        Err(e) => warn!("Could not query the open-file limit: {e}"),
    }

    let listener = server::bind(&config.bind_addr())?;

    pool.start(config.worker_count())
        .map_err(ServerError::from)
        .context("thread pool did not start")?;

    let server = Server::new(listener, root, Arc::clone(pool))?;
    let shutdown = server.shutdown_handle();
    let signals = shutdown::watch_signals(shutdown.clone()).map_err(ServerError::Signals)?;

    let served = server.run();
    signals.close();
    served?;

    Ok(shutdown.is_requested())
}
