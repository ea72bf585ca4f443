//! Static-file HTTP/1.0 server.
//!
//! Accepted connections become tasks on a work-stealing [`thread_pool`];
//! each task runs the [`handlers`] pipeline (receive, parse, resolve,
//! respond, stream) and closes its socket when done.

pub mod config;
pub mod connection;
pub mod error;
pub mod file;
pub mod handlers;
pub mod http;
pub mod server;
pub mod shutdown;
pub mod thread_pool;

#[cfg(test)]
mod test_support;
