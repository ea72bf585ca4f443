use std::{
    io,
    panic::{self, AssertUnwindSafe},
    path::Path,
    time::{Duration, SystemTime},
};

use bytes::BytesMut;
use httpdate::fmt_http_date;
use log::{debug, error, warn};
use thiserror::Error;

use crate::{
    connection::{Connection, SendFile},
    file::OpenFile,
    http::{
        status_line, HeaderBlock, ParseRequestError, ParseRequestErrorKind, Request, StatusCode,
        SERVER_NAME,
    },
    shutdown::panic_message,
};

/// A request must fit into one receive of this size.
pub const RECEIVE_BUFFER_SIZE: usize = 8192;

/// Bound on sendfile calls per response; a stalled client is not retried past it.
pub const MAX_SEND_ATTEMPTS: usize = 3;

/// Input left behind by an oversized request that is drained before closing.
const DISCARD_LIMIT: usize = 64 * 1024;
const DISCARD_WAIT: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to receive the request")]
    Receive(#[source] io::Error),
    #[error("failed to send the response preamble")]
    Send(#[source] io::Error),
    #[error("failed to stream {location}")]
    Stream {
        location: String,
        #[source]
        source: io::Error,
    },
}

/// Bytes copied by one `send_file` run.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct StreamOutcome {
    pub sent: u64,
    pub attempts: usize,
}

/// Runs the whole pipeline for one accepted connection. Nothing escapes this
/// function: errors and panics are logged and the socket is closed on return.
pub fn process_connection(mut client: Connection, root: &Path) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| handle_connection(&mut client, root)));

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Client {} remains unprocessed: {}", client, error_chain(&e)),
        Err(payload) => error!(
            "Client {}: request handling panicked: {}",
            client,
            panic_message(payload.as_ref())
        ),
    }
}

fn handle_connection(client: &mut Connection, root: &Path) -> Result<(), ConnectionError> {
    let mut buf = BytesMut::zeroed(RECEIVE_BUFFER_SIZE);
    let received = client.receive(&mut buf).map_err(ConnectionError::Receive)?;

    if received == 0 {
        debug!("Client {} closed before sending a request", client);
        return Ok(());
    }
    buf.truncate(received);

    if received == RECEIVE_BUFFER_SIZE && !buf.contains(&b'\n') {
        // The request line alone overflows the buffer.
        reject(client, ParseRequestError::new(ParseRequestErrorKind::UriTooLong, true))?;
        match client.discard_unread(DISCARD_LIMIT, DISCARD_WAIT) {
            Ok(discarded) => debug!("Client {}: dropped {} more request bytes", client, discarded),
            Err(e) => debug!("Client {}: failed to drain the request: {}", client, e),
        }
        return Ok(());
    }

    match Request::parse(&buf) {
        Ok(request) => serve_file(client, &request, root),
        Err(e) => reject(client, e),
    }
}

fn reject(client: &mut Connection, e: ParseRequestError) -> Result<(), ConnectionError> {
    debug!(
        "Client {}: {} (kind {:?}, status {})",
        client,
        e,
        e.kind(),
        e.status_code().code()
    );

    if e.status_required() {
        send_status_line(client, e.status_code().code())?;
    }
    Ok(())
}

fn serve_file(
    client: &mut Connection,
    request: &Request,
    root: &Path,
) -> Result<(), ConnectionError> {
    let path = request.resolve(root);
    debug!(
        "Client {} requested {} {} ({:?})",
        client,
        request.method(),
        path.display(),
        request.version()
    );

    let mut file = match OpenFile::open(&path, request.location()) {
        Ok(file) => file,
        Err(e) => {
            debug!("Client {}: cannot open {}: {}", client, path.display(), e);
            if request.status_required() {
                send_status_line(client, StatusCode::NotFound.code())?;
            }
            return Ok(());
        }
    };

    if request.status_required() {
        send_status_line(client, request.status().code())?;
        send_headers(client, &file)?;
    }

    let streamed = send_file(client, &file);
    file.close();

    let outcome = streamed.map_err(|source| ConnectionError::Stream {
        location: file.location().to_owned(),
        source,
    })?;

    if outcome.sent < file.size() {
        debug!(
            "Client {}: sent {} of {} bytes of {} in {} attempts",
            client,
            outcome.sent,
            file.size(),
            file.location(),
            outcome.attempts
        );
    }
    Ok(())
}

fn send_status_line(client: &mut Connection, code: u16) -> Result<(), ConnectionError> {
    client
        .send_all(&status_line(code))
        .map_err(ConnectionError::Send)
}

fn send_headers(client: &mut Connection, file: &OpenFile) -> Result<(), ConnectionError> {
    let headers = file_headers(file, SystemTime::now());
    client
        .send_all(&headers.to_bytes())
        .map_err(ConnectionError::Send)
}

pub fn file_headers(file: &OpenFile, now: SystemTime) -> HeaderBlock {
    HeaderBlock::new()
        .header("Date", fmt_http_date(now))
        .header("Location", file.location())
        .header("Server", SERVER_NAME)
        .header("Allow", "GET")
        .header("Content-Length", file.size())
        .header("Content-Type", file.mime_type())
        .header("Expires", fmt_http_date(now))
        .header("Last-Modified", fmt_http_date(file.last_modified()))
}

/// Streams `file` into `sink` with at most `MAX_SEND_ATTEMPTS` calls. Each call
/// resumes at the offset the previous one reached. A call that moves no bytes
/// ends the transfer; interrupted calls use up an attempt and are retried.
pub fn send_file<S: SendFile>(sink: &mut S, file: &OpenFile) -> io::Result<StreamOutcome> {
    let size = file.size();
    let mut offset = 0;
    let mut attempts = 0;

    while offset < size && attempts < MAX_SEND_ATTEMPTS {
        attempts += 1;
        let remaining = usize::try_from(size - offset).unwrap_or(usize::MAX);

        match sink.send_file(file, &mut offset, remaining) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if is_transient(&e) => {}
            Err(e) => return Err(e),
        }
    }

    Ok(StreamOutcome {
        sent: offset,
        attempts,
    })
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

fn error_chain(e: &dyn std::error::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
