use std::{
    fmt::{self, Display, Formatter},
    io::{self, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    os::fd::AsFd,
    time::Duration,
};

use nix::{libc::off_t, sys::sendfile::sendfile};

use crate::file::OpenFile;

/// Exclusive owner of one accepted socket. The socket is closed exactly once,
/// either by `close` or on drop.
#[derive(Debug)]
pub struct Connection {
    stream: Option<TcpStream>,
    peer: Option<SocketAddr>,
}

/// Copies file bytes to a destination without passing through user space.
pub trait SendFile {
    /// Sends at most `count` bytes of `file` starting at `*offset` and advances
    /// `offset` by the number of bytes sent.
    fn send_file(&mut self, file: &OpenFile, offset: &mut u64, count: usize) -> io::Result<usize>;
}

impl Connection {
    pub fn accept(listener: &TcpListener) -> io::Result<Self> {
        let (stream, peer) = listener.accept()?;
        Ok(Self {
            stream: Some(stream),
            peer: Some(peer),
        })
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream()?.read(buf)
    }

    pub fn send_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream()?.write_all(bytes)
    }

    /// Reads and drops input the peer already sent, at most `limit` bytes,
    /// waiting up to `wait` for each read. Closing a socket with unread input
    /// resets the connection and can cut off a response still in flight.
    pub fn discard_unread(&mut self, limit: usize, wait: Duration) -> io::Result<usize> {
        let stream = self.stream()?;
        stream.set_read_timeout(Some(wait))?;

        let mut scratch = [0; 4096];
        let mut discarded = 0;
        while discarded < limit {
            match stream.read(&mut scratch) {
                Ok(0) => break,
                Ok(n) => discarded += n,
                Err(e) => match e.kind() {
                    io::ErrorKind::Interrupted => {}
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => break,
                    _ => return Err(e),
                },
            }
        }

        Ok(discarded)
    }

    /// Closes the socket. Returns `false` if it was already closed.
    pub fn close(&mut self) -> bool {
        self.stream.take().is_some()
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connection is closed"))
    }
}

impl SendFile for Connection {
    fn send_file(&mut self, file: &OpenFile, offset: &mut u64, count: usize) -> io::Result<usize> {
        let in_fd = file.as_fd()?;
        let stream = self.stream()?;
        let out_fd = stream.as_fd();

        let mut position = off_t::try_from(*offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "file offset overflow"))?;
        let sent = sendfile(out_fd, in_fd, Some(&mut position), count)?;
        *offset += sent as u64;

        Ok(sent)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl Display for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.peer {
            Some(peer) => write!(f, "{}", peer),
            None => write!(f, "<unknown peer>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn connected_pair() -> (TcpStream, Connection) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let server = Connection::accept(&listener).unwrap();
        (client, server)
    }

    #[test]
    fn accept_records_the_peer() {
        let (client, server) = connected_pair();

        assert_eq!(server.peer_addr(), Some(client.local_addr().unwrap()));
        assert_eq!(server.to_string(), client.local_addr().unwrap().to_string());
    }

    #[test]
    fn close_runs_once() {
        let (_client, mut server) = connected_pair();

        assert!(server.close());
        assert!(!server.close());
        // Drop after an explicit close must not close again.
        drop(server);
    }

    #[test]
    fn io_after_close_is_an_error() {
        let (_client, mut server) = connected_pair();
        server.close();

        let error = server.send_all(b"late").unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::NotConnected);

        let mut buf = [0; 4];
        assert!(server.receive(&mut buf).is_err());
    }

    #[test]
    fn peer_sees_eof_after_drop() {
        let (mut client, mut server) = connected_pair();

        server.send_all(b"bye").unwrap();
        drop(server);

        let mut received = Vec::new();
        client.read_to_end(&mut received).unwrap();
        assert_eq!(received, b"bye");
    }

    #[test]
    fn discards_what_the_peer_already_sent() {
        let (mut client, mut server) = connected_pair();
        client.write_all(&[b'x'; 10_000]).unwrap();

        let mut head = [0; 1000];
        let received = server.receive(&mut head).unwrap();
        let discarded = server
            .discard_unread(64 * 1024, Duration::from_millis(200))
            .unwrap();

        assert_eq!(received + discarded, 10_000);
    }

    #[test]
    fn discard_stops_at_the_limit() {
        let (mut client, mut server) = connected_pair();
        client.write_all(&[b'x'; 20_000]).unwrap();

        let discarded = server.discard_unread(5_000, Duration::from_millis(200)).unwrap();

        assert!(discarded >= 5_000);
        assert!(discarded < 20_000);
    }
}
