//! Socket values
//!
//! TCP wrappers behind the `socket` value variant: a socket is either a
//! connected stream or a listener. The raw descriptor is exposed as the
//! `fd` property so programs can `poll` on it.

use crate::error::RillError;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Mutex;

#[derive(Debug)]
enum SocketKind {
    Stream(TcpStream),
    Listener(TcpListener),
    Closed,
}

#[derive(Debug)]
pub struct SocketObj {
    inner: Mutex<SocketKind>,
}

impl SocketObj {
    /// Connect a stream socket to `host:port`.
    pub fn connect(host: &str, port: u16) -> Result<SocketObj, RillError> {
        let stream = TcpStream::connect((host, port))
            .map_err(|e| RillError::io_error(format!("connect {host}:{port}: {e}")))?;
        Ok(SocketObj {
            inner: Mutex::new(SocketKind::Stream(stream)),
        })
    }

    /// Bind a listener on `port` (all interfaces).
    pub fn listen(port: u16) -> Result<SocketObj, RillError> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .map_err(|e| RillError::io_error(format!("listen on {port}: {e}")))?;
        Ok(SocketObj {
            inner: Mutex::new(SocketKind::Listener(listener)),
        })
    }

    /// Accept one connection; blocks until a peer arrives.
    pub fn accept(&self) -> Result<SocketObj, RillError> {
        let guard = self.inner.lock().expect("socket lock poisoned");
        match &*guard {
            SocketKind::Listener(l) => {
                let (stream, _addr) = l
                    .accept()
                    .map_err(|e| RillError::io_error(format!("accept: {e}")))?;
                Ok(SocketObj {
                    inner: Mutex::new(SocketKind::Stream(stream)),
                })
            }
            SocketKind::Stream(_) => Err(RillError::io_error("accept on a stream socket")),
            SocketKind::Closed => Err(RillError::io_error("accept on a closed socket")),
        }
    }

    /// Read up to `limit` bytes (one `read(2)`; may return fewer).
    pub fn read(&self, limit: usize) -> Result<Vec<u8>, RillError> {
        let mut guard = self.inner.lock().expect("socket lock poisoned");
        match &mut *guard {
            SocketKind::Stream(s) => {
                let mut buf = vec![0u8; limit];
                let n = s
                    .read(&mut buf)
                    .map_err(|e| RillError::io_error(format!("socket read: {e}")))?;
                buf.truncate(n);
                Ok(buf)
            }
            _ => Err(RillError::io_error("read on a non-stream socket")),
        }
    }

    pub fn write(&self, bytes: &[u8]) -> Result<usize, RillError> {
        let mut guard = self.inner.lock().expect("socket lock poisoned");
        match &mut *guard {
            SocketKind::Stream(s) => {
                s.write_all(bytes)
                    .map_err(|e| RillError::io_error(format!("socket write: {e}")))?;
                Ok(bytes.len())
            }
            _ => Err(RillError::io_error("write on a non-stream socket")),
        }
    }

    /// Close the underlying descriptor. Idempotent.
    pub fn close(&self) {
        let mut guard = self.inner.lock().expect("socket lock poisoned");
        *guard = SocketKind::Closed;
    }

    pub fn is_closed(&self) -> bool {
        matches!(
            &*self.inner.lock().expect("socket lock poisoned"),
            SocketKind::Closed
        )
    }

    /// Raw descriptor; -1 once closed.
    #[cfg(unix)]
    pub fn fd(&self) -> i32 {
        use std::os::fd::AsRawFd;
        match &*self.inner.lock().expect("socket lock poisoned") {
            SocketKind::Stream(s) => s.as_raw_fd(),
            SocketKind::Listener(l) => l.as_raw_fd(),
            SocketKind::Closed => -1,
        }
    }

    #[cfg(not(unix))]
    pub fn fd(&self) -> i32 {
        -1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::net::TcpListener as StdListener;

    #[test]
    fn test_listen_connect_roundtrip() {
        // Bind on an ephemeral port via std to learn the port number.
        let probe = StdListener::bind("127.0.0.1:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let listener = SocketObj::listen(port).unwrap();
        assert!(listener.fd() >= 0);

        let client = std::thread::spawn(move || {
            let sock = SocketObj::connect("127.0.0.1", port).unwrap();
            sock.write(b"ping").unwrap();
            let reply = sock.read(16).unwrap();
            assert_eq!(reply, b"pong");
        });

        let conn = listener.accept().unwrap();
        assert_eq!(conn.read(16).unwrap(), b"ping");
        conn.write(b"pong").unwrap();
        client.join().unwrap();
    }

    #[test]
    fn test_closed_socket_errors() {
        let probe = StdListener::bind("127.0.0.1:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);
        let listener = SocketObj::listen(port).unwrap();
        listener.close();
        assert!(listener.is_closed());
        assert_eq!(listener.fd(), -1);
        let err = listener.accept().unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Io));
    }
}
