//! Synchronous, thread-per-connection TCP front end.
//!
//! One thread accepts connections; each connection gets its own thread that
//! loops reading frames and writing responses against a shared [`Database`]
//! clone. There is no async runtime in this crate's dependency stack, and
//! the engine's own concurrency is already coarse-grained (a single
//! `RwLock` guards all mutation) — a thread-per-connection model matches
//! that and keeps the server free of any scheduler of its own.

use std::io::{BufReader, BufWriter};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::engine::{Database, DbError};
use crate::hlc::Hlc;

use super::codec::{
    decode_identify, decode_peer, decode_read_req, decode_write_resp, encode_read_resp,
    encode_write_resp, Frame, FrameError, MessageType, WriteReq,
};
use std::io::ErrorKind;

/// Errors raised by the server's accept loop or a connection handler.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transport-level status codes carried in `WRITE_RESP`/`READ_RESP` frames.
/// These are deliberately coarse: spec.md §7 maps every [`DbError`] down to
/// one of a handful of wire statuses, never leaking engine internals to a
/// remote client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireStatus {
    Ok = 0,
    NotFound = 1,
    Io = 2,
    Corruption = 3,
    Conflict = 4,
    Backpressure = 5,
    Protocol = 6,
}

fn map_db_error(err: &DbError) -> WireStatus {
    match err {
        DbError::Io(_) => WireStatus::Io,
        DbError::Corruption(_) => WireStatus::Corruption,
        DbError::Conflict => WireStatus::Conflict,
        DbError::Backpressure => WireStatus::Backpressure,
        DbError::Protocol(_) => WireStatus::Protocol,
        // `Cancelled` is never returned by a `Database` method (see its
        // doc comment) and `AlreadyOpen`/`Lock` can only occur at `open`
        // time, before a connection exists to report them over — neither
        // has its own wire status, so both fall back to the closest fit.
        DbError::Cancelled => WireStatus::Io,
        DbError::AlreadyOpen(_) | DbError::Lock(_) | DbError::Engine(_) => WireStatus::Io,
    }
}

/// A running TCP server bound to one [`Database`].
///
/// Dropping or calling [`Server::shutdown`] stops the accept loop; already
/// accepted connections are allowed to finish their current frame before
/// noticing the shutdown flag and closing.
pub struct Server {
    local_addr: std::net::SocketAddr,
    shutdown: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl Server {
    /// Binds `addr` and spawns the accept loop in a background thread.
    pub fn start(addr: &str, db: Database) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));

        info!(%local_addr, "server listening");

        let accept_shutdown = Arc::clone(&shutdown);
        let accept_thread = std::thread::Builder::new()
            .name("aeternusdb-accept".into())
            .spawn(move || accept_loop(listener, db, accept_shutdown))
            .map_err(std::io::Error::from)?;

        Ok(Self {
            local_addr,
            shutdown,
            accept_thread: Some(accept_thread),
        })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Signals the accept loop to stop and waits for it to exit. The
    /// listener is woken by connecting to itself, since a blocking
    /// `accept()` call otherwise never observes the flag.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = TcpStream::connect(self.local_addr);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }

    /// Dials `peer_addr` and sends a single `IDENTIFY` frame carrying
    /// `node_id`, per the `--join` flag's one-shot handshake. The connection
    /// is then closed; there is no ongoing peer session to maintain.
    pub fn join_peer(peer_addr: &str, node_id: u32) -> Result<(), ServerError> {
        let mut stream = TcpStream::connect(peer_addr)?;
        Frame::write(
            &mut stream,
            MessageType::Identify,
            &super::codec::encode_identify(node_id),
        )?;
        info!(%peer_addr, node_id, "sent IDENTIFY to peer");
        Ok(())
    }
}

impl From<FrameError> for ServerError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Io(e) => ServerError::Io(e),
            other => ServerError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, other)),
        }
    }
}

/// Classifies a connection-handler failure as an ordinary client disconnect
/// rather than a genuine I/O fault, returning the [`DbError`] to log it as.
///
/// A peer that resets, aborts, or half-closes the socket mid-request isn't
/// an engine or transport failure — it's [`DbError::Cancelled`]. Anything
/// else (e.g. a permission error re-reading the socket) is left as `None`
/// so the caller logs the original error at its usual severity.
fn classify_disconnect(err: &ServerError) -> Option<DbError> {
    let ServerError::Io(io_err) = err;
    matches!(
        io_err.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
    )
    .then_some(DbError::Cancelled)
}

fn accept_loop(listener: TcpListener, db: Database, shutdown: Arc<AtomicBool>) {
    for incoming in listener.incoming() {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        let stream = match incoming {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to accept connection");
                continue;
            }
        };
        if shutdown.load(Ordering::SeqCst) {
            return;
        }

        let db = db.clone();
        let peer = stream.peer_addr().ok();
        std::thread::spawn(move || {
            if let Err(e) = handle_connection(stream, &db) {
                match classify_disconnect(&e) {
                    Some(cancelled) => debug!(?peer, error = %cancelled, "connection closed"),
                    None => error!(?peer, error = %e, "connection handler failed"),
                }
            }
        });
    }
}

fn handle_connection(stream: TcpStream, db: &Database) -> Result<(), ServerError> {
    stream.set_nodelay(true).ok();
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);

    while let Some(frame) = Frame::read(&mut reader)? {
        match frame.msg_type {
            MessageType::Identify => {
                let node_id = decode_identify(&frame.payload)?;
                debug!(node_id, "peer identified");
            }
            MessageType::Heartbeat => {
                debug!("heartbeat");
            }
            MessageType::Peer => {
                let addr = decode_peer(&frame.payload)?;
                debug!(%addr, "peer announcement");
            }
            MessageType::WriteReq => {
                let req = WriteReq::decode(&frame.payload)?;
                let status = apply_write(db, req);
                Frame::write(&mut writer, MessageType::WriteResp, &encode_write_resp(status as u8))?;
            }
            MessageType::ReadReq => {
                let key = decode_read_req(&frame.payload)?;
                let (status, value) = match db.find(&key) {
                    Ok(Some(value)) => (WireStatus::Ok, Some(value)),
                    Ok(None) => (WireStatus::NotFound, None),
                    Err(e) => {
                        error!(error = %e, "READ_REQ failed");
                        (map_db_error(&e), None)
                    }
                };
                let payload = encode_read_resp(status as u8, value.as_deref());
                Frame::write(&mut writer, MessageType::ReadResp, &payload)?;
            }
            MessageType::WriteResp | MessageType::ReadResp => {
                // A well-behaved client never sends a response type; log and
                // ignore rather than tearing down the connection.
                let status = decode_write_resp(&frame.payload).unwrap_or(WireStatus::Io as u8);
                warn!(status, "received unexpected response-type frame from client");
            }
        }
    }
    Ok(())
}

fn apply_write(db: &Database, req: WriteReq) -> WireStatus {
    let merged: Hlc = match db.merge_remote_hlc(req.hlc) {
        Ok(h) => h,
        Err(e) => return map_db_error(&e),
    };

    let result = if req.is_delete {
        db.erase_at(req.key, merged)
    } else {
        db.insert_at(req.key, req.value, merged)
    };

    match result {
        Ok(()) => WireStatus::Ok,
        Err(e) => map_db_error(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn map_db_error_covers_every_variant_with_its_own_status_where_one_exists() {
        assert_eq!(
            map_db_error(&DbError::Io(io::Error::new(io::ErrorKind::Other, "x"))),
            WireStatus::Io
        );
        assert_eq!(
            map_db_error(&DbError::Corruption("bad crc".into())),
            WireStatus::Corruption
        );
        assert_eq!(map_db_error(&DbError::Conflict), WireStatus::Conflict);
        assert_eq!(
            map_db_error(&DbError::Backpressure),
            WireStatus::Backpressure
        );
        assert_eq!(
            map_db_error(&DbError::Protocol("bad frame".into())),
            WireStatus::Protocol
        );
    }

    #[test]
    fn classify_disconnect_recognizes_reset_and_broken_pipe() {
        let reset = ServerError::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(matches!(
            classify_disconnect(&reset),
            Some(DbError::Cancelled)
        ));

        let pipe = ServerError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        assert!(matches!(classify_disconnect(&pipe), Some(DbError::Cancelled)));
    }

    #[test]
    fn classify_disconnect_leaves_other_io_errors_alone() {
        let other = ServerError::Io(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        assert!(classify_disconnect(&other).is_none());
    }
}
