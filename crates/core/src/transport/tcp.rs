use std::collections::HashMap;
use std::io::{BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::error::RtspError;
use crate::protocol::{MethodHandler, RtspRequest};
use crate::server::{ServerConfig, ServerEvent};
use crate::session::{SessionBuilder, SessionRegistry};

/// Everything a connection worker needs from the server.
#[derive(Clone)]
pub struct ConnectionContext {
    pub registry: SessionRegistry,
    pub template: SessionBuilder,
    pub config: Arc<ServerConfig>,
    pub events: Sender<ServerEvent>,
    pub connections: Connections,
    pub running: Arc<AtomicBool>,
}

/// Live control connections, so the server can close them on stop.
#[derive(Clone, Default)]
pub struct Connections {
    streams: Arc<Mutex<HashMap<u64, TcpStream>>>,
    next_id: Arc<AtomicU64>,
}

impl Connections {
    fn add(&self, stream: &TcpStream) -> Option<u64> {
        let clone = stream.try_clone().ok()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.streams.lock().insert(id, clone);
        Some(id)
    }

    fn remove(&self, id: u64) {
        self.streams.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.streams.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.lock().is_empty()
    }

    /// Shut down every live connection, which unblocks its worker.
    pub fn shutdown_all(&self) {
        for (_, stream) in self.streams.lock().drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts with a 50ms poll interval
/// so that [`crate::server::Server::stop`] can terminate it promptly.
pub fn accept_loop(listener: TcpListener, context: ConnectionContext) {
    while context.running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let ctx = context.clone();
                let spawned = thread::Builder::new()
                    .name("rtsp-connection".to_string())
                    .spawn(move || Connection::handle(stream, ctx));
                if let Err(e) = spawned {
                    tracing::error!(error = %e, "failed to spawn connection worker");
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if context.running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// A single RTSP client connection with its own lifecycle.
struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    handler: MethodHandler,
    peer_addr: SocketAddr,
}

impl Connection {
    /// Entry point: set up a connection and run its request loop.
    fn handle(stream: TcpStream, context: ConnectionContext) {
        let (peer_addr, local_addr) = match (stream.peer_addr(), stream.local_addr()) {
            (Ok(peer), Ok(local)) => (peer, local),
            _ => return,
        };

        tracing::info!(%peer_addr, "client connected");

        let reader_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(_) => return,
        };
        let Some(connection_id) = context.connections.add(&stream) else {
            return;
        };

        let handler = MethodHandler::new(
            context.registry.clone(),
            context.template.clone(),
            context.config.clone(),
            context.events.clone(),
            local_addr,
            peer_addr,
        );

        let mut conn = Connection {
            reader: BufReader::new(reader_stream),
            writer: stream,
            handler,
            peer_addr,
        };

        let reason = conn.run(&context.running);
        conn.handler.close();
        context.connections.remove(connection_id);
        let _ = conn.writer.shutdown(Shutdown::Both);

        tracing::info!(%peer_addr, reason, "client disconnected");
    }

    /// RTSP request/response loop. Returns the reason for exiting.
    fn run(&mut self, running: &AtomicBool) -> &'static str {
        while running.load(Ordering::SeqCst) {
            let response = match RtspRequest::read_from(&mut self.reader) {
                Ok(Some(request)) => {
                    tracing::debug!(
                        peer = %self.peer_addr,
                        method = %request.method,
                        uri = %request.uri,
                        version = %request.version,
                        "request"
                    );
                    self.handler.handle(&request)
                }
                Ok(None) => return "connection closed by client",
                Err(RtspError::Io(_)) => return "read error",
                Err(e) => {
                    tracing::warn!(peer = %self.peer_addr, error = %e, "parse error");
                    self.handler.bad_request()
                }
            };

            tracing::debug!(
                peer = %self.peer_addr,
                status = response.status_code,
                "response"
            );

            if self
                .writer
                .write_all(response.serialize().as_bytes())
                .is_err()
            {
                tracing::error!(peer = %self.peer_addr, "response was not sent");
                return "write error";
            }
        }

        "server shutting down"
    }
}
