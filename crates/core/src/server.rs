use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;

use crate::error::{ErrorKind, Result, RtspError};
use crate::protocol::handler::post;
use crate::protocol::response::SERVER_AGENT;
use crate::session::{SessionBuilder, SessionRegistry};
use crate::transport::tcp::{self, Connections};

const EVENT_CAPACITY: usize = 256;

/// Server-level configuration used by protocol handlers.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host announced as SDP origin and in `Content-Base`/`RTP-Info`.
    /// When `None`, the local address of each connection is used.
    pub public_host: Option<String>,
    /// Value of the `Server` response header.
    pub server_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            public_host: None,
            server_name: SERVER_AGENT.to_string(),
        }
    }
}

/// Notifications from the server, drained from [`Server::events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// The first track across all sessions started streaming.
    StreamingStarted,
    /// The last streaming track across all sessions stopped.
    StreamingStopped,
    /// The listening socket could not be bound.
    BindFailed { message: String },
    /// A request failed to configure or start a session.
    StartFailed { kind: ErrorKind, message: String },
}

/// RTSP server: receivers connect, DESCRIBE a session and SETUP its tracks.
///
/// Every connection gets its own [`Session`](crate::session::Session),
/// built from the template [`SessionBuilder`] and the parameters of the
/// DESCRIBE URI (see [`UriParser`](crate::protocol::UriParser)).
/// Delegates TCP connection handling to [`transport::tcp`](crate::transport::tcp).
pub struct Server {
    registry: SessionRegistry,
    template: SessionBuilder,
    running: Arc<AtomicBool>,
    bind_addr: String,
    local_addr: Option<SocketAddr>,
    config: Arc<ServerConfig>,
    connections: Connections,
    events: Sender<ServerEvent>,
    receiver: Receiver<ServerEvent>,
    accept: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    pub fn new(bind_addr: &str, template: SessionBuilder) -> Self {
        Self::with_config(bind_addr, template, ServerConfig::default())
    }

    /// Create a server with custom protocol configuration.
    pub fn with_config(bind_addr: &str, template: SessionBuilder, config: ServerConfig) -> Self {
        let (events, receiver) = bounded(EVENT_CAPACITY);
        Self {
            registry: SessionRegistry::new(),
            template,
            running: Arc::new(AtomicBool::new(false)),
            bind_addr: bind_addr.to_string(),
            local_addr: None,
            config: Arc::new(config),
            connections: Connections::default(),
            events,
            receiver,
            accept: Mutex::new(None),
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RtspError::AlreadyRunning);
        }

        let listener = match TcpListener::bind(&self.bind_addr) {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(addr = %self.bind_addr, error = %e, "failed to bind RTSP port");
                post(
                    &self.events,
                    ServerEvent::BindFailed {
                        message: e.to_string(),
                    },
                );
                return Err(e.into());
            }
        };
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);

        self.running.store(true, Ordering::SeqCst);

        let context = tcp::ConnectionContext {
            registry: self.registry.clone(),
            template: self.template.clone(),
            config: self.config.clone(),
            events: self.events.clone(),
            connections: self.connections.clone(),
            running: self.running.clone(),
        };

        tracing::info!(addr = %local_addr, "RTSP server listening");

        let handle = thread::Builder::new()
            .name("rtsp-accept".to_string())
            .spawn(move || tcp::accept_loop(listener, context));
        match handle {
            Ok(handle) => {
                *self.accept.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    /// Stop accepting, stop every streaming session and close live
    /// connections.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("server stopping");
        if let Some(handle) = self.accept.lock().take() {
            let _ = handle.join();
        }
        self.registry.stop_all();
        self.connections.shutdown_all();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether any client is being streamed to.
    pub fn is_streaming(&self) -> bool {
        self.registry.is_streaming()
    }

    /// Total outgoing bitrate across all sessions, in bits per second.
    pub fn bitrate(&self) -> u64 {
        self.registry.bitrate()
    }

    /// Address the server is listening on, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn events(&self) -> Receiver<ServerEvent> {
        self.receiver.clone()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Returns the server's protocol configuration.
    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}
