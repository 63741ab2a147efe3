//! Push a session to a remote RTSP server.
//!
//! [`RtspClient`] owns one [`Session`] and one control connection. Starting
//! it configures the session, then runs `ANNOUNCE`, `SETUP` for every
//! track and `RECORD`, and finally starts the tracks streaming to the
//! server. While started, an `OPTIONS` keep-alive goes out every
//! [`KEEPALIVE_INTERVAL`]; when it fails the tracks are stopped and the
//! whole sequence is retried every [`RECONNECT_INTERVAL`] until it
//! succeeds or the client is stopped.
//!
//! Every action runs on the client's own worker thread, one at a time.
//!
//! ```text
//! Stopped ─start─▶ Starting ─ok─▶ Started ─stop─▶ Stopping ─▶ Stopped
//!                     │                                          ▲
//!                     └──────────────────failure─────────────────┘
//! ```

pub mod connection;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;

use crate::error::{ErrorKind, Result, RtspError};
use crate::executor::{Executor, Job, WorkerExecutor};
use crate::session::{Session, TrackKind};

pub use connection::ControlConnection;

/// Period of the `OPTIONS` keep-alive.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(6);
/// Delay between reconnection attempts after the keep-alive failed.
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);
const EVENT_CAPACITY: usize = 64;

/// Where and how to push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Presentation path, e.g. `/live.sdp`.
    pub path: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: String::new(),
            port: 554,
            path: "/".to_string(),
            username: None,
            password: None,
        }
    }
}

impl ClientConfig {
    fn credentials(&self) -> Option<(String, String)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        }
    }
}

/// Notifications from the client, drained from [`RtspClient::events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The initial connect sequence failed.
    ConnectionFailed { message: String },
    /// The server rejected the credentials or forbade access.
    WrongCredentials,
    /// The keep-alive failed; reconnection is under way.
    ConnectionLost,
    /// A reconnection succeeded and the tracks stream again.
    ConnectionRecovered,
    Error { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Stopped,
    Starting,
    Started,
    Stopping,
}

/// RTSP push client.
///
/// Configuration changes made while streaming take effect on the next
/// [`start`](Self::start). Changing the server address or stream path
/// marks a restart as pending so that `start` first stops the running
/// push.
pub struct RtspClient {
    shared: Arc<Shared>,
}

struct Shared {
    session: Session,
    executor: WorkerExecutor,
    /// Settings for the next start.
    pending: Mutex<ClientConfig>,
    restart: AtomicBool,
    state: Mutex<ClientState>,
    /// Settings of the running push.
    active: Mutex<Option<ClientConfig>>,
    connection: Mutex<Option<ControlConnection>>,
    /// Bumped on every abort; scheduled keep-alive and reconnect jobs
    /// from an older generation do nothing.
    generation: AtomicU64,
    events: Sender<ClientEvent>,
    receiver: Receiver<ClientEvent>,
}

impl RtspClient {
    pub fn new(session: Session, config: ClientConfig) -> Result<Self> {
        let executor = WorkerExecutor::new("rtsp-client")?;
        let (events, receiver) = bounded(EVENT_CAPACITY);
        Ok(Self {
            shared: Arc::new(Shared {
                session,
                executor,
                pending: Mutex::new(config),
                restart: AtomicBool::new(false),
                state: Mutex::new(ClientState::Stopped),
                active: Mutex::new(None),
                connection: Mutex::new(None),
                generation: AtomicU64::new(0),
                events,
                receiver,
            }),
        })
    }

    pub fn session(&self) -> &Session {
        &self.shared.session
    }

    pub fn events(&self) -> Receiver<ClientEvent> {
        self.shared.receiver.clone()
    }

    pub fn config(&self) -> ClientConfig {
        self.shared.pending.lock().clone()
    }

    pub fn set_server_address(&self, host: &str, port: u16) {
        let mut pending = self.shared.pending.lock();
        if pending.host != host || pending.port != port {
            pending.host = host.to_string();
            pending.port = port;
            self.shared.restart.store(true, Ordering::SeqCst);
        }
    }

    pub fn set_stream_path(&self, path: &str) {
        let mut pending = self.shared.pending.lock();
        if pending.path != path {
            pending.path = path.to_string();
            self.shared.restart.store(true, Ordering::SeqCst);
        }
    }

    pub fn set_credentials(&self, username: &str, password: &str) {
        let mut pending = self.shared.pending.lock();
        pending.username = Some(username.to_string());
        pending.password = Some(password.to_string());
    }

    /// A disabled client stops on the next [`start`](Self::start) and
    /// stays stopped.
    pub fn set_enabled(&self, enabled: bool) {
        self.shared.pending.lock().enabled = enabled;
    }

    /// True while starting or started.
    pub fn is_streaming(&self) -> bool {
        matches!(
            *self.shared.state.lock(),
            ClientState::Starting | ClientState::Started
        )
    }

    /// Queue a start. Stops first when disabled or a restart is pending.
    ///
    /// Fails with [`RtspError::NoDestination`] when no server address is
    /// set; every other failure is reported through [`events`](Self::events)
    /// and the session's own events.
    pub fn start(&self) -> Result<()> {
        if !self.prepare_start()? {
            return Ok(());
        }
        let weak = Arc::downgrade(&self.shared);
        self.shared.executor.execute(Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                let _ = shared.run_start();
            }
        }));
        Ok(())
    }

    /// Like [`start`](Self::start), but waits for the start to finish and
    /// returns its error.
    pub fn sync_start(&self) -> Result<()> {
        if !self.prepare_start()? {
            return Ok(());
        }
        let (tx, rx) = bounded(1);
        let weak = Arc::downgrade(&self.shared);
        self.shared.executor.execute(Box::new(move || {
            let result = match weak.upgrade() {
                Some(shared) => shared.run_start(),
                None => Err(RtspError::Interrupted),
            };
            let _ = tx.send(result);
        }));
        rx.recv().unwrap_or(Err(RtspError::Interrupted))
    }

    /// Returns whether a start should be queued.
    fn prepare_start(&self) -> Result<bool> {
        let config = self.shared.pending.lock().clone();
        if !config.enabled || self.shared.restart.load(Ordering::SeqCst) {
            self.stop();
        }
        if !config.enabled {
            return Ok(false);
        }
        if config.host.is_empty() {
            return Err(RtspError::NoDestination);
        }
        self.shared.restart.store(false, Ordering::SeqCst);
        Ok(true)
    }

    /// Queue a stop: stop the tracks, send a best-effort TEARDOWN and close
    /// the connection. Cancels pending keep-alive and reconnect attempts.
    pub fn stop(&self) {
        let weak = Arc::downgrade(&self.shared);
        self.shared.executor.execute(Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.run_stop();
            }
        }));
    }

    /// Stop, wait for the worker to finish and release the session.
    pub fn release(&self) {
        self.stop();
        self.shared.executor.shutdown();
        self.shared.session.release();
    }
}

impl Drop for RtspClient {
    fn drop(&mut self) {
        self.release();
    }
}

impl Shared {
    fn run_start(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != ClientState::Stopped {
                return Ok(());
            }
            *state = ClientState::Starting;
        }

        let config = self.pending.lock().clone();
        tracing::info!(
            host = %config.host,
            port = config.port,
            path = %config.path,
            "connecting to RTSP server"
        );
        *self.active.lock() = Some(config.clone());
        self.session.set_destination(config.host.as_str());

        if let Err(e) = self.session.sync_configure() {
            *self.active.lock() = None;
            self.set_state(ClientState::Stopped);
            return Err(e);
        }

        match self.try_connection(&config) {
            Ok(connection) => *self.connection.lock() = Some(connection),
            Err(e) => {
                tracing::error!(error = %e, "connection to RTSP server failed");
                match e.kind() {
                    ErrorKind::Authentication => self.post(ClientEvent::WrongCredentials),
                    _ => self.post(ClientEvent::ConnectionFailed {
                        message: e.to_string(),
                    }),
                }
                self.abort();
                return Err(e);
            }
        }

        if let Err(e) = self.session.sync_start() {
            self.abort();
            return Err(e);
        }

        self.set_state(ClientState::Started);
        tracing::info!("pushing to RTSP server");
        self.schedule(Some(KEEPALIVE_INTERVAL), Task::KeepAlive);
        Ok(())
    }

    fn run_stop(self: &Arc<Self>) {
        if self.active.lock().is_some() {
            self.session.sync_stop();
        }
        let stopping = {
            let mut state = self.state.lock();
            if *state == ClientState::Stopped {
                false
            } else {
                *state = ClientState::Stopping;
                true
            }
        };
        if stopping {
            self.abort();
            tracing::info!("push stopped");
        }
    }

    /// ANNOUNCE, SETUP every track, RECORD.
    fn try_connection(&self, config: &ClientConfig) -> Result<ControlConnection> {
        let mut connection = ControlConnection::connect(
            &config.host,
            config.port,
            &config.path,
            config.credentials(),
        )?;
        connection.announce(&self.session.session_description()?)?;

        for kind in [TrackKind::Audio, TrackKind::Video] {
            let Some(info) = self.session.track_info(kind) else {
                continue;
            };
            let client_ports = info.local_ports.unwrap_or(info.destination_ports);
            match connection.setup(kind.id(), client_ports)? {
                Some((rtp, rtcp)) => {
                    tracing::debug!(track = ?kind, rtp, rtcp, "server ports");
                    self.session.set_destination_ports(kind, rtp, rtcp)?;
                }
                None => {
                    let (rtp, rtcp) = info.destination_ports;
                    tracing::debug!(track = ?kind, rtp, rtcp, "server sent no ports");
                }
            }
        }

        connection.record()?;
        Ok(connection)
    }

    fn keep_alive(self: &Arc<Self>, generation: u64) {
        if !self.is_current(generation) {
            return;
        }
        let result = match self.connection.lock().as_mut() {
            Some(connection) => connection.options(),
            None => Err(RtspError::ConnectionLost),
        };
        match result {
            Ok(()) => self.schedule(Some(KEEPALIVE_INTERVAL), Task::KeepAlive),
            Err(e) => {
                tracing::error!(error = %e, "connection lost with the server");
                self.post(ClientEvent::ConnectionLost);
                self.session.sync_stop();
                self.schedule(None, Task::Reconnect);
            }
        }
    }

    fn reconnect(self: &Arc<Self>, generation: u64) {
        if !self.is_current(generation) {
            return;
        }
        let Some(config) = self.active.lock().clone() else {
            return;
        };
        tracing::warn!("trying to reconnect");
        match self.try_connection(&config) {
            Ok(connection) => {
                *self.connection.lock() = Some(connection);
                match self.session.sync_start() {
                    Ok(()) => {
                        self.schedule(Some(KEEPALIVE_INTERVAL), Task::KeepAlive);
                        self.post(ClientEvent::ConnectionRecovered);
                    }
                    Err(e) => {
                        self.post(ClientEvent::Error {
                            kind: e.kind(),
                            message: e.to_string(),
                        });
                        self.abort();
                    }
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "reconnection failed");
                self.schedule(Some(RECONNECT_INTERVAL), Task::Reconnect);
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
            && *self.state.lock() == ClientState::Started
    }

    fn schedule(self: &Arc<Self>, delay: Option<Duration>, task: Task) {
        let generation = self.generation.load(Ordering::SeqCst);
        let weak: Weak<Self> = Arc::downgrade(self);
        let job: Job = Box::new(move || {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            match task {
                Task::KeepAlive => shared.keep_alive(generation),
                Task::Reconnect => shared.reconnect(generation),
            }
        });
        match delay {
            Some(delay) => self.executor.execute_after(delay, job),
            None => self.executor.execute(job),
        }
    }

    /// TEARDOWN, close the socket, cancel scheduled jobs.
    fn abort(&self) {
        if let Some(mut connection) = self.connection.lock().take() {
            connection.teardown();
            connection.close();
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.set_state(ClientState::Stopped);
    }

    fn set_state(&self, state: ClientState) {
        tracing::debug!(?state, "client state");
        *self.state.lock() = state;
    }

    fn post(&self, event: ClientEvent) {
        match self.events.try_send(event) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(event)) => {
                tracing::trace!(?event, "client event queue full, event dropped");
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Task {
    KeepAlive,
    Reconnect,
}
