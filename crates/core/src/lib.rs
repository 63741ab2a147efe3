pub mod client;
pub mod error;
pub mod executor;
pub mod media;
pub mod protocol;
pub mod rtp;
pub mod server;
pub mod session;
pub mod transport;

pub use client::{ClientConfig, ClientEvent, RtspClient};
pub use error::{ErrorKind, Result, RtspError};
pub use executor::{Executor, InlineExecutor, WorkerExecutor};
pub use media::{FrameSource, Packetizer, SourceFactory};
pub use rtp::PacerConfig;
pub use server::{Server, ServerConfig, ServerEvent};
pub use session::{Session, SessionBuilder, SessionEvent, TrackKind};
