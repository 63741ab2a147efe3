//! Network transport for RTSP signaling and RTP media delivery.
//!
//! - **TCP** ([`tcp`]): RTSP request/response signaling for the server
//!   role. One worker thread per accepted connection.
//! - **UDP** ([`udp`]): RTP and RTCP packets. Each pacer owns its own
//!   socket pair so every track advertises distinct server ports.
//!
//! RTSP over TCP-interleaved transport is not supported.

pub mod tcp;
pub mod udp;

pub use udp::{Destination, UdpTransport};
