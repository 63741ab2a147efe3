use std::net::{IpAddr, SocketAddr, UdpSocket};

use crate::error::Result;

/// RTP/RTCP socket pair owned by one [`PacketPacer`](crate::rtp::PacketPacer).
///
/// Both sockets bind an ephemeral port on `0.0.0.0`; their local ports are
/// what SETUP advertises as `server_port`. The layer is address-only: the
/// pacer resolves where packets go and passes the address on every send.
#[derive(Debug)]
pub struct UdpTransport {
    rtp: UdpSocket,
    rtcp: UdpSocket,
}

impl UdpTransport {
    pub fn bind() -> Result<Self> {
        let rtp = UdpSocket::bind("0.0.0.0:0")?;
        let rtcp = UdpSocket::bind("0.0.0.0:0")?;
        Ok(Self { rtp, rtcp })
    }

    /// Local `(rtp, rtcp)` ports.
    pub fn local_ports(&self) -> Result<(u16, u16)> {
        Ok((self.rtp.local_addr()?.port(), self.rtcp.local_addr()?.port()))
    }

    /// Hop limit for unicast and multicast traffic alike.
    pub fn set_ttl(&self, ttl: u32) -> Result<()> {
        for socket in [&self.rtp, &self.rtcp] {
            socket.set_ttl(ttl)?;
            socket.set_multicast_ttl_v4(ttl)?;
        }
        Ok(())
    }

    pub fn send_rtp(&self, packet: &[u8], addr: SocketAddr) -> Result<usize> {
        Ok(self.rtp.send_to(packet, addr)?)
    }

    pub fn send_rtcp(&self, packet: &[u8], addr: SocketAddr) -> Result<usize> {
        Ok(self.rtcp.send_to(packet, addr)?)
    }
}

/// Where a track's packets go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    pub address: IpAddr,
    pub rtp_port: u16,
    pub rtcp_port: u16,
}

impl Destination {
    pub fn rtp(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.rtp_port)
    }

    pub fn rtcp(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.rtcp_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_two_distinct_ports() {
        let transport = UdpTransport::bind().unwrap();
        let (rtp, rtcp) = transport.local_ports().unwrap();
        assert_ne!(rtp, 0);
        assert_ne!(rtcp, 0);
        assert_ne!(rtp, rtcp);
    }

    #[test]
    fn sends_to_loopback() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = receiver.local_addr().unwrap().port();
        let transport = UdpTransport::bind().unwrap();
        transport.set_ttl(8).unwrap();

        let dest = Destination {
            address: "127.0.0.1".parse().unwrap(),
            rtp_port: port,
            rtcp_port: port + 1,
        };
        transport.send_rtp(b"hello", dest.rtp()).unwrap();

        let mut buf = [0u8; 16];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }
}
