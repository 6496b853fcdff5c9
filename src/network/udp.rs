//! UDP socket setup for RTP streams
//!
//! Sockets are configured through `socket2` and then handed out as plain
//! non-blocking `std::net::UdpSocket`s.

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

use crate::config::NetworkConfig;
use crate::error::NetworkError;

/// DSCP EF (46) shifted into the TOS byte, as AES67 recommends for media
const TOS_EXPEDITED_FORWARDING: u32 = 0xB8;

/// A non-blocking UDP socket bound for one stream
#[derive(Debug)]
pub struct PacketTransport {
    socket: UdpSocket,
    /// Multicast group joined at setup, left again on drop
    group: Option<(Ipv4Addr, Ipv4Addr)>,
}

impl PacketTransport {
    /// Bind a receive socket for `destination`, joining the group if it is
    /// a multicast address
    pub fn receiver(
        destination: SocketAddrV4,
        network: &NetworkConfig,
    ) -> Result<Self, NetworkError> {
        let socket = new_udp_socket()?;

        socket
            .set_reuse_address(true)
            .map_err(|e| NetworkError::Socket(format!("SO_REUSEADDR: {}", e)))?;
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        socket
            .set_reuse_port(true)
            .map_err(|e| NetworkError::Socket(format!("SO_REUSEPORT: {}", e)))?;

        if let Err(e) = socket.set_recv_buffer_size(network.recv_buffer_bytes) {
            tracing::warn!(
                "Could not set receive buffer to {} bytes: {}",
                network.recv_buffer_bytes,
                e
            );
        }

        let group = *destination.ip();
        let is_multicast = group.is_multicast();

        // Sockets sharing a port must only see their own group
        #[cfg(target_os = "linux")]
        {
            if is_multicast {
                socket
                    .set_multicast_all_v4(false)
                    .map_err(|e| NetworkError::Socket(format!("IP_MULTICAST_ALL: {}", e)))?;
            }
        }
        let bind_ip = if is_multicast && !cfg!(unix) {
            // Windows cannot bind a multicast address
            Ipv4Addr::UNSPECIFIED
        } else {
            group
        };
        let bind_addr = SocketAddr::V4(SocketAddrV4::new(bind_ip, destination.port()));

        socket
            .bind(&SockAddr::from(bind_addr))
            .map_err(|e| NetworkError::BindFailed(format!("{}: {}", bind_addr, e)))?;

        let membership = if is_multicast {
            socket
                .join_multicast_v4(&group, &network.interface)
                .map_err(|e| NetworkError::MulticastJoin {
                    group: group.to_string(),
                    reason: e.to_string(),
                })?;
            tracing::info!("Joined multicast group {} on {}", group, network.interface);
            Some((group, network.interface))
        } else {
            None
        };

        socket
            .set_nonblocking(true)
            .map_err(|e| NetworkError::Socket(format!("non-blocking: {}", e)))?;

        Ok(Self {
            socket: socket.into(),
            group: membership,
        })
    }

    /// Bind an ephemeral send socket with the configured multicast options
    pub fn sender(network: &NetworkConfig) -> Result<Self, NetworkError> {
        let socket = new_udp_socket()?;

        socket
            .set_multicast_ttl_v4(network.multicast_ttl)
            .map_err(|e| NetworkError::Socket(format!("multicast TTL: {}", e)))?;
        socket
            .set_multicast_loop_v4(network.multicast_loop)
            .map_err(|e| NetworkError::Socket(format!("multicast loop: {}", e)))?;
        if !network.interface.is_unspecified() {
            socket
                .set_multicast_if_v4(&network.interface)
                .map_err(|e| NetworkError::Socket(format!("multicast interface: {}", e)))?;
        }
        if let Err(e) = socket.set_tos(TOS_EXPEDITED_FORWARDING) {
            tracing::debug!("Could not set TOS: {}", e);
        }

        let bind_addr = SocketAddr::V4(SocketAddrV4::new(network.interface, 0));
        socket
            .bind(&SockAddr::from(bind_addr))
            .map_err(|e| NetworkError::BindFailed(format!("{}: {}", bind_addr, e)))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| NetworkError::Socket(format!("non-blocking: {}", e)))?;

        Ok(Self {
            socket: socket.into(),
            group: None,
        })
    }

    /// Receive one datagram if one is waiting
    pub fn try_recv(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.socket.recv(buf) {
            Ok(len) => Ok(Some(len)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn send_to(&self, data: &[u8], destination: SocketAddrV4) -> io::Result<usize> {
        self.socket.send_to(data, destination)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Drop for PacketTransport {
    fn drop(&mut self) {
        if let Some((group, interface)) = self.group.take() {
            if let Err(e) = self.socket.leave_multicast_v4(&group, &interface) {
                tracing::debug!("Leaving multicast group {} failed: {}", group, e);
            }
        }
    }
}

fn new_udp_socket() -> Result<Socket, NetworkError> {
    Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::Socket(e.to_string()))
}
