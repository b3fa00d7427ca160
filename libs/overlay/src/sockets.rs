use std::io;
use std::net::SocketAddr;

/// Opens a non-blocking UDP socket bound to `address`, registered with the reactor.
pub(crate) fn bind_udp(address: SocketAddr) -> io::Result<tokio::net::UdpSocket> {
    let addr = socket2::SockAddr::from(address);
    let socket = socket2::Socket::new(addr.domain(), socket2::Type::DGRAM, None)?;

    socket.set_nonblocking(true)?;
    socket.bind(&addr)?;

    let socket = std::net::UdpSocket::from(socket);
    let socket = tokio::net::UdpSocket::try_from(socket)?;

    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    #[tokio::test]
    async fn binds_to_an_ephemeral_port() {
        let socket =
            bind_udp(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))).unwrap();

        let local = socket.local_addr().unwrap();
        assert_ne!(local.port(), 0);
    }

    #[tokio::test]
    async fn binding_the_same_port_twice_fails() {
        let first = bind_udp(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))).unwrap();
        let local = first.local_addr().unwrap();

        assert!(bind_udp(local).is_err());
    }
}
