use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, OnceLock};

use tokio::net::UdpSocket;
use tun::Tun;

use crate::DEFAULT_MTU;
use crate::datagram::DatagramServer;
use crate::packet::IpPacket;
use crate::router::Router;
use crate::sockets;
use crate::stream::StreamServer;

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("failed to provision virtual interface")]
    InterfaceProvisioning(#[source] anyhow::Error),
    #[error("failed to bind {address}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("server isn't started, cannot add client")]
    NotStarted,
}

/// Orchestrates the Overpass client components: a server for the external UDP
/// socket, a server for the virtual interface, and a router shuttling traffic
/// between them.
///
/// Dropping the server (after stopping the runtime) closes the virtual
/// interface.
pub struct OverlayServer {
    tun: Option<Arc<Tun>>,
    interface_name: String,
    bind_address: SocketAddrV4,

    /// Set by `start`; the read callbacks resolve the router through this
    /// cell, so a packet can never reach a router whose senders don't exist.
    router: Arc<OnceLock<Arc<Router>>>,

    // Held so the engines live exactly as long as the server.
    _external_server: Option<Arc<DatagramServer<UdpSocket>>>,
    _virtual_server: Option<Arc<StreamServer<Tun>>>,
}

impl OverlayServer {
    /// Provisions the virtual interface and assigns its overlay address.
    ///
    /// `interface_pattern` determines the interface name (e.g. `ovp%d`).
    /// `overlay_address` needs to be unique among clients. I/O does not begin
    /// until [`start`](Self::start).
    pub async fn new(
        interface_pattern: &str,
        overlay_address: Ipv4Addr,
        overlay_netmask: Ipv4Addr,
        bind_address: Ipv4Addr,
        bind_port: u16,
    ) -> Result<Self, ServerError> {
        let tun = Tun::create(interface_pattern).map_err(ServerError::InterfaceProvisioning)?;

        tun::assign_device_address(tun.name(), overlay_address, overlay_netmask)
            .await
            .map_err(ServerError::InterfaceProvisioning)?;

        let interface_name = tun.name().to_owned();

        tracing::info!(interface = %interface_name, address = %overlay_address, "Virtual interface is up");

        Ok(Self {
            tun: Some(Arc::new(tun)),
            interface_name,
            bind_address: SocketAddrV4::new(bind_address, bind_port),
            router: Arc::new(OnceLock::new()),
            _external_server: None,
            _virtual_server: None,
        })
    }

    /// Binds the external socket and brings up both servers and the router.
    ///
    /// Calling `start` a second time has no effect.
    pub fn start(&mut self) -> Result<(), ServerError> {
        let Some(tun) = self.tun.take() else {
            return Ok(());
        };

        let bind_address = SocketAddr::V4(self.bind_address);
        let socket = sockets::bind_udp(bind_address).map_err(|source| ServerError::Bind {
            address: bind_address,
            source,
        })?;

        let external_server = Arc::new(DatagramServer::new(
            Arc::new(socket),
            {
                let router = self.router.clone();

                // The sender endpoint is deliberately ignored: anything
                // arriving on the overlay port is treated as an encapsulated
                // packet for the virtual interface.
                move |_sender, buffer| {
                    let Some(router) = router.get() else {
                        return;
                    };

                    match IpPacket::new(buffer) {
                        Ok(packet) => router.from_external(packet),
                        Err(e) => tracing::debug!("Discarding inbound datagram: {e}"),
                    }
                }
            },
            DEFAULT_MTU,
        ));

        let virtual_server = Arc::new(StreamServer::new(
            {
                let router = self.router.clone();

                move |buffer| {
                    let Some(router) = router.get() else {
                        return;
                    };

                    let packet = match IpPacket::new(buffer) {
                        Ok(packet) => packet,
                        Err(e) => {
                            tracing::debug!("Discarding packet from virtual interface: {e}");
                            return;
                        }
                    };

                    if let Err(e) = router.from_virtual(packet) {
                        tracing::warn!("Unable to route packet: {e}");
                    }
                }
            },
            tun,
            DEFAULT_MTU,
        ));
        virtual_server.start();

        let router = Arc::new(Router::new(
            Box::new({
                let external_server = external_server.clone();
                move |endpoint, buffer| external_server.send_to(endpoint, buffer)
            }),
            Box::new({
                let virtual_server = virtual_server.clone();
                move |buffer| virtual_server.write(buffer)
            }),
            self.bind_address.port(),
        ));

        // Packets that raced this publication were dropped by the read
        // callbacks above.
        let _ = self.router.set(router);

        self._external_server = Some(external_server);
        self._virtual_server = Some(virtual_server);

        tracing::info!(bind = %bind_address, "Overlay server started");

        Ok(())
    }

    /// Adds a known client, mapping its overlay address to its external address.
    ///
    /// [`start`](Self::start) must be called before this function can be used.
    pub fn add_known_client(
        &self,
        overlay_address: Ipv4Addr,
        external_address: Ipv4Addr,
    ) -> Result<(), ServerError> {
        let router = self.router.get().ok_or(ServerError::NotStarted)?;

        router.add_known_client(overlay_address, external_address);

        Ok(())
    }

    /// The kernel-assigned name of the virtual interface.
    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }
}
