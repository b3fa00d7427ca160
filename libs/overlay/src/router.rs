use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use bufferpool::Buffer;
use parking_lot::RwLock;

use crate::packet::IpPacket;

/// Sends a buffer to a peer's external endpoint.
pub type ExternalSender = Box<dyn Fn(SocketAddr, Buffer<Vec<u8>>) + Send + Sync>;
/// Sends a buffer to the local virtual interface.
pub type VirtualSender = Box<dyn Fn(Buffer<Vec<u8>>) + Send + Sync>;

#[derive(thiserror::Error, Debug)]
pub enum RouteError {
    #[error("no client with address '{0}'")]
    UnknownClient(Ipv4Addr),
}

/// Shuffles packets between the external and virtual interfaces.
///
/// Routing is synchronous; both directions may run concurrently on different
/// workers, so the client map sits behind a read-write lock.
pub struct Router {
    external_sender: ExternalSender,
    virtual_sender: VirtualSender,

    known_clients: RwLock<BTreeMap<Ipv4Addr, Ipv4Addr>>,

    /// Port on which Overpass clients listen; destination port for every peer.
    overlay_port: u16,
}

impl Router {
    pub fn new(
        external_sender: ExternalSender,
        virtual_sender: VirtualSender,
        overlay_port: u16,
    ) -> Self {
        Self {
            external_sender,
            virtual_sender,
            known_clients: RwLock::new(BTreeMap::new()),
            overlay_port,
        }
    }

    /// Adds a known client, mapping its overlay address to its external address.
    ///
    /// Registering the same overlay address again overwrites the previous
    /// mapping.
    pub fn add_known_client(&self, overlay_address: Ipv4Addr, external_address: Ipv4Addr) {
        self.known_clients
            .write()
            .insert(overlay_address, external_address);
    }

    /// Routes a packet from the virtual interface to a known client over the
    /// external interface.
    pub fn from_virtual(&self, packet: IpPacket) -> Result<(), RouteError> {
        let destination = packet.destination();

        // Coming from the virtual interface, the destination is an address on
        // the overlay network; the routing table tells us where the packet
        // actually needs to go.
        let client_address = self
            .known_clients
            .read()
            .get(&destination)
            .copied()
            .ok_or(RouteError::UnknownClient(destination))?;

        let endpoint = SocketAddr::V4(SocketAddrV4::new(client_address, self.overlay_port));
        (self.external_sender)(endpoint, packet.into_buffer());

        Ok(())
    }

    /// Routes a packet from the external interface to the virtual interface.
    ///
    /// The local overlay stack routes by the packet's own destination field,
    /// so no lookup happens here.
    pub fn from_external(&self, packet: IpPacket) {
        (self.virtual_sender)(packet.into_buffer());
    }
}
