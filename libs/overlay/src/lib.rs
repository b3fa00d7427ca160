#![cfg_attr(test, allow(clippy::unwrap_used))]

//! The Overpass packet plane: engines for the external UDP socket and the
//! virtual interface, and the router shuttling IP packets between them.

pub mod datagram;
pub mod packet;
pub mod router;
pub mod server;
mod sockets;
pub mod stream;
pub mod udp_packet;

pub use packet::IpPacket;
pub use router::{RouteError, Router};
pub use server::{OverlayServer, ServerError};

/// UDP port on which every Overpass peer listens.
///
/// Also used as the destination port for all outbound overlay traffic; there
/// is no per-peer port table.
pub const OVERLAY_PORT: u16 = 14358;

/// Buffer capacity for a single overlay packet.
pub const DEFAULT_MTU: usize = 1500;
