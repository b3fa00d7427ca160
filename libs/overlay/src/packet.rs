use std::net::Ipv4Addr;

use bufferpool::Buffer;
use etherparse::Ipv4HeaderSlice;

/// A buffer verified to contain a layer-3 IPv4 packet.
///
/// The bytes are never rewritten; what was received is exactly what gets
/// forwarded.
pub struct IpPacket {
    buffer: Buffer<Vec<u8>>,
}

#[derive(thiserror::Error, Debug)]
#[error("not an IPv4 packet: {0}")]
pub struct NotIpv4(etherparse::err::ipv4::HeaderSliceError);

impl IpPacket {
    /// Validates that `buffer` starts with a well-formed IPv4 header.
    pub fn new(buffer: Buffer<Vec<u8>>) -> Result<Self, NotIpv4> {
        Ipv4HeaderSlice::from_slice(&buffer).map_err(NotIpv4)?;

        Ok(Self { buffer })
    }

    pub fn source(&self) -> Ipv4Addr {
        self.header().source_addr()
    }

    pub fn destination(&self) -> Ipv4Addr {
        self.header().destination_addr()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Consumes the packet, yielding the wire bytes.
    pub fn into_buffer(self) -> Buffer<Vec<u8>> {
        self.buffer
    }

    fn header(&self) -> Ipv4HeaderSlice<'_> {
        Ipv4HeaderSlice::from_slice(&self.buffer).expect("validated in constructor")
    }
}
