use std::fmt;

const UDP_HEADER_SIZE: usize = 8;

/// A UDP datagram, decomposed into header fields and payload.
///
/// Wire layout, all fields big-endian:
/// bytes 0-1 source port, bytes 2-3 destination port, bytes 4-5 packet length
/// (header included), bytes 6-7 checksum, bytes 8 on payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpPacket {
    source_port: u16,
    destination_port: u16,
    packet_length: u16,
    checksum: u16,
    payload: Vec<u8>,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum UdpPacketError {
    #[error("UDP header is {UDP_HEADER_SIZE} bytes, but buffer is only {0} bytes")]
    BufferTooShort(usize),
    #[error("buffer is {actual} bytes, expected {stated}")]
    LengthMismatch { stated: u16, actual: usize },
    #[error("payload of {0} bytes does not fit in a UDP packet")]
    PayloadTooLarge(usize),
}

impl UdpPacket {
    /// Constructs a packet from its components.
    ///
    /// The packet length is derived from the payload; the checksum is left at
    /// zero. Fails if the payload exceeds 65527 bytes, the most a UDP length
    /// field can account for.
    pub fn new(
        source_port: u16,
        destination_port: u16,
        payload: Vec<u8>,
    ) -> Result<Self, UdpPacketError> {
        let packet_length = u16::try_from(UDP_HEADER_SIZE + payload.len())
            .map_err(|_| UdpPacketError::PayloadTooLarge(payload.len()))?;

        Ok(Self {
            source_port,
            destination_port,
            packet_length,
            checksum: 0,
            payload,
        })
    }

    /// Extracts a packet from network-byte-order bytes.
    ///
    /// Rejects buffers too short to hold the header and buffers whose stated
    /// length disagrees with the buffer length.
    pub fn parse(buffer: &[u8]) -> Result<Self, UdpPacketError> {
        if buffer.len() < UDP_HEADER_SIZE {
            return Err(UdpPacketError::BufferTooShort(buffer.len()));
        }

        let source_port = u16::from_be_bytes([buffer[0], buffer[1]]);
        let destination_port = u16::from_be_bytes([buffer[2], buffer[3]]);

        let packet_length = u16::from_be_bytes([buffer[4], buffer[5]]);
        if buffer.len() != usize::from(packet_length) {
            return Err(UdpPacketError::LengthMismatch {
                stated: packet_length,
                actual: buffer.len(),
            });
        }

        let checksum = u16::from_be_bytes([buffer[6], buffer[7]]);

        Ok(Self {
            source_port,
            destination_port,
            packet_length,
            checksum,
            payload: buffer[UDP_HEADER_SIZE..].to_vec(),
        })
    }

    /// Converts this packet into network-byte-order bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(usize::from(self.packet_length));

        buffer.extend_from_slice(&self.source_port.to_be_bytes());
        buffer.extend_from_slice(&self.destination_port.to_be_bytes());
        buffer.extend_from_slice(&self.packet_length.to_be_bytes());
        buffer.extend_from_slice(&self.checksum.to_be_bytes());
        buffer.extend_from_slice(&self.payload);

        buffer
    }

    pub fn source_port(&self) -> u16 {
        self.source_port
    }

    pub fn destination_port(&self) -> u16 {
        self.destination_port
    }

    /// Length of the packet, including the header.
    pub fn packet_length(&self) -> u16 {
        self.packet_length
    }

    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl fmt::Display for UdpPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[UDP PACKET]")?;
        writeln!(f, "Source port:\t{}", self.source_port)?;
        writeln!(f, "Destination port:\t{}", self.destination_port)?;
        writeln!(f, "Packet length:\t{}", self.packet_length)?;
        writeln!(f, "Checksum:\t{}", self.checksum)
    }
}
