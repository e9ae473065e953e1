//! Packet header layout and the packet type table.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

/// Size of the packet header in bytes (`u32` size + `u32` type).
pub const HEADER_SIZE: usize = 8;

const STATE_PATH_BASE: u32 = 0x200;

macro_rules! packet_types {
    ($($(#[$meta:meta])* $variant:ident = $code:expr,)+) => {
        /// Packet type codes understood by the gateway.
        ///
        /// Unknown codes decode to [`PacketType::Other`]; dispatching on them
        /// is the caller's concern.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum PacketType {
            $($(#[$meta])* $variant,)+
            /// Any code without a named variant.
            Other(u32),
        }

        impl PacketType {
            /// The numeric type code carried on the wire.
            pub const fn code(self) -> u32 {
                match self {
                    $(Self::$variant => $code,)+
                    Self::Other(code) => code,
                }
            }

            /// Look up a type code, falling back to [`PacketType::Other`].
            pub const fn from_code(code: u32) -> Self {
                $(if code == $code { return Self::$variant; })+
                Self::Other(code)
            }
        }
    };
}

packet_types! {
    /// Challenge sent by the node when a connection opens.
    ServerChallenge = 1,
    /// Node response proving possession of its key.
    ClientChallenge = 2,
    /// Blocks pushed to a peer.
    PushBlock = 3,
    /// Transactions pushed to a peer.
    PushTransactions = 9,
    /// Partial aggregate transactions pushed to a peer.
    PushPartialTransactions = 0x100,
    /// Detached cosignatures pushed to a peer.
    PushDetachedCosignatures = 0x101,
    /// Node information request.
    NodeDiscoveryPullPing = 0x111,
    /// Node peers request.
    NodeDiscoveryPullPeers = 0x113,
    /// Node time request.
    TimeSyncNodeTime = 0x120,
    /// Finalization proof request by epoch.
    FinalizationProofAtEpoch = 0x133,
    /// Finalization proof request by height.
    FinalizationProofAtHeight = 0x134,
    /// Account state path.
    AccountStatePath = STATE_PATH_BASE + 0x43,
    /// Hash lock state path.
    HashLockStatePath = STATE_PATH_BASE + 0x48,
    /// Secret lock state path.
    SecretLockStatePath = STATE_PATH_BASE + 0x52,
    /// Metadata state path.
    MetadataStatePath = STATE_PATH_BASE + 0x44,
    /// Mosaic state path.
    MosaicStatePath = STATE_PATH_BASE + 0x4D,
    /// Multisig state path.
    MultisigStatePath = STATE_PATH_BASE + 0x55,
    /// Namespace state path.
    NamespaceStatePath = STATE_PATH_BASE + 0x4E,
    /// Account restrictions state path.
    AccountRestrictionsStatePath = STATE_PATH_BASE + 0x50,
    /// Mosaic restrictions state path.
    MosaicRestrictionsStatePath = STATE_PATH_BASE + 0x51,
}

impl PacketType {
    /// Whether this type requests a state (Merkle) path.
    pub const fn is_state_path(self) -> bool {
        matches!(
            self,
            Self::AccountStatePath
                | Self::HashLockStatePath
                | Self::SecretLockStatePath
                | Self::MetadataStatePath
                | Self::MosaicStatePath
                | Self::MultisigStatePath
                | Self::NamespaceStatePath
                | Self::AccountRestrictionsStatePath
                | Self::MosaicRestrictionsStatePath
        )
    }
}

impl From<u32> for PacketType {
    fn from(code: u32) -> Self {
        Self::from_code(code)
    }
}

impl From<PacketType> for u32 {
    fn from(packet_type: PacketType) -> Self {
        packet_type.code()
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.code())
    }
}

/// Build the 8-byte header for a packet of `total_size` bytes.
///
/// `total_size` includes the header; callers append the payload.
pub fn create_header(packet_type: PacketType, total_size: u32) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[..4].copy_from_slice(&total_size.to_le_bytes());
    header[4..].copy_from_slice(&packet_type.code().to_le_bytes());
    header
}

/// A single decoded (or to-be-encoded) packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    /// Packet type.
    pub packet_type: PacketType,
    /// Payload following the header.
    pub payload: Bytes,
}

impl Packet {
    /// Create a packet from a type and payload.
    pub fn new(packet_type: PacketType, payload: impl Into<Bytes>) -> Self {
        Self {
            packet_type,
            payload: payload.into(),
        }
    }

    /// A packet with no payload.
    pub fn header_only(packet_type: PacketType) -> Self {
        Self::new(packet_type, Bytes::new())
    }

    /// Total size on the wire, header included.
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Serialize header and payload into one buffer.
    pub fn to_bytes(&self) -> crate::Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.size());
        self.write_to(&mut buf)?;
        Ok(buf.freeze())
    }

    pub(crate) fn write_to(&self, buf: &mut BytesMut) -> crate::Result<()> {
        let size = u32::try_from(self.size())
            .map_err(|_| crate::WireError::PayloadTooLarge(self.payload.len()))?;
        buf.reserve(self.size());
        buf.put_slice(&create_header(self.packet_type, size));
        buf.put_slice(&self.payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_little_endian() {
        let header = create_header(PacketType::NodeDiscoveryPullPing, 8);
        assert_eq!(header, [0x08, 0, 0, 0, 0x11, 0x01, 0, 0]);
    }

    #[test]
    fn known_codes_round_trip_through_lookup() {
        assert_eq!(PacketType::from_code(1), PacketType::ServerChallenge);
        assert_eq!(PacketType::from_code(0x134), PacketType::FinalizationProofAtHeight);
        assert_eq!(PacketType::from_code(0x243), PacketType::AccountStatePath);
        assert_eq!(PacketType::MosaicRestrictionsStatePath.code(), 0x251);
    }

    #[test]
    fn unknown_code_is_preserved() {
        let ty = PacketType::from(0xDEAD);
        assert_eq!(ty, PacketType::Other(0xDEAD));
        assert_eq!(u32::from(ty), 0xDEAD);
    }

    #[test]
    fn state_path_classification() {
        assert!(PacketType::NamespaceStatePath.is_state_path());
        assert!(!PacketType::PushBlock.is_state_path());
        assert!(!PacketType::Other(0x299).is_state_path());
    }

    #[test]
    fn size_counts_header() {
        let packet = Packet::new(PacketType::PushTransactions, vec![1, 2, 3]);
        assert_eq!(packet.size(), 11);
        assert_eq!(Packet::header_only(PacketType::PushBlock).size(), HEADER_SIZE);
    }

    #[test]
    fn to_bytes_writes_declared_size() {
        let packet = Packet::new(PacketType::Other(7), vec![0xAA; 5]);
        let bytes = packet.to_bytes().unwrap();
        assert_eq!(bytes.len(), 13);
        assert_eq!(&bytes[..4], &13u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &7u32.to_le_bytes());
        assert_eq!(&bytes[8..], &[0xAA; 5]);
    }

    #[test]
    fn display_is_hex_code() {
        assert_eq!(PacketType::TimeSyncNodeTime.to_string(), "0x120");
    }
}
