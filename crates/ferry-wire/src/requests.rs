//! Request packets the gateway sends to the node.

use crate::errors::{Result, WireError};
use crate::packet::{Packet, PacketType};

/// Node information request (also used as a liveness check).
pub fn node_info() -> Packet {
    Packet::header_only(PacketType::NodeDiscoveryPullPing)
}

/// Node peers request.
pub fn node_peers() -> Packet {
    Packet::header_only(PacketType::NodeDiscoveryPullPeers)
}

/// Node time request.
pub fn node_time() -> Packet {
    Packet::header_only(PacketType::TimeSyncNodeTime)
}

/// Finalization proof for an epoch.
pub fn finalization_proof_at_epoch(epoch: u32) -> Packet {
    Packet::new(
        PacketType::FinalizationProofAtEpoch,
        epoch.to_le_bytes().to_vec(),
    )
}

/// Finalization proof for a height.
pub fn finalization_proof_at_height(height: u64) -> Packet {
    Packet::new(
        PacketType::FinalizationProofAtHeight,
        height.to_le_bytes().to_vec(),
    )
}

/// State path request for `key` (an address, hash or composite key).
pub fn state_path(packet_type: PacketType, key: &[u8]) -> Result<Packet> {
    if !packet_type.is_state_path() {
        return Err(WireError::NotStatePath(packet_type.code()));
    }
    Ok(Packet::new(packet_type, key.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn finalization_proof_at_epoch_bytes() {
        let bytes = finalization_proof_at_epoch(11).to_bytes().unwrap();
        insta::assert_snapshot!(hex::encode_upper(&bytes), @"0C000000330100000B000000");
    }

    #[test]
    fn finalization_proof_at_height_bytes() {
        let bytes = finalization_proof_at_height(0x0102_0304_0506_0708)
            .to_bytes()
            .unwrap();
        assert_eq!(
            &bytes[..],
            &[
                0x10, 0, 0, 0, 0x34, 0x01, 0, 0, 0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01
            ]
        );
    }

    #[test]
    fn node_info_is_header_only() {
        let bytes = node_info().to_bytes().unwrap();
        assert_eq!(&bytes[..], &[0x08, 0, 0, 0, 0x11, 0x01, 0, 0]);
    }

    #[test]
    fn state_path_carries_key() {
        let packet = state_path(PacketType::AccountStatePath, &[0xAB; 24]).unwrap();
        assert_eq!(packet.size(), 32);
        assert_eq!(packet.packet_type.code(), 0x243);
    }

    #[test]
    fn state_path_rejects_other_types() {
        assert_matches!(
            state_path(PacketType::PushBlock, &[1]),
            Err(WireError::NotStatePath(3))
        );
    }

    #[test]
    fn peers_and_time_requests() {
        assert_eq!(node_peers().packet_type, PacketType::NodeDiscoveryPullPeers);
        assert_eq!(node_time().packet_type.code(), 0x120);
    }
}
