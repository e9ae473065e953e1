//! `tokio_util` codec for framed node transports.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::errors::{Result, WireError};
use crate::packet::{HEADER_SIZE, Packet, PacketType};

/// Default upper bound on a single packet (16 MiB).
pub const DEFAULT_MAX_PACKET_SIZE: u32 = 16 * 1024 * 1024;

/// Length-prefixed packet codec.
///
/// Decoding buffers partial input until a full declared-size packet is
/// available. Encoding accepts either a [`Packet`] or already framed
/// [`Bytes`], which are written through unchanged.
#[derive(Clone, Debug)]
pub struct PacketCodec {
    max_packet_size: u32,
}

impl PacketCodec {
    /// Codec with the default size limit.
    pub fn new() -> Self {
        Self::with_max_packet_size(DEFAULT_MAX_PACKET_SIZE)
    }

    /// Codec rejecting packets larger than `max_packet_size` bytes.
    pub fn with_max_packet_size(max_packet_size: u32) -> Self {
        Self { max_packet_size }
    }

    /// Configured size limit.
    pub fn max_packet_size(&self) -> u32 {
        self.max_packet_size
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let mut header = &src[..HEADER_SIZE];
        let size = header.get_u32_le();
        let code = header.get_u32_le();

        if (size as usize) < HEADER_SIZE {
            return Err(WireError::SizeTooSmall(size));
        }
        if size > self.max_packet_size {
            return Err(WireError::SizeTooLarge {
                size,
                max: self.max_packet_size,
            });
        }

        let size = size as usize;
        if src.len() < size {
            src.reserve(size - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(size);
        frame.advance(HEADER_SIZE);
        let packet_type = PacketType::from_code(code);
        tracing::trace!(%packet_type, size, "decoded packet");
        Ok(Some(Packet::new(packet_type, frame.freeze())))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = WireError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        if item.size() > self.max_packet_size as usize {
            return Err(WireError::PayloadTooLarge(item.payload.len()));
        }
        item.write_to(dst)
    }
}

impl Encoder<Bytes> for PacketCodec {
    type Error = WireError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use bytes::BufMut;
    use proptest::prelude::*;

    fn frame(code: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((HEADER_SIZE + payload.len()) as u32).to_le_bytes());
        out.extend_from_slice(&code.to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn incomplete_header_waits() {
        let mut codec = PacketCodec::new();
        let mut buf = BytesMut::from(&[0x0C, 0x00, 0x00][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn incomplete_payload_waits() {
        let mut codec = PacketCodec::new();
        let bytes = frame(0x133, &[1, 2, 3, 4]);
        let mut buf = BytesMut::from(&bytes[..10]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.put_slice(&bytes[10..]);
        let packet = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet.packet_type, PacketType::FinalizationProofAtEpoch);
        assert_eq!(&packet.payload[..], &[1, 2, 3, 4]);
        assert!(buf.is_empty());
    }

    #[test]
    fn zero_length_payload_is_valid() {
        let mut codec = PacketCodec::new();
        let mut buf = BytesMut::from(&frame(0x111, &[])[..]);
        let packet = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet.packet_type, PacketType::NodeDiscoveryPullPing);
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn size_below_header_is_error() {
        let mut codec = PacketCodec::new();
        let mut buf = BytesMut::from(&[0x07, 0, 0, 0, 0x01, 0, 0, 0][..]);
        assert_matches!(codec.decode(&mut buf), Err(WireError::SizeTooSmall(7)));
    }

    #[test]
    fn size_above_limit_is_error() {
        let mut codec = PacketCodec::with_max_packet_size(16);
        let mut buf = BytesMut::from(&frame(3, &[0; 9])[..]);
        assert_matches!(
            codec.decode(&mut buf),
            Err(WireError::SizeTooLarge { size: 17, max: 16 })
        );
    }

    #[test]
    fn several_packets_in_one_read() {
        let mut codec = PacketCodec::new();
        let mut bytes = frame(3, &[9]);
        bytes.extend(frame(9, &[8, 7]));
        bytes.extend(frame(0xFFFF, &[]));
        let mut buf = BytesMut::from(&bytes[..]);

        let a = codec.decode(&mut buf).unwrap().unwrap();
        let b = codec.decode(&mut buf).unwrap().unwrap();
        let c = codec.decode(&mut buf).unwrap().unwrap();
        assert!(codec.decode(&mut buf).unwrap().is_none());

        assert_eq!(a.packet_type, PacketType::PushBlock);
        assert_eq!(b.packet_type, PacketType::PushTransactions);
        assert_eq!(c.packet_type, PacketType::Other(0xFFFF));
        assert_eq!(&b.payload[..], &[8, 7]);
    }

    #[test]
    fn encode_packet_writes_header_and_payload() {
        let mut codec = PacketCodec::new();
        let mut dst = BytesMut::new();
        codec
            .encode(Packet::new(PacketType::PushBlock, vec![5, 6]), &mut dst)
            .unwrap();
        assert_eq!(&dst[..], &frame(3, &[5, 6])[..]);
    }

    #[test]
    fn encode_raw_bytes_passes_through() {
        let mut codec = PacketCodec::new();
        let mut dst = BytesMut::new();
        let raw = Bytes::from(frame(0x120, &[]));
        codec.encode(raw.clone(), &mut dst).unwrap();
        assert_eq!(&dst[..], &raw[..]);
    }

    #[test]
    fn encode_rejects_oversized_packet() {
        let mut codec = PacketCodec::with_max_packet_size(10);
        let mut dst = BytesMut::new();
        let result = codec.encode(Packet::new(PacketType::PushBlock, vec![0; 3]), &mut dst);
        assert_matches!(result, Err(WireError::PayloadTooLarge(3)));
        assert!(dst.is_empty());
    }

    proptest! {
        #[test]
        fn chunk_boundaries_do_not_change_output(
            payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 1..6),
            chunk in 1usize..32,
        ) {
            let mut stream = Vec::new();
            for (i, payload) in payloads.iter().enumerate() {
                stream.extend(frame(i as u32, payload));
            }

            let mut codec = PacketCodec::new();
            let mut buf = BytesMut::new();
            let mut decoded = Vec::new();
            for piece in stream.chunks(chunk) {
                buf.extend_from_slice(piece);
                while let Some(packet) = codec.decode(&mut buf).unwrap() {
                    decoded.push(packet);
                }
            }

            prop_assert_eq!(decoded.len(), payloads.len());
            for (i, (packet, payload)) in decoded.iter().zip(&payloads).enumerate() {
                prop_assert_eq!(packet.packet_type.code(), i as u32);
                prop_assert_eq!(&packet.payload[..], &payload[..]);
                prop_assert_eq!(packet.size(), HEADER_SIZE + payload.len());
            }
            prop_assert!(buf.is_empty());
        }
    }
}
