//! Push-based packet parser for raw byte chunks.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::PacketCodec;
use crate::errors::Result;
use crate::packet::Packet;

type PacketCallback = Box<dyn FnMut(&Packet) + Send>;

/// Accumulates arbitrary chunks and emits every complete packet.
///
/// After a decode error the buffered bytes are discarded; the stream is no
/// longer aligned on a header boundary.
pub struct PacketParser {
    codec: PacketCodec,
    buffer: BytesMut,
    listeners: Vec<PacketCallback>,
}

impl PacketParser {
    /// Parser with the default packet size limit.
    pub fn new() -> Self {
        Self::with_codec(PacketCodec::new())
    }

    /// Parser using a specific codec configuration.
    pub fn with_codec(codec: PacketCodec) -> Self {
        Self {
            codec,
            buffer: BytesMut::new(),
            listeners: Vec::new(),
        }
    }

    /// Register a callback invoked for every decoded packet, in order.
    pub fn on_packet(&mut self, callback: impl FnMut(&Packet) + Send + 'static) {
        self.listeners.push(Box::new(callback));
    }

    /// Feed a chunk; returns the packets it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Packet>> {
        self.buffer.extend_from_slice(chunk);

        let mut packets = Vec::new();
        loop {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(packet)) => {
                    for listener in &mut self.listeners {
                        listener(&packet);
                    }
                    packets.push(packet);
                }
                Ok(None) => break,
                Err(e) => {
                    self.buffer.clear();
                    return Err(e);
                }
            }
        }
        Ok(packets)
    }

    /// Bytes buffered but not yet part of a complete packet.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for PacketParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::packet::PacketType;
    use crate::WireError;
    use assert_matches::assert_matches;

    fn framed(packet: &Packet) -> Vec<u8> {
        packet.to_bytes().unwrap().to_vec()
    }

    #[test]
    fn byte_at_a_time() {
        let bytes = framed(&Packet::new(PacketType::PushBlock, vec![1, 2, 3]));
        let mut parser = PacketParser::new();

        let mut out = Vec::new();
        for b in &bytes {
            out.extend(parser.push(std::slice::from_ref(b)).unwrap());
        }

        assert_eq!(out.len(), 1);
        assert_eq!(&out[0].payload[..], &[1, 2, 3]);
        assert_eq!(parser.pending(), 0);
    }

    #[test]
    fn chunk_spanning_two_packets() {
        let mut bytes = framed(&Packet::new(PacketType::PushBlock, vec![1]));
        bytes.extend(framed(&Packet::new(PacketType::PushTransactions, vec![2, 2])));
        let mut parser = PacketParser::new();

        let first = parser.push(&bytes[..12]).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(parser.pending(), 3);

        let second = parser.push(&bytes[12..]).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].packet_type, PacketType::PushTransactions);
    }

    #[test]
    fn listeners_see_every_packet() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let mut parser = PacketParser::new();
        parser.on_packet(move |_| {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut bytes = framed(&Packet::header_only(PacketType::PushBlock));
        bytes.extend(framed(&Packet::header_only(PacketType::PushBlock)));
        let _ = parser.push(&bytes).unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn decode_error_clears_buffer() {
        let mut parser = PacketParser::new();
        let result = parser.push(&[0x04, 0, 0, 0, 0x01, 0, 0, 0, 0xFF]);
        assert_matches!(result, Err(WireError::SizeTooSmall(4)));
        assert_eq!(parser.pending(), 0);
    }
}
