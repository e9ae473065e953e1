//! # ferry-wire
//!
//! Binary packet framing for the peer node protocol.
//!
//! Every packet starts with an 8-byte header: the total packet size (header
//! included) as a little-endian `u32`, followed by the packet type as a
//! little-endian `u32`. The payload fills the remaining `size - 8` bytes.
//!
//! - [`Packet`] / [`PacketType`] describe a single frame
//! - [`PacketCodec`] plugs into `tokio_util::codec::Framed`
//! - [`PacketParser`] is a push-based decoder for raw byte chunks
//! - [`requests`] builds the request packets sent to the node

#![deny(unsafe_code)]

pub mod codec;
pub mod errors;
pub mod packet;
pub mod parser;
pub mod requests;

pub use codec::PacketCodec;
pub use errors::{Result, WireError};
pub use packet::{HEADER_SIZE, Packet, PacketType, create_header};
pub use parser::PacketParser;
