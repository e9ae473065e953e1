//! Byte transports and how they are opened.

use std::fmt;
use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use ferry_wire::PacketCodec;

/// A duplex byte stream to the node.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Transport for T {}

/// Boxed transport used everywhere past the dialer.
pub type BoxTransport = Box<dyn Transport>;

/// A transport framed into packets.
pub type NodeFramed = Framed<BoxTransport, PacketCodec>;

/// The single peer node the gateway talks to.
#[derive(Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    /// Node host.
    pub host: String,
    /// Node port.
    pub port: u16,
    /// Node Ed25519 public key.
    pub public_key: [u8; 32],
}

impl NodeIdentity {
    /// `host:port`, for dialing and logs.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

/// Opens raw transports to the node.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a new transport.
    async fn dial(&self, node: &NodeIdentity) -> io::Result<BoxTransport>;
}

/// Plain TCP dialer.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, node: &NodeIdentity) -> io::Result<BoxTransport> {
        let stream = TcpStream::connect((node.host.as_str(), node.port)).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}
