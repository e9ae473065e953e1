//! Connection authentication.

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use futures::{SinkExt, StreamExt};
use tracing::debug;

use ferry_wire::{Packet, WireError};

use crate::challenge::{self, SECURITY_MODE_NONE};
use crate::errors::{VerifyError, VerifyResult};
use crate::transport::{NodeFramed, NodeIdentity};

/// Runs the handshake on a freshly dialed transport.
///
/// On success the transport is ready for application packets; any bytes the
/// node sent after the handshake stay buffered in the framed stream.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Authenticate against `node`.
    async fn authenticate(
        &self,
        framed: &mut NodeFramed,
        node: &NodeIdentity,
    ) -> Result<(), VerifyError>;
}

/// Ed25519 challenge/response handshake.
pub struct ChallengeAuthenticator {
    key: SigningKey,
    security_mode: u8,
}

impl ChallengeAuthenticator {
    /// Authenticator signing with `key`.
    pub fn new(key: SigningKey) -> Self {
        Self {
            key,
            security_mode: SECURITY_MODE_NONE,
        }
    }

    /// Public key presented to the node.
    pub fn public_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }
}

#[async_trait]
impl Authenticator for ChallengeAuthenticator {
    async fn authenticate(
        &self,
        framed: &mut NodeFramed,
        node: &NodeIdentity,
    ) -> Result<(), VerifyError> {
        let request = next_packet(framed).await?;
        let Some(node_challenge) = challenge::parse_server_challenge_request(&request) else {
            debug!(
                packet_type = %request.packet_type,
                size = request.size(),
                "unable to parse server challenge"
            );
            return Err(VerifyError(VerifyResult::MalformedData));
        };

        let (own_challenge, response) =
            challenge::server_challenge_response(&node_challenge, &self.key, self.security_mode);
        debug!(size = response.size(), "writing challenge response");
        framed
            .send(response)
            .await
            .map_err(|_| VerifyError(VerifyResult::IoError))?;

        let reply = next_packet(framed).await?;
        let Some(signature) = challenge::parse_client_challenge_response(&reply) else {
            debug!(
                packet_type = %reply.packet_type,
                size = reply.size(),
                "unable to parse client challenge"
            );
            return Err(VerifyError(VerifyResult::MalformedData));
        };

        let verified =
            challenge::verify_client_challenge_response(&signature, &node.public_key, &own_challenge);
        debug!(verified, "client challenge checked");
        if verified {
            Ok(())
        } else {
            Err(VerifyError(VerifyResult::FailedChallenge))
        }
    }
}

async fn next_packet(framed: &mut NodeFramed) -> Result<Packet, VerifyError> {
    match framed.next().await {
        Some(Ok(packet)) => Ok(packet),
        Some(Err(WireError::Io(e))) => {
            debug!(error = %e, "transport error during handshake");
            Err(VerifyError(VerifyResult::IoError))
        }
        Some(Err(e)) => {
            debug!(error = %e, "undecodable handshake packet");
            Err(VerifyError(VerifyResult::MalformedData))
        }
        None => Err(VerifyError(VerifyResult::IoError)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::BoxTransport;
    use ferry_wire::{PacketCodec, PacketType};
    use tokio::io::duplex;
    use tokio_util::codec::Framed;

    fn node_identity(node_key: &SigningKey) -> NodeIdentity {
        NodeIdentity {
            host: "node".into(),
            port: 7900,
            public_key: node_key.verifying_key().to_bytes(),
        }
    }

    fn pair() -> (NodeFramed, Framed<tokio::io::DuplexStream, PacketCodec>) {
        let (client, server) = duplex(4096);
        let client: BoxTransport = Box::new(client);
        (
            Framed::new(client, PacketCodec::new()),
            Framed::new(server, PacketCodec::new()),
        )
    }

    async fn run_node(
        mut node: Framed<tokio::io::DuplexStream, PacketCodec>,
        node_key: SigningKey,
    ) -> bool {
        let challenge = challenge::random_challenge();
        node.send(challenge::server_challenge_request(&challenge))
            .await
            .unwrap();
        let response = node.next().await.unwrap().unwrap();
        let parsed = challenge::parse_server_challenge_response(&response).unwrap();
        let gateway_ok = challenge::verify_server_challenge_response(&parsed, &challenge);
        node.send(challenge::client_challenge_response(&parsed.challenge, &node_key))
            .await
            .unwrap();
        gateway_ok
    }

    #[tokio::test]
    async fn handshake_succeeds() {
        let node_key = SigningKey::from_bytes(&[9; 32]);
        let auth = ChallengeAuthenticator::new(SigningKey::from_bytes(&[1; 32]));
        let (mut client, server) = pair();

        let node = tokio::spawn(run_node(server, node_key.clone()));
        let result = auth.authenticate(&mut client, &node_identity(&node_key)).await;

        assert_eq!(result, Ok(()));
        assert!(node.await.unwrap(), "node must accept the gateway signature");
    }

    #[tokio::test]
    async fn impostor_node_fails_challenge() {
        let expected = SigningKey::from_bytes(&[9; 32]);
        let impostor = SigningKey::from_bytes(&[10; 32]);
        let auth = ChallengeAuthenticator::new(SigningKey::from_bytes(&[1; 32]));
        let (mut client, server) = pair();

        let _node = tokio::spawn(run_node(server, impostor));
        let result = auth.authenticate(&mut client, &node_identity(&expected)).await;

        assert_eq!(result, Err(VerifyError(VerifyResult::FailedChallenge)));
    }

    #[tokio::test]
    async fn unexpected_first_packet_is_malformed() {
        let node_key = SigningKey::from_bytes(&[9; 32]);
        let auth = ChallengeAuthenticator::new(SigningKey::from_bytes(&[1; 32]));
        let (mut client, mut server) = pair();

        server
            .send(Packet::header_only(PacketType::PushBlock))
            .await
            .unwrap();
        let result = auth.authenticate(&mut client, &node_identity(&node_key)).await;

        assert_eq!(result, Err(VerifyError(VerifyResult::MalformedData)));
    }

    #[tokio::test]
    async fn close_before_challenge_is_io_error() {
        let node_key = SigningKey::from_bytes(&[9; 32]);
        let auth = ChallengeAuthenticator::new(SigningKey::from_bytes(&[1; 32]));
        let (mut client, server) = pair();

        drop(server);
        let result = auth.authenticate(&mut client, &node_identity(&node_key)).await;

        assert_eq!(result, Err(VerifyError(VerifyResult::IoError)));
    }

    #[test]
    fn public_key_matches_signing_key() {
        let key = SigningKey::from_bytes(&[5; 32]);
        let expected = key.verifying_key().to_bytes();
        assert_eq!(ChallengeAuthenticator::new(key).public_key(), expected);
    }
}
