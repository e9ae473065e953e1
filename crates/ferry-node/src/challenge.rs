//! Challenge packets of the node handshake, both directions.
//!
//! 1. node → gateway: server challenge (type 1, 64 random bytes)
//! 2. gateway → node: type 1 carrying the gateway's own challenge, its
//!    signature over `node challenge | security mode`, its public key and the
//!    security mode
//! 3. node → gateway: client challenge (type 2, signature over the gateway's
//!    challenge)

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;

use ferry_wire::{HEADER_SIZE, Packet, PacketType};

/// Challenge length in bytes.
pub const CHALLENGE_SIZE: usize = 64;

/// Signature length in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Public key length in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// The only security mode the node accepts (no transport encryption).
pub const SECURITY_MODE_NONE: u8 = 1;

/// Total size of a challenge request or client challenge response.
pub const CHALLENGE_PACKET_SIZE: usize = HEADER_SIZE + CHALLENGE_SIZE;

/// Total size of a server challenge response.
pub const SERVER_RESPONSE_PACKET_SIZE: usize =
    HEADER_SIZE + CHALLENGE_SIZE + SIGNATURE_SIZE + PUBLIC_KEY_SIZE + 1;

/// A challenge.
pub type Challenge = [u8; CHALLENGE_SIZE];

/// Fresh random challenge.
pub fn random_challenge() -> Challenge {
    let mut challenge = [0u8; CHALLENGE_SIZE];
    rand::rng().fill_bytes(&mut challenge);
    challenge
}

/// Parsed gateway response to a server challenge.
#[derive(Clone, Debug)]
pub struct ServerChallengeResponse {
    /// Challenge the gateway poses back to the node.
    pub challenge: Challenge,
    /// Gateway signature over `node challenge | security mode`.
    pub signature: Signature,
    /// Gateway public key.
    pub public_key: [u8; PUBLIC_KEY_SIZE],
    /// Requested security mode.
    pub security_mode: u8,
}

// region: node side

/// Challenge packet a node sends when a connection opens.
pub fn server_challenge_request(challenge: &Challenge) -> Packet {
    Packet::new(PacketType::ServerChallenge, challenge.to_vec())
}

/// Parse the gateway response to a server challenge.
pub fn parse_server_challenge_response(packet: &Packet) -> Option<ServerChallengeResponse> {
    if packet.packet_type != PacketType::ServerChallenge
        || packet.size() != SERVER_RESPONSE_PACKET_SIZE
    {
        return None;
    }

    let payload = &packet.payload[..];
    let (challenge, rest) = payload.split_at(CHALLENGE_SIZE);
    let (signature, rest) = rest.split_at(SIGNATURE_SIZE);
    let (public_key, mode) = rest.split_at(PUBLIC_KEY_SIZE);

    Some(ServerChallengeResponse {
        challenge: challenge.try_into().ok()?,
        signature: Signature::from_bytes(&signature.try_into().ok()?),
        public_key: public_key.try_into().ok()?,
        security_mode: *mode.first()?,
    })
}

/// Check the gateway signed `challenge` with the key it presented.
pub fn verify_server_challenge_response(
    response: &ServerChallengeResponse,
    challenge: &Challenge,
) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(&response.public_key) else {
        return false;
    };
    key.verify(&signed_server_challenge(challenge, response.security_mode), &response.signature)
        .is_ok()
}

/// Node answer proving possession of its key.
pub fn client_challenge_response(challenge: &Challenge, node_key: &SigningKey) -> Packet {
    let signature = node_key.sign(challenge);
    Packet::new(PacketType::ClientChallenge, signature.to_bytes().to_vec())
}

// endregion

// region: gateway side

/// Parse the node's opening challenge.
pub fn parse_server_challenge_request(packet: &Packet) -> Option<Challenge> {
    if packet.packet_type != PacketType::ServerChallenge || packet.size() != CHALLENGE_PACKET_SIZE {
        return None;
    }
    packet.payload[..].try_into().ok()
}

/// Build the gateway response; returns the challenge posed to the node.
pub fn server_challenge_response(
    request: &Challenge,
    key: &SigningKey,
    security_mode: u8,
) -> (Challenge, Packet) {
    let challenge = random_challenge();
    let signature = key.sign(&signed_server_challenge(request, security_mode));

    let mut payload =
        Vec::with_capacity(SERVER_RESPONSE_PACKET_SIZE - HEADER_SIZE);
    payload.extend_from_slice(&challenge);
    payload.extend_from_slice(&signature.to_bytes());
    payload.extend_from_slice(key.verifying_key().as_bytes());
    payload.push(security_mode);

    (challenge, Packet::new(PacketType::ServerChallenge, payload))
}

/// Parse the node's signature over the gateway challenge.
pub fn parse_client_challenge_response(packet: &Packet) -> Option<Signature> {
    if packet.packet_type != PacketType::ClientChallenge || packet.size() != CHALLENGE_PACKET_SIZE {
        return None;
    }
    let bytes: [u8; SIGNATURE_SIZE] = packet.payload[..].try_into().ok()?;
    Some(Signature::from_bytes(&bytes))
}

/// Check the node signed `challenge` with the expected key.
pub fn verify_client_challenge_response(
    signature: &Signature,
    node_public_key: &[u8; PUBLIC_KEY_SIZE],
    challenge: &Challenge,
) -> bool {
    VerifyingKey::from_bytes(node_public_key)
        .and_then(|key| key.verify(challenge, signature))
        .is_ok()
}

// endregion

fn signed_server_challenge(challenge: &Challenge, security_mode: u8) -> Vec<u8> {
    let mut signed = Vec::with_capacity(CHALLENGE_SIZE + 1);
    signed.extend_from_slice(challenge);
    signed.push(security_mode);
    signed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    #[test]
    fn packet_sizes() {
        assert_eq!(CHALLENGE_PACKET_SIZE, 72);
        assert_eq!(SERVER_RESPONSE_PACKET_SIZE, 169);
        let (_, response) = server_challenge_response(&[0; 64], &key(1), SECURITY_MODE_NONE);
        assert_eq!(response.size(), 169);
    }

    #[test]
    fn full_exchange_verifies() {
        let gateway = key(1);
        let node = key(2);

        let node_challenge = random_challenge();
        let request = server_challenge_request(&node_challenge);
        let parsed_request = parse_server_challenge_request(&request).unwrap();

        let (gateway_challenge, response) =
            server_challenge_response(&parsed_request, &gateway, SECURITY_MODE_NONE);
        let parsed_response = parse_server_challenge_response(&response).unwrap();
        assert!(verify_server_challenge_response(&parsed_response, &node_challenge));
        assert_eq!(parsed_response.public_key, gateway.verifying_key().to_bytes());
        assert_eq!(parsed_response.security_mode, SECURITY_MODE_NONE);

        let answer = client_challenge_response(&parsed_response.challenge, &node);
        let signature = parse_client_challenge_response(&answer).unwrap();
        assert!(verify_client_challenge_response(
            &signature,
            &node.verifying_key().to_bytes(),
            &gateway_challenge
        ));
    }

    #[test]
    fn wrong_node_key_fails() {
        let challenge = random_challenge();
        let answer = client_challenge_response(&challenge, &key(3));
        let signature = parse_client_challenge_response(&answer).unwrap();
        assert!(!verify_client_challenge_response(
            &signature,
            &key(4).verifying_key().to_bytes(),
            &challenge
        ));
    }

    #[test]
    fn tampered_mode_fails() {
        let challenge = random_challenge();
        let (_, response) = server_challenge_response(&challenge, &key(1), SECURITY_MODE_NONE);
        let mut parsed = parse_server_challenge_response(&response).unwrap();
        parsed.security_mode = 2;
        assert!(!verify_server_challenge_response(&parsed, &challenge));
    }

    #[test]
    fn wrong_type_or_size_is_rejected() {
        let short = Packet::new(PacketType::ServerChallenge, vec![0; 63]);
        assert!(parse_server_challenge_request(&short).is_none());

        let wrong_type = Packet::new(PacketType::ClientChallenge, vec![0; 64]);
        assert!(parse_server_challenge_request(&wrong_type).is_none());
        assert!(parse_client_challenge_response(&wrong_type).is_some());

        let request = server_challenge_request(&[0; 64]);
        assert!(parse_client_challenge_response(&request).is_none());
        assert!(parse_server_challenge_response(&request).is_none());
    }
}
