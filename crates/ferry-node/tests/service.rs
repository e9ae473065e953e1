//! Connection service behavior against an in-process fake node.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use futures::future::join_all;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{DuplexStream, duplex};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use ferry_node::challenge;
use ferry_node::{
    BoxTransport, ChallengeAuthenticator, ConnectionService, Dialer, NodeError, NodeIdentity,
    ServiceOptions,
};
use ferry_wire::{Packet, PacketCodec, PacketType, requests};

const NODE_SEED: [u8; 32] = [9; 32];
const GATEWAY_SEED: [u8; 32] = [1; 32];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Behavior {
    /// Complete the handshake and answer every request.
    Serve,
    /// Complete the handshake but never answer.
    Mute,
    /// Answer the challenge with the wrong key.
    Impostor,
    /// Accept the transport and never start the handshake.
    Silent,
}

/// Dials in-memory transports backed by a fake node task.
struct FakeNode {
    behavior: Mutex<Behavior>,
    dials: AtomicUsize,
    links: Mutex<Vec<CancellationToken>>,
}

impl FakeNode {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            dials: AtomicUsize::new(0),
            links: Mutex::new(Vec::new()),
        })
    }

    fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock() = behavior;
    }

    /// Hang up every open link.
    fn disconnect_all(&self) {
        for link in self.links.lock().drain(..) {
            link.cancel();
        }
    }
}

#[async_trait]
impl Dialer for FakeNode {
    async fn dial(&self, _node: &NodeIdentity) -> io::Result<BoxTransport> {
        let _ = self.dials.fetch_add(1, Ordering::SeqCst);
        let (gateway, node) = duplex(8192);
        let link = CancellationToken::new();
        self.links.lock().push(link.clone());
        let behavior = *self.behavior.lock();
        drop(tokio::spawn(run_node(
            Framed::new(node, PacketCodec::new()),
            behavior,
            link,
        )));
        Ok(Box::new(gateway))
    }
}

async fn run_node(
    mut framed: Framed<DuplexStream, PacketCodec>,
    behavior: Behavior,
    link: CancellationToken,
) {
    if behavior == Behavior::Silent {
        link.cancelled().await;
        return;
    }

    let node_challenge = challenge::random_challenge();
    if framed
        .send(challenge::server_challenge_request(&node_challenge))
        .await
        .is_err()
    {
        return;
    }
    let Some(Ok(response)) = framed.next().await else {
        return;
    };
    let Some(parsed) = challenge::parse_server_challenge_response(&response) else {
        return;
    };
    let signer = match behavior {
        Behavior::Impostor => SigningKey::from_bytes(&[10; 32]),
        _ => SigningKey::from_bytes(&NODE_SEED),
    };
    if framed
        .send(challenge::client_challenge_response(&parsed.challenge, &signer))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            () = link.cancelled() => return,
            item = framed.next() => match item {
                Some(Ok(request)) if behavior == Behavior::Serve => {
                    let reply = Packet::new(request.packet_type, vec![42]);
                    if framed.send(reply).await.is_err() {
                        return;
                    }
                }
                Some(Ok(_)) => {}
                _ => return,
            },
        }
    }
}

fn identity() -> NodeIdentity {
    NodeIdentity {
        host: "fake-node".into(),
        port: 7900,
        public_key: SigningKey::from_bytes(&NODE_SEED).verifying_key().to_bytes(),
    }
}

fn service(node: &Arc<FakeNode>, options: ServiceOptions) -> ConnectionService {
    let dialer: Arc<dyn Dialer> = Arc::clone(node) as Arc<dyn Dialer>;
    ConnectionService::new(
        identity(),
        dialer,
        Arc::new(ChallengeAuthenticator::new(SigningKey::from_bytes(&GATEWAY_SEED))),
        options,
    )
}

#[tokio::test]
async fn repeated_leases_share_one_connection() {
    let node = FakeNode::new(Behavior::Serve);
    let service = service(&node, ServiceOptions::default());

    let first = service.lease().await.unwrap();
    let second = service.lease().await.unwrap();
    let third = service.lease().await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &third));
    assert_eq!(node.dials(), 1);
    assert!(service.is_connected());
}

#[tokio::test]
async fn concurrent_leases_coalesce_on_one_attempt() {
    let node = FakeNode::new(Behavior::Serve);
    let service = service(&node, ServiceOptions::default());

    let leases = join_all((0..8).map(|_| service.lease())).await;

    let first = leases[0].as_ref().unwrap();
    for lease in &leases {
        assert!(Arc::ptr_eq(first, lease.as_ref().unwrap()));
    }
    assert_eq!(node.dials(), 1);
}

#[tokio::test]
async fn lease_after_close_redials_once() {
    let node = FakeNode::new(Behavior::Serve);
    let service = service(&node, ServiceOptions::default());

    let first = service.lease().await.unwrap();
    node.disconnect_all();
    first.closed().await;

    let second = service.lease().await.unwrap();
    let third = service.lease().await.unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&second, &third));
    assert_eq!(node.dials(), 2);
}

#[tokio::test]
async fn failed_handshake_is_not_cached() {
    let node = FakeNode::new(Behavior::Impostor);
    let service = service(&node, ServiceOptions::default());

    let error = service.lease().await.err().unwrap();
    assert_eq!(error, NodeError::Unavailable);
    assert_eq!(error.to_string(), "connection failed");
    assert!(!service.is_connected());

    node.set_behavior(Behavior::Serve);
    let lease = service.lease().await;
    assert!(lease.is_ok());
    assert_eq!(node.dials(), 2);
}

#[tokio::test]
async fn leased_connection_carries_requests() {
    let node = FakeNode::new(Behavior::Serve);
    let service = service(&node, ServiceOptions::default());

    let connection = service.lease().await.unwrap();
    connection
        .send(requests::node_time().to_bytes().unwrap())
        .await
        .unwrap();

    let reply = connection.recv().await.unwrap();
    assert_eq!(reply.packet_type, PacketType::TimeSyncNodeTime);
    assert_eq!(connection.pending_sends(), 0);
}

#[tokio::test]
async fn request_uses_a_fresh_connection() {
    let node = FakeNode::new(Behavior::Serve);
    let service = service(&node, ServiceOptions::default());

    let leased = service.lease().await.unwrap();
    let reply = service
        .request(requests::node_info().to_bytes().unwrap())
        .await
        .unwrap();
    assert_eq!(reply.packet_type, PacketType::NodeDiscoveryPullPing);
    assert_eq!(&reply.payload[..], &[42]);
    assert_eq!(node.dials(), 2);

    // the cached lease is untouched
    let again = service.lease().await.unwrap();
    assert!(Arc::ptr_eq(&leased, &again));
    assert_eq!(node.dials(), 2);
}

#[tokio::test]
async fn single_use_connections_are_independent() {
    let node = FakeNode::new(Behavior::Serve);
    let service = service(&node, ServiceOptions::default());

    let first = service.single_use().await.unwrap();
    let second = service.single_use().await.unwrap();
    assert!(!service.is_connected());

    let request = requests::node_peers().to_bytes().unwrap();
    let (a, b) = tokio::join!(
        first.push_pull(request.clone(), Duration::from_secs(5)),
        second.push_pull(request, Duration::from_secs(5)),
    );
    assert_eq!(a.unwrap().packet_type, PacketType::NodeDiscoveryPullPeers);
    assert_eq!(b.unwrap().packet_type, PacketType::NodeDiscoveryPullPeers);
    assert_eq!(node.dials(), 2);
}

#[tokio::test(start_paused = true)]
async fn unanswered_request_times_out() {
    let node = FakeNode::new(Behavior::Mute);
    let options = ServiceOptions {
        request_timeout: Duration::from_millis(500),
        ..ServiceOptions::default()
    };
    let service = service(&node, options);

    let result = service
        .request(requests::node_info().to_bytes().unwrap())
        .await;
    assert_matches!(result, Err(NodeError::Timeout));
}

#[tokio::test(start_paused = true)]
async fn handshake_timeout_bounds_lease() {
    let node = FakeNode::new(Behavior::Silent);
    let options = ServiceOptions {
        handshake_timeout: Some(Duration::from_millis(200)),
        ..ServiceOptions::default()
    };
    let service = service(&node, options);

    assert!(matches!(service.lease().await, Err(NodeError::Unavailable)));
    assert!(!service.is_connected());
    node.disconnect_all();
}
