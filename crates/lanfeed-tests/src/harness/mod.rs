use lanfeed_mesh::identity::LocalIdentity;
use lanfeed_mesh::transport::{Datagram, Destination, Transport};
use lanfeed_node::handler::{self, Event, NodeState};
use lanfeed_proto::PeerId;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc};

pub const TEST_PORT: u16 = 50999;

const CHANNEL_DEPTH: usize = 256;
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// In-memory datagram network connecting every joined peer.
///
/// Broadcasts are delivered to every peer including the sender, matching UDP
/// broadcast on a shared segment — the dispatcher's self-origin drop is
/// exercised for real.
#[derive(Default)]
pub struct TestNet {
    peers: Mutex<HashMap<IpAddr, mpsc::Sender<(Vec<u8>, SocketAddr)>>>,
}

impl TestNet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a peer at `ip` and return the transport facing it.
    pub async fn join(self: &Arc<Self>, ip: IpAddr) -> Transport {
        let (out_tx, mut out_rx) = mpsc::channel::<Datagram>(CHANNEL_DEPTH);
        let (in_tx, in_rx) = mpsc::channel(CHANNEL_DEPTH);
        self.peers.lock().await.insert(ip, in_tx);

        let net = self.clone();
        tokio::spawn(async move {
            let src: SocketAddr = (ip, TEST_PORT).into();
            while let Some(datagram) = out_rx.recv().await {
                let peers = net.peers.lock().await;
                match datagram.dest {
                    Destination::Broadcast => {
                        for tx in peers.values() {
                            let _ = tx.send((datagram.payload.clone(), src)).await;
                        }
                    }
                    Destination::Peer(dest_ip) => {
                        if let Some(tx) = peers.get(&dest_ip) {
                            let _ = tx.send((datagram.payload.clone(), src)).await;
                        }
                        // Datagrams to unknown hosts vanish, like on a real
                        // segment.
                    }
                }
            }
        });

        Transport::in_memory(out_tx, in_rx)
    }
}

/// A full node running against the in-memory network, with its inbound loop
/// spawned and its event stream captured.
pub struct TestPeer {
    pub state: Arc<NodeState>,
    pub events: broadcast::Receiver<Event>,
    _state_dir: tempfile::TempDir,
}

/// Spawn a peer named `name` at `ip` on the given network.
pub async fn spawn_peer(net: &Arc<TestNet>, name: &str, ip: &str) -> TestPeer {
    let ip: IpAddr = ip.parse().expect("test ip");
    let transport = net.join(ip).await;
    let id = PeerId::parse(&format!("{name}@{ip}")).expect("test peer id");
    let identity = LocalIdentity::new(id, name, "testing");

    let state_dir = tempfile::tempdir().expect("tempdir");
    let state = NodeState::new(identity, transport, state_dir.path().join("downloads"));
    let events = state.event_tx.subscribe();
    tokio::spawn(handler::inbound_loop(state.clone()));

    TestPeer {
        state,
        events,
        _state_dir: state_dir,
    }
}

impl TestPeer {
    pub fn id(&self) -> PeerId {
        self.state.identity.id.clone()
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.state.downloads_dir.clone()
    }

    /// Wait until an event matching `pred` arrives, panicking on timeout.
    /// Non-matching events are discarded.
    pub async fn wait_for(&mut self, mut pred: impl FnMut(&Event) -> bool) -> Event {
        tokio::time::timeout(EVENT_TIMEOUT, async {
            loop {
                let event = self.events.recv().await.expect("event channel closed");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    /// Assert that no buffered event matches `pred`, after letting in-flight
    /// datagrams drain.
    pub async fn assert_no_event(&mut self, mut pred: impl FnMut(&Event) -> bool) {
        settle().await;
        while let Ok(event) = self.events.try_recv() {
            assert!(!pred(&event), "unexpected event: {event:?}");
        }
    }
}

/// Give in-flight datagrams a moment to drain.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
