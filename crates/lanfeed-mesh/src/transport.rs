use anyhow::{Context, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, mpsc};

/// Well-known port shared by every peer on the segment.
pub const DEFAULT_PORT: u16 = 50999;

const MAX_DATAGRAM: usize = 65_535;
const CHANNEL_DEPTH: usize = 256;

/// Where a datagram is headed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Every peer on the local segment. The sender's own receive path sees
    /// the datagram too; the dispatcher is responsible for dropping it.
    Broadcast,
    Peer(IpAddr),
}

/// One outbound message. The transport does not inspect the payload; the
/// datagram boundary is the message boundary.
#[derive(Debug)]
pub struct Datagram {
    pub payload: Vec<u8>,
    pub dest: Destination,
}

/// Transport facade: fire-and-forget sends plus a stream of received
/// `(payload, source)` pairs.
///
/// The UDP flavor owns a socket on the well-known port with broadcast
/// enabled; the in-memory flavor hands both channel ends to the caller so
/// tests can wire peers together without touching the network.
pub struct Transport {
    outbound: mpsc::Sender<Datagram>,
    pub incoming: Mutex<mpsc::Receiver<(Vec<u8>, SocketAddr)>>,
}

impl Transport {
    /// Bind the shared UDP port and spawn the socket send/receive loops.
    pub fn bind_udp(port: u16) -> Result<Self> {
        let std_sock = std::net::UdpSocket::bind(("0.0.0.0", port))
            .with_context(|| format!("failed to bind UDP port {port}"))?;
        std_sock
            .set_broadcast(true)
            .context("failed to enable broadcast")?;
        std_sock
            .set_nonblocking(true)
            .context("failed to set socket non-blocking")?;
        let socket = Arc::new(UdpSocket::from_std(std_sock).context("failed to register socket")?);

        let (outbound_tx, outbound_rx) = mpsc::channel::<Datagram>(CHANNEL_DEPTH);
        let (incoming_tx, incoming_rx) = mpsc::channel::<(Vec<u8>, SocketAddr)>(CHANNEL_DEPTH);

        tokio::spawn(send_loop(socket.clone(), port, outbound_rx));
        tokio::spawn(recv_loop(socket, incoming_tx));

        Ok(Self {
            outbound: outbound_tx,
            incoming: Mutex::new(incoming_rx),
        })
    }

    /// Build a transport from raw channel ends. The caller plays the role of
    /// the network: it drains `outbound` and feeds `incoming`.
    pub fn in_memory(
        outbound: mpsc::Sender<Datagram>,
        incoming: mpsc::Receiver<(Vec<u8>, SocketAddr)>,
    ) -> Self {
        Self {
            outbound,
            incoming: Mutex::new(incoming),
        }
    }

    /// Queue a datagram for sending. Fire-and-forget: delivery is never
    /// confirmed and the send is not retried.
    pub async fn send(&self, payload: Vec<u8>, dest: Destination) -> Result<()> {
        self.outbound
            .send(Datagram { payload, dest })
            .await
            .map_err(|_| anyhow::anyhow!("transport is shut down"))
    }
}

async fn send_loop(socket: Arc<UdpSocket>, port: u16, mut rx: mpsc::Receiver<Datagram>) {
    while let Some(datagram) = rx.recv().await {
        let addr: SocketAddr = match datagram.dest {
            Destination::Broadcast => (IpAddr::V4(Ipv4Addr::BROADCAST), port).into(),
            Destination::Peer(ip) => (ip, port).into(),
        };
        if let Err(e) = socket.send_to(&datagram.payload, addr).await {
            // Send failures are reported and dropped; the loop keeps going.
            tracing::warn!(dest = %addr, err = %e, "failed to send datagram");
        }
    }
}

async fn recv_loop(socket: Arc<UdpSocket>, tx: mpsc::Sender<(Vec<u8>, SocketAddr)>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, from)) => {
                if tx.send((buf[..n].to_vec(), from)).await.is_err() {
                    break; // receiver dropped, node is shutting down
                }
            }
            Err(e) => {
                tracing::warn!(err = %e, "failed to receive datagram");
            }
        }
    }
}
