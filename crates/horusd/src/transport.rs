//! UDP transport for Horus packets.
//!
//! One socket carries everything: tasks from clients, completions from
//! workers and control traffic from spines come in, and every outbound
//! packet leaves for the address in its directory entry. The same loop
//! runs the leaf's periodic sweep so probe deadlines are checked even when
//! no traffic arrives.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use horus_core::HorusPacket;
use horus_leaf::{Leaf, Outbound};

/// Largest datagram accepted; anything longer is truncated by the socket.
const MAX_DATAGRAM: usize = 2048;

pub struct PacketLoop {
    socket: UdpSocket,
    leaf: Arc<Leaf>,
    sweep_interval: Duration,
}

impl PacketLoop {
    pub fn new(socket: UdpSocket, leaf: Arc<Leaf>, sweep_interval: Duration) -> Self {
        Self {
            socket,
            leaf,
            sweep_interval,
        }
    }

    pub async fn bind(addr: SocketAddr, leaf: Arc<Leaf>, sweep_interval: Duration) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self::new(socket, leaf, sweep_interval))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive and handle packets until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            addr = ?self.socket.local_addr().ok(),
            sweep_ms = self.sweep_interval.as_millis() as u64,
            "packet loop started"
        );

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => self.on_datagram(&buf[..len], peer).await,
                    Err(e) => warn!(error = %e, "udp receive failed"),
                },
                _ = sweep.tick() => {
                    let outbound = self.leaf.tick(Instant::now());
                    self.send_all(outbound).await;
                }
                _ = shutdown.changed() => {
                    info!("packet loop shutting down");
                    break;
                }
            }
        }
    }

    async fn on_datagram(&self, data: &[u8], peer: SocketAddr) {
        let packet = match HorusPacket::decode(data) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(%peer, error = %e, "dropping undecodable datagram");
                return;
            }
        };
        trace!(%peer, kind = ?packet.kind, cluster = %packet.cluster, src = %packet.src, "packet received");

        match self.leaf.handle(packet, Instant::now()) {
            Ok(handled) => self.send_all(handled.outbound).await,
            Err(e) => warn!(%peer, error = %e, "packet rejected"),
        }
    }

    async fn send_all(&self, outbound: Vec<Outbound>) {
        for out in outbound {
            let bytes = out.packet.encode();
            if let Err(e) = self.socket.send_to(&bytes, out.egress.address).await {
                warn!(
                    dst = %out.packet.dst,
                    addr = %out.egress.address,
                    error = %e,
                    "send failed"
                );
            }
        }
    }
}
