use crate::endpoint::{ DiscoveredEndpoint, EndpointId, EndpointLink, LinkEvent, LinkEventKind, LinkFactory };
use crate::error::LinkError;
use crate::pairing::Discovery;
use crate::stats::Stats;
use anyhow::Context;
use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::{ Arc, Mutex };
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{ debug, info, warn };

/// Largest datagram a unit sends (audio fragments stay well below this).
const MAX_DATAGRAM: usize = 2048;

// ═══════════════════════════════════════════════════════════════════════
//  Peer configuration
// ═══════════════════════════════════════════════════════════════════════

/// Parse `NAME@HOST:PORT` into the discovery it stands for.
///
/// The socket address doubles as the endpoint identity.
pub fn parse_peer(peer: &str) -> anyhow::Result<Discovery> {
    let (name, addr) = peer.rsplit_once('@').with_context(|| format!("peer {peer:?} is not NAME@ADDR"))?;
    if name.is_empty() {
        anyhow::bail!("peer {peer:?} has an empty name");
    }
    let addr: SocketAddr = addr.parse().with_context(|| format!("peer {peer:?} has a bad address"))?;
    Ok(Discovery::new(name, addr.to_string()))
}

// ═══════════════════════════════════════════════════════════════════════
//  Factory
// ═══════════════════════════════════════════════════════════════════════

/// Opens UDP links to glasses units exposed through a BLE relay or emulator.
pub struct UdpTransport {
    bind_host: String,
    recv_buf_size: usize,
    link_timeout: Option<Duration>,
    events: mpsc::Sender<LinkEvent>,
    stats: Arc<Stats>,
    /// One link per endpoint; reopening an id hands back the same link.
    links: Mutex<HashMap<EndpointId, Arc<UdpLink>>>,
}

impl UdpTransport {
    pub fn new(
        bind_host: impl Into<String>,
        recv_buf_size: usize,
        link_timeout: Option<Duration>,
        events: mpsc::Sender<LinkEvent>,
        stats: Arc<Stats>
    ) -> Self {
        UdpTransport {
            bind_host: bind_host.into(),
            recv_buf_size,
            link_timeout,
            events,
            stats,
            links: Mutex::new(HashMap::new()),
        }
    }
}

impl LinkFactory for UdpTransport {
    fn open(&self, endpoint: &DiscoveredEndpoint) -> anyhow::Result<Arc<dyn EndpointLink>> {
        let mut links = self.links.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(link) = links.get(&endpoint.id) {
            return Ok(link.clone());
        }
        let peer: SocketAddr = endpoint.id
            .as_str()
            .parse()
            .with_context(|| format!("endpoint {} is not a socket address", endpoint.id))?;
        let bind_addr = match peer {
            SocketAddr::V4(_) => format!("{}:0", self.bind_host),
            SocketAddr::V6(_) => "[::]:0".to_string(),
        };
        let link = Arc::new(UdpLink {
            id: endpoint.id.clone(),
            peer,
            bind_addr,
            recv_buf_size: self.recv_buf_size,
            link_timeout: self.link_timeout,
            events: self.events.clone(),
            stats: self.stats.clone(),
            connected: Arc::new(AtomicBool::new(false)),
            running: Mutex::new(None),
        });
        links.insert(endpoint.id.clone(), link.clone());
        Ok(link)
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Link
// ═══════════════════════════════════════════════════════════════════════

struct Running {
    socket: Arc<UdpSocket>,
    task: JoinHandle<()>,
}

/// One glasses unit reached over a connected UDP socket.
pub struct UdpLink {
    id: EndpointId,
    peer: SocketAddr,
    bind_addr: String,
    recv_buf_size: usize,
    link_timeout: Option<Duration>,
    events: mpsc::Sender<LinkEvent>,
    stats: Arc<Stats>,
    connected: Arc<AtomicBool>,
    running: Mutex<Option<Running>>,
}

impl UdpLink {
    fn socket(&self) -> Option<Arc<UdpSocket>> {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|r| r.socket.clone())
    }

    fn stop(&self) {
        self.connected.store(false, Ordering::Release);
        if let Some(old) = self.running.lock().unwrap_or_else(|e| e.into_inner()).take() {
            old.task.abort();
        }
    }

    fn connect_failed(&self, reason: String) -> LinkError {
        LinkError::ConnectFailed { endpoint: self.id.clone(), reason }
    }
}

#[async_trait::async_trait]
impl EndpointLink for UdpLink {
    fn id(&self) -> &EndpointId {
        &self.id
    }

    async fn connect(&self) -> Result<(), LinkError> {
        if self.connected.load(Ordering::Acquire) {
            let _ = self.events.send(LinkEvent::new(self.id.clone(), LinkEventKind::Connected)).await;
            return Ok(());
        }
        self.stop();

        let socket = bind_udp(&self.bind_addr, self.recv_buf_size).map_err(|e|
            self.connect_failed(format!("{:#}", e))
        )?;
        socket.connect(self.peer).await.map_err(|e| self.connect_failed(e.to_string()))?;
        let socket = Arc::new(socket);

        self.connected.store(true, Ordering::Release);
        let task = tokio::spawn(
            recv_loop(
                self.id.clone(),
                socket.clone(),
                self.events.clone(),
                self.connected.clone(),
                self.link_timeout,
                self.stats.clone()
            )
        );
        *self.running.lock().unwrap_or_else(|e| e.into_inner()) = Some(Running { socket, task });

        info!(endpoint = %self.id, peer = %self.peer, "✅ UDP link up");
        let _ = self.events.send(LinkEvent::new(self.id.clone(), LinkEventKind::Connected)).await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        let was_up = self.connected.load(Ordering::Acquire);
        self.stop();
        if was_up {
            debug!(endpoint = %self.id, "UDP link closed");
            let _ = self.events.try_send(LinkEvent::new(self.id.clone(), LinkEventKind::Disconnected));
        }
        Ok(())
    }

    async fn send(&self, frame: &[u8]) -> Result<(), LinkError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(LinkError::NotConnected(self.id.clone()));
        }
        let socket = self.socket().ok_or_else(|| LinkError::NotConnected(self.id.clone()))?;
        socket.send(frame).await.map_err(|e| LinkError::WriteRejected {
            endpoint: self.id.clone(),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

/// Forward datagrams as frame events until the peer goes silent or errors.
async fn recv_loop(
    id: EndpointId,
    socket: Arc<UdpSocket>,
    events: mpsc::Sender<LinkEvent>,
    connected: Arc<AtomicBool>,
    link_timeout: Option<Duration>,
    stats: Arc<Stats>
) {
    debug!(endpoint = %id, "UDP receiver started");
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let received = match link_timeout {
            Some(limit) =>
                match tokio::time::timeout(limit, socket.recv(&mut buf)).await {
                    Ok(r) => r,
                    Err(_) => {
                        warn!(endpoint = %id, secs = limit.as_secs(), "⏱️ peer silent, link lost");
                        break;
                    }
                }
            None => socket.recv(&mut buf).await,
        };

        match received {
            Ok(len) => {
                let frame = Bytes::copy_from_slice(&buf[..len]);
                if events.try_send(LinkEvent::new(id.clone(), LinkEventKind::Frame(frame))).is_err() {
                    stats.record_event_drop();
                }
            }
            Err(e) => {
                // Connected UDP sockets surface ICMP port-unreachable here.
                warn!(endpoint = %id, error = %e, "UDP recv error, link lost");
                break;
            }
        }
    }

    connected.store(false, Ordering::Release);
    let _ = events.send(LinkEvent::new(id, LinkEventKind::Disconnected)).await;
}

// ═══════════════════════════════════════════════════════════════════════
//  Socket helpers
// ═══════════════════════════════════════════════════════════════════════

fn bind_udp(addr: &str, recv_buf_size: usize) -> anyhow::Result<UdpSocket> {
    let parsed: SocketAddr = addr.parse()?;

    let socket = socket2::Socket::new(
        match parsed {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP)
    )?;

    socket.set_nonblocking(true)?;
    socket.set_recv_buffer_size(recv_buf_size)?;
    socket.bind(&parsed.into())?;

    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn peer() -> (UdpSocket, DiscoveredEndpoint) {
        let glasses = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = glasses.local_addr().unwrap();
        let ep = DiscoveredEndpoint { id: EndpointId::new(addr.to_string()), name: "Even_L_1".into() };
        (glasses, ep)
    }

    fn transport(timeout: Option<Duration>) -> (UdpTransport, mpsc::Receiver<LinkEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (UdpTransport::new("127.0.0.1", 64 * 1024, timeout, tx, Stats::new()), rx)
    }

    #[test]
    fn test_parse_peer() {
        let d = parse_peer("Even G1_07_L_07@127.0.0.1:7001").unwrap();
        assert_eq!(d.advertised_name, "Even G1_07_L_07");
        assert_eq!(d.endpoint_id, EndpointId::new("127.0.0.1:7001"));
        assert!(parse_peer("no-address").is_err());
        assert!(parse_peer("@127.0.0.1:1").is_err());
        assert!(parse_peer("x@not-an-addr").is_err());
    }

    #[tokio::test]
    async fn test_reopen_returns_same_link() {
        let (_glasses, ep) = peer().await;
        let (t, _rx) = transport(None);
        let first = t.open(&ep).unwrap();
        let again = t.open(&ep).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        // A connect through one handle is visible through the other.
        first.connect().await.unwrap();
        again.send(&[0x25]).await.unwrap();
        first.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let (_glasses, ep) = peer().await;
        let (t, _rx) = transport(None);
        let link = t.open(&ep).unwrap();
        assert!(matches!(link.send(&[0x25]).await, Err(LinkError::NotConnected(_))));
    }

    #[tokio::test]
    async fn test_round_trip_frames() {
        let (glasses, ep) = peer().await;
        let (t, mut rx) = transport(None);
        let link = t.open(&ep).unwrap();

        link.connect().await.unwrap();
        assert_eq!(rx.recv().await.unwrap().kind, LinkEventKind::Connected);

        link.send(&[0x0e, 0x01]).await.unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = glasses.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0x0e, 0x01]);

        glasses.send_to(&[0x0e, 0xc9, 0x01], from).await.unwrap();
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.endpoint, ep.id);
        assert_eq!(ev.kind, LinkEventKind::Frame(Bytes::from_static(&[0x0e, 0xc9, 0x01])));

        link.disconnect().await.unwrap();
        assert_eq!(rx.recv().await.unwrap().kind, LinkEventKind::Disconnected);
        assert!(link.send(&[0x25]).await.is_err());
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let (_glasses, ep) = peer().await;
        let (t, mut rx) = transport(Some(Duration::from_millis(50)));
        let link = t.open(&ep).unwrap();
        link.connect().await.unwrap();
        assert_eq!(rx.recv().await.unwrap().kind, LinkEventKind::Connected);
        let ev = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(ev.kind, LinkEventKind::Disconnected);
    }
}
