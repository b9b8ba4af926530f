use crate::error::LinkError;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

// ═══════════════════════════════════════════════════════════════════════
//  Endpoint identity + role
// ═══════════════════════════════════════════════════════════════════════

/// Which physical unit of the glasses an endpoint drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

/// Opaque, stable handle for one radio endpoint (MAC, peripheral UUID, relay address…).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub String);

impl EndpointId {
    pub fn new(id: impl Into<String>) -> Self {
        EndpointId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Link state of a single endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::Connected => write!(f, "connected"),
        }
    }
}

/// An endpoint as seen by discovery, before any link is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredEndpoint {
    pub id: EndpointId,
    pub name: String,
}

// ═══════════════════════════════════════════════════════════════════════
//  Link capability
// ═══════════════════════════════════════════════════════════════════════

/// Write/connect capability for one endpoint.
///
/// Implementations never retry. State changes and received frames are
/// reported asynchronously as [`LinkEvent`]s on the channel handed to the
/// [`LinkFactory`], not through these return values.
#[async_trait::async_trait]
pub trait EndpointLink: Send + Sync {
    fn id(&self) -> &EndpointId;

    /// Begin connecting. Completion is signalled by `LinkEventKind::Connected`
    /// or `LinkEventKind::ConnectFailed`.
    async fn connect(&self) -> Result<(), LinkError>;

    /// Tear the link down. Safe to call when not connected.
    async fn disconnect(&self) -> Result<(), LinkError>;

    /// Write one frame. Fails with `LinkError::NotConnected` when the link is down.
    async fn send(&self, frame: &[u8]) -> Result<(), LinkError>;
}

/// Opens links for discovered endpoints.
pub trait LinkFactory: Send + Sync {
    fn open(&self, endpoint: &DiscoveredEndpoint) -> anyhow::Result<Arc<dyn EndpointLink>>;
}

/// Event pushed by a link into the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEvent {
    pub endpoint: EndpointId,
    pub kind: LinkEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEventKind {
    Connected,
    Disconnected,
    ConnectFailed(String),
    Frame(Bytes),
}

impl LinkEvent {
    pub fn new(endpoint: EndpointId, kind: LinkEventKind) -> Self {
        LinkEvent { endpoint, kind }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  In-memory link (tests + loopback)
// ═══════════════════════════════════════════════════════════════════════

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Shared, ordered log of every frame written through any mock link.
    pub type WireLog = Arc<Mutex<Vec<(EndpointId, Vec<u8>)>>>;

    pub struct MockLink {
        id: EndpointId,
        events: mpsc::Sender<LinkEvent>,
        wire: WireLog,
        connected: Mutex<bool>,
        /// When set, `connect()` reports success immediately via an event.
        auto_connect: bool,
        /// When set, `send()` fails after this many successful writes.
        fail_after: Mutex<Option<usize>>,
        /// When set, `connect()` waits this long before doing anything.
        connect_delay: Mutex<Option<Duration>>,
    }

    impl MockLink {
        pub fn set_connected(&self, up: bool) {
            *self.connected.lock().unwrap() = up;
        }

        pub fn fail_after(&self, writes: usize) {
            *self.fail_after.lock().unwrap() = Some(writes);
        }

        pub fn set_connect_delay(&self, delay: Duration) {
            *self.connect_delay.lock().unwrap() = Some(delay);
        }

        pub fn is_connected(&self) -> bool {
            *self.connected.lock().unwrap()
        }
    }

    #[async_trait::async_trait]
    impl EndpointLink for MockLink {
        fn id(&self) -> &EndpointId {
            &self.id
        }

        async fn connect(&self) -> Result<(), LinkError> {
            let delay = *self.connect_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.auto_connect {
                self.set_connected(true);
                let _ = self.events.send(
                    LinkEvent::new(self.id.clone(), LinkEventKind::Connected)
                ).await;
            }
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), LinkError> {
            self.set_connected(false);
            Ok(())
        }

        async fn send(&self, frame: &[u8]) -> Result<(), LinkError> {
            if !*self.connected.lock().unwrap() {
                return Err(LinkError::NotConnected(self.id.clone()));
            }
            {
                let mut budget = self.fail_after.lock().unwrap();
                if let Some(n) = budget.as_mut() {
                    if *n == 0 {
                        return Err(LinkError::WriteRejected {
                            endpoint: self.id.clone(),
                            reason: "injected failure".into(),
                        });
                    }
                    *n -= 1;
                }
            }
            self.wire.lock().unwrap().push((self.id.clone(), frame.to_vec()));
            Ok(())
        }
    }

    /// Factory producing [`MockLink`]s that share one wire log.
    pub struct MockFactory {
        pub events: mpsc::Sender<LinkEvent>,
        pub wire: WireLog,
        pub auto_connect: bool,
        pub links: Mutex<HashMap<EndpointId, Arc<MockLink>>>,
    }

    impl MockFactory {
        pub fn new(events: mpsc::Sender<LinkEvent>, auto_connect: bool) -> Self {
            MockFactory {
                events,
                wire: Arc::new(Mutex::new(Vec::new())),
                auto_connect,
                links: Mutex::new(HashMap::new()),
            }
        }

        pub fn link(&self, id: &str) -> Arc<MockLink> {
            self.links.lock().unwrap()[&EndpointId::new(id)].clone()
        }

        pub fn writes(&self) -> Vec<(EndpointId, Vec<u8>)> {
            self.wire.lock().unwrap().clone()
        }
    }

    impl LinkFactory for MockFactory {
        fn open(&self, endpoint: &DiscoveredEndpoint) -> anyhow::Result<Arc<dyn EndpointLink>> {
            let mut links = self.links.lock().unwrap();
            let link = links
                .entry(endpoint.id.clone())
                .or_insert_with(|| {
                    Arc::new(MockLink {
                        id: endpoint.id.clone(),
                        events: self.events.clone(),
                        wire: self.wire.clone(),
                        connected: Mutex::new(false),
                        auto_connect: self.auto_connect,
                        fail_after: Mutex::new(None),
                        connect_delay: Mutex::new(None),
                    })
                })
                .clone();
            Ok(link)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names() {
        assert_eq!(Side::Left.to_string(), "left");
        assert_eq!(LinkState::Connecting.to_string(), "connecting");
        assert_eq!(EndpointId::new("AA:BB").to_string(), "AA:BB");
    }

    #[tokio::test]
    async fn test_mock_link_rejects_send_when_down() {
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let factory = mock::MockFactory::new(tx, false);
        let ep = DiscoveredEndpoint { id: EndpointId::new("L"), name: "G1_L_1".into() };
        let link = factory.open(&ep).unwrap();
        let err = link.send(&[0x25]).await.unwrap_err();
        assert_eq!(err, LinkError::NotConnected(EndpointId::new("L")));
        assert!(factory.writes().is_empty());
    }
}
