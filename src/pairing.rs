use crate::endpoint::{ DiscoveredEndpoint, EndpointId, Side };
use crate::error::PairingAmbiguous;
use std::collections::BTreeMap;
use tracing::{ debug, info, warn };

/// Nordic UART service advertised by both units.
pub const UART_SERVICE_UUID: &str = "6E400001-B5A3-F393-E0A9-E50E24DCCA9E";

/// Name fragments that mark an advertisement as glasses.
pub const DEFAULT_NAME_PATTERNS: [&str; 2] = ["Even", "G1"];

/// One advertisement seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub advertised_name: String,
    pub service_hints: Vec<String>,
    pub endpoint_id: EndpointId,
}

impl Discovery {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Discovery {
            advertised_name: name.into(),
            service_hints: Vec::new(),
            endpoint_id: EndpointId::new(id),
        }
    }
}

/// Left and right endpoints believed to belong to one pair of glasses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePair {
    pub key: String,
    pub left: Option<DiscoveredEndpoint>,
    pub right: Option<DiscoveredEndpoint>,
}

impl DevicePair {
    pub fn new(key: impl Into<String>) -> Self {
        DevicePair { key: key.into(), left: None, right: None }
    }

    pub fn is_complete(&self) -> bool {
        self.left.is_some() && self.right.is_some()
    }

    pub fn slot(&self, side: Side) -> Option<&DiscoveredEndpoint> {
        match side {
            Side::Left => self.left.as_ref(),
            Side::Right => self.right.as_ref(),
        }
    }

    fn slot_mut(&mut self, side: Side) -> &mut Option<DiscoveredEndpoint> {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }
}

/// Emitted once per pair, when its second slot is filled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairComplete {
    pub pair: DevicePair,
}

// ═══════════════════════════════════════════════════════════════════════
//  Resolver
// ═══════════════════════════════════════════════════════════════════════

/// Groups discovered endpoints into left/right pairs by advertised name.
///
/// Pairs are kept across scan restarts; call [`PairingResolver::clear`]
/// to forget them.
#[derive(Debug)]
pub struct PairingResolver {
    name_patterns: Vec<String>,
    pairs: BTreeMap<String, DevicePair>,
}

impl Default for PairingResolver {
    fn default() -> Self {
        Self::new(DEFAULT_NAME_PATTERNS.iter().map(|p| p.to_string()).collect())
    }
}

impl PairingResolver {
    pub fn new(name_patterns: Vec<String>) -> Self {
        PairingResolver { name_patterns, pairs: BTreeMap::new() }
    }

    /// Is this advertisement a glasses unit at all?
    pub fn is_candidate(&self, d: &Discovery) -> bool {
        self.name_patterns.iter().any(|p| d.advertised_name.contains(p.as_str())) ||
            d.service_hints.iter().any(|h| h.eq_ignore_ascii_case(UART_SERVICE_UUID))
    }

    /// Record one discovery. Returns the pair when this discovery completed it.
    pub fn observe(&mut self, d: &Discovery) -> Option<PairComplete> {
        if !self.is_candidate(d) {
            debug!(name = %d.advertised_name, "ignoring non-glasses advertisement");
            return None;
        }

        let endpoint = DiscoveredEndpoint {
            id: d.endpoint_id.clone(),
            name: d.advertised_name.clone(),
        };

        let (key, sides): (String, Vec<Side>) = match side_of(&d.advertised_name) {
            Some(side) => (pair_key(&d.advertised_name, &d.endpoint_id), vec![side]),
            None => {
                let err = PairingAmbiguous {
                    name: d.advertised_name.clone(),
                    endpoint: d.endpoint_id.clone(),
                };
                warn!(error = %err, "⚠️ pairing ambiguous");
                (format!("anon-{}", hex_prefix(&d.endpoint_id)), Side::BOTH.to_vec())
            }
        };

        let pair = self.pairs.entry(key.clone()).or_insert_with(|| DevicePair::new(key.clone()));
        let was_complete = pair.is_complete();
        for side in sides {
            *pair.slot_mut(side) = Some(endpoint.clone());
        }
        debug!(key = %key, name = %d.advertised_name, endpoint = %d.endpoint_id, "slot updated");

        if !was_complete && pair.is_complete() {
            info!(key = %key, "👓 pair complete");
            return Some(PairComplete { pair: pair.clone() });
        }
        None
    }

    pub fn pair(&self, key: &str) -> Option<&DevicePair> {
        self.pairs.get(key)
    }

    pub fn pairs(&self) -> impl Iterator<Item = &DevicePair> {
        self.pairs.values()
    }

    pub fn complete_pairs(&self) -> impl Iterator<Item = &DevicePair> {
        self.pairs.values().filter(|p| p.is_complete())
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
    }

    /// Pair to connect to: the requested key (even one-sided), else the
    /// last connected pair once complete, else the first complete pair.
    pub fn preferred(&self, requested: Option<&str>, last: Option<&str>) -> Option<&DevicePair> {
        if let Some(key) = requested {
            return self.pairs.get(key);
        }
        last.and_then(|k| self.pairs.get(k))
            .filter(|p| p.is_complete())
            .or_else(|| self.complete_pairs().next())
    }
}

// ── Name parsing ───────────────────────────────────────────────────────

/// Side affinity from the advertised name; `None` when absent or contradictory.
pub fn side_of(name: &str) -> Option<Side> {
    let exact = (name.contains("_L_"), name.contains("_R_"));
    match exact {
        (true, false) => {
            return Some(Side::Left);
        }
        (false, true) => {
            return Some(Side::Right);
        }
        (true, true) => {
            return None;
        }
        (false, false) => {}
    }

    let lower = name.to_ascii_lowercase();
    let left = lower.contains("_l_") || lower.contains("left");
    let right = lower.contains("_r_") || lower.contains("right");
    match (left, right) {
        (true, false) => Some(Side::Left),
        (false, true) => Some(Side::Right),
        _ => None,
    }
}

/// Shared key for the two units: the text after the last `_`, falling back
/// to a prefix of the endpoint identity.
pub fn pair_key(name: &str, id: &EndpointId) -> String {
    match name.rsplit_once('_') {
        Some((_, tail)) if !tail.is_empty() => tail.to_string(),
        _ => hex_prefix(id),
    }
}

fn hex_prefix(id: &EndpointId) -> String {
    let hex: String = id
        .as_str()
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .take(8)
        .collect::<String>()
        .to_ascii_lowercase();
    if hex.is_empty() {
        id.as_str().chars().take(8).collect()
    } else {
        hex
    }
}
