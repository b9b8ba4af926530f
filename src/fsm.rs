//! Connection lifecycle of the two-radio session.
//!
//! ```text
//!                 connect                      both up
//! Disconnected ───────────▶ Connecting ──▶ PartiallyConnected ──▶ Connected
//!      ▲                                        ▲   │                 │
//!      │                        one side lost   │   │ link lost       │
//!      │                        (reconnect)     └───┴─────────────────┘
//!      │                                                              │
//!      └──────────── Disconnecting ◀──────────── disconnect() ────────┘
//! ```
//!
//! [`step`] is a pure function; the session executes the returned effects.

use crate::endpoint::{ EndpointId, LinkState, Side };
use std::fmt;
use tracing::{ debug, info };

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    PartiallyConnected,
    Connected,
    Disconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::PartiallyConnected => write!(f, "partially-connected"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

/// One endpoint the session is responsible for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tracked {
    pub id: EndpointId,
    pub state: LinkState,
}

/// Left/right slots tracked by the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Links {
    pub left: Option<Tracked>,
    pub right: Option<Tracked>,
}

impl Links {
    pub fn get(&self, side: Side) -> Option<&Tracked> {
        match side {
            Side::Left => self.left.as_ref(),
            Side::Right => self.right.as_ref(),
        }
    }

    fn get_mut(&mut self, side: Side) -> Option<&mut Tracked> {
        match side {
            Side::Left => self.left.as_mut(),
            Side::Right => self.right.as_mut(),
        }
    }

    fn tracked(&self) -> impl Iterator<Item = (Side, &Tracked)> {
        Side::BOTH.into_iter().filter_map(move |s| self.get(s).map(|t| (s, t)))
    }

    /// Sides currently tracked under `id` (two for a shared endpoint).
    pub fn sides_of(&self, id: &EndpointId) -> Vec<Side> {
        self.tracked()
            .filter(|(_, t)| &t.id == id)
            .map(|(s, _)| s)
            .collect()
    }

    pub fn state_of(&self, side: Side) -> LinkState {
        self.get(side).map_or(LinkState::Disconnected, |t| t.state)
    }

    /// Session state implied by the endpoint states.
    pub fn derive(&self) -> SessionState {
        let both = self.left.is_some() && self.right.is_some();
        let mut any_up = false;
        let mut all_up = true;
        let mut any_connecting = false;
        for (_, t) in self.tracked() {
            match t.state {
                LinkState::Connected => {
                    any_up = true;
                }
                LinkState::Connecting => {
                    any_connecting = true;
                    all_up = false;
                }
                LinkState::Disconnected => {
                    all_up = false;
                }
            }
        }
        if both && all_up {
            SessionState::Connected
        } else if any_up {
            SessionState::PartiallyConnected
        } else if any_connecting {
            SessionState::Connecting
        } else {
            SessionState::Disconnected
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Connect {
        left: Option<EndpointId>,
        right: Option<EndpointId>,
    },
    LinkUp(Side),
    LinkDown(Side),
    ConnectFailed {
        side: Side,
        reason: String,
    },
    ReconnectDue(Side),
    Disconnect,
    DisconnectComplete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    IssueConnect(Side),
    IssueDisconnect(Side),
    NotifyConnected,
    NotifyDisconnected,
    NotifyConnectFailed {
        side: Side,
        reason: String,
    },
    ScheduleReconnect(Side),
    AbortTransfers,
    Status(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub state: SessionState,
    pub links: Links,
    pub effects: Vec<Effect>,
}

/// Advance the session by one input.
pub fn step(state: SessionState, links: &Links, input: Input) -> Step {
    let mut links = links.clone();
    let mut effects = Vec::new();

    let next = match input {
        Input::Connect { left, right } => {
            if state != SessionState::Disconnected {
                effects.push(Effect::Status(format!("connect ignored while {}", state)));
                state
            } else if left.is_none() && right.is_none() {
                effects.push(Effect::Status("no endpoints to connect".into()));
                state
            } else {
                links = Links {
                    left: left.map(|id| Tracked { id, state: LinkState::Connecting }),
                    right: right.map(|id| Tracked { id, state: LinkState::Connecting }),
                };
                for (side, _) in links.tracked() {
                    effects.push(Effect::IssueConnect(side));
                }
                effects.push(Effect::Status("Connecting...".into()));
                links.derive()
            }
        }

        Input::LinkUp(side) => {
            match guarded(state, &mut links, side) {
                Some(t) if t.state != LinkState::Connected => {
                    t.state = LinkState::Connected;
                    let next = links.derive();
                    if next == SessionState::Connected && state != SessionState::Connected {
                        effects.push(Effect::NotifyConnected);
                        effects.push(Effect::Status("Connected".into()));
                    } else {
                        effects.push(Effect::Status(format!("{} connected", side)));
                    }
                    next
                }
                _ => state,
            }
        }

        Input::LinkDown(side) => {
            match guarded(state, &mut links, side) {
                Some(t) if t.state != LinkState::Disconnected => {
                    t.state = LinkState::Disconnected;
                    if state == SessionState::Connected {
                        effects.push(Effect::NotifyDisconnected);
                    }
                    effects.push(Effect::AbortTransfers);
                    effects.push(Effect::ScheduleReconnect(side));
                    effects.push(Effect::Status(format!("{} disconnected", side)));
                    links.derive()
                }
                _ => state,
            }
        }

        Input::ConnectFailed { side, reason } => {
            match guarded(state, &mut links, side) {
                Some(t) if t.state == LinkState::Connecting => {
                    t.state = LinkState::Disconnected;
                    effects.push(Effect::NotifyConnectFailed { side, reason: reason.clone() });
                    effects.push(Effect::Status(format!("{} connect failed: {}", side, reason)));
                    links.derive()
                }
                _ => state,
            }
        }

        Input::ReconnectDue(side) => {
            match guarded(state, &mut links, side) {
                Some(t) if t.state == LinkState::Disconnected => {
                    t.state = LinkState::Connecting;
                    effects.push(Effect::IssueConnect(side));
                    effects.push(Effect::Status(format!("reconnecting {}", side)));
                    links.derive()
                }
                _ => state,
            }
        }

        Input::Disconnect => {
            if state == SessionState::Disconnecting {
                state
            } else if links.left.is_none() && links.right.is_none() {
                SessionState::Disconnected
            } else {
                if state == SessionState::Connected {
                    effects.push(Effect::NotifyDisconnected);
                }
                effects.push(Effect::AbortTransfers);
                for (side, _) in links.tracked() {
                    effects.push(Effect::IssueDisconnect(side));
                }
                effects.push(Effect::Status("Disconnecting...".into()));
                SessionState::Disconnecting
            }
        }

        Input::DisconnectComplete => {
            if state == SessionState::Disconnecting {
                links = Links::default();
                effects.push(Effect::Status("Disconnected".into()));
                SessionState::Disconnected
            } else {
                state
            }
        }
    };

    if next != state {
        info!(from = %state, to = %next, "🔀 session state");
    } else if effects.is_empty() {
        debug!(state = %state, "input ignored");
    }

    Step { state: next, links, effects }
}

/// The tracked slot for `side`, unless the session is tearing down.
fn guarded(state: SessionState, links: &mut Links, side: Side) -> Option<&mut Tracked> {
    if state == SessionState::Disconnecting {
        return None;
    }
    links.get_mut(side)
}
