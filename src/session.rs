use crate::audio::AudioDecoder;
use crate::config::Timing;
use crate::endpoint::{
    EndpointId,
    EndpointLink,
    LinkEvent,
    LinkEventKind,
    LinkFactory,
    LinkState,
    Side,
};
use crate::error::{ LinkError, SessionError };
use crate::fsm::{ self, Effect, Input, Links, SessionState };
use crate::pagination::{ self, DisplayGeometry };
use crate::pairing::DevicePair;
use crate::protocol::{ Command, Destination, ScreenStatus, TouchKind, MAX_IMAGE_CHUNKS };
use crate::router::{ self, Router };
use crate::settings::{ DisplaySettings, Setting };
use crate::stats::Stats;
use crate::store::DeviceStore;
use crate::transfer::{ ImageTransfer, TransferGuard };
use anyhow::Context;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{ Arc, Mutex, MutexGuard };
use std::time::Duration;
use tokio::sync::{ mpsc, watch };
use tracing::{ debug, info, warn };

/// Notification delivered to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Both sides are up. Fires once per transition into `Connected`.
    DeviceConnected {
        key: Option<String>,
    },
    DeviceDisconnected,
    ConnectFailed {
        side: Side,
        reason: String,
    },
    Touch {
        side: Side,
        kind: TouchKind,
    },
    /// One decoded audio frame.
    AudioFrameReady(Vec<u8>),
    MicAck {
        success: bool,
        enabled: bool,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub timing: Timing,
    pub geometry: DisplayGeometry,
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            timing: Timing::default(),
            geometry: DisplayGeometry::default(),
            event_capacity: 1024,
        }
    }
}

#[derive(Default)]
struct Handles {
    left: Option<Arc<dyn EndpointLink>>,
    right: Option<Arc<dyn EndpointLink>>,
}

impl Handles {
    fn get(&self, side: Side) -> Option<Arc<dyn EndpointLink>> {
        match side {
            Side::Left => self.left.clone(),
            Side::Right => self.right.clone(),
        }
    }
}

/// Reconnect timer, stamped with the session generation that armed it.
#[derive(Debug, Clone, Copy)]
struct ReconnectTimer {
    generation: u64,
    side: Side,
}

/// Mutable session state. Only touched under `Inner::core`, never across an await.
struct SessionCore {
    state: SessionState,
    links: Links,
    handles: Handles,
    device_key: Option<String>,
    router: Router,
    recording: bool,
    status: String,
    /// Bumped by every `disconnect()`; timers and connects from an older
    /// generation no longer act on the session.
    generation: u64,
}

struct Inner {
    core: Mutex<SessionCore>,
    factory: Arc<dyn LinkFactory>,
    /// Held only while decoding, never together with `core`.
    decoder: Mutex<Box<dyn AudioDecoder>>,
    /// Serializes multi-frame sends so two transfers never interleave.
    send_lock: tokio::sync::Mutex<()>,
    /// Bumped on every link loss or disconnect; aborts paced transfers.
    epoch: watch::Sender<u64>,
    events: mpsc::Sender<SessionEvent>,
    timers: mpsc::Sender<ReconnectTimer>,
    timer_rx: Mutex<Option<mpsc::Receiver<ReconnectTimer>>>,
    store: Arc<dyn DeviceStore>,
    config: SessionConfig,
    stats: Arc<Stats>,
}

/// Handle to the single logical glasses session. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        factory: Arc<dyn LinkFactory>,
        store: Arc<dyn DeviceStore>,
        decoder: Box<dyn AudioDecoder>,
        stats: Arc<Stats>
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
        let (timer_tx, timer_rx) = mpsc::channel(16);
        let (epoch, _) = watch::channel(0u64);

        let core = SessionCore {
            state: SessionState::Disconnected,
            links: Links::default(),
            handles: Handles::default(),
            device_key: None,
            router: Router::new(stats.clone()),
            recording: false,
            status: "Disconnected".into(),
            generation: 0,
        };

        let session = Session {
            inner: Arc::new(Inner {
                core: Mutex::new(core),
                factory,
                decoder: Mutex::new(decoder),
                send_lock: tokio::sync::Mutex::new(()),
                epoch,
                events: events_tx,
                timers: timer_tx,
                timer_rx: Mutex::new(Some(timer_rx)),
                store,
                config,
                stats,
            }),
        };
        (session, events_rx)
    }

    fn lock(&self) -> MutexGuard<'_, SessionCore> {
        self.inner.core.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn status(&self) -> String {
        self.lock().status.clone()
    }

    pub fn is_recording(&self) -> bool {
        self.lock().recording
    }

    pub fn device_key(&self) -> Option<String> {
        self.lock().device_key.clone()
    }

    pub fn link_state(&self, side: Side) -> LinkState {
        self.lock().links.state_of(side)
    }

    // ═══════════════════════════════════════════════════════════════════
    //  Lifecycle
    // ═══════════════════════════════════════════════════════════════════

    /// Connect whichever sides of `pair` exist. Completion arrives as a
    /// `DeviceConnected` event once both links report up.
    pub async fn connect(&self, pair: &DevicePair) -> Result<(), SessionError> {
        if pair.left.is_none() && pair.right.is_none() {
            return Err(SessionError::NoEndpoints);
        }
        // Drop any previous pair, including sides still waiting to reconnect.
        self.disconnect().await;

        let mut handles = Handles::default();
        let mut ids: [Option<EndpointId>; 2] = [None, None];
        for (i, side) in Side::BOTH.into_iter().enumerate() {
            let Some(endpoint) = pair.slot(side) else {
                continue;
            };
            let shared = match side {
                Side::Right => handles.left.clone().filter(|l| l.id() == &endpoint.id),
                Side::Left => None,
            };
            let link = match shared {
                Some(link) => link,
                None => {
                    self.inner.factory.open(endpoint).map_err(|e| {
                        let source = LinkError::ConnectFailed {
                            endpoint: endpoint.id.clone(),
                            reason: format!("{:#}", e),
                        };
                        warn!(side = %side, error = %source, "failed to open link");
                        self.set_status(format!("{} connect failed", side));
                        SessionError::Link { side, source }
                    })?
                }
            };
            ids[i] = Some(endpoint.id.clone());
            match side {
                Side::Left => {
                    handles.left = Some(link);
                }
                Side::Right => {
                    handles.right = Some(link);
                }
            }
        }

        {
            let mut core = self.lock();
            core.handles = handles;
            core.device_key = Some(pair.key.clone());
        }
        info!(key = %pair.key, complete = pair.is_complete(), "🔌 connecting to glasses");

        let [left, right] = ids;
        self.drive(Input::Connect { left, right }).await;
        Ok(())
    }

    /// Tear down both links. Safe in any state; never reconnects afterwards.
    pub async fn disconnect(&self) {
        {
            let mut core = self.lock();
            core.generation = core.generation.wrapping_add(1);
        }
        self.drive(Input::Disconnect).await;
        self.drive(Input::DisconnectComplete).await;
    }

    /// Process link events and reconnect timers until the link channel closes.
    pub async fn run(&self, mut link_rx: mpsc::Receiver<LinkEvent>) -> anyhow::Result<()> {
        let mut timer_rx = self.inner.timer_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .context("session loop already running")?;

        debug!("session loop started");
        loop {
            tokio::select! {
                event = link_rx.recv() => {
                    match event {
                        Some(event) => self.handle_link_event(event).await,
                        None => break,
                    }
                }
                Some(timer) = timer_rx.recv() => {
                    // Reconnects await the link; keep the event loop free.
                    let session = self.clone();
                    tokio::spawn(async move {
                        session.drive_from(Some(timer.generation), Input::ReconnectDue(timer.side)).await;
                    });
                }
            }
        }
        debug!("session loop stopped");
        Ok(())
    }

    /// Apply one event reported by an endpoint link.
    pub async fn handle_link_event(&self, event: LinkEvent) {
        let sides = self.lock().links.sides_of(&event.endpoint);
        if sides.is_empty() {
            debug!(endpoint = %event.endpoint, "event from untracked endpoint ignored");
            return;
        }

        match event.kind {
            LinkEventKind::Connected => {
                for side in sides {
                    self.drive(Input::LinkUp(side)).await;
                }
            }
            LinkEventKind::Disconnected => {
                for side in sides {
                    self.drive(Input::LinkDown(side)).await;
                }
            }
            LinkEventKind::ConnectFailed(reason) => {
                for side in sides {
                    self.drive(Input::ConnectFailed { side, reason: reason.clone() }).await;
                }
            }
            LinkEventKind::Frame(bytes) => {
                let routed = {
                    let mut core = self.lock();
                    let routed = core.router.handle_frame(sides[0], &bytes);
                    for ev in &routed.events {
                        if let SessionEvent::MicAck { success, enabled } = ev {
                            core.recording = *success && *enabled;
                        }
                    }
                    routed
                };
                for ev in routed.events {
                    self.emit(ev);
                }
                if !routed.audio.is_empty() {
                    let pcm = {
                        let mut decoder = self.inner.decoder.lock().unwrap_or_else(|e| e.into_inner());
                        router::decode_audio(decoder.as_mut(), routed.audio, &self.inner.stats)
                    };
                    for ev in pcm {
                        self.emit(ev);
                    }
                }
            }
        }
    }

    /// Step the state machine and carry out its effects.
    async fn drive(&self, input: Input) {
        self.drive_from(None, input).await;
    }

    /// Like [`Session::drive`], but the first input is dropped unless the
    /// session is still at generation `expected`.
    async fn drive_from(&self, mut expected: Option<u64>, input: Input) {
        let mut queue = VecDeque::from([input]);
        while let Some(input) = queue.pop_front() {
            let Some((effects, generation)) = self.apply(input, expected.take()) else {
                continue;
            };
            let mut issued: Vec<EndpointId> = Vec::new();

            for effect in effects {
                match effect {
                    Effect::IssueConnect(side) => {
                        let Some(link) = self.handle(side) else {
                            continue;
                        };
                        if issued.contains(link.id()) {
                            continue;
                        }
                        issued.push(link.id().clone());
                        debug!(side = %side, endpoint = %link.id(), "connect issued");
                        match link.connect().await {
                            Ok(()) => self.release_if_stale(&link, generation).await,
                            Err(e) => {
                                warn!(side = %side, error = %e, "connect failed");
                                let failed = self.lock().links.sides_of(link.id());
                                for s in failed {
                                    queue.push_back(Input::ConnectFailed { side: s, reason: e.to_string() });
                                }
                            }
                        }
                    }
                    Effect::IssueDisconnect(side) => {
                        let Some(link) = self.handle(side) else {
                            continue;
                        };
                        if issued.contains(link.id()) {
                            continue;
                        }
                        issued.push(link.id().clone());
                        if let Err(e) = link.disconnect().await {
                            debug!(side = %side, error = %e, "disconnect error ignored");
                        }
                    }
                    Effect::NotifyConnected => {
                        let key = self.device_key();
                        if let Some(key) = &key {
                            if let Err(e) = self.inner.store.set_last_device(key) {
                                warn!(error = %e, "failed to persist last device");
                            }
                        }
                        info!(key = ?key, "✅ glasses connected");
                        self.emit(SessionEvent::DeviceConnected { key });
                    }
                    Effect::NotifyDisconnected => {
                        info!("📴 glasses disconnected");
                        self.emit(SessionEvent::DeviceDisconnected);
                    }
                    Effect::NotifyConnectFailed { side, reason } => {
                        self.emit(SessionEvent::ConnectFailed { side, reason });
                    }
                    Effect::ScheduleReconnect(side) => self.schedule_reconnect(side, generation),
                    Effect::AbortTransfers => {
                        self.inner.epoch.send_modify(|e| {
                            *e = e.wrapping_add(1);
                        });
                    }
                    Effect::Status(msg) => {
                        debug!(status = %msg, "status");
                        self.set_status(msg);
                    }
                }
            }
        }
    }

    fn apply(&self, input: Input, expected: Option<u64>) -> Option<(Vec<Effect>, u64)> {
        let mut core = self.lock();
        if let Some(generation) = expected {
            if generation != core.generation {
                debug!(armed = generation, current = core.generation, "stale reconnect timer dropped");
                return None;
            }
        }
        let step = fsm::step(core.state, &core.links, input);
        core.state = step.state;
        core.links = step.links;
        if core.links.left.is_none() && core.links.right.is_none() {
            core.handles = Handles::default();
            if core.state == SessionState::Disconnected {
                core.recording = false;
                core.router.reset_audio();
            }
        }
        Some((step.effects, core.generation))
    }

    /// Close a link whose connect finished after the session moved on
    /// (disconnected, or reconnected to other endpoints).
    async fn release_if_stale(&self, link: &Arc<dyn EndpointLink>, generation: u64) {
        let stale = {
            let core = self.lock();
            core.generation != generation &&
                !Side::BOTH.iter().any(|s| core.handles.get(*s).is_some_and(|h| h.id() == link.id()))
        };
        if stale {
            debug!(endpoint = %link.id(), "late connect on a retired link, closing");
            if let Err(e) = link.disconnect().await {
                debug!(endpoint = %link.id(), error = %e, "disconnect error ignored");
            }
        }
    }

    fn handle(&self, side: Side) -> Option<Arc<dyn EndpointLink>> {
        self.lock().handles.get(side)
    }

    fn schedule_reconnect(&self, side: Side, generation: u64) {
        let delay = self.inner.config.timing.reconnect_delay;
        let timers = self.inner.timers.clone();
        info!(side = %side, delay_ms = delay.as_millis() as u64, "🔁 reconnect scheduled");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = timers.send(ReconnectTimer { generation, side }).await;
        });
    }

    fn set_status(&self, msg: impl Into<String>) {
        self.lock().status = msg.into();
    }

    fn emit(&self, event: SessionEvent) {
        if self.inner.events.try_send(event).is_err() {
            self.inner.stats.record_event_drop();
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    //  Outbound commands
    // ═══════════════════════════════════════════════════════════════════

    /// Paginate and display `text` as new content.
    pub async fn send_text(&self, text: &str) -> Result<(), SessionError> {
        self.send_text_with_status(text, ScreenStatus::default()).await
    }

    pub async fn send_text_with_status(
        &self,
        text: &str,
        status: ScreenStatus
    ) -> Result<(), SessionError> {
        self.ensure_connected()?;
        let screens = pagination::paginate(text, &self.inner.config.geometry);
        if screens.is_empty() {
            debug!("blank text, nothing to display");
            return Ok(());
        }
        info!(screens = screens.len(), status = status.to_byte(), "📝 sending text");
        let frames = pagination::screen_commands(&screens, status);
        self.send_sequence("text", frames, self.inner.config.timing.screen_delay).await
    }

    /// Upload a ready-encoded bitmap.
    pub async fn send_image(&self, payload: Bytes) -> Result<(), SessionError> {
        self.ensure_connected()?;
        let timing = self.inner.config.timing;
        let transfer = ImageTransfer::new(payload, timing.chunk_size);
        let chunks = transfer.total_chunks();
        if chunks > MAX_IMAGE_CHUNKS {
            warn!(chunks, "image larger than the chunk index range, sending anyway");
        }
        info!(chunks, "🖼️ sending image");
        self.send_sequence("image", transfer.into_frames(), timing.chunk_delay).await
    }

    /// Switch the right unit's microphone. Enabling starts a fresh audio stream.
    pub async fn set_microphone(&self, enabled: bool) -> Result<(), SessionError> {
        self.ensure_connected()?;
        if enabled {
            self.lock().router.reset_audio();
        }
        self.send_sequence("microphone", vec![Command::Microphone(enabled)], Duration::ZERO).await?;
        self.lock().recording = enabled;
        info!(enabled, "🎙️ microphone command sent");
        Ok(())
    }

    pub async fn send_setting(&self, setting: Setting) -> Result<(), SessionError> {
        self.send_sequence("setting", vec![Command::Setting(setting)], Duration::ZERO).await
    }

    /// Push a full settings profile, paced between commands.
    pub async fn apply_settings(&self, settings: &DisplaySettings) -> Result<(), SessionError> {
        let frames = settings.commands().into_iter().map(Command::Setting).collect();
        self.send_sequence("settings", frames, self.inner.config.timing.setting_delay).await
    }

    pub async fn send_heartbeat(&self) -> Result<(), SessionError> {
        self.send_sequence("heartbeat", vec![Command::Heartbeat], Duration::ZERO).await
    }

    pub async fn exit_feature(&self) -> Result<(), SessionError> {
        self.send_sequence("exit", vec![Command::ExitFeature], Duration::ZERO).await
    }

    /// Send a heartbeat every `interval` while connected.
    pub async fn heartbeat_loop(&self, interval: Duration) {
        if interval.is_zero() {
            std::future::pending::<()>().await;
            return;
        }
        loop {
            tokio::time::sleep(interval).await;
            if self.state() != SessionState::Connected {
                continue;
            }
            if let Err(e) = self.send_heartbeat().await {
                debug!(error = %e, "heartbeat not sent");
            }
        }
    }

    fn ensure_connected(&self) -> Result<(), SessionError> {
        let state = {
            let mut core = self.lock();
            if core.state == SessionState::Connected {
                return Ok(());
            }
            core.status = "Not connected to glasses".into();
            core.state
        };
        warn!(state = %state, "command rejected, glasses not connected");
        Err(SessionError::NotConnected(state))
    }

    /// Send `frames` in order under the send lock, pacing `gap` between them.
    async fn send_sequence(
        &self,
        what: &'static str,
        frames: Vec<Command>,
        gap: Duration
    ) -> Result<(), SessionError> {
        self.ensure_connected()?;
        let _permit = self.inner.send_lock.lock().await;
        let mut guard = TransferGuard::new(self.inner.epoch.subscribe());
        self.ensure_connected()?;

        let total = frames.len();
        for (sent, cmd) in frames.iter().enumerate() {
            if sent > 0 && !guard.pace(gap).await {
                return Err(self.aborted(what, sent, total));
            }
            match self.transmit(cmd, &mut guard).await {
                Ok(()) => {}
                Err(SessionError::TransferAborted { .. }) => {
                    return Err(self.aborted(what, sent, total));
                }
                Err(e) if total == 1 => {
                    return Err(e);
                }
                Err(e) => {
                    warn!(what, sent, total, error = %e, "transfer failed");
                    return Err(SessionError::TransferFailed { sent, total, reason: e.to_string() });
                }
            }
        }
        debug!(what, frames = total, "transfer complete");
        Ok(())
    }

    fn aborted(&self, what: &str, sent: usize, total: usize) -> SessionError {
        warn!(what, sent, total, "⚠️ transfer aborted by link change");
        SessionError::TransferAborted { sent, total }
    }

    /// Write one command to its destination; left strictly before right.
    async fn transmit(&self, cmd: &Command, guard: &mut TransferGuard) -> Result<(), SessionError> {
        let frame = cmd.encode();
        match cmd.destination() {
            Destination::Left => self.write(Side::Left, &frame, guard).await,
            Destination::Right => self.write(Side::Right, &frame, guard).await,
            Destination::Both => {
                self.write(Side::Left, &frame, guard).await?;
                let shared = {
                    let core = self.lock();
                    matches!((&core.links.left, &core.links.right), (Some(l), Some(r)) if l.id == r.id)
                };
                if shared {
                    return Ok(());
                }
                if !guard.pace(self.inner.config.timing.side_delay).await {
                    return Err(SessionError::TransferAborted { sent: 0, total: 1 });
                }
                self.write(Side::Right, &frame, guard).await
            }
        }
    }

    async fn write(&self, side: Side, frame: &[u8], guard: &TransferGuard) -> Result<(), SessionError> {
        if !guard.is_live() {
            return Err(SessionError::TransferAborted { sent: 0, total: 1 });
        }
        let Some(link) = self.handle(side) else {
            return Err(SessionError::NotConnected(self.state()));
        };
        match link.send(frame).await {
            Ok(()) => {
                self.inner.stats.record_send(frame.len());
                Ok(())
            }
            Err(source) => {
                self.inner.stats.record_send_error();
                warn!(side = %side, error = %source, "write failed");
                Err(SessionError::Link { side, source })
            }
        }
    }
}
