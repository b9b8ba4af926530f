use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use g1_bridge::audio::{ self, PassthroughDecoder, Recording };
use g1_bridge::bmp;
use g1_bridge::config::Config;
use g1_bridge::console::{ self, ConsoleCommand };
use g1_bridge::pairing::PairingResolver;
use g1_bridge::protocol::TouchKind;
use g1_bridge::session::{ Session, SessionConfig, SessionEvent };
use g1_bridge::settings::DisplaySettings;
use g1_bridge::stats::{ self, Stats };
use g1_bridge::store::{ DeviceStore, FileDeviceStore };
use g1_bridge::transport_udp::{ self, UdpTransport };
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{ AsyncBufReadExt, BufReader };
use tokio::sync::mpsc;
use tracing::{ info, warn };

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber
        ::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter
                ::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();

    let config = Config::parse();

    info!(
        peers = config.peers.len(),
        device = ?config.device,
        heartbeat_secs = config.heartbeat_interval_secs,
        "🚀 g1-bridge starting"
    );

    let stats = Stats::new();

    // Spawn stats reporter
    let stats_clone = stats.clone();
    let stats_interval = config.stats_interval_secs;
    tokio::spawn(async move {
        stats::stats_reporter(stats_clone, stats_interval).await;
    });

    let settings = match &config.settings {
        Some(path) =>
            DisplaySettings::load(path).with_context(|| format!("loading settings from {path}"))?,
        None => DisplaySettings::default(),
    };
    let store: Arc<dyn DeviceStore> = Arc::new(FileDeviceStore::open(&config.device_store));

    // Channel: links → session
    let (link_tx, link_rx) = mpsc::channel(config.event_capacity);
    let transport = Arc::new(
        UdpTransport::new(
            config.bind_host.clone(),
            config.recv_buf_size,
            config.link_timeout(),
            link_tx,
            stats.clone()
        )
    );

    let (session, events) = Session::new(
        SessionConfig {
            timing: config.timing(),
            geometry: config.geometry(),
            event_capacity: config.event_capacity,
        },
        transport,
        store.clone(),
        Box::new(PassthroughDecoder),
        stats.clone()
    );

    let runner = session.clone();
    tokio::spawn(async move {
        if let Err(e) = runner.run(link_rx).await {
            tracing::error!(error = %e, "session loop failed");
        }
    });

    // Resolve configured peers into left/right pairs
    let mut resolver = PairingResolver::new(config.name_patterns.clone());
    for peer in &config.peers {
        let discovery = transport_udp::parse_peer(peer)?;
        if let Some(done) = resolver.observe(&discovery) {
            info!(key = %done.pair.key, "👓 glasses pair ready");
        }
    }

    if config.no_auto_connect {
        info!("auto-connect disabled, use 'connect' on the console");
    } else {
        connect_preferred(&session, &resolver, config.device.as_deref(), store.as_ref()).await;
    }

    // Session events → mic control, recording, settings push
    let handler = session.clone();
    let event_config = config.clone();
    tokio::spawn(async move {
        event_loop(handler, events, settings, event_config).await;
    });

    let heartbeat = session.clone();
    let heartbeat_interval = Duration::from_secs(config.heartbeat_interval_secs);
    tokio::spawn(async move {
        heartbeat.heartbeat_loop(heartbeat_interval).await;
    });

    info!("✅ All systems go, type 'help' for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if !handle_console_line(&line, &session, &resolver, &config, store.as_ref()).await {
                            break;
                        }
                    }
                    None => {
                        // stdin closed (daemonized): run until interrupted
                        tokio::signal::ctrl_c().await?;
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("👋 shutting down");
    session.disconnect().await;
    Ok(())
}

async fn connect_preferred(
    session: &Session,
    resolver: &PairingResolver,
    requested: Option<&str>,
    store: &dyn DeviceStore
) {
    let last = store.last_device();
    match resolver.preferred(requested, last.as_deref()) {
        Some(pair) => {
            if let Err(e) = session.connect(pair).await {
                warn!(key = %pair.key, error = %e, "connect failed");
            }
        }
        None => warn!(requested = ?requested, last = ?last, "no matching glasses pair"),
    }
}

async fn event_loop(
    session: Session,
    mut events: mpsc::Receiver<SessionEvent>,
    settings: DisplaySettings,
    config: Config
) {
    let mut recording = Recording::new();

    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::DeviceConnected { key } => {
                info!(key = ?key, "pushing display settings");
                let s = session.clone();
                let settings = settings.clone();
                tokio::spawn(async move {
                    if let Err(e) = s.apply_settings(&settings).await {
                        warn!(error = %e, "settings not applied");
                    }
                });
            }
            SessionEvent::DeviceDisconnected => {
                recording.take();
            }
            SessionEvent::ConnectFailed { side, reason } => {
                warn!(side = %side, reason = %reason, "❌ connect failed");
            }
            SessionEvent::Touch { side, kind } =>
                match kind {
                    TouchKind::AiStart => {
                        recording.take();
                        if let Err(e) = session.set_microphone(true).await {
                            warn!(side = %side, error = %e, "mic enable failed");
                        }
                    }
                    TouchKind::AiStop => {
                        if let Err(e) = session.set_microphone(false).await {
                            warn!(side = %side, error = %e, "mic disable failed");
                        }
                        finish_recording(&mut recording, &session, &config).await;
                    }
                    other => info!(side = %side, touch = %other, "touch ignored"),
                }
            SessionEvent::AudioFrameReady(pcm) => recording.push(&pcm),
            SessionEvent::MicAck { success, enabled } => {
                tracing::debug!(success, enabled, "mic ack");
            }
        }
    }
}

async fn finish_recording(recording: &mut Recording, session: &Session, config: &Config) {
    let frames = recording.frames();
    let secs = recording.duration_secs();
    let pcm = recording.take();
    info!(frames, audio_secs = %format!("{:.1}", secs), "📴 audio session ended");

    if !config.save_audio || pcm.is_empty() {
        return;
    }
    let device = session.device_key().unwrap_or_else(|| "unknown".into());
    match audio::save_session_wav(&config.audio_save_dir, &device, &pcm).await {
        Ok(path) => info!(path = %path.display(), "💾 session audio saved"),
        Err(e) => warn!(error = %e, "failed to save session audio"),
    }
}

/// Run one console line. Returns `false` when the operator asked to quit.
async fn handle_console_line(
    line: &str,
    session: &Session,
    resolver: &PairingResolver,
    config: &Config,
    store: &dyn DeviceStore
) -> bool {
    let cmd = match console::parse_line(line) {
        Ok(Some(cmd)) => cmd,
        Ok(None) => {
            return true;
        }
        Err(msg) => {
            println!("{msg}");
            return true;
        }
    };

    let result = match cmd {
        ConsoleCommand::Text(text) => session.send_text(&text).await.map_err(anyhow::Error::from),
        ConsoleCommand::Image(path) => send_image_file(session, &path).await,
        ConsoleCommand::Microphone(on) => session.set_microphone(on).await.map_err(anyhow::Error::from),
        ConsoleCommand::Setting(s) => session.send_setting(s).await.map_err(anyhow::Error::from),
        ConsoleCommand::Settings => {
            let settings = match &config.settings {
                Some(path) => DisplaySettings::load(path).unwrap_or_default(),
                None => DisplaySettings::default(),
            };
            session.apply_settings(&settings).await.map_err(anyhow::Error::from)
        }
        ConsoleCommand::Heartbeat => session.send_heartbeat().await.map_err(anyhow::Error::from),
        ConsoleCommand::ExitFeature => session.exit_feature().await.map_err(anyhow::Error::from),
        ConsoleCommand::Status => {
            println!(
                "state={} status={:?} device={:?} recording={}",
                session.state(),
                session.status(),
                session.device_key(),
                session.is_recording()
            );
            for pair in resolver.pairs() {
                println!("  pair {} complete={}", pair.key, pair.is_complete());
            }
            Ok(())
        }
        ConsoleCommand::Connect(key) => {
            let requested = key.as_deref().or(config.device.as_deref());
            connect_preferred(session, resolver, requested, store).await;
            Ok(())
        }
        ConsoleCommand::Disconnect => {
            session.disconnect().await;
            Ok(())
        }
        ConsoleCommand::Help => {
            println!("{}", console::HELP);
            Ok(())
        }
        ConsoleCommand::Quit => {
            return false;
        }
    };

    if let Err(e) = result {
        println!("error: {e:#}");
    }
    true
}

async fn send_image_file(session: &Session, path: &str) -> anyhow::Result<()> {
    let data = tokio::fs::read(path).await.with_context(|| format!("reading {path}"))?;
    let info = bmp::inspect(&data)?;
    if info.bits_per_pixel != 1 {
        anyhow::bail!("{path} is {} bpp, glasses need a 1-bit bitmap", info.bits_per_pixel);
    }
    info!(path, width = info.width, height = info.height, bytes = data.len(), "uploading bitmap");
    session.send_image(Bytes::from(data)).await?;
    Ok(())
}
