//! OrbitView Client - headless host for the tracking engine
//!
//! Connects the engine to a live propagation backend over HTTP:
//!
//! ```text
//!   stream reader task ──┐
//!   orbit fetch tasks ───┼──> mpsc ──> main loop ──> TrackingEngine
//!   TLE refresh task ────┘               │   ▲
//!                                        │   └── frame ticks (camera follows
//!                                        │       the tracked object)
//!                                        └────── EngineCommands spawn tasks
//! ```
//!
//! The scene is a [`SceneRecorder`]; the client logs what would be drawn.

use anyhow::{Context, Result};
use clap::Parser;
use orbitview_core::{
    Camera, ConnectionTicket, EngineCommand, EngineConfig, OrbitRequest, SceneRecorder, TrackingEngine, Vec3,
};
use orbitview_env::{BackendClient, EnvError, HostContext, HttpBackend, ObjectId, StreamEvent, TokioContext};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Buffered host events before producers wait on the main loop.
const EVENT_CHANNEL_DEPTH: usize = 1024;

/// Camera distance when nothing is tracked (m from the Earth's center).
const OVERVIEW_DISTANCE: f64 = 2.0e7;

/// OrbitView headless client
#[derive(Parser, Debug)]
#[command(name = "orbitview-client")]
#[command(about = "Track satellites from a propagation backend without a renderer", long_about = None)]
struct Args {
    /// Engine configuration file (TOML); defaults apply when omitted
    #[arg(short, long)]
    config: Option<String>,

    /// Override the backend base URL from the configuration
    #[arg(long)]
    backend_url: Option<String>,

    /// Bearer token for the backend
    #[arg(long, env = "ORBITVIEW_TOKEN")]
    token: Option<String>,

    /// Object ids to select on startup (repeatable)
    #[arg(short, long)]
    select: Vec<u32>,

    /// Ask the backend to reload its element sets before tracking
    #[arg(long)]
    refresh_tles: bool,

    /// Camera distance behind the tracked object (m)
    #[arg(long, default_value = "8000000")]
    follow_distance: f64,

    /// Frames per second
    #[arg(long, default_value = "30")]
    fps: u32,

    /// Seconds between status lines
    #[arg(long, default_value = "5")]
    status_interval: u64,

    /// Stop after this many seconds (runs until Ctrl-C otherwise)
    #[arg(short, long)]
    duration: Option<f64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Everything background tasks report back to the main loop.
#[derive(Debug)]
enum HostEvent {
    StreamOpened(ConnectionTicket),
    Stream(ConnectionTicket, StreamEvent),
    StreamFailed(ConnectionTicket, EnvError),
    Orbit(OrbitRequest, Result<String, EnvError>),
    TlesRefreshed(Result<String, EnvError>),
}

/// Spawns the tasks that carry out engine commands.
struct Dispatcher<B: BackendClient> {
    ctx: Arc<TokioContext>,
    backend: Arc<B>,
    events: mpsc::Sender<HostEvent>,

    /// Reader task of the most recently opened stream
    reader: Option<(ConnectionTicket, AbortHandle)>,
}

impl<B: BackendClient> Dispatcher<B> {
    fn new(ctx: Arc<TokioContext>, backend: Arc<B>, events: mpsc::Sender<HostEvent>) -> Self {
        Self {
            ctx,
            backend,
            events,
            reader: None,
        }
    }

    fn dispatch(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::OpenStream(ticket) => self.open_stream(ticket),
            EngineCommand::CloseStream(ticket) => self.close_stream(ticket),
            EngineCommand::FetchOrbit(request) => self.fetch_orbit(request),
        }
    }

    fn close_stream(&mut self, ticket: ConnectionTicket) {
        if let Some((current, handle)) = self.reader.take() {
            if current == ticket {
                debug!("Closing stream generation {}", ticket.generation);
            } else {
                warn!(
                    "Closing stream generation {} while asked for {}",
                    current.generation, ticket.generation
                );
            }
            handle.abort();
        }
    }

    fn open_stream(&mut self, ticket: ConnectionTicket) {
        // Only one reader may feed the engine at a time
        if let Some((previous, handle)) = self.reader.take() {
            debug!("Aborting reader for generation {}", previous.generation);
            handle.abort();
        }

        let backend = self.backend.clone();
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let mut receiver = match backend.open_stream().await {
                Ok(receiver) => receiver,
                Err(e) => {
                    let _ = events.send(HostEvent::StreamFailed(ticket, e)).await;
                    return;
                }
            };
            if events.send(HostEvent::StreamOpened(ticket)).await.is_err() {
                return;
            }
            while let Some(event) = receiver.recv().await {
                let done = !matches!(event, StreamEvent::Line(_));
                if events.send(HostEvent::Stream(ticket, event)).await.is_err() || done {
                    return;
                }
            }
            let _ = events.send(HostEvent::Stream(ticket, StreamEvent::Closed)).await;
        });
        self.reader = Some((ticket, task.abort_handle()));
    }

    fn fetch_orbit(&self, request: OrbitRequest) {
        let backend = self.backend.clone();
        let events = self.events.clone();
        self.ctx.spawn("orbit-fetch", async move {
            let response = backend.fetch_orbit(request.query()).await;
            let _ = events.send(HostEvent::Orbit(request, response)).await;
        });
    }

    fn refresh_tles(&self) {
        let backend = self.backend.clone();
        let events = self.events.clone();
        self.ctx.spawn("tle-refresh", async move {
            let response = backend.refresh_tles().await;
            let _ = events.send(HostEvent::TlesRefreshed(response)).await;
        });
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")?;

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_file(path).with_context(|| format!("loading {}", path))?,
        None => EngineConfig::default(),
    };
    if let Some(url) = &args.backend_url {
        config.stream.backend_url = url.clone();
    }
    if args.token.is_some() {
        config.stream.auth_token = args.token.clone();
    }

    info!("OrbitView Client v{}", env!("CARGO_PKG_VERSION"));
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let backend = Arc::new(HttpBackend::new(
        config.stream.backend_url.clone(),
        config.stream.auth_token.clone(),
    )?);
    let ctx = TokioContext::shared();
    let (events_tx, mut events) = mpsc::channel(EVENT_CHANNEL_DEPTH);
    let mut dispatcher = Dispatcher::new(ctx.clone(), backend, events_tx);

    let mut engine = TrackingEngine::new(config, SceneRecorder::new())?;

    if args.refresh_tles {
        dispatcher.refresh_tles();
    } else {
        dispatcher.dispatch(engine.start());
    }
    let now = ctx.wall_clock_secs();
    for id in &args.select {
        for command in engine.select(ObjectId(*id), now) {
            dispatcher.dispatch(command);
        }
    }

    let fps = args.fps.max(1);
    let mut frame_tick = tokio::time::interval(Duration::from_secs_f64(1.0 / fps as f64));
    frame_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut status_tick = tokio::time::interval(Duration::from_secs(args.status_interval.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = frame_tick.tick() => {
                let host_now = ctx.wall_clock_secs();
                for command in engine.poll_timers(host_now) {
                    dispatcher.dispatch(command);
                }
                let camera = follow_camera(&engine, args.follow_distance);
                let snapshot = engine.frame(host_now, &camera);
                debug!(
                    "Frame {}: {} updated, {} culled",
                    snapshot.frame, snapshot.batch.updated, snapshot.batch.culled
                );

                if let Some(limit) = args.duration {
                    if ctx.now().as_secs_f64() >= limit {
                        info!("Duration reached");
                        break;
                    }
                }
            }
            Some(event) = events.recv() => {
                handle_event(&mut engine, &mut dispatcher, event, ctx.wall_clock_secs());
            }
            _ = status_tick.tick() => {
                log_status(&engine, ctx.wall_clock_secs());
            }
            _ = &mut shutdown => {
                info!("Interrupted");
                break;
            }
        }
    }

    if let Some(command) = engine.disconnect() {
        dispatcher.dispatch(command);
    }
    log_status(&engine, ctx.wall_clock_secs());
    Ok(())
}

fn handle_event<B: BackendClient>(
    engine: &mut TrackingEngine<SceneRecorder>,
    dispatcher: &mut Dispatcher<B>,
    event: HostEvent,
    host_now: f64,
) {
    match event {
        HostEvent::StreamOpened(ticket) => engine.on_stream_open(ticket),
        HostEvent::Stream(ticket, StreamEvent::Line(line)) => engine.on_stream_line(ticket, &line, host_now),
        HostEvent::Stream(ticket, StreamEvent::Failed(reason)) => {
            if let Some(delay) = engine.on_stream_error(ticket, host_now, &reason) {
                warn!("Stream failed ({}), reconnecting in {:.0}s", reason, delay);
            }
        }
        HostEvent::Stream(ticket, StreamEvent::Closed) => {
            if let Some(delay) = engine.on_stream_closed(ticket, host_now) {
                info!("Stream closed, reconnecting in {:.0}s", delay);
            }
        }
        HostEvent::StreamFailed(ticket, e) => {
            if let Some(delay) = engine.on_stream_error(ticket, host_now, &e.to_string()) {
                warn!("Stream connect failed ({}), retrying in {:.0}s", e, delay);
            }
        }
        HostEvent::Orbit(request, response) => engine.apply_orbit_response(request, response, host_now),
        HostEvent::TlesRefreshed(Ok(body)) => {
            info!("TLE refresh accepted: {}", body.trim());
            let reselect: Vec<ObjectId> = engine.selected().collect();
            for command in engine.on_tles_refreshed() {
                dispatcher.dispatch(command);
            }
            for id in reselect {
                for command in engine.select(id, host_now) {
                    dispatcher.dispatch(command);
                }
            }
        }
        HostEvent::TlesRefreshed(Err(e)) => {
            warn!("TLE refresh failed: {}, continuing with current data", e);
            dispatcher.dispatch(engine.start());
        }
    }
}

/// Camera behind the tracked object, or a fixed overview.
fn follow_camera(engine: &TrackingEngine<SceneRecorder>, follow_distance: f64) -> Camera {
    let target = engine.tracked().and_then(|id| engine.position(id));
    match target.and_then(|p| p.try_normalize(1e-9).map(|up| p + up * follow_distance)) {
        Some(position) => Camera::looking_at_earth(position),
        None => Camera::looking_at_earth(Vec3::new(OVERVIEW_DISTANCE, 0.0, 0.0)),
    }
}

fn log_status(engine: &TrackingEngine<SceneRecorder>, host_now: f64) {
    let stats = engine.stats();
    info!(
        "{} | {} objects, {} keyframes, clock offset {:+.1}s | {} polylines | TLE {:?}",
        engine.status_text(),
        engine.object_count(),
        engine.keyframe_count(),
        engine.clock_offset(),
        engine.scene().len(),
        engine.global_staleness()
    );
    debug!(
        "accepted={} rejected={} dropped={} fetches={} fetch_errors={}",
        stats.keyframes_accepted,
        stats.keyframes_rejected,
        stats.messages_dropped,
        stats.orbit_fetches,
        stats.orbit_fetch_errors
    );
    for id in engine.selected() {
        let position = engine
            .position(id)
            .map(|p| format!("({:.0}, {:.0}, {:.0}) km", p.x / 1000.0, p.y / 1000.0, p.z / 1000.0))
            .unwrap_or_else(|| "no position".to_string());
        let badge = engine.badge_text(id, host_now);
        info!(
            "  {} {} orbit={:?} {}",
            id,
            position,
            engine.orbit_status(id),
            badge
        );
    }
}
