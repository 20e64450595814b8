//! Scenario runner - drives the tracking engine against the simulated backend.
//!
//! Each run is single-threaded and fully deterministic: the runner owns the
//! virtual clock, the [`SimServer`] and a [`TrackingEngine`] rendering into
//! a [`SceneRecorder`]. Every tick it plays the host's part:
//!
//! ```text
//!   pending opens ──▶ accept / refuse ──▶ on_stream_open / on_stream_error
//!   live stream   ──▶ keyframe lines  ──▶ on_stream_line
//!   scripted actions (select, deselect, uncertainty mode, trail length)
//!   due fetches   ──▶ propagate       ──▶ apply_orbit_response
//!   poll_timers ──▶ commands ──▶ pending opens / fetches
//!   frame(camera) ──▶ compare written positions with ground truth
//! ```
//!
//! When the run ends the scenario's assertions are checked against the
//! engine, the recorded scene and the collected metrics.

use crate::backend::{FaultPlan, OrbitFrame, OrbitUnits, SimServer};
use crate::constellation::Constellation;
use crate::context::SimContext;
use crate::exporter::{ObjectPosition, OrbitSummary, SimEvent, SimExport, SimFrame};
use crate::scenarios::ScenarioId;

use orbitview_core::stream::BackoffPolicy;
use orbitview_core::{
    Camera, ConnectionState, ConnectionTicket, EngineCommand, EngineConfig, FrameSnapshot, OrbitRequest, OrbitStatus,
    SceneRecorder, StalenessLevel, TrackingEngine, UncertaintyMode, Vec3,
};
use orbitview_env::{HostContext, ObjectId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};
use std::f64::consts::TAU;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total frames executed
    pub total_ticks: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    pub keyframes_accepted: u64,
    pub messages_dropped: u64,
    pub satellites_dropped: u64,
    pub stream_opens: u64,
    pub stream_drops: u64,
    pub orbit_fetches: u64,
    pub orbit_fetch_errors: u64,
    pub lod_switches: u64,
    pub curve_builds: u64,
    pub stale_events: u64,

    /// Most polylines alive at once
    pub max_polylines: usize,

    /// Interpolated positions compared with truth
    pub error_samples: u64,

    pub rms_error_m: f64,
    pub max_error_m: f64,
}

// ============================================================================
// SCENARIO PLANS
// ============================================================================

/// Scripted host action.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Action {
    Select(ObjectId),
    Deselect(ObjectId),
    Uncertainty(UncertaintyMode),
    TrailSeconds(f64),
}

/// Where the camera sits each frame.
#[derive(Debug, Clone, Copy, PartialEq)]
enum CameraPlan {
    /// Behind the tracked object, this far from it
    Follow { distance: f64 },

    /// Distance from the tracked object oscillates between `near` and `far`
    Sweep { near: f64, far: f64, period: f64 },
}

#[derive(Debug, Clone)]
struct ScenarioPlan {
    faults: FaultPlan,
    config: EngineConfig,
    connect_latency: f64,
    fetch_latency: f64,
    camera: CameraPlan,
    actions: Vec<(f64, Action)>,

    /// Positions must stay within one keyframe step of truth
    bounded_error: bool,
}

impl ScenarioPlan {
    fn new() -> Self {
        let mut config = EngineConfig::default();
        config.stream.backend_url = "sim://".to_string();
        Self {
            faults: FaultPlan::default(),
            config,
            connect_latency: 0.2,
            fetch_latency: 0.5,
            camera: CameraPlan::Follow { distance: 8_000_000.0 },
            actions: Vec::new(),
            bounded_error: true,
        }
    }

    fn select_first(mut self, ids: &[ObjectId], count: usize, at: f64) -> Self {
        for (i, id) in ids.iter().take(count).enumerate() {
            self.actions.push((at + i as f64 * 0.1, Action::Select(*id)));
        }
        self
    }
}

// ============================================================================
// HARNESS
// ============================================================================

/// One run in progress: clock, server, engine and bookkeeping.
struct Harness {
    ctx: SimContext,
    server: SimServer,
    engine: TrackingEngine<SceneRecorder>,
    plan: ScenarioPlan,
    dt: f64,
    start: f64,

    pending_open: Option<(f64, ConnectionTicket)>,
    live: Option<ConnectionTicket>,
    next_keyframe_at: f64,
    batches: u64,
    pending_fetches: Vec<(f64, OrbitRequest)>,
    actions: VecDeque<(f64, Action)>,

    /// Reconnect delays, one run per stream drop
    backoff_runs: Vec<Vec<f64>>,

    /// Objects whose orbit loaded at least once
    loaded_once: BTreeSet<ObjectId>,

    error_sq_sum: f64,
    metrics: ScenarioMetrics,
    events: Vec<SimEvent>,
}

impl Harness {
    fn elapsed(&self) -> f64 {
        self.ctx.wall_clock_secs() - self.start
    }

    fn step(&mut self) -> FrameSnapshot {
        let host_now = self.ctx.wall_clock_secs();
        let backend_now = self.server.backend_time(host_now);

        self.drive_connection(host_now, backend_now);
        self.run_actions(host_now);
        self.deliver_fetches(host_now, backend_now);
        let commands = self.engine.poll_timers(host_now);
        self.dispatch(commands, host_now);

        let camera = self.camera();
        let snapshot = self.engine.frame(host_now, &camera);
        self.measure(&snapshot, backend_now);

        self.ctx.advance_time(Duration::from_secs_f64(self.dt));
        snapshot
    }

    fn dispatch(&mut self, commands: Vec<EngineCommand>, host_now: f64) {
        for command in commands {
            match command {
                EngineCommand::OpenStream(ticket) => {
                    self.live = None;
                    self.pending_open = Some((host_now + self.plan.connect_latency, ticket));
                }
                EngineCommand::CloseStream(ticket) => {
                    if self.live == Some(ticket) {
                        self.live = None;
                        self.events.push(SimEvent::info("stream closed by host"));
                    }
                    if matches!(self.pending_open, Some((_, pending)) if pending == ticket) {
                        self.pending_open = None;
                    }
                }
                EngineCommand::FetchOrbit(request) => {
                    self.pending_fetches.push((host_now + self.plan.fetch_latency, request));
                }
            }
        }
    }

    fn record_backoff(&mut self, delay: f64) {
        match self.backoff_runs.last_mut() {
            Some(run) => run.push(delay),
            None => self.backoff_runs.push(vec![delay]),
        }
    }

    fn drive_connection(&mut self, host_now: f64, backend_now: f64) {
        if let Some((at, ticket)) = self.pending_open {
            if host_now >= at {
                self.pending_open = None;
                if self.server.accept_connection(backend_now) {
                    self.engine.on_stream_open(ticket);
                    self.metrics.stream_opens += 1;
                    self.events.push(SimEvent::info("stream opened"));
                    self.live = Some(ticket);
                    let metadata = self.server.metadata_line(backend_now);
                    self.engine.on_stream_line(ticket, &metadata, host_now);
                    self.next_keyframe_at = backend_now;
                } else if let Some(delay) = self.engine.on_stream_error(ticket, host_now, "connection refused") {
                    self.record_backoff(delay);
                }
            }
        }

        let Some(ticket) = self.live else {
            return;
        };

        if self.server.should_drop(backend_now) {
            self.live = None;
            self.metrics.stream_drops += 1;
            self.events.push(SimEvent::warn("stream dropped"));
            self.backoff_runs.push(Vec::new());
            if let Some(delay) = self.engine.on_stream_error(ticket, host_now, "connection reset") {
                self.record_backoff(delay);
            }
            return;
        }

        let step = self.plan.config.stream.keyframe_step_secs;
        while backend_now >= self.next_keyframe_at {
            let line = self.server.keyframe_line(self.next_keyframe_at);
            self.engine.on_stream_line(ticket, &line, host_now);
            self.batches += 1;
            if self.batches % 3 == 0 {
                let keepalive = self.server.keepalive_line();
                self.engine.on_stream_line(ticket, &keepalive, host_now);
            }
            self.next_keyframe_at += step;
        }
    }

    fn run_actions(&mut self, host_now: f64) {
        let elapsed = self.elapsed();
        while let Some((at, action)) = self.actions.front().copied() {
            if at > elapsed {
                break;
            }
            self.actions.pop_front();
            debug!("t={:.2}s action {:?}", elapsed, action);
            match action {
                Action::Select(id) => {
                    let commands = self.engine.select(id, host_now);
                    self.dispatch(commands, host_now);
                }
                Action::Deselect(id) => self.engine.deselect(id),
                Action::Uncertainty(mode) => self.engine.set_uncertainty(true, mode, host_now),
                Action::TrailSeconds(seconds) => self.engine.set_trail_seconds(seconds),
            }
        }
    }

    fn deliver_fetches(&mut self, host_now: f64, backend_now: f64) {
        let (due, pending): (Vec<_>, Vec<_>) = self
            .pending_fetches
            .drain(..)
            .partition(|(at, _)| *at <= host_now);
        self.pending_fetches = pending;

        for (_, request) in due {
            let response = self.server.propagate(request.query(), backend_now);
            if let Err(e) = &response {
                self.events.push(SimEvent::warn(format!("propagate {} failed: {}", request.id, e)));
            }
            self.engine.apply_orbit_response(request, response, host_now);
            if let Some(OrbitStatus::Loaded { .. }) = self.engine.orbit_status(request.id) {
                self.loaded_once.insert(request.id);
            }
        }
    }

    fn camera(&self) -> Camera {
        let target = self.engine.tracked().and_then(|id| self.engine.position(id));
        let Some(target) = target else {
            return Camera::looking_at_earth(Vec3::new(0.0, 0.0, 40_000_000.0));
        };

        let distance = match self.plan.camera {
            CameraPlan::Follow { distance } => distance,
            CameraPlan::Sweep { near, far, period } => {
                let phase = self.elapsed() / period * TAU;
                near + (far - near) * 0.5 * (1.0 - phase.cos())
            }
        };
        let outward = target.try_normalize(1e-9).unwrap_or_else(Vec3::z);
        Camera::looking_at_earth(target + outward * distance)
    }

    fn measure(&mut self, snapshot: &FrameSnapshot, backend_now: f64) {
        self.metrics.max_polylines = self.metrics.max_polylines.max(self.engine.scene().len());
        if !self.plan.bounded_error {
            return;
        }
        for (id, position) in &snapshot.updates {
            let Some(truth) = self.server.constellation().position(*id, backend_now) else {
                continue;
            };
            let error = (position - truth).norm();
            self.error_sq_sum += error * error;
            self.metrics.error_samples += 1;
            self.metrics.max_error_m = self.metrics.max_error_m.max(error);
        }
    }

    fn sample(&mut self, snapshot: &FrameSnapshot, backend_now: f64) -> SimFrame {
        let constellation = self.server.constellation();
        let selected: Vec<ObjectPosition> = self
            .engine
            .selected()
            .filter_map(|id| {
                let position = self.engine.position(id)?;
                let error = constellation.position(id, backend_now).map(|t| (position - t).norm());
                Some(ObjectPosition::new(id.as_u32(), position, error))
            })
            .collect();

        let orbits = self
            .engine
            .selected()
            .filter_map(|id| {
                let render = self.engine.orbit_render(id)?;
                Some(OrbitSummary {
                    id: id.as_u32(),
                    tier: format!("{:?}", render.tier),
                    segments: render.segments.len(),
                    curved: self.engine.is_curved(id),
                    visible: render.visible,
                })
            })
            .collect();

        SimFrame {
            time_sec: self.elapsed(),
            backend_time: snapshot.backend_time,
            connection: self.engine.status_text().to_string(),
            keyframes: self.engine.keyframe_count(),
            updated: snapshot.batch.updated,
            culled: snapshot.batch.culled,
            polylines: self.engine.scene().len(),
            selected,
            orbits,
            staleness: snapshot.global_staleness.indicator_text().to_string(),
            events: std::mem::take(&mut self.events),
        }
    }

    fn finish_metrics(&mut self) {
        let stats = self.engine.stats();
        let m = &mut self.metrics;
        m.keyframes_accepted = stats.keyframes_accepted;
        m.messages_dropped = stats.messages_dropped;
        m.satellites_dropped = stats.satellites_dropped;
        m.orbit_fetches = stats.orbit_fetches;
        m.orbit_fetch_errors = stats.orbit_fetch_errors;
        m.lod_switches = stats.lod_switches;
        m.curve_builds = stats.curve_builds;
        m.stale_events = stats.stale_events;
        if m.error_samples > 0 {
            m.rms_error_m = (self.error_sq_sum / m.error_samples as f64).sqrt();
        }
    }
}

// ============================================================================
// RUNNER
// ============================================================================

/// Runs fault-injection scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Objects in the simulated catalog
    num_objects: usize,

    /// Frame rate in Hz
    fps: u32,

    /// Maximum duration in seconds
    max_duration_secs: f64,

    /// Export every N frames
    export_interval: u64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, num_objects: usize) -> Self {
        Self {
            seed,
            num_objects: num_objects.max(8),
            fps: 60,
            max_duration_secs: 60.0,
            export_interval: 30,
        }
    }

    /// Sets the frame rate.
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps.max(1);
        self
    }

    /// Sets the maximum duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    /// Sets how often frames are sampled for export.
    pub fn with_export_interval(mut self, frames: u64) -> Self {
        self.export_interval = frames.max(1);
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.execute(scenario, None)
    }

    /// Runs a scenario and records sampled frames.
    pub fn run_with_export(&self, scenario: ScenarioId) -> (ScenarioResult, SimExport) {
        let mut export = SimExport::new(scenario.name(), self.seed);
        let result = self.execute(scenario, Some(&mut export));
        export.finalize(
            result.passed,
            result.failure_reason.clone(),
            (result.metrics.error_samples > 0).then_some(result.metrics.rms_error_m),
        );
        (result, export)
    }

    fn plan(&self, scenario: ScenarioId, ids: &[ObjectId]) -> ScenarioPlan {
        let plan = ScenarioPlan::new();
        match scenario {
            ScenarioId::Nominal => plan.select_first(ids, 3, 1.0),

            ScenarioId::ClockSkew => {
                let mut plan = plan.select_first(ids, 1, 1.0);
                plan.faults.clock_skew_secs = 3600.0;
                plan
            }

            ScenarioId::Flapping => {
                let mut plan = plan.select_first(ids, 1, 1.0);
                plan.faults.drop_every_secs = Some(12.0);
                plan.faults.refusals_after_drop = 2;
                plan.bounded_error = false;
                plan
            }

            ScenarioId::MalformedStream => {
                let mut plan = plan.select_first(ids, 2, 1.0);
                plan.faults.malformed_line_rate = 0.2;
                plan.faults.bad_satellite_rate = 0.05;
                plan.bounded_error = false;
                plan
            }

            ScenarioId::KilometerOrbits => {
                let mut plan = plan.select_first(ids, 3, 1.0);
                plan.faults.orbit_units = OrbitUnits::Kilometers;
                plan
            }

            ScenarioId::InertialOrbits => {
                let mut plan = plan.select_first(ids, 3, 1.0);
                plan.faults.orbit_frame = OrbitFrame::Inertial;
                plan
            }

            ScenarioId::StaleTles => {
                let mut plan = plan.select_first(ids, 2, 1.0);
                plan.faults.dataset_tle_age_secs = 90_000.0;
                plan.faults.object_tle_age_secs = Some(4.0 * 86_400.0);
                plan.actions.insert(0, (0.5, Action::Uncertainty(UncertaintyMode::Corridor)));
                plan
            }

            ScenarioId::FlakyPropagator => {
                let mut plan = plan.select_first(ids, 3, 1.0);
                plan.faults.fetch_failure_rate = 0.3;
                plan.config.orbit.refresh_interval_secs = 5.0;
                plan
            }

            ScenarioId::SelectionChurn => {
                let mut plan = plan;
                plan.fetch_latency = 3.0;
                let mut rng = ChaCha8Rng::seed_from_u64(self.seed ^ 0xc4u64);
                let mut selected = BTreeSet::new();
                let mut t = 1.0;
                while t < self.max_duration_secs {
                    let id = ids[rng.gen_range(0..ids.len().min(8))];
                    let action = if selected.insert(id) {
                        Action::Select(id)
                    } else {
                        selected.remove(&id);
                        Action::Deselect(id)
                    };
                    plan.actions.push((t, action));
                    t += 2.0;
                }
                plan.actions.push((10.0, Action::TrailSeconds(600.0)));
                plan.actions.sort_by(|a, b| a.0.total_cmp(&b.0));
                plan
            }

            ScenarioId::CameraSweep => {
                let mut plan = plan.select_first(ids, 1, 1.0);
                plan.camera = CameraPlan::Sweep {
                    near: 300_000.0,
                    far: 30_000_000.0,
                    period: 40.0,
                };
                plan
            }
        }
    }

    fn execute(&self, scenario: ScenarioId, mut export: Option<&mut SimExport>) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let ctx = SimContext::new(self.seed);
        let start = ctx.wall_clock_secs();
        let physics_seed = self.seed.wrapping_mul(0x9e3779b97f4a7c15);
        let constellation = Constellation::generate(physics_seed, self.num_objects, start);
        let ids: Vec<ObjectId> = constellation.ids().collect();
        let plan = self.plan(scenario, &ids);

        let engine = match TrackingEngine::new(plan.config.clone(), SceneRecorder::new()) {
            Ok(engine) => engine,
            Err(e) => return self.failed(scenario, 0, 0.0, format!("invalid engine config: {}", e)),
        };

        let mut harness = Harness {
            server: SimServer::new(self.seed, constellation, plan.faults.clone()),
            engine,
            dt: 1.0 / f64::from(self.fps),
            start,
            pending_open: None,
            live: None,
            next_keyframe_at: f64::INFINITY,
            batches: 0,
            pending_fetches: Vec::new(),
            actions: plan.actions.iter().copied().collect(),
            backoff_runs: Vec::new(),
            loaded_once: BTreeSet::new(),
            error_sq_sum: 0.0,
            metrics: ScenarioMetrics::default(),
            events: Vec::new(),
            plan,
            ctx,
        };

        let open = harness.engine.start();
        harness.dispatch(vec![open], start);

        let target_ticks = (self.max_duration_secs * f64::from(self.fps)) as u64;
        for tick in 0..target_ticks {
            let snapshot = harness.step();

            if tick % u64::from(self.fps) == 0 {
                debug!(
                    "  t={:.1}s | {} | keyframes={} | updated={} | polylines={}",
                    harness.elapsed(),
                    harness.engine.status_text(),
                    harness.engine.keyframe_count(),
                    snapshot.batch.updated,
                    harness.engine.scene().len()
                );
            }
            if let Some(export) = export.as_deref_mut() {
                if tick % self.export_interval == 0 {
                    let backend_now = harness.server.backend_time(harness.ctx.wall_clock_secs());
                    export.add_frame(harness.sample(&snapshot, backend_now));
                }
            }
        }

        harness.finish_metrics();
        let outcome = check_common(&harness).and_then(|_| check_scenario(scenario, &harness, self));

        let final_time_secs = harness.elapsed();
        match &outcome {
            Ok(()) => info!(
                "✓ {} complete: {} keyframes, {} fetches, RMS error {:.1} km",
                scenario.name(),
                harness.metrics.keyframes_accepted,
                harness.metrics.orbit_fetches,
                harness.metrics.rms_error_m / 1000.0
            ),
            Err(reason) => warn!("✗ {} failed: {}", scenario.name(), reason),
        }

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: outcome.is_ok(),
            total_ticks: target_ticks,
            final_time_secs,
            failure_reason: outcome.err(),
            metrics: harness.metrics,
        }
    }

    fn failed(&self, scenario: ScenarioId, ticks: u64, time: f64, reason: String) -> ScenarioResult {
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: false,
            total_ticks: ticks,
            final_time_secs: time,
            failure_reason: Some(reason),
            metrics: ScenarioMetrics::default(),
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

/// Object id encoded in a polyline key such as `orbit-seg-42-3-0`.
fn key_object(key: &str) -> Option<ObjectId> {
    let rest = ["orbit-seg-", "uncertainty-", "history-trail-"]
        .iter()
        .find_map(|prefix| key.strip_prefix(prefix))?;
    rest.split('-').next()?.parse().ok().map(ObjectId)
}

/// Every trajectory polyline belongs to a selected object, and each
/// object's orbit segments come from a single build generation.
fn check_common(h: &Harness) -> Result<(), String> {
    let selected: BTreeSet<ObjectId> = h.engine.selected().collect();

    for id in h.engine.scene().with_prefix("").filter_map(|(_, spec)| key_object(&spec.key)) {
        if !selected.contains(&id) {
            return Err(format!("polyline left behind for deselected object {}", id));
        }
    }

    for id in &selected {
        let prefix = format!("orbit-seg-{}-", id);
        let generations: BTreeSet<&str> = h
            .engine
            .scene()
            .with_prefix(&prefix)
            .filter_map(|(_, spec)| spec.key[prefix.len()..].split('-').next())
            .collect();
        if generations.len() > 1 {
            return Err(format!("object {} has segments from {} orbit builds", id, generations.len()));
        }
    }

    if h.engine.scene().stale_writes() > 0 {
        return Err(format!("{} writes to removed polylines", h.engine.scene().stale_writes()));
    }
    Ok(())
}

fn check_loaded(h: &Harness) -> Result<(), String> {
    for id in h.engine.selected() {
        match h.engine.orbit_status(id) {
            Some(OrbitStatus::Loaded { .. }) => {}
            other => return Err(format!("orbit of {} not loaded: {:?}", id, other)),
        }
    }
    Ok(())
}

fn check_error_bound(h: &Harness) -> Result<(), String> {
    if h.metrics.error_samples == 0 {
        return Err("no interpolated positions were written".to_string());
    }
    // A rendered position never trails truth by more than one keyframe step
    let step = h.plan.config.stream.keyframe_step_secs;
    let bound = h.server.constellation().max_ground_speed() * (step + 0.5) + 1000.0;
    if h.metrics.max_error_m > bound {
        return Err(format!(
            "max interpolation error {:.1} km exceeds {:.1} km",
            h.metrics.max_error_m / 1000.0,
            bound / 1000.0
        ));
    }
    Ok(())
}

fn check_scenario(scenario: ScenarioId, h: &Harness, runner: &ScenarioRunner) -> Result<(), String> {
    let duration = runner.max_duration_secs;
    let step = h.plan.config.stream.keyframe_step_secs;

    match scenario {
        ScenarioId::Nominal => {
            if h.engine.connection_state() != ConnectionState::Connected {
                return Err(format!("stream not connected: {}", h.engine.status_text()));
            }
            let expected = ((duration - 1.0) / step).floor() as u64;
            if h.metrics.keyframes_accepted < expected {
                return Err(format!("{} keyframes accepted, expected {}", h.metrics.keyframes_accepted, expected));
            }
            check_loaded(h)?;
            check_error_bound(h)
        }

        ScenarioId::ClockSkew => {
            let skew = h.plan.faults.clock_skew_secs;
            if (h.engine.clock_offset() - skew).abs() > 1.0 {
                return Err(format!("clock offset {:.2}s, backend skew {:.2}s", h.engine.clock_offset(), skew));
            }
            check_error_bound(h)
        }

        ScenarioId::Flapping => {
            let policy = BackoffPolicy::new(
                h.plan.config.stream.reconnect_base_delay_secs,
                h.plan.config.stream.reconnect_max_delay_secs,
            );
            for run in &h.backoff_runs {
                let expected: Vec<f64> = (0..run.len() as u32).map(|a| policy.delay(a)).collect();
                if *run != expected {
                    return Err(format!("reconnect delays {:?}, expected {:?}", run, expected));
                }
            }
            let drop_every = h.plan.faults.drop_every_secs.unwrap_or(f64::INFINITY);
            if duration > drop_every + 1.0 && h.metrics.stream_drops == 0 {
                return Err("stream never dropped".to_string());
            }
            if h.engine.stats().keyframes_rejected > 0 {
                return Err(format!("{} keyframes rejected across reconnects", h.engine.stats().keyframes_rejected));
            }
            Ok(())
        }

        ScenarioId::MalformedStream => {
            let corrupted = h.server.stats().lines_corrupted;
            if h.metrics.messages_dropped != corrupted {
                return Err(format!("{} lines dropped, {} corrupted", h.metrics.messages_dropped, corrupted));
            }
            if h.server.stats().batches_sent > 4 && h.metrics.satellites_dropped == 0 {
                return Err("no malformed satellites were dropped".to_string());
            }
            if h.metrics.stream_drops > 0 || h.engine.connection_state() != ConnectionState::Connected {
                return Err("garbage input disconnected the stream".to_string());
            }
            if h.metrics.keyframes_accepted == 0 {
                return Err("no keyframes survived".to_string());
            }
            Ok(())
        }

        ScenarioId::KilometerOrbits => {
            check_loaded(h)?;
            for id in h.engine.selected() {
                let Some(render) = h.engine.orbit_render(id) else {
                    return Err(format!("no orbit rendered for {}", id));
                };
                let radius = render.full_points.first().map(|p| p.norm()).unwrap_or_default();
                if radius < 6_000_000.0 {
                    return Err(format!("orbit of {} left in km (|p| = {:.0})", id, radius));
                }
            }
            check_error_bound(h)
        }

        ScenarioId::InertialOrbits => {
            check_loaded(h)?;
            for id in h.engine.selected() {
                let (Some(render), Some(position)) = (h.engine.orbit_render(id), h.engine.position(id)) else {
                    return Err(format!("no orbit or position for {}", id));
                };
                let closest = render
                    .full_points
                    .iter()
                    .map(|p| (p - position).norm())
                    .fold(f64::INFINITY, f64::min);
                if closest > 100_000.0 {
                    return Err(format!("orbit of {} passes {:.0} km from the object", id, closest / 1000.0));
                }
            }
            check_error_bound(h)
        }

        ScenarioId::StaleTles => {
            if h.engine.global_staleness() != StalenessLevel::Degraded {
                return Err(format!("global staleness {:?}", h.engine.global_staleness()));
            }
            let host_now = h.ctx.wall_clock_secs();
            let degraded_dash = h.plan.config.visual.staleness.degraded_dash_length;
            for id in h.engine.selected() {
                if h.engine.badge_text(id, host_now) != "TLE DEGRADED" {
                    return Err(format!("badge for {} is {:?}", id, h.engine.badge_text(id, host_now)));
                }
                let Some(render) = h.engine.orbit_render(id) else {
                    return Err(format!("no orbit rendered for {}", id));
                };
                if render.staleness.dash_length != Some(degraded_dash) {
                    return Err(format!("orbit of {} not dashed as degraded", id));
                }
                match h.engine.uncertainty_render(id) {
                    Some(u) if u.mode == UncertaintyMode::Corridor => {}
                    other => return Err(format!("no corridor for {}: {:?}", id, other.map(|u| u.mode))),
                }
            }
            Ok(())
        }

        ScenarioId::FlakyPropagator => {
            if duration > 30.0 && h.metrics.orbit_fetch_errors == 0 {
                return Err("no propagate failures were injected".to_string());
            }
            let selected: Vec<ObjectId> = h.engine.selected().collect();
            for id in &selected {
                if h.loaded_once.contains(id) {
                    // A failed refresh keeps the last good orbit on screen
                    if h.engine.orbit_render(*id).is_none() {
                        return Err(format!("orbit of {} vanished after a failed refresh", id));
                    }
                } else {
                    match h.engine.orbit_status(*id) {
                        Some(OrbitStatus::Error(message)) if message.contains("503") => {}
                        other => return Err(format!("orbit of {} neither loaded nor failed: {:?}", id, other)),
                    }
                }
            }
            let refresh = h.plan.config.orbit.refresh_interval_secs;
            let refreshing = selected.iter().filter(|id| h.loaded_once.contains(id)).count() as u64;
            if duration > refresh + 3.0 && h.metrics.orbit_fetches <= selected.len() as u64 && refreshing > 0 {
                return Err("loaded orbits were never refreshed".to_string());
            }
            Ok(())
        }

        ScenarioId::SelectionChurn => {
            for id in h.loaded_once.iter() {
                let selected = h.engine.selected().any(|s| s == *id);
                if !selected && h.engine.orbit_status(*id).is_some() {
                    return Err(format!("orbit status kept for deselected object {}", id));
                }
            }
            check_error_bound(h)
        }

        ScenarioId::CameraSweep => {
            let CameraPlan::Sweep { period, .. } = h.plan.camera else {
                return Err("camera sweep not configured".to_string());
            };
            let sweeps = (duration / period).ceil() as u64;
            if duration > period / 2.0 && h.metrics.lod_switches == 0 {
                return Err("LOD never switched".to_string());
            }
            if h.metrics.lod_switches > 4 * sweeps + 2 {
                return Err(format!("LOD thrashing: {} switches in {} sweeps", h.metrics.lod_switches, sweeps));
            }
            if duration > 5.0 && h.metrics.curve_builds == 0 {
                return Err("close camera never smoothed the orbit head".to_string());
            }
            check_error_bound(h)
        }
    }
}
