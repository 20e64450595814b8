//! Tracking Engine - owns every component and drives them per frame.
//!
//! The engine is single-threaded and performs no I/O. The host reports
//! what happened (stream lines, transport errors, orbit response bodies,
//! the passage of time) and executes the [`EngineCommand`]s handed back.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        TrackingEngine                         │
//! │                                                               │
//! │  stream line ──▶ protocol ──▶ ClockSync + KeyframeBuffer      │
//! │                                     │                         │
//! │  frame(camera) ──▶ InterpolationScheduler ──▶ PositionTable   │
//! │        │                                         │            │
//! │        │ every N frames                          ▼            │
//! │        └──▶ depth / visibility / LOD / curve   head markers   │
//! │                                                               │
//! │  select(id) ──▶ OrbitCache ──▶ normalize ──▶ SegmentBuilder   │
//! │                    ▲                        ├▶ uncertainty    │
//! │  poll_timers ──────┘ (refresh)              └▶ staleness      │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Asynchronous results are applied only while still relevant: the
//! connection ticket or orbit request generation must still be current.

use crate::clock_sync::ClockSync;
use crate::config::EngineConfig;
use crate::curves::{decide, resample_catmull_rom, CurveCache, CurveDecision};
use crate::error::{ConfigError, OrbitError};
use crate::geometry::{Camera, PositionSource, PositionTable, Vec3};
use crate::history_trail::{points_for_window, HistoryTrail};
use crate::interpolation::{BatchStats, InterpolationScheduler};
use crate::keyframes::{Keyframe, KeyframeBuffer};
use crate::lod::{depth_scale, initial_tier, next_tier, LodArrays, LodTier, OrbitRenderState, RebuildParams, SegmentBuilder};
use crate::orbit_cache::{
    normalize_orbit, trail_point_count, NormalizeParams, OrbitCache, OrbitRequest, RefreshSchedule,
};
use crate::protocol::{parse_propagate_response, parse_stream_line, DatasetMetadata, KeyframeBatch, RawOrbitPoint, StreamMessage};
use crate::pulse::{self, HeadMarker};
use crate::render::{Material, PolylineHandle, PolylineSpec, RenderBackend, Rgba};
use crate::staleness::{StalenessEvaluator, StalenessLevel};
use crate::stream::{BackoffPolicy, ConnectionState, ConnectionTicket, StreamConnectionManager};
use crate::uncertainty::{self, age_scale, future_half, UncertaintyMode, UncertaintyRender};
use orbitview_env::{EnvError, ObjectId};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// Glow of the history trail polyline.
const HISTORY_TRAIL_GLOW: f64 = 0.15;

// ============================================================================
// PUBLIC TYPES
// ============================================================================

/// Work the host performs on the engine's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum EngineCommand {
    /// Open the keyframe stream and tag its events with this ticket
    OpenStream(ConnectionTicket),

    /// Close the transport opened for this ticket; always precedes the
    /// `OpenStream` that replaces it
    CloseStream(ConnectionTicket),

    /// Fetch a trajectory and pass the body to `apply_orbit_response`
    FetchOrbit(OrbitRequest),
}

/// Orbit state of one selected object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum OrbitStatus {
    Loading,
    Loaded { points: usize },
    Error(String),
}

/// Engine-lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub frames: u64,
    pub keyframes_accepted: u64,
    pub keyframes_rejected: u64,

    /// Stream lines that failed to decode
    pub messages_dropped: u64,

    /// Satellites dropped from otherwise valid batches
    pub satellites_dropped: u64,

    /// Events or responses that arrived for a superseded connection/request
    pub stale_events: u64,

    pub orbit_fetches: u64,
    pub orbit_fetch_errors: u64,

    /// Responses whose points could not be normalized
    pub orbits_discarded: u64,

    pub segment_rebuilds: u64,
    pub lod_switches: u64,
    pub curve_builds: u64,
    pub cache_entries_swept: u64,
}

/// Immutable result of one frame.
#[derive(Debug, Clone, Serialize)]
pub struct FrameSnapshot {
    pub frame: u64,

    /// Animation time (backend clock)
    pub backend_time: f64,

    pub batch: BatchStats,

    /// Positions written this frame
    pub updates: Vec<(ObjectId, Vec3)>,

    /// One pulsing marker per selected object with a known position
    pub markers: Vec<HeadMarker>,

    pub global_staleness: StalenessLevel,
    pub connection: ConnectionState,
}

/// A selected object's history trail and its polyline.
#[derive(Debug, Clone)]
struct TrailRender {
    trail: HistoryTrail,
    handle: Option<PolylineHandle>,
}

// ============================================================================
// ENGINE
// ============================================================================

/// Real-time state sync and trajectory engine.
///
/// Generic over the render backend so the same engine drives a real scene
/// graph, the headless client and the simulator.
pub struct TrackingEngine<S: RenderBackend> {
    config: EngineConfig,
    scene: S,

    // Stream sync
    clock: ClockSync,
    connection: StreamConnectionManager,
    keyframes: KeyframeBuffer,
    scheduler: InterpolationScheduler,
    positions: PositionTable,
    metadata: Option<DatasetMetadata>,

    // Selection
    selected: BTreeSet<ObjectId>,

    /// Object the camera follows; exempt from orbit visibility gating
    tracked: Option<ObjectId>,

    // Trajectories
    orbits_enabled: bool,
    orbit_cache: OrbitCache,
    refresh: RefreshSchedule,
    orbit_status: HashMap<ObjectId, OrbitStatus>,
    orbits: HashMap<ObjectId, OrbitRenderState>,
    segment_builder: SegmentBuilder,
    depth_scales: HashMap<ObjectId, f64>,
    curves: HashMap<ObjectId, CurveCache>,
    uncertainty: HashMap<ObjectId, UncertaintyRender>,
    trails: HashMap<ObjectId, TrailRender>,
    staleness: StalenessEvaluator,

    // Runtime controls
    trail_seconds: f64,
    history_minutes: f64,

    last_camera: Option<Camera>,
    global_staleness: StalenessLevel,
    frame: u64,
    stats: EngineStats,
}

impl<S: RenderBackend> TrackingEngine<S> {
    /// Creates an engine after validating `config`.
    pub fn new(config: EngineConfig, scene: S) -> Result<Self, ConfigError> {
        config.validate()?;

        let stream = &config.stream;
        let orbit = &config.orbit;
        let visual = &config.visual;

        Ok(Self {
            clock: ClockSync::new(stream.clock_smoothing),
            connection: StreamConnectionManager::new(BackoffPolicy::new(
                stream.reconnect_base_delay_secs,
                stream.reconnect_max_delay_secs,
            )),
            keyframes: KeyframeBuffer::new(stream.max_keyframes),
            scheduler: InterpolationScheduler::new(&config.performance),
            positions: PositionTable::new(),
            metadata: None,
            selected: BTreeSet::new(),
            tracked: None,
            orbits_enabled: orbit.enabled,
            orbit_cache: OrbitCache::new(orbit.cache_ttl_secs),
            refresh: RefreshSchedule::new(orbit.refresh_interval_secs),
            orbit_status: HashMap::new(),
            orbits: HashMap::new(),
            segment_builder: SegmentBuilder::new(),
            depth_scales: HashMap::new(),
            curves: HashMap::new(),
            uncertainty: HashMap::new(),
            trails: HashMap::new(),
            staleness: StalenessEvaluator::new(visual.staleness.clone()),
            trail_seconds: visual.trail.default_seconds,
            history_minutes: visual.history_trail.default_minutes,
            last_camera: None,
            global_staleness: StalenessLevel::Fresh,
            frame: 0,
            stats: EngineStats::default(),
            scene,
            config,
        })
    }

    /// Opens the stream for the first time.
    pub fn start(&mut self) -> EngineCommand {
        info!("Starting tracking engine against {}", self.config.stream.backend_url);
        EngineCommand::OpenStream(self.connection.connect())
    }

    // ========================================================================
    // STREAM EVENTS
    // ========================================================================

    pub fn on_stream_open(&mut self, ticket: ConnectionTicket) {
        if !self.connection.on_open(ticket, &mut self.clock) {
            self.stats.stale_events += 1;
        }
    }

    /// Feeds one raw stream line received on `ticket`'s connection.
    ///
    /// Lines from a superseded connection are ignored; malformed lines are
    /// logged and dropped without affecting the connection.
    pub fn on_stream_line(&mut self, ticket: ConnectionTicket, line: &str, host_now: f64) {
        if !self.connection.is_current(ticket) {
            self.stats.stale_events += 1;
            return;
        }

        match parse_stream_line(line) {
            Ok(Some(StreamMessage::Metadata(metadata))) => self.handle_metadata(metadata),
            Ok(Some(StreamMessage::KeyframeBatch(batch))) => self.handle_batch(batch, host_now),
            Ok(Some(StreamMessage::Keepalive)) | Ok(None) => {}
            Err(e) => {
                warn!("Dropping stream message: {}", e);
                self.stats.messages_dropped += 1;
            }
        }
    }

    /// Returns the reconnect delay when one was scheduled.
    pub fn on_stream_error(&mut self, ticket: ConnectionTicket, host_now: f64, reason: &str) -> Option<f64> {
        let delay = self.connection.on_error(ticket, host_now, reason);
        if delay.is_none() {
            self.stats.stale_events += 1;
        }
        delay
    }

    pub fn on_stream_closed(&mut self, ticket: ConnectionTicket, host_now: f64) -> Option<f64> {
        let delay = self.connection.on_closed(ticket, host_now);
        if delay.is_none() {
            self.stats.stale_events += 1;
        }
        delay
    }

    /// User-initiated reconnect (backoff reset).
    pub fn manual_reconnect(&mut self) -> Vec<EngineCommand> {
        let (superseded, ticket) = self.connection.manual_reconnect();
        if let Some(old) = superseded {
            debug!("Closing stream generation {} before reconnecting", old.generation);
        }
        superseded
            .map(EngineCommand::CloseStream)
            .into_iter()
            .chain(std::iter::once(EngineCommand::OpenStream(ticket)))
            .collect()
    }

    /// Stops streaming; no reconnect is scheduled.
    pub fn disconnect(&mut self) -> Option<EngineCommand> {
        info!("Disconnecting keyframe stream");
        self.connection.disconnect().map(EngineCommand::CloseStream)
    }

    fn handle_metadata(&mut self, metadata: DatasetMetadata) {
        info!(
            "Dataset metadata: TLE age {:.1}h",
            metadata.tle_age_seconds / 3600.0
        );
        self.staleness.set_dataset_age(metadata.tle_age_seconds);
        self.metadata = Some(metadata);
    }

    fn handle_batch(&mut self, batch: KeyframeBatch, host_now: f64) {
        self.stats.satellites_dropped += batch.dropped as u64;
        let timestamp = batch.timestamp;

        let keyframe = Keyframe::new(timestamp, batch.satellites.iter().copied());
        if let Err(e) = self.keyframes.push(keyframe) {
            warn!("Rejected keyframe batch: {}", e);
            self.stats.keyframes_rejected += 1;
            return;
        }
        self.stats.keyframes_accepted += 1;
        self.clock.observe(timestamp, host_now);

        let added = self
            .scheduler
            .register_objects(batch.satellites.iter().map(|(id, _)| *id));
        if added > 0 {
            debug!("{} new objects ({} total)", added, self.scheduler.object_count());
        }

        for (id, position) in &batch.satellites {
            // Objects are drawn at their first observation until interpolation reaches them
            if self.positions.get(*id).is_none() {
                self.positions.set(*id, *position);
            }

            if let Some(render) = self.trails.get_mut(id) {
                render.trail.push(*position);
                render
                    .trail
                    .retain_newest(points_for_window(self.history_minutes, self.config.stream.keyframe_step_secs));
                draw_trail(&mut self.scene, *id, render, &self.config);
            }
        }
    }

    // ========================================================================
    // FRAME
    // ========================================================================

    /// Advances one rendered frame.
    pub fn frame(&mut self, host_now: f64, camera: &Camera) -> FrameSnapshot {
        self.frame += 1;
        self.stats.frames = self.frame;
        let frame = self.frame;
        let backend_time = self.clock.backend_now(host_now);

        if frame % self.config.performance.staleness_ui_interval_frames == 0 {
            self.refresh_staleness(backend_time);
        }
        if frame % self.config.performance.sweep_interval_frames == 0 {
            self.sweep(host_now);
        }
        if !self.selected.is_empty() && frame % self.config.visual.orbit.depth_update_interval == 0 {
            self.update_orbit_visibility(camera);
        }

        let batch = self
            .scheduler
            .advance(&mut self.keyframes, backend_time, frame, camera, &mut self.positions);

        if frame % self.config.performance.orbit_head_update_interval == 0 {
            for id in &self.selected {
                if let (Some(render), Some(live)) = (self.orbits.get_mut(id), self.positions.get(*id)) {
                    render.update_head(&mut self.scene, live);
                }
            }
        }

        let pulse_config = &self.config.visual.pulse;
        let markers = self
            .selected
            .iter()
            .filter_map(|id| {
                let position = self.positions.position(*id)?;
                let mut pulse = pulse::sample(host_now, pulse_config);
                if !pulse_config.glow_dot {
                    pulse.glow_alpha = 0.0;
                }
                Some(HeadMarker {
                    follows: *id,
                    position,
                    pulse,
                })
            })
            .collect();

        self.last_camera = Some(camera.clone());

        FrameSnapshot {
            frame,
            backend_time,
            batch: batch.stats,
            updates: batch.updates,
            markers,
            global_staleness: self.global_staleness,
            connection: self.connection.state(),
        }
    }

    /// Depth scale, visibility gating, LOD tier and curve smoothing for
    /// every rendered orbit.
    fn update_orbit_visibility(&mut self, camera: &Camera) {
        let ids: Vec<ObjectId> = self.orbits.keys().copied().collect();

        for id in ids {
            let Some(position) = self.positions.position(id) else {
                continue;
            };
            let distance = camera.distance_to(&position);
            let visible = self.tracked == Some(id) || distance < self.config.visual.visibility.orbit_cutoff_dist;

            let current = {
                let Some(render) = self.orbits.get_mut(&id) else {
                    continue;
                };
                let style = &self.config.visual.orbit;
                if style.depth_scaling {
                    let scale = depth_scale(distance, style);
                    self.depth_scales.insert(id, scale);
                    render.set_head_scale(&mut self.scene, scale);
                }
                render.set_visible(&mut self.scene, visible);
                render.tier
            };
            if !visible {
                continue;
            }

            let lod = &self.config.visual.lod;
            let next = if lod.enabled {
                next_tier(current, distance, lod)
            } else {
                current
            };
            if next != current {
                debug!("Object {} LOD {:?} -> {:?} at {:.0} km", id, current, next, distance / 1000.0);
                self.stats.lod_switches += 1;
                if self.curves.contains_key(&id) {
                    self.build_curve(id, next);
                }
                self.rebuild_segments(id, next);
                continue;
            }

            match decide(self.curves.get(&id), distance, self.frame, &self.config.visual.curves) {
                CurveDecision::Keep => {}
                CurveDecision::Rebuild => {
                    let was_curved = self.curves.contains_key(&id);
                    if self.build_curve(id, current) || was_curved {
                        self.rebuild_segments(id, current);
                    }
                }
                CurveDecision::Drop => {
                    self.curves.remove(&id);
                    self.rebuild_segments(id, current);
                }
            }
        }
    }

    fn refresh_staleness(&mut self, backend_time: f64) {
        for (id, render) in self.orbits.iter_mut() {
            let style = self.staleness.style(self.staleness.level(Some(*id), backend_time));
            if render.staleness != style {
                render.apply_staleness(&mut self.scene, style);
            }
        }
        self.global_staleness = self
            .staleness
            .global_level(self.selected.iter().copied(), backend_time);
    }

    /// Reclaims state for objects no longer selected and expired orbit entries.
    fn sweep(&mut self, host_now: f64) {
        let selected = &self.selected;
        let swept = self.orbit_cache.sweep(host_now, |id| selected.contains(&id));
        self.depth_scales.retain(|id, _| selected.contains(id));
        self.curves.retain(|id, _| selected.contains(id));
        self.orbit_status.retain(|id, _| selected.contains(id));
        self.stats.cache_entries_swept += swept as u64;
        if swept > 0 {
            debug!("Cache sweep reclaimed {} orbit entries", swept);
        }
    }

    // ========================================================================
    // TIMERS
    // ========================================================================

    /// Fires due reconnect and orbit refresh timers.
    pub fn poll_timers(&mut self, host_now: f64) -> Vec<EngineCommand> {
        let mut commands = Vec::new();

        if let Some(ticket) = self.connection.poll(host_now) {
            commands.push(EngineCommand::OpenStream(ticket));
        }

        for id in self.refresh.due(host_now) {
            if !self.orbits_enabled || !self.selected.contains(&id) {
                debug!("Refresh timer for {} no longer needed", id);
                self.refresh.cancel(id);
                continue;
            }
            debug!("Refreshing orbit for {}", id);
            self.orbit_cache.invalidate(id);
            commands.push(EngineCommand::FetchOrbit(self.begin_fetch(id)));
        }

        commands
    }

    // ========================================================================
    // SELECTION
    // ========================================================================

    /// Selects `id` and makes it the tracked object.
    ///
    /// Returns a fetch command unless a fresh orbit is already cached.
    pub fn select(&mut self, id: ObjectId, host_now: f64) -> Vec<EngineCommand> {
        let newly_selected = self.selected.insert(id);
        self.tracked = Some(id);

        if newly_selected {
            info!("Selected {}", id);
            if self.config.visual.history_trail.enabled {
                let mut render = TrailRender {
                    trail: HistoryTrail::with_capacity(self.config.visual.history_trail.max_points),
                    handle: None,
                };
                self.fill_trail(id, &mut render, host_now);
                self.trails.insert(id, render);
            }
        }

        if !self.orbits_enabled {
            return Vec::new();
        }
        self.request_orbit(id, host_now).into_iter().collect()
    }

    /// Removes everything drawn for `id`.
    pub fn deselect(&mut self, id: ObjectId) {
        if !self.selected.remove(&id) {
            return;
        }
        if self.tracked == Some(id) {
            self.tracked = None;
        }
        self.remove_orbit_render(id);
        self.refresh.cancel(id);
        self.orbit_status.remove(&id);
        if let Some(handle) = self.trails.remove(&id).and_then(|render| render.handle) {
            self.scene.remove_polyline(handle);
        }
        info!("Deselected {}", id);
    }

    pub fn clear_selection(&mut self) {
        let ids: Vec<ObjectId> = self.selected.iter().copied().collect();
        for id in ids {
            self.deselect(id);
        }
    }

    /// Changes the followed object without changing the selection.
    pub fn set_tracked(&mut self, id: Option<ObjectId>) {
        self.tracked = id.filter(|id| self.selected.contains(id));
    }

    fn request_orbit(&mut self, id: ObjectId, host_now: f64) -> Option<EngineCommand> {
        if let Some(entry) = self.orbit_cache.get_fresh(id, host_now) {
            let points = entry.points.clone();
            debug!("Orbit cache hit for {}", id);
            if let Err(e) = self.display_orbit(id, &points, host_now) {
                warn!("Cached orbit for {} unusable: {}", id, e);
                self.orbit_status.insert(id, OrbitStatus::Error(e.to_string()));
            }
            return None;
        }
        Some(EngineCommand::FetchOrbit(self.begin_fetch(id)))
    }

    fn begin_fetch(&mut self, id: ObjectId) -> OrbitRequest {
        let generation = self.orbit_cache.begin_request(id);
        self.orbit_status.insert(id, OrbitStatus::Loading);
        self.stats.orbit_fetches += 1;
        OrbitRequest {
            id,
            generation,
            horizon_secs: self.config.orbit.horizon_secs,
            step_secs: self.config.orbit.step_secs,
        }
    }

    // ========================================================================
    // ORBITS
    // ========================================================================

    /// Completes a fetch issued through [`EngineCommand::FetchOrbit`].
    ///
    /// Superseded responses are dropped. A current response is cached even
    /// if the object was deselected meanwhile, but only drawn while selected.
    pub fn apply_orbit_response(&mut self, request: OrbitRequest, response: Result<String, EnvError>, host_now: f64) {
        let id = request.id;
        if !self.orbit_cache.is_current(id, request.generation) {
            debug!("Ignoring superseded orbit response for {}", id);
            self.stats.stale_events += 1;
            return;
        }

        let outcome = response
            .map_err(|e| OrbitError::Fetch(e.to_string()))
            .and_then(|body| self.ingest_orbit(request, &body, host_now));

        if let Err(e) = outcome {
            warn!("Orbit for {} failed: {}", id, e);
            self.stats.orbit_fetch_errors += 1;
            if self.selected.contains(&id) {
                self.orbit_status.insert(id, OrbitStatus::Error(e.to_string()));
            }
        }
    }

    fn ingest_orbit(&mut self, request: OrbitRequest, body: &str, host_now: f64) -> Result<(), OrbitError> {
        let id = request.id;
        let response = parse_propagate_response(body)?;
        if let Some(epoch) = response.tle_epoch {
            self.staleness.set_object_epoch(id, epoch);
        }

        self.orbit_cache
            .complete(id, request.generation, response.points.clone(), host_now);

        if self.orbits_enabled && self.selected.contains(&id) {
            self.display_orbit(id, &response.points, host_now)?;
        }
        Ok(())
    }

    /// Normalizes and draws an orbit, replacing whatever was drawn for `id`.
    fn display_orbit(&mut self, id: ObjectId, raw: &[RawOrbitPoint], host_now: f64) -> Result<usize, OrbitError> {
        let backend_now = self.clock.backend_now(host_now);
        let params = NormalizeParams {
            km_threshold: self.config.orbit.km_magnitude_threshold,
            frame_mismatch_threshold: self.config.orbit.frame_mismatch_threshold_m,
            step_secs: f64::from(self.config.orbit.step_secs),
            backend_now,
        };
        let current = self
            .positions
            .position(id)
            .or_else(|| self.keyframes.position(id));

        let normalized = match normalize_orbit(id, raw, current.as_ref(), &params) {
            Ok(normalized) => normalized,
            Err(e) => {
                self.remove_orbit_render(id);
                self.stats.orbits_discarded += 1;
                return Err(e);
            }
        };
        if normalized.scaled_from_km {
            info!("Orbit for {} scaled from kilometers", id);
        }
        if normalized.rotated_from_inertial {
            info!("Orbit for {} rotated from inertial frame", id);
        }
        if normalized.dropped > 0 {
            debug!("Dropped {} unusable points from orbit {}", normalized.dropped, id);
        }

        // Derived caches belong to the previous points
        let previous = self.orbits.remove(&id);
        self.curves.remove(&id);
        self.depth_scales.remove(&id);
        if let Some(old) = self.uncertainty.remove(&id) {
            old.remove(&mut self.scene);
        }

        let full_points = normalized.points;
        let arrays = self.trail_arrays(&full_points);
        let distance = match (&self.last_camera, current.or_else(|| full_points.first().copied())) {
            (Some(camera), Some(position)) => Some(camera.distance_to(&position)),
            _ => None,
        };
        let tier = initial_tier(distance, &self.config.visual.lod);

        let mut render = OrbitRenderState::new(self.config.visual.orbit.color, arrays, full_points, tier);
        render.staleness = self
            .staleness
            .style(self.staleness.level(Some(id), backend_now));
        if let Some(previous) = previous {
            // Old polylines are removed only after their replacements exist
            render.segments = previous.segments;
            render.visible = previous.visible;
        }
        self.orbits.insert(id, render);

        if let Some(d) = distance {
            let style = &self.config.visual.orbit;
            if style.depth_scaling {
                self.depth_scales.insert(id, depth_scale(d, style));
            }
            if decide(None, d, self.frame, &self.config.visual.curves) == CurveDecision::Rebuild {
                self.build_curve(id, tier);
            }
        }

        let drawn = self.rebuild_segments(id, tier);
        self.draw_uncertainty(id, backend_now);
        self.refresh.arm(id, host_now);
        self.orbit_status.insert(id, OrbitStatus::Loaded { points: drawn_points(&self.orbits, id) });

        info!("Displaying orbit for {} ({} segments, {:?})", id, drawn, tier);
        Ok(drawn)
    }

    fn trail_arrays(&self, full_points: &[Vec3]) -> LodArrays {
        let shown = trail_point_count(
            self.trail_seconds,
            f64::from(self.config.orbit.step_secs),
            full_points.len(),
        );
        LodArrays::build(
            &full_points[..shown],
            &self.config.visual.lod,
            self.config.visual.orbit.gradient_segments,
        )
    }

    /// Resamples the head segment of `tier`; returns whether a curve exists afterwards.
    fn build_curve(&mut self, id: ObjectId, tier: LodTier) -> bool {
        let Some(render) = self.orbits.get(&id) else {
            return false;
        };
        let cfg = &self.config.visual.curves;
        match render.arrays.tier(tier).first() {
            Some(head) if head.len() >= 4 => {
                let points = resample_catmull_rom(head, cfg.max_resampled_points, cfg.tension);
                self.curves.insert(
                    id,
                    CurveCache {
                        points,
                        frame_built: self.frame,
                    },
                );
                self.stats.curve_builds += 1;
                true
            }
            _ => {
                self.curves.remove(&id);
                false
            }
        }
    }

    fn rebuild_segments(&mut self, id: ObjectId, tier: LodTier) -> usize {
        let Some(render) = self.orbits.get_mut(&id) else {
            return 0;
        };
        let live = self.positions.position(id);
        let params = RebuildParams {
            tier,
            curved_head: self.curves.get(&id).map(|curve| curve.points.as_slice()),
            live_head: live.as_ref(),
            depth_scale: self.depth_scales.get(&id).copied().unwrap_or(1.0),
        };
        let count = self
            .segment_builder
            .rebuild(&mut self.scene, id, render, params, &self.config.visual.orbit);
        self.stats.segment_rebuilds += 1;
        count
    }

    fn draw_uncertainty(&mut self, id: ObjectId, backend_now: f64) {
        if let Some(old) = self.uncertainty.remove(&id) {
            old.remove(&mut self.scene);
        }
        let cfg = &self.config.visual.uncertainty;
        if !cfg.enabled {
            return;
        }
        let Some(render) = self.orbits.get(&id) else {
            return;
        };

        let scale = age_scale(self.staleness.age_secs(Some(id), backend_now), cfg.tle_epoch_age_multiplier);
        let future = future_half(&render.full_points);
        if let Some(drawn) = uncertainty::build(&mut self.scene, id, future, render.color, scale, cfg) {
            self.uncertainty.insert(id, drawn);
        }
    }

    fn remove_orbit_render(&mut self, id: ObjectId) {
        if let Some(mut render) = self.orbits.remove(&id) {
            render.remove(&mut self.scene);
        }
        if let Some(drawn) = self.uncertainty.remove(&id) {
            drawn.remove(&mut self.scene);
        }
        self.curves.remove(&id);
        self.depth_scales.remove(&id);
    }

    // ========================================================================
    // HISTORY TRAILS
    // ========================================================================

    fn fill_trail(&mut self, id: ObjectId, render: &mut TrailRender, host_now: f64) {
        let window_secs = self.history_minutes * 60.0;
        render.trail.clear();
        render
            .trail
            .prefill(&self.keyframes, id, self.clock.backend_now(host_now), window_secs);
        render
            .trail
            .retain_newest(points_for_window(self.history_minutes, self.config.stream.keyframe_step_secs));
        draw_trail(&mut self.scene, id, render, &self.config);
    }

    // ========================================================================
    // RUNTIME CONTROLS
    // ========================================================================

    /// Enables or disables full orbits. Disabling removes every drawn orbit
    /// and stops auto-refresh; enabling requests orbits for the selection.
    pub fn set_orbits_enabled(&mut self, enabled: bool, host_now: f64) -> Vec<EngineCommand> {
        if self.orbits_enabled == enabled {
            return Vec::new();
        }
        self.orbits_enabled = enabled;
        info!("Full orbits {}", if enabled { "enabled" } else { "disabled" });

        if !enabled {
            let ids: Vec<ObjectId> = self.orbits.keys().copied().collect();
            for id in ids {
                self.remove_orbit_render(id);
            }
            self.refresh.clear();
            self.orbit_status.clear();
            return Vec::new();
        }

        let ids: Vec<ObjectId> = self.selected.iter().copied().collect();
        ids.into_iter()
            .filter_map(|id| self.request_orbit(id, host_now))
            .collect()
    }

    /// Sets the displayed trail length (clamped) and rebuilds every orbit's segments.
    pub fn set_trail_seconds(&mut self, seconds: f64) {
        let trail = &self.config.visual.trail;
        let clamped = seconds.clamp(trail.min_seconds, trail.max_seconds);
        if clamped == self.trail_seconds {
            return;
        }
        self.trail_seconds = clamped;
        debug!("Trail length {}s", clamped);

        let ids: Vec<ObjectId> = self.orbits.keys().copied().collect();
        for id in ids {
            let Some(render) = self.orbits.get(&id) else {
                continue;
            };
            let tier = render.tier;
            let arrays = self.trail_arrays(&render.full_points);
            if let Some(render) = self.orbits.get_mut(&id) {
                render.arrays = arrays;
            }
            if self.curves.contains_key(&id) {
                self.build_curve(id, tier);
            }
            self.rebuild_segments(id, tier);
        }
    }

    /// Changes the history window and refills every active trail.
    pub fn set_history_minutes(&mut self, minutes: f64, host_now: f64) {
        if !(minutes > 0.0) {
            warn!("Ignoring history window of {} minutes", minutes);
            return;
        }
        self.history_minutes = minutes;

        let ids: Vec<ObjectId> = self.trails.keys().copied().collect();
        for id in ids {
            if let Some(mut render) = self.trails.remove(&id) {
                self.fill_trail(id, &mut render, host_now);
                self.trails.insert(id, render);
            }
        }
    }

    /// Switches uncertainty rendering and redraws it for every orbit.
    pub fn set_uncertainty(&mut self, enabled: bool, mode: UncertaintyMode, host_now: f64) {
        self.config.visual.uncertainty.enabled = enabled;
        self.config.visual.uncertainty.mode = mode;

        let backend_now = self.clock.backend_now(host_now);
        let ids: Vec<ObjectId> = self.orbits.keys().copied().collect();
        for id in ids {
            self.draw_uncertainty(id, backend_now);
        }
    }

    /// Full local data reset: selection, keyframes, metadata, caches,
    /// timers, trails and per-object TLE epochs.
    pub fn reset(&mut self) {
        self.clear_selection();
        let ids: Vec<ObjectId> = self.orbits.keys().copied().collect();
        for id in ids {
            self.remove_orbit_render(id);
        }

        self.keyframes.clear();
        self.scheduler.clear();
        self.positions.clear();
        self.metadata = None;
        self.orbit_cache.clear();
        self.refresh.clear();
        self.orbit_status.clear();
        self.depth_scales.clear();
        self.curves.clear();
        self.staleness.clear();
        self.global_staleness = StalenessLevel::Fresh;
        info!("Local data cleared");
    }

    /// The backend reloaded its element sets: clear everything and reconnect.
    pub fn on_tles_refreshed(&mut self) -> Vec<EngineCommand> {
        self.reset();
        self.manual_reconnect()
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut S {
        &mut self.scene
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn status_text(&self) -> &str {
        self.connection.status_text()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.connection.attempts()
    }

    pub fn clock_offset(&self) -> f64 {
        self.clock.offset()
    }

    pub fn backend_now(&self, host_now: f64) -> f64 {
        self.clock.backend_now(host_now)
    }

    pub fn keyframe_count(&self) -> usize {
        self.keyframes.len()
    }

    pub fn object_count(&self) -> usize {
        self.scheduler.object_count()
    }

    pub fn metadata(&self) -> Option<&DatasetMetadata> {
        self.metadata.as_ref()
    }

    pub fn position(&self, id: ObjectId) -> Option<Vec3> {
        self.positions.position(id)
    }

    pub fn selected(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.selected.iter().copied()
    }

    pub fn tracked(&self) -> Option<ObjectId> {
        self.tracked
    }

    pub fn orbits_enabled(&self) -> bool {
        self.orbits_enabled
    }

    pub fn orbit_status(&self, id: ObjectId) -> Option<&OrbitStatus> {
        self.orbit_status.get(&id)
    }

    pub fn orbit_render(&self, id: ObjectId) -> Option<&OrbitRenderState> {
        self.orbits.get(&id)
    }

    pub fn is_curved(&self, id: ObjectId) -> bool {
        self.curves.contains_key(&id)
    }

    pub fn uncertainty_render(&self, id: ObjectId) -> Option<&UncertaintyRender> {
        self.uncertainty.get(&id)
    }

    /// History trail points, oldest first.
    pub fn trail_points(&self, id: ObjectId) -> Option<Vec<Vec3>> {
        self.trails.get(&id).map(|render| render.trail.points())
    }

    pub fn trail_seconds(&self) -> f64 {
        self.trail_seconds
    }

    pub fn history_minutes(&self) -> f64 {
        self.history_minutes
    }

    pub fn cached_orbits(&self) -> usize {
        self.orbit_cache.len()
    }

    pub fn staleness_level(&self, id: ObjectId, host_now: f64) -> StalenessLevel {
        self.staleness.level(Some(id), self.clock.backend_now(host_now))
    }

    /// Badge for a selected object; empty when fresh or badges are off.
    pub fn badge_text(&self, id: ObjectId, host_now: f64) -> &'static str {
        if !self.staleness.config().show_badge {
            return "";
        }
        self.staleness_level(id, host_now).badge_text()
    }

    /// Global indicator as of the last staleness refresh.
    pub fn global_staleness(&self) -> StalenessLevel {
        self.global_staleness
    }
}

/// Points in the trail-limited orbit currently drawn for `id`.
fn drawn_points(orbits: &HashMap<ObjectId, OrbitRenderState>, id: ObjectId) -> usize {
    orbits
        .get(&id)
        .map(|render| {
            let segments = render.arrays.tier(render.tier);
            // Adjacent segments share one point
            segments.iter().map(Vec::len).sum::<usize>() + 1 - segments.len().max(1)
        })
        .unwrap_or(0)
}

/// Creates, updates or removes the history trail polyline.
fn draw_trail<S: RenderBackend>(scene: &mut S, id: ObjectId, render: &mut TrailRender, config: &EngineConfig) {
    let points = render.trail.points();
    if points.len() < 2 {
        if let Some(handle) = render.handle.take() {
            scene.remove_polyline(handle);
        }
        return;
    }

    match render.handle {
        Some(handle) => scene.update_positions(handle, &points),
        None => {
            let style = &config.visual.history_trail;
            render.handle = Some(scene.add_polyline(PolylineSpec {
                key: format!("history-trail-{}", id),
                positions: points,
                width: style.width,
                material: Material::glowing(Rgba::CYAN.with_alpha(style.alpha), HISTORY_TRAIL_GLOW),
                visible: true,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::SceneRecorder;
    use approx::assert_relative_eq;

    /// 2024-05-01T00:00:00Z
    const T0: f64 = 1_714_521_600.0;

    fn engine() -> TrackingEngine<SceneRecorder> {
        TrackingEngine::new(EngineConfig::default(), SceneRecorder::new()).unwrap()
    }

    fn connected(engine: &mut TrackingEngine<SceneRecorder>) -> ConnectionTicket {
        let EngineCommand::OpenStream(ticket) = engine.start() else {
            panic!("expected open");
        };
        engine.on_stream_open(ticket);
        ticket
    }

    fn batch_line(secs: u32, sats: &[(u32, [f64; 3])]) -> String {
        let sat: Vec<String> = sats
            .iter()
            .map(|(id, p)| format!(r#"{{"id":{},"p":[{},{},{}]}}"#, id, p[0], p[1], p[2]))
            .collect();
        format!(
            r#"data: {{"type":"keyframe_batch","t":"2024-05-01T00:{:02}:{:02}Z","sat":[{}]}}"#,
            secs / 60,
            secs % 60,
            sat.join(",")
        )
    }

    /// Circular orbit of `n` points at `radius` (any unit), starting on +x.
    fn orbit_body(n: usize, radius: f64) -> String {
        let positions: Vec<String> = (0..n)
            .map(|i| {
                let a = i as f64 * 0.005;
                format!(r#"{{"p":[{},{},0.0]}}"#, radius * a.cos(), radius * a.sin())
            })
            .collect();
        format!(r#"{{"count":{},"positions":[{}]}}"#, n, positions.join(","))
    }

    fn fetch_request(commands: &[EngineCommand]) -> OrbitRequest {
        match commands {
            [EngineCommand::FetchOrbit(request)] => *request,
            other => panic!("expected one fetch, got {:?}", other),
        }
    }

    #[test]
    fn test_stale_tle_kilometer_orbit_end_to_end() {
        let mut engine = engine();
        let ticket = connected(&mut engine);

        engine.on_stream_line(
            ticket,
            r#"data: {"type":"metadata","dataset_epoch":"2024-05-01T00:00:00Z","tle_age_seconds":90000}"#,
            T0,
        );
        engine.on_stream_line(ticket, &batch_line(0, &[(42, [7_000_000.0, 0.0, 0.0])]), T0);
        assert_eq!(engine.position(ObjectId(42)), Some(Vec3::new(7_000_000.0, 0.0, 0.0)));

        let request = fetch_request(&engine.select(ObjectId(42), T0));
        assert_eq!(engine.orbit_status(ObjectId(42)), Some(&OrbitStatus::Loading));

        engine.apply_orbit_response(request, Ok(orbit_body(200, 7000.0)), T0 + 0.5);

        assert_eq!(engine.orbit_status(ObjectId(42)), Some(&OrbitStatus::Loaded { points: 200 }));
        let render = engine.orbit_render(ObjectId(42)).unwrap();
        assert_relative_eq!(render.full_points[0].x, 7_000_000.0, epsilon = 1e-6);
        assert_eq!(render.tier, LodTier::Mid);

        assert_eq!(engine.staleness_level(ObjectId(42), T0), StalenessLevel::Warn);
        assert_eq!(engine.badge_text(ObjectId(42), T0), "TLE STALE");

        let scene = engine.scene();
        assert_eq!(scene.count_prefix("orbit-seg-42-"), 12);
        assert_eq!(scene.count_prefix("uncertainty-42-"), 4);

        let head = scene.get(render.segments[0]).unwrap();
        let staleness = &engine.config().visual.staleness;
        assert_relative_eq!(head.material.color.a, 0.9 * staleness.warn_alpha, epsilon = 1e-12);
        assert_eq!(head.material.dash_length, Some(staleness.warn_dash_length));
    }

    #[test]
    fn test_clock_offset_from_accepted_keyframes_only() {
        let mut engine = engine();
        let ticket = connected(&mut engine);

        engine.on_stream_line(ticket, &batch_line(10, &[(1, [7e6, 0.0, 0.0])]), T0);
        assert_relative_eq!(engine.clock_offset(), 10.0);

        // Older than the newest keyframe: rejected, offset untouched
        engine.on_stream_line(ticket, &batch_line(5, &[(1, [7e6, 0.0, 0.0])]), T0 + 100.0);
        assert_relative_eq!(engine.clock_offset(), 10.0);
        assert_eq!(engine.stats().keyframes_rejected, 1);
        assert_eq!(engine.keyframe_count(), 1);
    }

    #[test]
    fn test_malformed_lines_dropped_and_stale_tickets_ignored() {
        let mut engine = engine();
        let old = connected(&mut engine);

        engine.on_stream_line(old, "data: {not json", T0);
        engine.on_stream_line(old, r#"data: {"type":"mystery"}"#, T0);
        engine.on_stream_line(old, ":keepalive", T0);
        assert_eq!(engine.stats().messages_dropped, 2);
        assert_eq!(engine.connection_state(), ConnectionState::Connected);

        let commands = engine.manual_reconnect();
        let [EngineCommand::CloseStream(closed), EngineCommand::OpenStream(fresh)] = commands.as_slice() else {
            panic!("expected close then open, got {:?}", commands);
        };
        assert_eq!(*closed, old);
        let fresh = *fresh;
        engine.on_stream_line(old, &batch_line(0, &[(1, [7e6, 0.0, 0.0])]), T0);
        assert_eq!(engine.keyframe_count(), 0);
        assert!(engine.on_stream_error(old, T0, "late").is_none());

        engine.on_stream_open(fresh);
        engine.on_stream_line(fresh, &batch_line(0, &[(1, [7e6, 0.0, 0.0])]), T0);
        assert_eq!(engine.keyframe_count(), 1);
    }

    #[test]
    fn test_reconnect_backoff_through_timers() {
        let mut engine = engine();
        let ticket = connected(&mut engine);

        assert_eq!(engine.on_stream_error(ticket, 0.0, "reset"), Some(1.0));
        assert_eq!(engine.status_text(), "Reconnecting in 1s...");
        assert!(engine.poll_timers(0.5).is_empty());

        let commands = engine.poll_timers(1.0);
        let [EngineCommand::OpenStream(second)] = commands.as_slice() else {
            panic!("expected reconnect, got {:?}", commands);
        };
        assert_eq!(engine.on_stream_closed(*second, 1.0), Some(2.0));
        assert_eq!(engine.reconnect_attempts(), 2);

        // The failed transport is already gone: a manual reconnect only opens
        let commands = engine.manual_reconnect();
        assert!(matches!(commands.as_slice(), [EngineCommand::OpenStream(_)]));
    }

    #[test]
    fn test_disconnect_closes_live_stream_once() {
        let mut engine = engine();
        let ticket = connected(&mut engine);
        assert_eq!(engine.disconnect(), Some(EngineCommand::CloseStream(ticket)));
        assert_eq!(engine.disconnect(), None);
        assert_eq!(engine.connection_state(), ConnectionState::Disconnected);
        assert!(engine.poll_timers(100.0).is_empty());
    }

    #[test]
    fn test_interpolated_positions_follow_backend_clock() {
        let mut engine = engine();
        let ticket = connected(&mut engine);
        let camera = Camera::looking_at_earth(Vec3::new(3e7, 0.0, 0.0));

        engine.on_stream_line(ticket, &batch_line(0, &[(1, [7e6, 0.0, 0.0])]), T0);
        engine.on_stream_line(ticket, &batch_line(5, &[(1, [7e6, 1e5, 0.0])]), T0 + 5.0);

        // Offset stays 0; halfway through the bracket
        let snapshot = engine.frame(T0 + 2.5, &camera);
        assert_eq!(snapshot.batch.updated, 1);
        assert_relative_eq!(engine.position(ObjectId(1)).unwrap().y, 5e4, epsilon = 1e-6);
    }

    #[test]
    fn test_superseded_and_late_responses() {
        let mut engine = engine();
        let ticket = connected(&mut engine);
        engine.on_stream_line(ticket, &batch_line(0, &[(7, [7e6, 0.0, 0.0])]), T0);

        let first = fetch_request(&engine.select(ObjectId(7), T0));
        engine.deselect(ObjectId(7));
        let second = fetch_request(&engine.select(ObjectId(7), T0));

        engine.apply_orbit_response(first, Ok(orbit_body(100, 7e6)), T0);
        assert!(engine.orbit_render(ObjectId(7)).is_none());
        assert_eq!(engine.stats().stale_events, 1);

        // Current generation but deselected: cached, not drawn
        engine.deselect(ObjectId(7));
        engine.apply_orbit_response(second, Ok(orbit_body(100, 7e6)), T0);
        assert!(engine.orbit_render(ObjectId(7)).is_none());
        assert_eq!(engine.cached_orbits(), 1);

        // Re-selecting within the TTL draws from cache without a fetch
        assert!(engine.select(ObjectId(7), T0 + 10.0).is_empty());
        assert!(engine.orbit_render(ObjectId(7)).is_some());
    }

    #[test]
    fn test_fetch_failure_sets_error_status() {
        let mut engine = engine();
        connected(&mut engine);
        let request = fetch_request(&engine.select(ObjectId(3), T0));

        engine.apply_orbit_response(request, Err(EnvError::http(404, "Endpoint not found (backend needs /api/v1/propagate)")), T0);
        match engine.orbit_status(ObjectId(3)) {
            Some(OrbitStatus::Error(message)) => assert!(message.contains("Endpoint not found")),
            other => panic!("unexpected status {:?}", other),
        }
        assert_eq!(engine.stats().orbit_fetch_errors, 1);
    }

    #[test]
    fn test_unusable_orbit_removes_previous_render() {
        let mut engine = engine();
        let ticket = connected(&mut engine);
        engine.on_stream_line(ticket, &batch_line(0, &[(5, [7e6, 0.0, 0.0])]), T0);

        let request = fetch_request(&engine.select(ObjectId(5), T0));
        engine.apply_orbit_response(request, Ok(orbit_body(100, 7e6)), T0);
        assert!(engine.scene().count_prefix("orbit-seg-5-") > 0);

        let refresh = fetch_request(&engine.poll_timers(T0 + 60.0));
        engine.apply_orbit_response(refresh, Ok(r#"{"positions":[{"p":[7e6,0,0]},{"p":[0,0,0]}]}"#.into()), T0 + 60.0);
        assert_eq!(engine.scene().count_prefix("orbit-seg-5-"), 0);
        assert_eq!(engine.scene().count_prefix("uncertainty-5-"), 0);
        assert!(matches!(engine.orbit_status(ObjectId(5)), Some(OrbitStatus::Error(_))));
    }

    #[test]
    fn test_refresh_timer_cancels_after_deselect() {
        let mut engine = engine();
        let ticket = connected(&mut engine);
        engine.on_stream_line(ticket, &batch_line(0, &[(9, [7e6, 0.0, 0.0])]), T0);

        let request = fetch_request(&engine.select(ObjectId(9), T0));
        engine.apply_orbit_response(request, Ok(orbit_body(100, 7e6)), T0);
        assert_eq!(engine.poll_timers(T0 + 60.0).len(), 1);

        engine.deselect(ObjectId(9));
        assert!(engine.poll_timers(T0 + 120.0).is_empty());
        assert!(engine.poll_timers(T0 + 180.0).is_empty());
    }

    #[test]
    fn test_lod_switch_and_visibility_gating() {
        let mut engine = engine();
        let ticket = connected(&mut engine);
        let id = ObjectId(11);
        engine.on_stream_line(ticket, &batch_line(0, &[(11, [7e6, 0.0, 0.0]), (12, [-7e6, 0.0, 0.0])]), T0);

        let request = fetch_request(&engine.select(id, T0));
        engine.apply_orbit_response(request, Ok(orbit_body(200, 7e6)), T0);
        assert_eq!(engine.orbit_render(id).unwrap().tier, LodTier::Mid);

        // 15th frame runs the coarse pass; camera 30,000 km away
        let far = Camera::looking_at_earth(Vec3::new(3.7e7, 0.0, 0.0));
        for i in 0..15 {
            engine.frame(T0 + i as f64 / 60.0, &far);
        }
        let render = engine.orbit_render(id).unwrap();
        assert_eq!(render.tier, LodTier::Far);
        // Tracked objects stay visible beyond the cutoff
        assert!(render.visible);
        assert_eq!(engine.scene().count_prefix("orbit-seg-11-"), 6);

        // Selecting another object moves tracking away; 11 is now gated
        engine.select(ObjectId(12), T0);
        for i in 15..30 {
            engine.frame(T0 + i as f64 / 60.0, &far);
        }
        assert!(!engine.orbit_render(id).unwrap().visible);
        assert!(engine.stats().lod_switches >= 1);
    }

    #[test]
    fn test_close_camera_curves_head() {
        let mut engine = engine();
        let ticket = connected(&mut engine);
        let id = ObjectId(21);
        engine.on_stream_line(ticket, &batch_line(0, &[(21, [7e6, 0.0, 0.0])]), T0);
        let request = fetch_request(&engine.select(id, T0));
        engine.apply_orbit_response(request, Ok(orbit_body(200, 7e6)), T0);

        // Frame 15 switches to the near tier, frame 30 starts curving
        let close = Camera::looking_at_earth(Vec3::new(7.5e6, 0.0, 0.0));
        for i in 0..15 {
            engine.frame(T0 + i as f64 / 60.0, &close);
        }
        assert_eq!(engine.orbit_render(id).unwrap().tier, LodTier::Near);
        assert!(!engine.is_curved(id));

        for i in 15..30 {
            engine.frame(T0 + i as f64 / 60.0, &close);
        }
        assert!(engine.is_curved(id));
        let render = engine.orbit_render(id).unwrap();
        assert!(render.head_points.len() <= engine.config().visual.curves.max_resampled_points);
        assert!(render.head_points.len() > render.arrays.near[0].len());
        assert_eq!(render.head_points[0], Vec3::new(7e6, 0.0, 0.0));
    }

    #[test]
    fn test_trail_seconds_rebuilds_from_full_orbit() {
        let mut engine = engine();
        let ticket = connected(&mut engine);
        let id = ObjectId(4);
        engine.on_stream_line(ticket, &batch_line(0, &[(4, [7e6, 0.0, 0.0])]), T0);
        let request = fetch_request(&engine.select(id, T0));
        engine.apply_orbit_response(request, Ok(orbit_body(1080, 7e6)), T0);

        engine.set_trail_seconds(300.0);
        let render = engine.orbit_render(id).unwrap();
        assert_eq!(render.full_points.len(), 1080);
        let shown: usize = render.arrays.mid.iter().map(Vec::len).sum::<usize>() + 1 - render.arrays.mid.len();
        assert_eq!(shown, 60);

        // Clamped to the configured maximum
        engine.set_trail_seconds(1e9);
        assert_relative_eq!(engine.trail_seconds(), 10_800.0);
    }

    #[test]
    fn test_history_trail_prefill_and_append() {
        let mut engine = engine();
        let ticket = connected(&mut engine);
        let id = ObjectId(8);
        for i in 0..3u32 {
            let x = 7e6 + f64::from(i) * 1000.0;
            engine.on_stream_line(ticket, &batch_line(i * 5, &[(8, [x, 0.0, 0.0])]), T0 + f64::from(i * 5));
        }

        engine.select(id, T0 + 10.0);
        assert_eq!(engine.trail_points(id).unwrap().len(), 3);
        assert_eq!(engine.scene().count_prefix("history-trail-8"), 1);

        engine.on_stream_line(ticket, &batch_line(15, &[(8, [7.003e6, 0.0, 0.0])]), T0 + 15.0);
        let points = engine.trail_points(id).unwrap();
        assert_eq!(points.len(), 4);
        assert_relative_eq!(points[3].x, 7.003e6);

        // One minute at a 5 s step keeps at most 12 points; all 4 fit
        engine.set_history_minutes(1.0, T0 + 15.0);
        assert_eq!(engine.trail_points(id).unwrap().len(), 4);

        engine.deselect(id);
        assert!(engine.trail_points(id).is_none());
        assert_eq!(engine.scene().count_prefix("history-trail-"), 0);
    }

    #[test]
    fn test_uncertainty_mode_switch() {
        let mut engine = engine();
        let ticket = connected(&mut engine);
        let id = ObjectId(6);
        engine.on_stream_line(ticket, &batch_line(0, &[(6, [7e6, 0.0, 0.0])]), T0);
        let request = fetch_request(&engine.select(id, T0));
        engine.apply_orbit_response(request, Ok(orbit_body(200, 7e6)), T0);
        assert_eq!(engine.uncertainty_render(id).unwrap().mode, UncertaintyMode::Simple);

        engine.set_uncertainty(true, UncertaintyMode::Corridor, T0);
        assert_eq!(engine.uncertainty_render(id).unwrap().mode, UncertaintyMode::Corridor);
        assert_eq!(engine.scene().count_prefix("uncertainty-6-left"), 1);
        assert_eq!(engine.scene().count_prefix("uncertainty-6-right"), 1);

        engine.set_uncertainty(false, UncertaintyMode::Corridor, T0);
        assert!(engine.uncertainty_render(id).is_none());
        assert_eq!(engine.scene().count_prefix("uncertainty-6-"), 0);
    }

    #[test]
    fn test_orbits_toggle_and_reset() {
        let mut engine = engine();
        let ticket = connected(&mut engine);
        engine.on_stream_line(ticket, &batch_line(0, &[(1, [7e6, 0.0, 0.0])]), T0);
        let request = fetch_request(&engine.select(ObjectId(1), T0));
        engine.apply_orbit_response(request, Ok(orbit_body(100, 7e6)), T0);

        assert!(engine.set_orbits_enabled(false, T0).is_empty());
        assert_eq!(engine.scene().count_prefix("orbit-seg-"), 0);
        assert!(engine.poll_timers(T0 + 60.0).is_empty());

        // Still cached, so re-enabling draws without a fetch
        assert!(engine.set_orbits_enabled(true, T0 + 1.0).is_empty());
        assert!(engine.scene().count_prefix("orbit-seg-1-") > 0);

        let commands = engine.on_tles_refreshed();
        let [EngineCommand::CloseStream(closed), EngineCommand::OpenStream(reopened)] = commands.as_slice() else {
            panic!("expected close then reopen, got {:?}", commands);
        };
        assert_eq!(*closed, ticket);
        assert_ne!(reopened, closed);
        assert!(engine.scene().is_empty());
        assert_eq!(engine.keyframe_count(), 0);
        assert_eq!(engine.cached_orbits(), 0);
        assert_eq!(engine.selected().count(), 0);
        assert_eq!(engine.reconnect_attempts(), 0);
    }

    #[test]
    fn test_global_staleness_and_markers() {
        let mut engine = engine();
        let ticket = connected(&mut engine);
        let camera = Camera::looking_at_earth(Vec3::new(3e7, 0.0, 0.0));
        engine.on_stream_line(
            ticket,
            r#"{"type":"metadata","dataset_epoch":"2024-05-01T00:00:00Z","tle_age_seconds":300000}"#,
            T0,
        );
        engine.on_stream_line(ticket, &batch_line(0, &[(2, [7e6, 0.0, 0.0])]), T0);
        engine.select(ObjectId(2), T0);

        let mut last = None;
        for i in 0..60 {
            last = Some(engine.frame(T0 + i as f64 / 60.0, &camera));
        }
        let snapshot = last.unwrap();
        assert_eq!(snapshot.global_staleness, StalenessLevel::Degraded);
        assert_eq!(snapshot.markers.len(), 1);
        assert_eq!(snapshot.markers[0].follows, ObjectId(2));
        assert_eq!(snapshot.connection, ConnectionState::Connected);
    }
}
