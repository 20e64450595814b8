//! TLE staleness classification.
//!
//! Element sets age; predictions from a week-old TLE can be off by tens of
//! kilometers. Staleness is not an error, only a quality cue: orbits of
//! stale objects fade and turn dashed, selected objects get a badge, and a
//! global indicator shows the worst level among the selection.

use crate::config::StalenessConfig;
use orbitview_env::ObjectId;
use serde::Serialize;
use std::collections::HashMap;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Quality level, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum StalenessLevel {
    Fresh,
    Warn,
    Degraded,
}

impl StalenessLevel {
    /// Per-object badge text (empty when fresh).
    pub fn badge_text(self) -> &'static str {
        match self {
            Self::Fresh => "",
            Self::Warn => "TLE STALE",
            Self::Degraded => "TLE DEGRADED",
        }
    }

    /// Global indicator text.
    pub fn indicator_text(self) -> &'static str {
        match self {
            Self::Fresh => "OK",
            Self::Warn => "STALE",
            Self::Degraded => "DEGRADED",
        }
    }
}

/// Styling override applied to an orbit's segments.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StalenessStyle {
    pub alpha_multiplier: f64,
    pub dash_length: Option<f64>,
}

impl Default for StalenessStyle {
    fn default() -> Self {
        Self {
            alpha_multiplier: 1.0,
            dash_length: None,
        }
    }
}

/// Tracks TLE ages and maps them to levels and styles.
#[derive(Debug, Clone)]
pub struct StalenessEvaluator {
    config: StalenessConfig,

    /// Dataset-wide age from the stream metadata
    dataset_age_secs: Option<f64>,

    /// Per-object element set epochs (Unix seconds)
    object_epochs: HashMap<ObjectId, f64>,
}

impl StalenessEvaluator {
    pub fn new(config: StalenessConfig) -> Self {
        Self {
            config,
            dataset_age_secs: None,
            object_epochs: HashMap::new(),
        }
    }

    pub fn set_dataset_age(&mut self, age_secs: f64) {
        self.dataset_age_secs = Some(age_secs);
    }

    pub fn set_object_epoch(&mut self, id: ObjectId, epoch: f64) {
        self.object_epochs.insert(id, epoch);
    }

    pub fn forget_object(&mut self, id: ObjectId) {
        self.object_epochs.remove(&id);
    }

    pub fn clear(&mut self) {
        self.dataset_age_secs = None;
        self.object_epochs.clear();
    }

    /// TLE age in hours: per-object when known, else dataset-wide, else 0.
    pub fn age_hours(&self, id: Option<ObjectId>, now: f64) -> f64 {
        let per_object = id
            .and_then(|id| self.object_epochs.get(&id))
            .map(|epoch| (now - epoch).max(0.0));
        per_object.or(self.dataset_age_secs).unwrap_or(0.0) / SECONDS_PER_HOUR
    }

    /// Age in seconds (for the uncertainty age scale).
    pub fn age_secs(&self, id: Option<ObjectId>, now: f64) -> f64 {
        self.age_hours(id, now) * SECONDS_PER_HOUR
    }

    pub fn level(&self, id: Option<ObjectId>, now: f64) -> StalenessLevel {
        let hours = self.age_hours(id, now);
        if hours >= self.config.degraded_hours {
            StalenessLevel::Degraded
        } else if hours >= self.config.warn_hours {
            StalenessLevel::Warn
        } else {
            StalenessLevel::Fresh
        }
    }

    pub fn style(&self, level: StalenessLevel) -> StalenessStyle {
        match level {
            StalenessLevel::Fresh => StalenessStyle::default(),
            StalenessLevel::Warn => StalenessStyle {
                alpha_multiplier: self.config.warn_alpha,
                dash_length: Some(self.config.warn_dash_length),
            },
            StalenessLevel::Degraded => StalenessStyle {
                alpha_multiplier: self.config.degraded_alpha,
                dash_length: Some(self.config.degraded_dash_length),
            },
        }
    }

    /// Worst level among `selected`, or the dataset level when nothing is selected.
    pub fn global_level(&self, selected: impl IntoIterator<Item = ObjectId>, now: f64) -> StalenessLevel {
        let mut any = false;
        let mut worst = StalenessLevel::Fresh;
        for id in selected {
            any = true;
            worst = worst.max(self.level(Some(id), now));
        }
        if any {
            worst
        } else {
            self.level(None, now)
        }
    }

    pub fn config(&self) -> &StalenessConfig {
        &self.config
    }
}
