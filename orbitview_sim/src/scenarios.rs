//! Fault-injection scenarios for the tracking engine.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioId {
    /// OVS-001: Healthy backend, three selected objects
    Nominal,

    /// OVS-002: Backend clock one hour ahead of the host
    ClockSkew,

    /// OVS-003: Stream cut every 12s, connections refused afterwards
    Flapping,

    /// OVS-004: 20% garbage lines, 5% malformed satellites
    MalformedStream,

    /// OVS-005: Propagate responses in kilometers
    KilometerOrbits,

    /// OVS-006: Propagate responses in the inertial frame
    InertialOrbits,

    /// OVS-007: Old element sets, corridor uncertainty
    StaleTles,

    /// OVS-008: 30% of propagate requests fail, fast refresh
    FlakyPropagator,

    /// OVS-009: Rapid select/deselect with slow propagations
    SelectionChurn,

    /// OVS-010: Camera sweeps between 300 km and 30,000 km
    CameraSweep,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Nominal,
            ScenarioId::ClockSkew,
            ScenarioId::Flapping,
            ScenarioId::MalformedStream,
            ScenarioId::KilometerOrbits,
            ScenarioId::InertialOrbits,
            ScenarioId::StaleTles,
            ScenarioId::FlakyPropagator,
            ScenarioId::SelectionChurn,
            ScenarioId::CameraSweep,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Nominal => "nominal",
            ScenarioId::ClockSkew => "clock_skew",
            ScenarioId::Flapping => "flapping",
            ScenarioId::MalformedStream => "malformed_stream",
            ScenarioId::KilometerOrbits => "kilometer_orbits",
            ScenarioId::InertialOrbits => "inertial_orbits",
            ScenarioId::StaleTles => "stale_tles",
            ScenarioId::FlakyPropagator => "flaky_propagator",
            ScenarioId::SelectionChurn => "selection_churn",
            ScenarioId::CameraSweep => "camera_sweep",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Nominal => "Healthy stream, three tracked orbits, bounded interpolation error",
            ScenarioId::ClockSkew => "Backend clock +1h, animation must follow the backend clock",
            ScenarioId::Flapping => "Stream cut every 12s with refusals, backoff must reset after each open",
            ScenarioId::MalformedStream => "Garbage lines and satellites are dropped without losing the stream",
            ScenarioId::KilometerOrbits => "Propagate responses in km are scaled to meters",
            ScenarioId::InertialOrbits => "Inertial propagate responses are rotated to Earth-fixed",
            ScenarioId::StaleTles => "25h dataset, 4-day element sets: degraded styling and wide corridors",
            ScenarioId::FlakyPropagator => "30% propagate failures, refresh recovers every orbit",
            ScenarioId::SelectionChurn => "Selections change faster than propagations return",
            ScenarioId::CameraSweep => "Zooming in and out switches LOD without thrashing",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nominal" | "ovs-001" => Ok(ScenarioId::Nominal),
            "clock_skew" | "clockskew" | "ovs-002" => Ok(ScenarioId::ClockSkew),
            "flapping" | "ovs-003" => Ok(ScenarioId::Flapping),
            "malformed_stream" | "malformedstream" | "ovs-004" => Ok(ScenarioId::MalformedStream),
            "kilometer_orbits" | "kilometerorbits" | "ovs-005" => Ok(ScenarioId::KilometerOrbits),
            "inertial_orbits" | "inertialorbits" | "ovs-006" => Ok(ScenarioId::InertialOrbits),
            "stale_tles" | "staletles" | "ovs-007" => Ok(ScenarioId::StaleTles),
            "flaky_propagator" | "flakypropagator" | "ovs-008" => Ok(ScenarioId::FlakyPropagator),
            "selection_churn" | "selectionchurn" | "ovs-009" => Ok(ScenarioId::SelectionChurn),
            "camera_sweep" | "camerasweep" | "ovs-010" => Ok(ScenarioId::CameraSweep),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
            assert_eq!(scenario.to_string(), scenario.name());
        }
        assert_eq!("OVS-003".parse::<ScenarioId>(), Ok(ScenarioId::Flapping));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
