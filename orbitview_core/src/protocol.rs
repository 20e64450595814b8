//! Wire protocol: keyframe stream messages and propagate responses.
//!
//! Stream lines are server-sent event text. Only `data:` lines carry a
//! payload; comments (`:keepalive`) and other SSE fields are ignored. A
//! payload is a JSON object tagged by `"type"`:
//!
//! ```text
//! {"type":"metadata","dataset_epoch":"2024-05-01T00:00:00Z","tle_age_seconds":3600}
//! {"type":"keyframe_batch","t":"2024-05-01T00:00:05Z","sat":[{"id":25544,"p":[x,y,z]}, ...]}
//! {"type":"keepalive"}
//! ```
//!
//! Individual malformed satellites inside a batch are dropped; the rest of
//! the batch survives.

use crate::error::ProtocolError;
use crate::geometry::{vec3_from_slice, Vec3};
use chrono::{DateTime, NaiveDateTime};
use orbitview_env::ObjectId;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Decoded stream message.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Metadata(DatasetMetadata),
    KeyframeBatch(KeyframeBatch),
    Keepalive,
}

/// Dataset-level information sent once per connection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DatasetMetadata {
    /// Unix seconds
    pub dataset_epoch: f64,

    /// Age of the backend's element sets in seconds
    pub tle_age_seconds: f64,
}

/// One backend sample of many objects at a single instant.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyframeBatch {
    /// Backend time, Unix seconds
    pub timestamp: f64,

    /// Earth-fixed positions in meters
    pub satellites: Vec<(ObjectId, Vec3)>,

    /// Entries skipped for bad id or position shape
    pub dropped: usize,
}

/// One point of a propagated trajectory, as received.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawOrbitPoint {
    /// Position in whatever units/frame the backend used
    pub position: Vec3,

    /// Sample time (Unix seconds) when the backend supplied one
    pub timestamp: Option<f64>,
}

/// Decoded `GET /propagate/{id}` body.
#[derive(Debug, Clone, PartialEq)]
pub struct PropagateResponse {
    pub points: Vec<RawOrbitPoint>,

    /// Element set epoch of this object, when the backend reports it
    pub tle_epoch: Option<f64>,
}

#[derive(Deserialize)]
struct RawMetadata {
    dataset_epoch: String,
    tle_age_seconds: f64,
}

#[derive(Deserialize)]
struct RawBatch {
    t: String,
    #[serde(default)]
    sat: Vec<Value>,
}

#[derive(Deserialize)]
struct RawSatellite {
    id: u32,
    p: Vec<f64>,
}

#[derive(Deserialize)]
struct RawPropagate {
    #[serde(default)]
    count: Option<usize>,
    positions: Vec<Value>,
    #[serde(default)]
    tle_epoch: Option<String>,
}

#[derive(Deserialize)]
struct RawPoint {
    p: Vec<f64>,
    #[serde(default)]
    t: Option<String>,
}

/// Parses an ISO-8601 timestamp to Unix seconds.
///
/// Timestamps without an offset are taken as UTC.
pub fn parse_timestamp(text: &str) -> Result<f64, ProtocolError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) * 1e-9);
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| {
            let dt = naive.and_utc();
            dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) * 1e-9
        })
        .map_err(|_| ProtocolError::InvalidTimestamp(text.to_string()))
}

/// Decodes one stream line.
///
/// Returns `Ok(None)` for lines that carry no message (blank lines, SSE
/// comments and non-`data` fields).
pub fn parse_stream_line(line: &str) -> Result<Option<StreamMessage>, ProtocolError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    let payload = match line.strip_prefix("data:") {
        Some(rest) => rest.trim_start(),
        None if line.starts_with('{') => line,
        // event:, id:, retry:
        None => return Ok(None),
    };

    let value: Value =
        serde_json::from_str(payload).map_err(|e| ProtocolError::MalformedJson(e.to_string()))?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?;

    match kind {
        "metadata" => {
            let raw: RawMetadata = serde_json::from_value(value.clone()).map_err(|e| {
                ProtocolError::InvalidMessage {
                    kind: "metadata",
                    reason: e.to_string(),
                }
            })?;
            Ok(Some(StreamMessage::Metadata(DatasetMetadata {
                dataset_epoch: parse_timestamp(&raw.dataset_epoch)?,
                tle_age_seconds: raw.tle_age_seconds,
            })))
        }
        "keyframe_batch" => {
            let raw: RawBatch = serde_json::from_value(value.clone()).map_err(|e| {
                ProtocolError::InvalidMessage {
                    kind: "keyframe_batch",
                    reason: e.to_string(),
                }
            })?;
            Ok(Some(StreamMessage::KeyframeBatch(decode_batch(raw)?)))
        }
        "keepalive" => Ok(Some(StreamMessage::Keepalive)),
        other => Err(ProtocolError::UnknownType(other.to_string())),
    }
}

fn decode_batch(raw: RawBatch) -> Result<KeyframeBatch, ProtocolError> {
    let timestamp = parse_timestamp(&raw.t)?;
    let mut satellites = Vec::with_capacity(raw.sat.len());
    let mut dropped = 0;

    for entry in raw.sat {
        let decoded = serde_json::from_value::<RawSatellite>(entry)
            .ok()
            .and_then(|s| vec3_from_slice(&s.p).map(|p| (ObjectId(s.id), p)));
        match decoded {
            Some(sat) => satellites.push(sat),
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        debug!("Dropped {} malformed satellites from batch at {}", dropped, raw.t);
    }

    Ok(KeyframeBatch {
        timestamp,
        satellites,
        dropped,
    })
}

/// Decodes a propagate response body.
///
/// A malformed first point rejects the whole response (the units and frame
/// heuristics key off it); later malformed points are skipped.
pub fn parse_propagate_response(body: &str) -> Result<PropagateResponse, ProtocolError> {
    let raw: RawPropagate =
        serde_json::from_str(body).map_err(|e| ProtocolError::MalformedJson(e.to_string()))?;

    let mut points = Vec::with_capacity(raw.positions.len());
    for (i, entry) in raw.positions.into_iter().enumerate() {
        let decoded = serde_json::from_value::<RawPoint>(entry).ok().and_then(|pt| {
            let position = vec3_from_slice(&pt.p)?;
            let timestamp = pt.t.as_deref().and_then(|t| parse_timestamp(t).ok());
            Some(RawOrbitPoint { position, timestamp })
        });
        match decoded {
            Some(point) => points.push(point),
            None if i == 0 => return Err(ProtocolError::InvalidPositionFormat),
            None => {}
        }
    }

    if let Some(count) = raw.count {
        if count != points.len() {
            debug!("Propagate response claimed {} positions, kept {}", count, points.len());
        }
    }

    let tle_epoch = raw.tle_epoch.as_deref().and_then(|t| parse_timestamp(t).ok());
    Ok(PropagateResponse { points, tle_epoch })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse_timestamp_variants() {
        assert_relative_eq!(parse_timestamp("2000-01-01T12:00:00Z").unwrap(), 946_728_000.0);
        assert_relative_eq!(parse_timestamp("2000-01-01T12:00:00.250Z").unwrap(), 946_728_000.25);
        assert_relative_eq!(parse_timestamp("2000-01-01T13:00:00+01:00").unwrap(), 946_728_000.0);
        assert_relative_eq!(parse_timestamp("2000-01-01T12:00:00").unwrap(), 946_728_000.0);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_keyframe_batch_line() {
        let line = r#"data: {"type":"keyframe_batch","t":"2000-01-01T12:00:05Z","sat":[{"id":42,"p":[7000000.0,0.0,0.0]},{"id":7,"p":[0.0,7000000.0,0.0]}]}"#;
        let msg = parse_stream_line(line).unwrap().unwrap();
        match msg {
            StreamMessage::KeyframeBatch(batch) => {
                assert_relative_eq!(batch.timestamp, 946_728_005.0);
                assert_eq!(batch.satellites.len(), 2);
                assert_eq!(batch.satellites[0].0, ObjectId(42));
                assert_eq!(batch.dropped, 0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_malformed_satellites_dropped_individually() {
        let line = r#"data: {"type":"keyframe_batch","t":"2000-01-01T12:00:05Z","sat":[{"id":1,"p":[1.0,2.0]},{"id":"x","p":[1,2,3]},{"id":3,"p":[1.0,2.0,3.0]}]}"#;
        let Some(StreamMessage::KeyframeBatch(batch)) = parse_stream_line(line).unwrap() else {
            panic!("expected batch");
        };
        assert_eq!(batch.satellites, vec![(ObjectId(3), Vec3::new(1.0, 2.0, 3.0))]);
        assert_eq!(batch.dropped, 2);
    }

    #[test]
    fn test_metadata_and_keepalive() {
        let meta = parse_stream_line(
            r#"data: {"type":"metadata","dataset_epoch":"2000-01-01T12:00:00Z","tle_age_seconds":90000}"#,
        )
        .unwrap();
        assert_eq!(
            meta,
            Some(StreamMessage::Metadata(DatasetMetadata {
                dataset_epoch: 946_728_000.0,
                tle_age_seconds: 90_000.0,
            }))
        );

        assert_eq!(
            parse_stream_line(r#"data: {"type":"keepalive"}"#).unwrap(),
            Some(StreamMessage::Keepalive)
        );
    }

    #[test]
    fn test_non_payload_lines_ignored() {
        assert_eq!(parse_stream_line("").unwrap(), None);
        assert_eq!(parse_stream_line(": ping").unwrap(), None);
        assert_eq!(parse_stream_line("event: message").unwrap(), None);
        assert_eq!(parse_stream_line("id: 17").unwrap(), None);
    }

    #[test]
    fn test_bad_payloads_are_errors() {
        assert!(matches!(
            parse_stream_line("data: {not json"),
            Err(ProtocolError::MalformedJson(_))
        ));
        assert!(matches!(
            parse_stream_line(r#"data: {"t":"x"}"#),
            Err(ProtocolError::MissingType)
        ));
        assert!(matches!(
            parse_stream_line(r#"data: {"type":"telemetry"}"#),
            Err(ProtocolError::UnknownType(t)) if t == "telemetry"
        ));
        assert!(matches!(
            parse_stream_line(r#"data: {"type":"keyframe_batch","t":"nope","sat":[]}"#),
            Err(ProtocolError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_propagate_response() {
        let body = r#"{"count":3,"positions":[
            {"p":[6771.0,0.0,0.0],"t":"2000-01-01T12:00:00Z"},
            {"p":[6770.0,40.0]},
            {"p":[6769.0,80.0,1.0]}
        ],"tle_epoch":"1999-12-31T12:00:00Z"}"#;
        let resp = parse_propagate_response(body).unwrap();
        assert_eq!(resp.points.len(), 2);
        assert_eq!(resp.points[0].timestamp, Some(946_728_000.0));
        assert_eq!(resp.points[1].timestamp, None);
        assert_eq!(resp.tle_epoch, Some(946_641_600.0));
    }

    #[test]
    fn test_propagate_bad_first_point_rejected() {
        let body = r#"{"count":2,"positions":[{"p":"here"},{"p":[1.0,2.0,3.0]}]}"#;
        assert!(matches!(
            parse_propagate_response(body),
            Err(ProtocolError::InvalidPositionFormat)
        ));
    }
}
