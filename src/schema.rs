//! Record types for each artifact tier.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PipelineError;

/// Field names of a raw state vector, in the order the API sends them.
pub const STATE_VECTOR_FIELDS: [&str; 17] = [
    "icao24",
    "callsign",
    "origin_country",
    "time_position",
    "last_contact",
    "longitude",
    "latitude",
    "baro_altitude",
    "on_ground",
    "velocity",
    "true_track",
    "vertical_rate",
    "sensors",
    "geo_altitude",
    "squawk",
    "spi",
    "position_source",
];

pub const SILVER_COLUMNS: [&str; 4] = ["icao24", "origin_country", "velocity", "on_ground"];

pub const GOLD_COLUMNS: [&str; 4] = ["origin_country", "total_flights", "avg_velocity", "on_ground"];

/// Version 1 of the state vector layout: a positional 17-element array.
///
/// Decoding is positional, so the field order here is the wire contract.
/// Arrays of any other length are rejected instead of being mapped onto
/// the wrong fields.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StateVectorV1 {
    pub icao24: String,
    pub callsign: Option<String>,
    pub origin_country: String,
    pub time_position: Option<i64>,
    pub last_contact: i64,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub baro_altitude: Option<f64>,
    pub on_ground: bool,
    pub velocity: Option<f64>,
    pub true_track: Option<f64>,
    pub vertical_rate: Option<f64>,
    pub sensors: Option<Vec<i64>>,
    pub geo_altitude: Option<f64>,
    pub squawk: Option<String>,
    pub spi: bool,
    pub position_source: i64,
}

impl StateVectorV1 {
    pub const ARITY: usize = STATE_VECTOR_FIELDS.len();

    /// Decodes the state at position `index` of the `states` array.
    pub fn from_value(index: usize, value: Value) -> Result<Self, PipelineError> {
        let arity = match &value {
            Value::Array(items) => items.len(),
            other => {
                return Err(PipelineError::SchemaMismatch {
                    index,
                    expected: format!("array of {} fields", Self::ARITY),
                    actual: json_kind(other).to_string(),
                });
            }
        };

        if arity != Self::ARITY {
            return Err(PipelineError::SchemaMismatch {
                index,
                expected: format!("{} fields", Self::ARITY),
                actual: format!("{arity} fields"),
            });
        }

        serde_json::from_value(value).map_err(|e| PipelineError::SchemaMismatch {
            index,
            expected: "StateVectorV1 field types".to_string(),
            actual: e.to_string(),
        })
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One row of the silver tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinedRecord {
    pub icao24: String,
    pub origin_country: String,
    pub velocity: Option<f64>,
    pub on_ground: bool,
}

impl From<StateVectorV1> for RefinedRecord {
    fn from(state: StateVectorV1) -> Self {
        Self {
            icao24: state.icao24,
            origin_country: state.origin_country,
            velocity: state.velocity,
            on_ground: state.on_ground,
        }
    }
}

/// Per-country KPIs of the gold tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRecord {
    pub origin_country: String,
    pub total_flights: u64,
    /// Mean over the non-null velocities; null when the group has none.
    pub avg_velocity: Option<f64>,
    /// Number of aircraft in the group reported on the ground.
    pub on_ground: u64,
}
