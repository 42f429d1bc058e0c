//! Input Events
//!
//! Thermostat events as they arrive on the JSON-lines input stream:
//!
//! ```text
//! {"type":"sample","timestamp":"2024-03-01T10:05:00","indoor_temp":70.0,"hvac_state":"HEATING","target_temp":72.0}
//! {"type":"user_input","timestamp":"2024-03-01T11:00:00","action":"set_temperature","parameters":{"temperature":71}}
//! {"type":"weather","timestamp":"2024-03-01T11:00:00","condition":"sunny","temperature":41.0}
//! ```
//!
//! Any event may carry an `anonymous_id`; events without one belong to the
//! local installation.

use serde::{Deserialize, Serialize};

use hvac_analytics::{Sample, UserInput, WeatherReading};

use super::{CollectorError, Result};
use crate::identity::validate_anonymous_id;

/// Event body, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Sample(Sample),
    UserInput(UserInput),
    Weather(WeatherReading),
}

/// One line of input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymous_id: Option<String>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl InputEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            anonymous_id: None,
            payload,
        }
    }

    pub fn for_installation(anonymous_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            anonymous_id: Some(anonymous_id.into()),
            payload,
        }
    }

    /// Parse one JSON line; blank lines yield `None`
    pub fn parse_line(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let event: Self =
            serde_json::from_str(line).map_err(|e| CollectorError::InvalidEvent(e.to_string()))?;
        if let Some(id) = &event.anonymous_id {
            validate_anonymous_id(id)?;
        }
        Ok(Some(event))
    }

    /// Target installation, falling back to `default_id`
    pub fn installation_id<'a>(&'a self, default_id: &'a str) -> &'a str {
        self.anonymous_id.as_deref().unwrap_or(default_id)
    }
}
