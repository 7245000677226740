//! Alarm transition event model
//!
//! The normalized unit of work. Both payload shapes decode into
//! [`AlarmTransitionEvent`]; nothing downstream of the decoder knows which
//! shape a record carried.

use crate::error::{NotifierError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Alarm state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmState {
    Alarm,
    Ok,
    InsufficientData,
}

impl AlarmState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alarm => "ALARM",
            Self::Ok => "OK",
            Self::InsufficientData => "INSUFFICIENT_DATA",
        }
    }
}

impl FromStr for AlarmState {
    type Err = NotifierError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ALARM" => Ok(Self::Alarm),
            "OK" => Ok(Self::Ok),
            "INSUFFICIENT_DATA" => Ok(Self::InsufficientData),
            other => Err(NotifierError::UnknownState(other.to_string())),
        }
    }
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which wire shape an event was decoded from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadShape {
    /// Direct alarm-state payload, one alarm ARN
    Flat,
    /// Event-bus state-change event, one or more resources
    EventBus,
}

/// Ordered, non-empty list of alarm identities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct AlarmIdentities(Vec<String>);

impl AlarmIdentities {
    pub fn new(identities: Vec<String>) -> Result<Self> {
        if identities.is_empty() {
            return Err(NotifierError::decode("alarm identity list is empty"));
        }
        if identities.iter().any(|id| id.trim().is_empty()) {
            return Err(NotifierError::decode("alarm identity is blank"));
        }
        Ok(Self(identities))
    }

    pub fn single(identity: impl Into<String>) -> Result<Self> {
        Self::new(vec![identity.into()])
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// First identity, used as the log key for the whole event
    pub fn primary(&self) -> &str {
        // Non-empty by construction
        self.0.first().map(String::as_str).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn joined(&self, separator: &str) -> String {
        self.0.join(separator)
    }
}

impl TryFrom<Vec<String>> for AlarmIdentities {
    type Error = NotifierError;

    fn try_from(value: Vec<String>) -> Result<Self> {
        Self::new(value)
    }
}

impl From<AlarmIdentities> for Vec<String> {
    fn from(value: AlarmIdentities) -> Self {
        value.0
    }
}

/// One alarm state transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmTransitionEvent {
    pub alarm_name: String,
    pub identities: AlarmIdentities,
    pub new_state: AlarmState,
    pub old_state: Option<AlarmState>,
    pub reason: String,
    pub account_id: String,
    pub region: String,
    pub timestamp: DateTime<Utc>,
    pub description: Option<String>,
    pub shape: PayloadShape,
}
