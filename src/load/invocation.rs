//! Trigger event and runtime context handed to a load run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event that triggered the run, usually a scheduled event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "detail-type")]
    pub detail_type: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl TriggerEvent {
    /// Event for a manual run
    pub fn manual() -> Self {
        Self {
            source: Some("manual".to_string()),
            time: Some(Utc::now()),
            ..Default::default()
        }
    }
}

/// Runtime information about the invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeContext {
    /// Unique id of this invocation, attached to every log line
    pub invocation_id: Uuid,
    /// Name of the deployed job
    pub function_name: String,
    /// When the invocation started
    pub started_at: DateTime<Utc>,
}

impl RuntimeContext {
    pub fn new(function_name: impl Into<String>) -> Self {
        Self {
            invocation_id: Uuid::new_v4(),
            function_name: function_name.into(),
            started_at: Utc::now(),
        }
    }
}
