//! Pipeline Configuration
//!
//! The engine has three lifecycle policies that callers may need to choose
//! between. Everything else is fixed behavior. The policies are plain data so
//! hosts can keep them next to the rest of their settings and load them with
//! [`PipelineConfig::from_json`].

use serde::{Deserialize, Serialize};

/// What the demultiplexer does with live groups when its source completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceCompletion {
    /// Groups stay alive and end only through their own transform.
    #[default]
    KeepGroups,

    /// Every live group's input is completed before the handle sequence
    /// completes.
    CompleteGroups,
}

/// What a fold does when its handle sequence completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapCompletion {
    /// Open-ended view: keep tracking the remaining groups and complete once
    /// the last of them has ended.
    #[default]
    Retain,

    /// Batch-scoped view: emit an empty snapshot and complete immediately.
    Clear,
}

/// How a fold reacts to one of its groups failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupErrorPolicy {
    /// Remove the failed group, log it, and keep folding the others.
    #[default]
    Isolate,

    /// Fail the whole fold with [`StreamError::Group`](crate::StreamError::Group).
    Escalate,
}

/// Demultiplexer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub on_source_complete: SourceCompletion,
}

/// Settings shared by the aggregator, the set projector and the value
/// collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectConfig {
    pub on_complete: MapCompletion,
    pub group_errors: GroupErrorPolicy,
}

/// Full configuration of a [`KeyedPipeline`](crate::keyed::KeyedPipeline).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub split: SplitConfig,
    pub collect: CollectConfig,
}

impl PipelineConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
