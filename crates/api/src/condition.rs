//! Status conditions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tri-state value of a condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl ConditionStatus {
    #[must_use]
    pub const fn is_true(self) -> bool {
        matches!(self, Self::True)
    }

    #[must_use]
    pub const fn is_false(self) -> bool {
        matches!(self, Self::False)
    }
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Named facets of a function's observed status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConditionType {
    /// Aggregate of every other condition.
    Ready,
    CodeArtifactAvailable,
    ComputeUnitAvailable,
    SinkAdvertised,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "Ready"),
            Self::CodeArtifactAvailable => write!(f, "CodeArtifactAvailable"),
            Self::ComputeUnitAvailable => write!(f, "ComputeUnitAvailable"),
            Self::SinkAdvertised => write!(f, "SinkAdvertised"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    #[must_use]
    pub const fn unknown(condition_type: ConditionType) -> Self {
        Self {
            condition_type,
            status: ConditionStatus::Unknown,
            reason: String::new(),
            message: String::new(),
            last_transition_time: None,
        }
    }
}

/// Conditions kept sorted by type, at most one per type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conditions(Vec<Condition>);

impl Conditions {
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn get(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.0
            .iter()
            .find(|condition| condition.condition_type == condition_type)
    }

    /// Status of a condition; missing conditions read as `Unknown`.
    #[must_use]
    pub fn status(&self, condition_type: ConditionType) -> ConditionStatus {
        self.get(condition_type)
            .map_or(ConditionStatus::Unknown, |condition| condition.status)
    }

    /// Insert or replace the condition of the same type.
    pub fn upsert(&mut self, condition: Condition) {
        match self
            .0
            .binary_search_by(|probe| probe.condition_type.cmp(&condition.condition_type))
        {
            Ok(index) => {
                if let Some(slot) = self.0.get_mut(index) {
                    *slot = condition;
                }
            }
            Err(index) => self.0.insert(index, condition),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
