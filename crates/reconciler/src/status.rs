//! Condition bookkeeping for function status.
//!
//! Each dependent condition starts `Unknown` and is moved to `True` or
//! `False` by the reconciler. `Ready` is derived from the dependents after
//! every transition: `True` when all are true, `False` (carrying the
//! failing condition's reason and message) when any is false, `Unknown`
//! otherwise.

use chrono::Utc;
use fnflow_api::{Condition, ConditionStatus, ConditionType, Conditions, FunctionStatus};

/// Conditions that feed `Ready`.
pub const DEPENDENT_CONDITIONS: [ConditionType; 3] = [
    ConditionType::CodeArtifactAvailable,
    ConditionType::ComputeUnitAvailable,
    ConditionType::SinkAdvertised,
];

/// Reason used while the compute unit exists but is not serving.
pub const REASON_COMPUTE_UNIT_NOT_READY: &str = "ComputeUnitNotReady";

/// Reason used while there is no address to advertise event attributes for.
pub const REASON_NO_ADDRESS: &str = "NoAddress";

/// Applies transitions to a condition set and keeps `Ready` current.
pub struct ConditionManager<'a> {
    conditions: &'a mut Conditions,
}

impl<'a> ConditionManager<'a> {
    pub fn new(conditions: &'a mut Conditions) -> Self {
        Self { conditions }
    }

    /// Set every missing condition, `Ready` included, to `Unknown`.
    pub fn initialize(&mut self) {
        for condition_type in DEPENDENT_CONDITIONS
            .into_iter()
            .chain(std::iter::once(ConditionType::Ready))
        {
            if self.conditions.get(condition_type).is_none() {
                self.conditions.upsert(Condition::unknown(condition_type));
            }
        }
        self.recompute_ready();
    }

    pub fn mark_true(&mut self, condition_type: ConditionType) {
        self.set(condition_type, ConditionStatus::True, "", "");
    }

    pub fn mark_false(&mut self, condition_type: ConditionType, reason: &str, message: &str) {
        self.set(condition_type, ConditionStatus::False, reason, message);
    }

    pub fn mark_unknown(&mut self, condition_type: ConditionType, reason: &str, message: &str) {
        self.set(condition_type, ConditionStatus::Unknown, reason, message);
    }

    fn set(&mut self, condition_type: ConditionType, status: ConditionStatus, reason: &str, message: &str) {
        transition(self.conditions, condition_type, status, reason, message);
        if condition_type != ConditionType::Ready {
            self.recompute_ready();
        }
    }

    fn recompute_ready(&mut self) {
        let failing = DEPENDENT_CONDITIONS
            .iter()
            .filter_map(|t| self.conditions.get(*t))
            .find(|condition| condition.status.is_false())
            .map(|condition| (condition.reason.clone(), condition.message.clone()));

        if let Some((reason, message)) = failing {
            transition(self.conditions, ConditionType::Ready, ConditionStatus::False, &reason, &message);
        } else if DEPENDENT_CONDITIONS
            .iter()
            .all(|t| self.conditions.status(*t).is_true())
        {
            transition(self.conditions, ConditionType::Ready, ConditionStatus::True, "", "");
        } else {
            transition(self.conditions, ConditionType::Ready, ConditionStatus::Unknown, "", "");
        }
    }
}

/// Write a condition, moving `last_transition_time` only when the status
/// value changes.
fn transition(
    conditions: &mut Conditions,
    condition_type: ConditionType,
    status: ConditionStatus,
    reason: &str,
    message: &str,
) {
    let last_transition_time = match conditions.get(condition_type) {
        Some(current) if current.status == status => current.last_transition_time,
        _ => Some(Utc::now()),
    };

    conditions.upsert(Condition {
        condition_type,
        status,
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time,
    });
}

/// Function-specific transitions.
pub trait FunctionStatusExt {
    fn initialize_conditions(&mut self);

    fn mark_code_artifact_available(&mut self);

    fn mark_code_artifact_unavailable(&mut self, reason: &str, message: &str);

    fn mark_compute_unit_available(&mut self);

    fn mark_compute_unit_unavailable(&mut self, reason: &str, message: &str);

    fn mark_sink_advertised(&mut self);

    /// Withdraw the advertised attributes. The condition goes back to
    /// `Unknown` until an address shows up again.
    fn mark_sink_not_advertised(&mut self, reason: &str, message: &str);

    /// Whether `Ready` is true.
    fn is_ready(&self) -> bool;
}

impl FunctionStatusExt for FunctionStatus {
    fn initialize_conditions(&mut self) {
        ConditionManager::new(&mut self.conditions).initialize();
    }

    fn mark_code_artifact_available(&mut self) {
        ConditionManager::new(&mut self.conditions).mark_true(ConditionType::CodeArtifactAvailable);
    }

    fn mark_code_artifact_unavailable(&mut self, reason: &str, message: &str) {
        ConditionManager::new(&mut self.conditions).mark_false(
            ConditionType::CodeArtifactAvailable,
            reason,
            message,
        );
    }

    fn mark_compute_unit_available(&mut self) {
        ConditionManager::new(&mut self.conditions).mark_true(ConditionType::ComputeUnitAvailable);
    }

    fn mark_compute_unit_unavailable(&mut self, reason: &str, message: &str) {
        ConditionManager::new(&mut self.conditions).mark_false(
            ConditionType::ComputeUnitAvailable,
            reason,
            message,
        );
    }

    fn mark_sink_advertised(&mut self) {
        ConditionManager::new(&mut self.conditions).mark_true(ConditionType::SinkAdvertised);
    }

    fn mark_sink_not_advertised(&mut self, reason: &str, message: &str) {
        ConditionManager::new(&mut self.conditions).mark_unknown(
            ConditionType::SinkAdvertised,
            reason,
            message,
        );
    }

    fn is_ready(&self) -> bool {
        self.conditions.status(ConditionType::Ready).is_true()
    }
}
