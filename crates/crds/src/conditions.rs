//! Typed status conditions for Distribution.
//!
//! `lastTransitionTime` only moves when a condition's status flips, so
//! re-reporting the same state does not produce a status diff.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionType {
    DeploymentReady,
    HealthCheck,
    StorageReady,
    ServiceReady,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DistributionCondition {
    #[serde(rename = "type")]
    pub type_: ConditionType,

    pub status: ConditionStatus,

    /// Machine-readable reason in PascalCase
    pub reason: String,

    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl DistributionCondition {
    pub fn new(type_: ConditionType, ok: bool, reason: &str, message: impl Into<String>) -> Self {
        Self {
            type_,
            status: if ok { ConditionStatus::True } else { ConditionStatus::False },
            reason: reason.to_string(),
            message: message.into(),
            last_transition_time: None,
        }
    }
}

/// Inserts or replaces the condition of the same type.
///
/// The previous transition time is kept when the status did not change.
pub fn set_condition(
    conditions: &mut Vec<DistributionCondition>,
    mut condition: DistributionCondition,
    now: DateTime<Utc>,
) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            condition.last_transition_time = if existing.status == condition.status {
                existing.last_transition_time.or(Some(now))
            } else {
                Some(now)
            };
            *existing = condition;
        }
        None => {
            condition.last_transition_time = Some(now);
            conditions.push(condition);
        }
    }
}

pub fn get_condition(
    conditions: &[DistributionCondition],
    type_: ConditionType,
) -> Option<&DistributionCondition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_condition_true(conditions: &[DistributionCondition], type_: ConditionType) -> bool {
    get_condition(conditions, type_).is_some_and(|c| c.status == ConditionStatus::True)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_set_condition_appends_new_type() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            DistributionCondition::new(ConditionType::HealthCheck, true, "HealthCheckPassed", "ok"),
            now,
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, Some(now));
        assert!(is_condition_true(&conditions, ConditionType::HealthCheck));
    }

    #[test]
    fn test_set_condition_keeps_transition_time_when_status_unchanged() {
        let first = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            DistributionCondition::new(ConditionType::DeploymentReady, false, "DeploymentPending", "0/1"),
            first,
        );
        set_condition(
            &mut conditions,
            DistributionCondition::new(ConditionType::DeploymentReady, false, "DeploymentPending", "0/1"),
            later,
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, Some(first));

        set_condition(
            &mut conditions,
            DistributionCondition::new(ConditionType::DeploymentReady, true, "DeploymentReady", "1/1"),
            later,
        );
        assert_eq!(conditions[0].last_transition_time, Some(later));
        assert!(is_condition_true(&conditions, ConditionType::DeploymentReady));
    }
}
