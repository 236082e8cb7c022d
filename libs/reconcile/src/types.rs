//! Rule set resources, events and status records.
//!
//! Field names on the wire are camelCase to match the declarative rule set
//! format and the event source payload.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;

/// Namespaced name of a rule set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleSetKey {
    pub namespace: String,
    pub name: String,
}

impl RuleSetKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RuleSetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Namespaced name of a scalable workload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkloadRef {
    pub namespace: String,
    pub name: String,
}

impl WorkloadRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Scaling parameters for one event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventScalingRule {
    /// Event type this rule reacts to (e.g. "RaidBossSpawn").
    pub event_type: String,

    /// Name of the workload to scale.
    pub target_microservice: String,

    /// Replicas while the event is running.
    pub desired_replicas: u32,

    /// Minutes before the event start to scale up.
    pub pre_scale_minutes: u32,

    /// Minutes after the event end before scaling back down.
    pub post_scale_minutes: u32,

    /// Replicas outside of any event.
    pub default_replicas: u32,
}

impl EventScalingRule {
    pub fn pre_scale_lead(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.pre_scale_minutes))
    }

    pub fn post_scale_lag(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.post_scale_minutes))
    }
}

/// Desired state of a rule set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSetSpec {
    #[serde(rename = "eventEndpointURL")]
    pub event_endpoint_url: String,

    /// Duration string such as "30s" or "1m".
    pub polling_interval: String,

    #[serde(default)]
    pub rules: Vec<EventScalingRule>,
}

impl RuleSetSpec {
    /// Split rules into those to evaluate and duplicates of an earlier
    /// `(event type, target)` pair. The first occurrence wins.
    pub fn distinct_rules(&self) -> (Vec<&EventScalingRule>, Vec<ConfigError>) {
        let mut accepted: Vec<&EventScalingRule> = Vec::with_capacity(self.rules.len());
        let mut rejected = Vec::new();

        for rule in &self.rules {
            let duplicate = accepted.iter().any(|seen| {
                seen.event_type == rule.event_type
                    && seen.target_microservice == rule.target_microservice
            });
            if duplicate {
                rejected.push(ConfigError::DuplicateRule {
                    event_type: rule.event_type.clone(),
                    target: rule.target_microservice.clone(),
                });
            } else {
                accepted.push(rule);
            }
        }

        (accepted, rejected)
    }
}

/// Lifecycle tag of an active scale.
///
/// Only `Active` is produced; the other phases are reserved in the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalePhase {
    ScalingUp,
    Active,
    ScalingDown,
    Completed,
}

impl fmt::Display for ScalePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScalePhase::ScalingUp => "ScalingUp",
            ScalePhase::Active => "Active",
            ScalePhase::ScalingDown => "ScalingDown",
            ScalePhase::Completed => "Completed",
        };
        f.write_str(s)
    }
}

/// A target currently held at an event-driven replica count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveScaleStatus {
    pub event_type: String,
    pub target_microservice: String,
    pub scaled_to_replicas: u32,
    pub scale_trigger_time: DateTime<Utc>,
    pub event_end_time: DateTime<Utc>,
    pub status: ScalePhase,
}

/// Observed state of a rule set, rebuilt every pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileState {
    /// Time of the last poll attempt, successful or not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_check_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub active_scales: Vec<ActiveScaleStatus>,
}

/// A rule set resource: identity, spec and status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(rename = "metadata")]
    pub key: RuleSetKey,
    pub spec: RuleSetSpec,
    #[serde(default)]
    pub status: ReconcileState,
}

impl RuleSet {
    /// Resolve a rule's target. Targets live in the rule set's namespace.
    pub fn target_of(&self, rule: &EventScalingRule) -> WorkloadRef {
        WorkloadRef::new(self.key.namespace.clone(), rule.target_microservice.clone())
    }
}

/// An announced event as returned by the event source.
///
/// Fields are kept as raw strings so that one malformed event does not
/// spoil the whole poll. Missing or `null` fields decode as empty strings
/// and are rejected later, per event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEvent {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub event_type: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub start_time: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub end_time: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub target_microservice: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_set_deserialization() {
        let json = r#"{
            "metadata": {"namespace": "games", "name": "raid-rules"},
            "spec": {
                "eventEndpointURL": "http://events.local/api/events",
                "pollingInterval": "30s",
                "rules": [
                    {
                        "eventType": "RaidBossSpawn",
                        "targetMicroservice": "raid-instance-manager",
                        "desiredReplicas": 10,
                        "preScaleMinutes": 5,
                        "postScaleMinutes": 5,
                        "defaultReplicas": 2
                    }
                ]
            }
        }"#;

        let rule_set: RuleSet = serde_json::from_str(json).unwrap();
        assert_eq!(rule_set.key.to_string(), "games/raid-rules");
        assert_eq!(rule_set.spec.polling_interval, "30s");
        assert_eq!(rule_set.spec.rules[0].desired_replicas, 10);
        assert_eq!(rule_set.status, ReconcileState::default());

        let target = rule_set.target_of(&rule_set.spec.rules[0]);
        assert_eq!(target, WorkloadRef::new("games", "raid-instance-manager"));
    }

    #[test]
    fn test_duplicate_rules_rejected() {
        let rule = EventScalingRule {
            event_type: "RaidBossSpawn".to_string(),
            target_microservice: "raid".to_string(),
            desired_replicas: 10,
            pre_scale_minutes: 5,
            post_scale_minutes: 5,
            default_replicas: 2,
        };
        let spec = RuleSetSpec {
            event_endpoint_url: "http://events.local".to_string(),
            polling_interval: "1m".to_string(),
            rules: vec![
                rule.clone(),
                EventScalingRule {
                    desired_replicas: 20,
                    ..rule.clone()
                },
                EventScalingRule {
                    target_microservice: "raid-cache".to_string(),
                    ..rule
                },
            ],
        };

        let (accepted, rejected) = spec.distinct_rules();
        assert_eq!(accepted.len(), 2);
        assert_eq!(accepted[0].desired_replicas, 10);
        assert_eq!(rejected.len(), 1);
    }

    #[test]
    fn test_negative_replicas_rejected() {
        let json = r#"{
            "eventType": "RaidBossSpawn",
            "targetMicroservice": "raid",
            "desiredReplicas": -1,
            "preScaleMinutes": 0,
            "postScaleMinutes": 0,
            "defaultReplicas": 1
        }"#;
        assert!(serde_json::from_str::<EventScalingRule>(json).is_err());
    }

    #[test]
    fn test_status_serialization() {
        let at = DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let state = ReconcileState {
            last_event_check_time: Some(at),
            active_scales: vec![ActiveScaleStatus {
                event_type: "RaidBossSpawn".to_string(),
                target_microservice: "raid".to_string(),
                scaled_to_replicas: 10,
                scale_trigger_time: at,
                event_end_time: at + chrono::Duration::minutes(10),
                status: ScalePhase::Active,
            }],
        };

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["lastEventCheckTime"], "2025-06-01T12:00:00Z");
        assert_eq!(json["activeScales"][0]["status"], "Active");
        assert_eq!(json["activeScales"][0]["scaledToReplicas"], 10);

        let empty = serde_json::to_string(&ReconcileState::default()).unwrap();
        assert_eq!(empty, "{}");
    }

    #[test]
    fn test_event_with_null_or_missing_fields_decodes() {
        let json = r#"[
            {
                "eventType": "RaidBossSpawn",
                "startTime": "2025-06-01T12:01:00Z",
                "endTime": null,
                "targetMicroservice": "raid-instance-manager"
            },
            {
                "eventType": "MassPvPEvent",
                "targetMicroservice": "pvp-battle-service"
            }
        ]"#;

        let events: Vec<GameEvent> = serde_json::from_str(json).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].start_time, "2025-06-01T12:01:00Z");
        assert_eq!(events[0].end_time, "");
        assert_eq!(events[1].start_time, "");
        assert_eq!(events[1].end_time, "");
    }
}
