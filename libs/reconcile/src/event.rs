//! Matching polled events to scaling rules.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::EventParseError;
use crate::types::{EventScalingRule, GameEvent};

/// An event with validated timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledEvent {
    pub event_type: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ScheduledEvent {
    pub fn new(event_type: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            event_type: event_type.into(),
            start,
            end,
        }
    }
}

impl TryFrom<&GameEvent> for ScheduledEvent {
    type Error = EventParseError;

    fn try_from(event: &GameEvent) -> Result<Self, Self::Error> {
        let start = parse_timestamp("startTime", &event.start_time)?;
        let end = parse_timestamp("endTime", &event.end_time)?;
        if end < start {
            return Err(EventParseError::EndsBeforeStart {
                start: event.start_time.clone(),
                end: event.end_time.clone(),
            });
        }

        Ok(Self::new(event.event_type.clone(), start, end))
    }
}

fn parse_timestamp(field: &'static str, value: &str) -> Result<DateTime<Utc>, EventParseError> {
    if value.is_empty() {
        return Err(EventParseError::InvalidTimestamp {
            field,
            value: String::new(),
            reason: "missing".to_string(),
        });
    }
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| EventParseError::InvalidTimestamp {
            field,
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Find the event that drives `rule`.
///
/// Returns the first event of the rule's type whose timestamps are valid.
/// Malformed events are logged and skipped, so a rule whose only matching
/// event is malformed sees no event at all.
pub fn match_event(rule: &EventScalingRule, events: &[GameEvent]) -> Option<ScheduledEvent> {
    events
        .iter()
        .filter(|event| event.event_type == rule.event_type)
        .find_map(|event| match ScheduledEvent::try_from(event) {
            Ok(scheduled) => Some(scheduled),
            Err(e) => {
                warn!(
                    event_type = %event.event_type,
                    target = %rule.target_microservice,
                    error = %e,
                    "Skipping malformed event"
                );
                None
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(event_type: &str) -> EventScalingRule {
        EventScalingRule {
            event_type: event_type.to_string(),
            target_microservice: "raid-instance-manager".to_string(),
            desired_replicas: 10,
            pre_scale_minutes: 5,
            post_scale_minutes: 5,
            default_replicas: 2,
        }
    }

    fn event(event_type: &str, start: &str, end: &str) -> GameEvent {
        GameEvent {
            event_type: event_type.to_string(),
            start_time: start.to_string(),
            end_time: end.to_string(),
            target_microservice: "raid-instance-manager".to_string(),
        }
    }

    #[test]
    fn test_match_first_event_of_type() {
        let events = vec![
            event("MassPvPEvent", "2025-06-01T10:00:00Z", "2025-06-01T11:00:00Z"),
            event("RaidBossSpawn", "2025-06-01T12:00:00Z", "2025-06-01T12:10:00Z"),
            event("RaidBossSpawn", "2025-06-01T14:00:00Z", "2025-06-01T14:10:00Z"),
        ];

        let matched = match_event(&rule("RaidBossSpawn"), &events).unwrap();
        assert_eq!(matched.start.to_rfc3339(), "2025-06-01T12:00:00+00:00");
    }

    #[test]
    fn test_no_event_of_type() {
        let events = vec![event(
            "MassPvPEvent",
            "2025-06-01T10:00:00Z",
            "2025-06-01T11:00:00Z",
        )];
        assert!(match_event(&rule("RaidBossSpawn"), &events).is_none());
    }

    #[test]
    fn test_malformed_event_skipped() {
        let events = vec![
            event("RaidBossSpawn", "2025-06-01T12:00:00Z", "tomorrow"),
            event("RaidBossSpawn", "2025-06-01T14:00:00Z", "2025-06-01T14:10:00Z"),
        ];
        let matched = match_event(&rule("RaidBossSpawn"), &events).unwrap();
        assert_eq!(matched.end.to_rfc3339(), "2025-06-01T14:10:00+00:00");

        let only_bad = vec![event("RaidBossSpawn", "noon", "2025-06-01T14:10:00Z")];
        assert!(match_event(&rule("RaidBossSpawn"), &only_bad).is_none());
    }

    #[test]
    fn test_offsets_normalized_to_utc() {
        let parsed = ScheduledEvent::try_from(&event(
            "RaidBossSpawn",
            "2025-06-01T14:00:00+02:00",
            "2025-06-01T14:30:00+02:00",
        ))
        .unwrap();
        assert_eq!(parsed.start.to_rfc3339(), "2025-06-01T12:00:00+00:00");
    }

    #[test]
    fn test_inverted_event_rejected() {
        let err = ScheduledEvent::try_from(&event(
            "RaidBossSpawn",
            "2025-06-01T14:00:00Z",
            "2025-06-01T13:00:00Z",
        ))
        .unwrap_err();
        assert!(matches!(err, EventParseError::EndsBeforeStart { .. }));
    }

    #[test]
    fn test_missing_timestamp_rejected() {
        let err = ScheduledEvent::try_from(&event("RaidBossSpawn", "2025-06-01T14:00:00Z", ""))
            .unwrap_err();
        assert!(matches!(
            err,
            EventParseError::InvalidTimestamp { field: "endTime", ref reason, .. } if reason == "missing"
        ));
    }
}
