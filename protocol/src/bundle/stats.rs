//! Derived statistics.
//!
//! Each opened record is reduced to a [`BundleStatistics`] and the results
//! are folded with [`BundleStatistics::combine`]. The combination is sums,
//! set unions and min/max, so it is associative and commutative and the
//! order records are listed in cannot change the outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::vault::{RecordEnvelope, TelemetryEvent};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleStatistics {
    pub record_count: u64,
    pub event_count: u64,
    pub total_taps: u64,
    pub total_likes: u64,
    pub total_usage_seconds: u64,
    /// `COUNTRY-City`, or just `COUNTRY` when no city was given.
    pub regions: BTreeSet<String>,
    pub event_types: BTreeSet<String>,
    pub first_collected_at: Option<DateTime<Utc>>,
    pub last_collected_at: Option<DateTime<Utc>>,
}

/// Non-negative whole amount carried in `key`, or `default`.
fn amount(event: &TelemetryEvent, key: &str, default: u64) -> u64 {
    match event.number_field(key) {
        Some(n) if n.is_finite() && n > 0.0 => n.floor() as u64,
        Some(_) => 0,
        None => default,
    }
}

fn region(event: &TelemetryEvent) -> Option<String> {
    let country = event.str_field("country")?.trim();
    if country.is_empty() {
        return None;
    }
    match event.str_field("city").map(str::trim) {
        Some(city) if !city.is_empty() => Some(format!("{country}-{city}")),
        _ => Some(country.to_string()),
    }
}

impl BundleStatistics {
    /// Statistics of a single decrypted record.
    pub fn from_envelope(envelope: &RecordEnvelope) -> Self {
        let mut stats = Self {
            record_count: 1,
            event_count: envelope.events.len() as u64,
            first_collected_at: Some(envelope.collected_at),
            last_collected_at: Some(envelope.collected_at),
            ..Self::default()
        };
        for event in &envelope.events {
            stats.event_types.insert(event.event_type.clone());
            match event.event_type.as_str() {
                "tap" => stats.total_taps = stats.total_taps.saturating_add(amount(event, "count", 1)),
                "like" => stats.total_likes = stats.total_likes.saturating_add(amount(event, "count", 1)),
                "usage" => {
                    stats.total_usage_seconds =
                        stats.total_usage_seconds.saturating_add(amount(event, "seconds", 0))
                }
                _ => {}
            }
            if event.is_location() {
                stats.regions.extend(region(event));
            }
        }
        stats
    }

    pub fn combine(mut self, other: Self) -> Self {
        self.record_count = self.record_count.saturating_add(other.record_count);
        self.event_count = self.event_count.saturating_add(other.event_count);
        self.total_taps = self.total_taps.saturating_add(other.total_taps);
        self.total_likes = self.total_likes.saturating_add(other.total_likes);
        self.total_usage_seconds = self.total_usage_seconds.saturating_add(other.total_usage_seconds);
        self.regions.extend(other.regions);
        self.event_types.extend(other.event_types);
        self.first_collected_at = match (self.first_collected_at, other.first_collected_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.last_collected_at = match (self.last_collected_at, other.last_collected_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::ConsentProof;
    use chrono::TimeZone;

    fn envelope(events: Vec<TelemetryEvent>, at_secs: i64) -> RecordEnvelope {
        RecordEnvelope {
            did: "did:key:zQ3s".into(),
            session_id: "s".into(),
            events,
            collected_at: Utc.timestamp_opt(at_secs, 0).unwrap(),
            consent_proof: ConsentProof {
                version: "1.0".into(),
                timestamp: None,
                did: "did:key:zQ3s".into(),
                purposes: vec![],
                legal_basis: "consent".into(),
                gdpr_compliant: true,
            },
        }
    }

    #[test]
    fn single_record_counts() {
        let stats = BundleStatistics::from_envelope(&envelope(
            vec![
                TelemetryEvent::new("tap").with("count", 7),
                TelemetryEvent::new("tap"),
                TelemetryEvent::new("like").with("count", 2),
                TelemetryEvent::new("usage").with("seconds", 90.9),
                TelemetryEvent::new("geo").with("country", "IT").with("city", "Rome"),
                TelemetryEvent::new("geo").with("country", "FR"),
            ],
            100,
        ));
        assert_eq!(stats.record_count, 1);
        assert_eq!(stats.event_count, 6);
        assert_eq!(stats.total_taps, 8);
        assert_eq!(stats.total_likes, 2);
        assert_eq!(stats.total_usage_seconds, 90);
        assert_eq!(
            stats.regions.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["FR", "IT-Rome"]
        );
        assert_eq!(stats.event_types.len(), 4);
    }

    #[test]
    fn negative_amounts_count_as_zero() {
        let stats = BundleStatistics::from_envelope(&envelope(
            vec![TelemetryEvent::new("tap").with("count", -4)],
            0,
        ));
        assert_eq!(stats.total_taps, 0);
    }

    #[test]
    fn combine_is_order_independent() {
        let a = BundleStatistics::from_envelope(&envelope(
            vec![TelemetryEvent::new("geo").with("country", "IT").with("city", "Milan")],
            200,
        ));
        let b = BundleStatistics::from_envelope(&envelope(
            vec![TelemetryEvent::new("tap").with("count", 3)],
            100,
        ));
        let c = BundleStatistics::from_envelope(&envelope(
            vec![TelemetryEvent::new("usage").with("seconds", 60)],
            300,
        ));

        let left = a.clone().combine(b.clone()).combine(c.clone());
        let right = c.combine(a.combine(b));
        assert_eq!(left, right);
        assert_eq!(left.record_count, 3);
        assert_eq!(left.first_collected_at, Some(Utc.timestamp_opt(100, 0).unwrap()));
        assert_eq!(left.last_collected_at, Some(Utc.timestamp_opt(300, 0).unwrap()));
    }

    #[test]
    fn default_is_identity() {
        let a = BundleStatistics::from_envelope(&envelope(vec![TelemetryEvent::new("tap")], 5));
        assert_eq!(BundleStatistics::default().combine(a.clone()), a);
    }
}
