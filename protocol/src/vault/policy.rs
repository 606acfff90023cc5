//! Coarse-location policy.
//!
//! Only country/city granularity may enter the vault. A batch is rejected
//! whole if any event:
//!
//! - carries coordinates (`latitude`, `longitude`, `lat`, `lng`, `lon`) at
//!   any nesting depth,
//! - carries a raw network address (`ip`, `ipAddress`) at any depth,
//! - is location-typed and declares a `precision` under 1000 or one that is
//!   not a number.
//!
//! Coordinates and addresses are refused on every event type, not only on
//! location events: a `tap` event with a `latitude` field is still a precise
//! location.

use serde_json::Value;
use std::fmt;

use super::record::TelemetryEvent;
use crate::config::COARSE_PRECISION_FLOOR;

const COORDINATE_FIELDS: &[&str] = &["latitude", "longitude", "lat", "lng", "lon"];
const NETWORK_ADDRESS_FIELDS: &[&str] = &["ip", "ipAddress", "ip_address"];

/// Why a batch was refused. `index` is the offending event's position.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyViolation {
    PreciseCoordinates { index: usize, field: String },
    NetworkAddress { index: usize, field: String },
    FinePrecision { index: usize, precision: Option<f64> },
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyViolation::PreciseCoordinates { index, field } => write!(
                f,
                "event {index} carries precise coordinates ('{field}'); only country and city are accepted"
            ),
            PolicyViolation::NetworkAddress { index, field } => write!(
                f,
                "event {index} carries a network address ('{field}')"
            ),
            PolicyViolation::FinePrecision { index, precision: Some(p) } => write!(
                f,
                "event {index} declares precision {p}, below the coarse floor of {COARSE_PRECISION_FLOOR}"
            ),
            PolicyViolation::FinePrecision { index, precision: None } => {
                write!(f, "event {index} declares a non-numeric precision")
            }
        }
    }
}

/// Find a forbidden key anywhere inside `value`.
fn find_forbidden<'a>(value: &'a Value, forbidden: &[&str]) -> Option<&'a str> {
    match value {
        Value::Object(map) => map.iter().find_map(|(k, v)| {
            if !v.is_null() && forbidden.contains(&k.as_str()) {
                Some(k.as_str())
            } else {
                find_forbidden(v, forbidden)
            }
        }),
        Value::Array(items) => items.iter().find_map(|v| find_forbidden(v, forbidden)),
        _ => None,
    }
}

fn check_event(index: usize, event: &TelemetryEvent) -> Result<(), PolicyViolation> {
    for (key, value) in &event.fields {
        if value.is_null() {
            continue;
        }
        if COORDINATE_FIELDS.contains(&key.as_str()) {
            return Err(PolicyViolation::PreciseCoordinates { index, field: key.clone() });
        }
        if NETWORK_ADDRESS_FIELDS.contains(&key.as_str()) {
            return Err(PolicyViolation::NetworkAddress { index, field: key.clone() });
        }
        if let Some(field) = find_forbidden(value, COORDINATE_FIELDS) {
            return Err(PolicyViolation::PreciseCoordinates { index, field: field.to_string() });
        }
        if let Some(field) = find_forbidden(value, NETWORK_ADDRESS_FIELDS) {
            return Err(PolicyViolation::NetworkAddress { index, field: field.to_string() });
        }
    }

    if event.is_location() && event.field("precision").is_some() {
        match event.number_field("precision") {
            Some(p) if p >= COARSE_PRECISION_FLOOR => {}
            other => {
                return Err(PolicyViolation::FinePrecision { index, precision: other });
            }
        }
    }
    Ok(())
}

/// Check every event in a batch; the first violation wins.
pub fn check_events(events: &[TelemetryEvent]) -> Result<(), PolicyViolation> {
    events
        .iter()
        .enumerate()
        .try_for_each(|(index, event)| check_event(index, event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn geo() -> TelemetryEvent {
        TelemetryEvent::new("geo").with("country", "IT").with("city", "Rome")
    }

    #[test]
    fn country_and_city_pass() {
        assert!(check_events(&[geo(), TelemetryEvent::new("tap").with("count", 3)]).is_ok());
    }

    #[test]
    fn coordinates_rejected() {
        let event = geo().with("latitude", 41.9).with("longitude", 12.5);
        assert!(matches!(
            check_events(&[event]),
            Err(PolicyViolation::PreciseCoordinates { index: 0, .. })
        ));
    }

    #[test]
    fn coordinates_rejected_on_any_type_and_depth() {
        let nested = TelemetryEvent::new("tap").with("where", json!({"pos": {"lat": 1.0}}));
        assert!(matches!(
            check_events(&[geo(), nested]),
            Err(PolicyViolation::PreciseCoordinates { index: 1, .. })
        ));
    }

    #[test]
    fn ip_rejected() {
        let event = geo().with("ip", "203.0.113.7");
        assert!(matches!(
            check_events(&[event]),
            Err(PolicyViolation::NetworkAddress { .. })
        ));
    }

    #[test]
    fn precision_floor() {
        assert!(check_events(&[geo().with("precision", 999)]).is_err());
        assert!(check_events(&[geo().with("precision", 1000)]).is_ok());
        assert!(check_events(&[geo().with("precision", 5000.5)]).is_ok());
        assert!(matches!(
            check_events(&[geo().with("precision", "fine")]),
            Err(PolicyViolation::FinePrecision { precision: None, .. })
        ));
    }

    #[test]
    fn precision_on_non_location_event_is_ignored() {
        assert!(check_events(&[TelemetryEvent::new("usage").with("precision", 5)]).is_ok());
    }

    #[test]
    fn null_coordinates_are_absent() {
        assert!(check_events(&[geo().with("latitude", Value::Null)]).is_ok());
    }
}
