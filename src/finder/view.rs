//! What the session page shows: arrow, distance, bearing, peer stats and freshness.

use super::geo;
use super::host::GpsFix;
use super::session::LiveTelemetry;
use super::Millis;
use crate::mesh::NodeId;

const METERS_TO_FEET: f64 = 3.28084;
const FEET_PER_MILE: f64 = 5280.0;

/// Past this many seconds without a packet the peer counts as disconnected.
const STALE_AFTER_SECS: u64 = 999;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub peer: NodeId,
    pub distance_m: Option<f64>,
    pub bearing_deg: Option<f64>,
    /// Arrow angle on screen: bearing relative to the compass heading. With no heading the
    /// arrow is drawn north-up (the raw bearing); heading is never estimated from movement.
    pub arrow_deg: Option<f64>,
    pub north_up: bool,
    pub distance_label: String,
    pub bearing_label: String,
    pub battery_label: String,
    pub sats_label: String,
    pub age_label: String,
}

impl SessionView {
    pub fn build(
        peer: NodeId,
        own: Option<GpsFix>,
        live: Option<&LiveTelemetry>,
        heading: Option<f32>,
        now: Millis,
        imperial: bool,
    ) -> Self {
        let data = live.filter(|l| l.peer == peer).map(|l| l.data);
        let peer_pos = data.filter(|d| d.has_position());

        let (distance_m, bearing_deg) = match (own, peer_pos) {
            (Some(me), Some(them)) => {
                let (lat1, lon1) = (me.latitude_i as f64 * 1e-7, me.longitude_i as f64 * 1e-7);
                let (lat2, lon2) = (them.latitude_deg(), them.longitude_deg());
                (
                    Some(geo::distance_m(lat1, lon1, lat2, lon2)),
                    Some(geo::bearing_deg(lat1, lon1, lat2, lon2)),
                )
            }
            _ => (None, None),
        };
        let arrow_deg = bearing_deg.map(|b| match heading {
            Some(h) => geo::normalize_deg(b - f64::from(h)),
            None => b,
        });

        let received_at = live
            .filter(|l| l.peer == peer)
            .and_then(|l| l.received_at_ms);

        Self {
            peer,
            distance_m,
            bearing_deg,
            arrow_deg,
            north_up: heading.is_none(),
            distance_label: distance_m
                .map(|m| format_distance(m, imperial))
                .unwrap_or_else(|| "Dist --".to_string()),
            bearing_label: bearing_deg
                .map(|b| format!("{:.0}°", b))
                .unwrap_or_else(|| "Brg --".to_string()),
            battery_label: format!("{}% Bat", data.map(|d| d.battery_level).unwrap_or(0)),
            sats_label: format!("{} Sats", data.map(|d| d.sats_in_view).unwrap_or(0)),
            age_label: format_age(received_at.map(|t| now.saturating_sub(t))),
        }
    }
}

/// `850m`, `1.2km`, or `900ft`, `1.3mi`.
pub fn format_distance(meters: f64, imperial: bool) -> String {
    if imperial {
        let feet = meters * METERS_TO_FEET;
        if feet < 1000.0 {
            format!("{:.0}ft", feet)
        } else {
            format!("{:.1}mi", feet / FEET_PER_MILE)
        }
    } else if meters < 1000.0 {
        format!("{:.0}m", meters)
    } else {
        format!("{:.1}km", meters / 1000.0)
    }
}

/// `Ns ago`, `DC` once stale, `???` if nothing was ever heard.
pub fn format_age(age_ms: Option<Millis>) -> String {
    match age_ms {
        None => "???".to_string(),
        Some(ms) if ms / 1000 > STALE_AFTER_SECS => "DC".to_string(),
        Some(ms) => format!("{}s ago", ms / 1000),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Telemetry;

    const PEER: NodeId = NodeId(0x1234);

    fn live(lat: f64, lon: f64, at: Option<Millis>) -> LiveTelemetry {
        LiveTelemetry {
            peer: PEER,
            data: Telemetry {
                latitude_i: (lat * 1e7) as i32,
                longitude_i: (lon * 1e7) as i32,
                sats_in_view: 8,
                battery_level: 64,
                time: 0,
            },
            received_at_ms: at,
        }
    }

    #[test]
    fn distance_labels() {
        assert_eq!(format_distance(850.0, false), "850m");
        assert_eq!(format_distance(1_200.0, false), "1.2km");
        assert_eq!(format_distance(274.32, true), "900ft");
        assert_eq!(format_distance(2_092.0, true), "1.3mi");
    }

    #[test]
    fn age_labels() {
        assert_eq!(format_age(None), "???");
        assert_eq!(format_age(Some(12_400)), "12s ago");
        assert_eq!(format_age(Some(999_999)), "999s ago");
        assert_eq!(format_age(Some(1_000_000)), "DC");
    }

    #[test]
    fn due_east_with_and_without_heading() {
        let own = Some(GpsFix::from_degrees(0.0, 0.0, 6));
        let l = live(0.0, 0.01, Some(1_000));
        let v = SessionView::build(PEER, own, Some(&l), None, 6_000, false);
        assert!((v.bearing_deg.unwrap() - 90.0).abs() < 0.01);
        assert!(v.north_up);
        assert_eq!(v.arrow_deg, v.bearing_deg);
        assert_eq!(v.distance_label, "1.1km");
        assert_eq!(v.age_label, "5s ago");
        assert_eq!(v.battery_label, "64% Bat");

        let v = SessionView::build(PEER, own, Some(&l), Some(90.0), 6_000, false);
        assert!(v.arrow_deg.unwrap() < 0.01 || v.arrow_deg.unwrap() > 359.99);
        assert!(!v.north_up);
    }

    #[test]
    fn zero_zero_peer_position_means_unknown() {
        let own = Some(GpsFix::from_degrees(10.0, 10.0, 6));
        let l = live(0.0, 0.0, Some(0));
        let v = SessionView::build(PEER, own, Some(&l), None, 0, false);
        assert_eq!(v.distance_m, None);
        assert_eq!(v.distance_label, "Dist --");
        assert_eq!(v.bearing_label, "Brg --");
    }

    #[test]
    fn nothing_heard_yet() {
        let v = SessionView::build(PEER, None, None, None, 50_000, true);
        assert_eq!(v.age_label, "???");
        assert_eq!(v.arrow_deg, None);
    }
}
