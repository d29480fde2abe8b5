//! Logging helpers so packet traces stay single-line and bounded.

use std::fmt::Write;

use crate::mesh::Telemetry;

/// Hex-dump a payload for debug logs, space separated, truncated past `MAX_BYTES`.
pub fn hex_dump(bytes: &[u8]) -> String {
    const MAX_BYTES: usize = 64;
    let mut out = String::with_capacity(bytes.len().min(MAX_BYTES) * 3 + 8);
    for (i, b) in bytes.iter().enumerate() {
        if i >= MAX_BYTES {
            let _ = write!(&mut out, " …(+{})", bytes.len() - MAX_BYTES);
            break;
        }
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// One-line rendering of a telemetry snapshot: `lat=37.7749000 lon=-122.4194000 sats=9 batt=81% t=...`.
pub fn describe_telemetry(t: &Telemetry) -> String {
    if !t.has_position() {
        return format!(
            "pos=none sats={} batt={}% t={}",
            t.sats_in_view, t.battery_level, t.time
        );
    }
    format!(
        "lat={:.7} lon={:.7} sats={} batt={}% t={}",
        t.latitude_deg(),
        t.longitude_deg(),
        t.sats_in_view,
        t.battery_level,
        t.time
    )
}

/// Escape control characters so banner text and the like log on one line.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_dump_formats_and_truncates() {
        assert_eq!(hex_dump(&[0x08, 0x01, 0xff]), "08 01 ff");
        assert_eq!(hex_dump(&[]), "");
        let long = vec![0u8; 70];
        assert!(hex_dump(&long).ends_with("…(+6)"));
    }

    #[test]
    fn telemetry_without_fix_says_so() {
        let t = Telemetry {
            battery_level: 50,
            ..Default::default()
        };
        assert!(describe_telemetry(&t).starts_with("pos=none"));
    }

    #[test]
    fn escapes_newlines() {
        assert_eq!(escape_log("Paired\nwith"), "Paired\\nwith");
    }
}
