//! Process-wide protocol counters.
//!
//! Plain relaxed atomics; the host reads them through [`snapshot`] (the `simulate` command
//! prints one at the end of a run).
use std::sync::atomic::{AtomicU64, Ordering};

static PACKETS_SENT: AtomicU64 = AtomicU64::new(0);
static SEND_FAILURES: AtomicU64 = AtomicU64::new(0);
static PACKETS_RECEIVED: AtomicU64 = AtomicU64::new(0);
static DECODE_FAILURES: AtomicU64 = AtomicU64::new(0);
static PAIRINGS_COMPLETED: AtomicU64 = AtomicU64::new(0);
static SESSIONS_STARTED: AtomicU64 = AtomicU64::new(0);
static SESSIONS_ENDED: AtomicU64 = AtomicU64::new(0);
static BACKGROUND_BEACONS: AtomicU64 = AtomicU64::new(0);

pub fn inc_packets_sent() {
    PACKETS_SENT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_send_failures() {
    SEND_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_packets_received() {
    PACKETS_RECEIVED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_decode_failures() {
    DECODE_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_pairings_completed() {
    PAIRINGS_COMPLETED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_sessions_started() {
    SESSIONS_STARTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_sessions_ended() {
    SESSIONS_ENDED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_background_beacons() {
    BACKGROUND_BEACONS.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub packets_sent: u64,
    pub send_failures: u64,
    pub packets_received: u64,
    pub decode_failures: u64,
    pub pairings_completed: u64,
    pub sessions_started: u64,
    pub sessions_ended: u64,
    pub background_beacons: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        packets_sent: PACKETS_SENT.load(Ordering::Relaxed),
        send_failures: SEND_FAILURES.load(Ordering::Relaxed),
        packets_received: PACKETS_RECEIVED.load(Ordering::Relaxed),
        decode_failures: DECODE_FAILURES.load(Ordering::Relaxed),
        pairings_completed: PAIRINGS_COMPLETED.load(Ordering::Relaxed),
        sessions_started: SESSIONS_STARTED.load(Ordering::Relaxed),
        sessions_ended: SESSIONS_ENDED.load(Ordering::Relaxed),
        background_beacons: BACKGROUND_BEACONS.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Counters are global and tests run in parallel, so only assert monotonic growth.
    #[test]
    fn counters_only_grow() {
        let before = snapshot();
        inc_packets_sent();
        inc_decode_failures();
        inc_sessions_ended();
        let after = snapshot();
        assert!(after.packets_sent > before.packets_sent);
        assert!(after.decode_failures > before.decode_failures);
        assert!(after.sessions_ended > before.sessions_ended);
        assert!(after.pairings_completed >= before.pairings_completed);
    }
}
