//! Collaborator contracts the engine is constructed with, plus simple implementations
//! used by the simulator, the CLI and the tests.
//!
//! Every query here is a non-blocking snapshot. Implementations that need to be observed or
//! steered from outside the engine (`ManualClock`, `StaticSensors`, `MemoryGps`) are cheap
//! handles over shared state: clone one, box the clone into the engine, keep the other.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info};

use super::Millis;
use crate::logutil::escape_log;
use crate::mesh::NodeId;

/// Monotonic time plus wall-clock seconds for telemetry stamps.
pub trait Clock: Send {
    fn now_ms(&self) -> Millis;
    fn unix_time(&self) -> u32;
}

/// Real time: monotonic from construction, wall clock from `chrono`.
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> Millis {
        self.start.elapsed().as_millis() as Millis
    }

    fn unix_time(&self) -> u32 {
        chrono::Utc::now().timestamp().max(0) as u32
    }
}

/// Hand-advanced clock. Wall time is a fixed epoch plus elapsed seconds.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    const EPOCH: u32 = 1_760_000_000;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: Millis) {
        self.now.fetch_add(ms, Ordering::Relaxed);
    }

    pub fn set(&self, ms: Millis) {
        self.now.store(ms, Ordering::Relaxed);
    }

    pub fn now(&self) -> Millis {
        self.now.load(Ordering::Relaxed)
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Millis {
        self.now()
    }

    fn unix_time(&self) -> u32 {
        Self::EPOCH.saturating_add((self.now() / 1000) as u32)
    }
}

/// A position fix in the wire's fixed-point format (degrees × 1e7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpsFix {
    pub latitude_i: i32,
    pub longitude_i: i32,
    pub sats_in_view: u32,
}

impl GpsFix {
    pub fn from_degrees(lat: f64, lon: f64, sats: u32) -> Self {
        Self {
            latitude_i: (lat * 1e7).round() as i32,
            longitude_i: (lon * 1e7).round() as i32,
            sats_in_view: sats,
        }
    }
}

/// GPS, battery and heading readings.
pub trait Sensors: Send {
    /// `None` when there is no fix.
    fn gps_fix(&self) -> Option<GpsFix>;
    fn battery_percent(&self) -> u8;
    /// `None` when no calibrated heading is available.
    fn heading_degrees(&self) -> Option<f32>;
}

#[derive(Debug, Clone, Copy)]
struct Readings {
    fix: Option<GpsFix>,
    battery: u8,
    heading: Option<f32>,
}

/// Sensors whose readings are set by hand.
#[derive(Clone)]
pub struct StaticSensors {
    readings: Arc<Mutex<Readings>>,
}

impl StaticSensors {
    /// No fix, full battery, no heading.
    pub fn new() -> Self {
        Self {
            readings: Arc::new(Mutex::new(Readings {
                fix: None,
                battery: 100,
                heading: None,
            })),
        }
    }

    pub fn with_fix(self, fix: GpsFix) -> Self {
        self.set_fix(Some(fix));
        self
    }

    pub fn set_fix(&self, fix: Option<GpsFix>) {
        if let Ok(mut r) = self.readings.lock() {
            r.fix = fix;
        }
    }

    pub fn set_battery(&self, percent: u8) {
        if let Ok(mut r) = self.readings.lock() {
            r.battery = percent.min(100);
        }
    }

    pub fn set_heading(&self, heading: Option<f32>) {
        if let Ok(mut r) = self.readings.lock() {
            r.heading = heading;
        }
    }
}

impl Default for StaticSensors {
    fn default() -> Self {
        Self::new()
    }
}

impl Sensors for StaticSensors {
    fn gps_fix(&self) -> Option<GpsFix> {
        self.readings.lock().ok().and_then(|r| r.fix)
    }

    fn battery_percent(&self) -> u8 {
        self.readings.lock().map(|r| r.battery).unwrap_or(0)
    }

    fn heading_degrees(&self) -> Option<f32> {
        self.readings.lock().ok().and_then(|r| r.heading)
    }
}

/// The device-wide GPS update interval setting.
pub trait GpsControl: Send {
    fn update_interval_secs(&self) -> u32;
    fn set_update_interval_secs(&mut self, secs: u32);
}

/// In-memory GPS interval that counts writes.
#[derive(Clone)]
pub struct MemoryGps {
    interval: Arc<AtomicU32>,
    writes: Arc<AtomicU32>,
}

impl MemoryGps {
    pub fn new(interval_secs: u32) -> Self {
        Self {
            interval: Arc::new(AtomicU32::new(interval_secs)),
            writes: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn interval(&self) -> u32 {
        self.interval.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> u32 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl GpsControl for MemoryGps {
    fn update_interval_secs(&self) -> u32 {
        self.interval()
    }

    fn set_update_interval_secs(&mut self, secs: u32) {
        self.interval.store(secs, Ordering::Relaxed);
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}

/// A yes/no question put to the user about a pairing candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct ChoicePrompt {
    pub candidate: NodeId,
    pub title: String,
    pub options: Vec<String>,
    pub timeout: Duration,
}

impl ChoicePrompt {
    pub fn pairing(candidate: NodeId, timeout: Duration) -> Self {
        Self {
            candidate,
            title: format!("Pair with {}?", candidate),
            options: vec!["Yes".to_string(), "No".to_string()],
            timeout,
        }
    }
}

/// Display side of the device.
///
/// `show_choice` must not block. The answer is collected later by the engine through
/// `poll_choice`, which returns `Some(accepted)` once the user has decided.
pub trait Ui: Send {
    fn request_redraw(&mut self);
    fn regenerate_frames(&mut self, focus: bool);
    fn show_banner(&mut self, text: &str, duration: Duration);
    fn show_choice(&mut self, prompt: &ChoicePrompt);
    fn dismiss_choice(&mut self);
    fn poll_choice(&mut self) -> Option<bool>;
}

/// Headless UI that logs banners and optionally answers every prompt the same way.
pub struct LogUi {
    label: String,
    auto_answer: Option<bool>,
    pending: bool,
}

impl LogUi {
    pub fn new(auto_answer: Option<bool>) -> Self {
        Self {
            label: String::from("ui"),
            auto_answer,
            pending: false,
        }
    }

    /// Prefix for log lines, handy when several engines share one log.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

impl Ui for LogUi {
    fn request_redraw(&mut self) {}

    fn regenerate_frames(&mut self, focus: bool) {
        debug!("{}: regenerate frames (focus={})", self.label, focus);
    }

    fn show_banner(&mut self, text: &str, duration: Duration) {
        info!(
            "{}: banner \"{}\" ({} ms)",
            self.label,
            escape_log(text),
            duration.as_millis()
        );
    }

    fn show_choice(&mut self, prompt: &ChoicePrompt) {
        info!("{}: prompt \"{}\"", self.label, escape_log(&prompt.title));
        self.pending = true;
    }

    fn dismiss_choice(&mut self) {
        self.pending = false;
    }

    fn poll_choice(&mut self) -> Option<bool> {
        if !self.pending {
            return None;
        }
        let answer = self.auto_answer?;
        self.pending = false;
        info!(
            "{}: prompt answered {}",
            self.label,
            if answer { "yes" } else { "no" }
        );
        Some(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_handles_are_shared() {
        let clock = ManualClock::new();
        let boxed: Box<dyn Clock> = Box::new(clock.clone());
        clock.advance(1500);
        assert_eq!(boxed.now_ms(), 1500);
        assert_eq!(boxed.unix_time(), ManualClock::EPOCH + 1);
    }

    #[test]
    fn gps_fix_from_degrees_rounds_to_fixed_point() {
        let fix = GpsFix::from_degrees(37.7749, -122.4194, 7);
        assert_eq!(fix.latitude_i, 377_749_000);
        assert_eq!(fix.longitude_i, -1_224_194_000);
    }

    #[test]
    fn log_ui_answers_only_pending_prompts() {
        let mut ui = LogUi::new(Some(false));
        assert_eq!(ui.poll_choice(), None);
        ui.show_choice(&ChoicePrompt::pairing(NodeId(7), Duration::from_secs(20)));
        assert_eq!(ui.poll_choice(), Some(false));
        assert_eq!(ui.poll_choice(), None);
    }

    #[test]
    fn log_ui_without_auto_answer_keeps_waiting() {
        let mut ui = LogUi::new(None);
        ui.show_choice(&ChoicePrompt::pairing(NodeId(7), Duration::from_secs(20)));
        assert_eq!(ui.poll_choice(), None);
        ui.dismiss_choice();
        assert_eq!(ui.poll_choice(), None);
    }

    #[test]
    fn memory_gps_counts_writes() {
        let gps = MemoryGps::new(120);
        let mut handle = gps.clone();
        handle.set_update_interval_secs(2);
        assert_eq!(gps.interval(), 2);
        assert_eq!(gps.write_count(), 1);
    }
}
