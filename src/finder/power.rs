//! GPS power mode.
//!
//! The GPS update interval is a device-wide setting shared with everything else on the
//! handset. While a tracking session is live it is dropped to the boosted interval; on
//! teardown the interval that was in force before the boost is put back. Only one boost can
//! be outstanding.

use log::{info, warn};

use super::host::GpsControl;
use crate::config::GpsConfig;

pub struct PowerModeController {
    gps: Box<dyn GpsControl>,
    default_interval: u32,
    boosted_interval: u32,
    boosted: bool,
    remembered: Option<u32>,
}

impl PowerModeController {
    /// Wrap the GPS setting. An interval found at or under the boosted value means a previous
    /// run died mid-session, so it is forced back to the default.
    pub fn new(mut gps: Box<dyn GpsControl>, cfg: &GpsConfig) -> Self {
        let current = gps.update_interval_secs();
        if current <= cfg.boosted_interval_secs {
            warn!(
                "GPS interval {}s looks like a stale boost, restoring {}s",
                current, cfg.default_interval_secs
            );
            gps.set_update_interval_secs(cfg.default_interval_secs);
        }
        Self {
            gps,
            default_interval: cfg.default_interval_secs,
            boosted_interval: cfg.boosted_interval_secs,
            boosted: false,
            remembered: None,
        }
    }

    pub fn activate_high_gps_mode(&mut self) {
        if self.boosted {
            return;
        }
        let current = self.gps.update_interval_secs();
        if current == self.boosted_interval {
            return;
        }
        self.remembered = Some(current);
        self.gps.set_update_interval_secs(self.boosted_interval);
        self.boosted = true;
        info!(
            "GPS boosted: {}s -> {}s",
            current, self.boosted_interval
        );
    }

    pub fn restore_normal_gps_mode(&mut self) {
        if !self.boosted {
            return;
        }
        let interval = self.remembered.take().unwrap_or(self.default_interval);
        self.gps.set_update_interval_secs(interval);
        self.boosted = false;
        info!("GPS restored to {}s", interval);
    }

    pub fn is_boosted(&self) -> bool {
        self.boosted
    }

    pub fn remembered_interval(&self) -> Option<u32> {
        self.remembered
    }

    pub fn current_interval(&self) -> u32 {
        self.gps.update_interval_secs()
    }
}
