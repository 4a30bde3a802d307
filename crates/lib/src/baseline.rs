//! Per-device behavioral baselines.
//!
//! A [`DeviceBaseline`] is the rolling profile the detection engine judges
//! new activity against: which hours a device is normally active and how
//! much data it normally moves. Baselines are created lazily on a device's
//! first event and updated after every event, whether or not the event
//! raised an incident. Each device's baseline is isolated; one device's
//! habits never influence another's.
//!
//! Smoothing is an exponential moving average over access volume and a
//! per-hour observation histogram, both tunable through [`BaselineConfig`].

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::{clock::Clock, telemetry::DeviceEvent};

/// Tunables for baseline learning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineConfig {
    /// Events required before a baseline is trusted over the global
    /// business-hours fallback.
    pub min_samples: u64,
    /// EMA smoothing factor for access volume, in (0, 1]. Higher values
    /// weight recent events more.
    pub ema_alpha: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            min_samples: 5,
            ema_alpha: 0.3,
        }
    }
}

/// Rolling behavioral profile for one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceBaseline {
    /// The device this profile belongs to.
    pub device_id: String,
    /// Observation count per hour of day.
    pub hour_counts: [u64; 24],
    /// Total events observed.
    pub sample_count: u64,
    /// Smoothed typical data-access volume in bytes, once observed.
    pub volume_ema: Option<f64>,
    /// When the baseline last changed.
    pub last_updated: DateTime<Utc>,
}

impl DeviceBaseline {
    /// Create an empty baseline for a device.
    pub fn new(device_id: impl Into<String>, clock: &dyn Clock) -> Self {
        Self {
            device_id: device_id.into(),
            hour_counts: [0; 24],
            sample_count: 0,
            volume_ema: None,
            last_updated: clock.now_utc(),
        }
    }

    /// Fold one event into the profile.
    pub fn observe(&mut self, event: &DeviceEvent, config: &BaselineConfig, clock: &dyn Clock) {
        if let Some(access_time) = event.access_time {
            let hour = access_time.hour() as usize;
            self.hour_counts[hour] += 1;
        }
        if let Some(volume) = event.data_access_volume {
            let volume = volume as f64;
            self.volume_ema = Some(match self.volume_ema {
                Some(ema) => config.ema_alpha * volume + (1.0 - config.ema_alpha) * ema,
                None => volume,
            });
        }
        self.sample_count += 1;
        self.last_updated = clock.now_utc();
    }

    /// Whether enough samples have accumulated to trust this baseline.
    pub fn is_established(&self, config: &BaselineConfig) -> bool {
        self.sample_count >= config.min_samples
    }

    /// Judge an hour against this device's own learned distribution.
    ///
    /// An hour is typical when its share of observed activity is at least
    /// `(1 - pattern_threshold)` of the device's busiest hour's share. A
    /// previously unusual hour that keeps recurring therefore grows into
    /// the new normal for this device alone.
    pub fn hour_is_typical(&self, hour: u32, pattern_threshold: f64) -> bool {
        let total: u64 = self.hour_counts.iter().sum();
        if total == 0 {
            return false;
        }
        let peak = *self.hour_counts.iter().max().unwrap_or(&0);
        if peak == 0 {
            return false;
        }
        let share = self.hour_counts[hour as usize % 24] as f64 / total as f64;
        let peak_share = peak as f64 / total as f64;
        share >= (1.0 - pattern_threshold.clamp(0.0, 1.0)) * peak_share
    }

    /// The device's smoothed typical volume, if any volume was ever seen.
    pub fn typical_volume(&self) -> Option<f64> {
        self.volume_ema
    }
}
