//! Tuning knobs for training-data recording and recompilation.

use serde::{Deserialize, Serialize};

/// Configuration shared by the recorder, the archive pipeline, and the
/// recompilation driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Master switch for schedule-driven recompilation.
    pub enable_recompilation: bool,
    /// Recompilation proceeds only while the compile-queue load average is
    /// at or below this value.
    pub load_threshold: f64,
    /// Seconds after driver start before any recompilation is attempted.
    pub delay_seconds: u64,
    /// Recompile scheduled methods even when their current code is not a
    /// top-tier AOT entry.
    pub force_recompilation: bool,
    /// When preparing the schedule, stop at the first zero-sampled method
    /// instead of walking the whole profiler list.
    pub record_only_top_compilations: bool,
    /// Capacity of the load-average sample ring.
    pub load_samples: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            enable_recompilation: true,
            load_threshold: 10.0,
            delay_seconds: 10,
            force_recompilation: false,
            record_only_top_compilations: true,
            load_samples: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TrainingConfig::default();
        assert!(config.enable_recompilation);
        assert!(!config.force_recompilation);
        assert_eq!(config.load_samples, 256);
    }

    #[test]
    fn test_round_trips_through_json() {
        let config = TrainingConfig {
            load_threshold: 3.5,
            delay_seconds: 0,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).expect("serialize");
        let parsed: TrainingConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.load_threshold, 3.5);
        assert_eq!(parsed.delay_seconds, 0);
    }
}
