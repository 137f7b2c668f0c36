// ABOUTME: Polling cadence, timeouts and rate limit for status checks.
// ABOUTME: Durations are written humantime-style ("5s", "30m").

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollingConfig {
    /// Delay between stack and table status polls.
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Delay between stack event polls.
    #[serde(default = "default_event_interval", with = "humantime_serde")]
    pub event_interval: Duration,

    #[serde(default = "default_stability_timeout", with = "humantime_serde")]
    pub stability_timeout: Duration,

    /// `null` waits for indexes without limit.
    #[serde(default = "default_readiness_timeout", with = "humantime_serde")]
    pub readiness_timeout: Option<Duration>,

    /// Upper bound on table status checks across all tables of a step.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

fn default_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_event_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_stability_timeout() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_readiness_timeout() -> Option<Duration> {
    Some(Duration::from_secs(30 * 60))
}

fn default_requests_per_minute() -> u32 {
    60
}

impl Default for PollingConfig {
    fn default() -> Self {
        PollingConfig {
            interval: default_interval(),
            event_interval: default_event_interval(),
            stability_timeout: default_stability_timeout(),
            readiness_timeout: default_readiness_timeout(),
            requests_per_minute: default_requests_per_minute(),
        }
    }
}
