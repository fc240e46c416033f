//! Exponential backoff with jitter for the reconnecting client.

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Delay schedule: `initial`, then multiplied by `factor` per failed attempt,
/// capped at `max`, each delay jittered by a uniform `+-jitter` fraction.
/// A successful handshake resets the schedule.
#[derive(Debug)]
pub(crate) struct Backoff {
    config: ReconnectConfig,
    /// Un-jittered seconds of the last delay handed out.
    current: Option<f64>,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        Backoff {
            config,
            current: None,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let base = match self.current {
            None => self.config.initial_delay.as_secs_f64(),
            Some(previous) => {
                (previous * self.config.factor).min(self.config.max_delay.as_secs_f64())
            }
        };
        self.current = Some(base);
        let jittered = base * (1.0 + self.config.jitter * (2.0 * rand::random::<f64>() - 1.0));
        Duration::from_secs_f64(jittered.max(0.0))
    }

    pub fn reset(&mut self) {
        self.current = None;
    }
}
