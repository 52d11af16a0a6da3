use crate::ping::constants::SPINNER_TICK_INTERVAL_MS;
use crate::ping::error::{PingError, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner shown on stderr while accounts come online.
pub struct SetupSpinner {
    pb: ProgressBar,
}

impl SetupSpinner {
    /// A hidden spinner when `quiet` is set, so callers never branch on it.
    pub fn new(quiet: bool) -> Result<Self> {
        if quiet {
            return Ok(Self {
                pb: ProgressBar::hidden(),
            });
        }
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")
                .map_err(|e| PingError::Config(format!("Failed to create spinner style: {}", e)))?
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏✓"),
        );
        pb.enable_steady_tick(Duration::from_millis(SPINNER_TICK_INTERVAL_MS));
        Ok(Self { pb })
    }

    pub fn set_message(&self, msg: impl Into<String>) {
        self.pb.set_message(msg.into());
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

impl Drop for SetupSpinner {
    fn drop(&mut self) {
        if !self.pb.is_finished() {
            self.pb.finish_and_clear();
        }
    }
}
