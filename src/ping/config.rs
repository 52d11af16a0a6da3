use crate::ping::constants::*;
use crate::ping::error::{PingError, Result};
use crate::ping::logging::level_for_verbosity;
use crate::ping::session::PingOptions;
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

#[derive(Parser, Debug, Clone)]
#[command(name = "cmping")]
#[command(about = "Ping between addresses of specified chatmail relay domains")]
pub struct Config {
    /// Chatmail relay domain
    pub relay1: String,

    /// Chatmail relay domain (defaults to relay1 if not specified)
    pub relay2: Option<String>,

    /// Number of message pings
    #[arg(short = 'c', long, default_value_t = DEFAULT_COUNT)]
    pub count: u64,

    /// Seconds between message sending
    #[arg(short = 'i', long, default_value_t = DEFAULT_INTERVAL_SECS)]
    pub interval: f64,

    /// Increase verbosity
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Seconds to wait for outstanding pings after the last one was sent
    #[arg(long, default_value_t = WATCHDOG_GRACE_SECS)]
    pub grace: f64,

    /// Directory holding the prober's accounts (defaults to the user cache dir)
    #[arg(long)]
    pub accounts_dir: Option<PathBuf>,

    /// RPC server binary to spawn
    #[arg(long, default_value = DEFAULT_RPC_SERVER)]
    pub rpc_server: String,

    /// Hide the setup spinner
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Log format (text or json)
    #[arg(long, default_value = "text", value_parser = ["text", "json"])]
    pub log_format: String,
}

impl Config {
    pub fn relay2(&self) -> &str {
        self.relay2.as_deref().unwrap_or(&self.relay1)
    }

    /// Validates the configuration values
    pub fn validate(&self) -> Result<()> {
        debug!("Validating configuration");
        if self.relay1.trim().is_empty() || self.relay2().trim().is_empty() {
            return Err(PingError::Config("relay domain must not be empty".into()));
        }
        self.interval()?;
        self.grace()?;
        debug!("Configuration validated successfully");
        Ok(())
    }

    /// Resolved accounts directory.
    pub fn accounts_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.accounts_dir {
            return Ok(dir.clone());
        }
        dirs::cache_dir()
            .map(|dir| dir.join(ACCOUNTS_DIR_NAME))
            .ok_or_else(|| {
                PingError::Config("no user cache directory; pass --accounts-dir".into())
            })
    }

    pub fn log_level(&self) -> &'static str {
        level_for_verbosity(self.verbose)
    }

    /// Returns true if JSON format logging is enabled
    pub fn is_json_format(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }

    pub fn interval(&self) -> Result<Duration> {
        seconds("interval", self.interval)
    }

    pub fn grace(&self) -> Result<Duration> {
        seconds("grace", self.grace)
    }

    /// Engine options.
    pub fn ping_options(&self) -> Result<PingOptions> {
        Ok(PingOptions {
            relay1: self.relay1.clone(),
            relay2: self.relay2().to_string(),
            count: self.count,
            interval: self.interval()?,
            grace: self.grace()?,
            quiet: self.quiet,
            percentiles: self.verbose >= 1,
            color: std::io::stdout().is_terminal(),
        })
    }
}

/// Non-negative, finite and representable as a [`Duration`].
fn seconds(name: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| PingError::Config(format!("{} of {} seconds is not usable: {}", name, secs, e)))
}
