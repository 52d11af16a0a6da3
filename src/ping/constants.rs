//! Constants used throughout the prober

/// Length of the per-session random tag
pub const SESSION_TAG_LEN: usize = 30;

/// Alphabet the session tag is drawn from
pub const SESSION_TAG_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Field width of the sequence number in a probe payload
pub const SEQUENCE_WIDTH: usize = 17;

/// Number of whitespace separated fields in a probe payload
pub const PROBE_FIELD_COUNT: usize = 3;

/// Default number of probes per session
pub const DEFAULT_COUNT: u64 = 30;

/// Default seconds between probes
pub const DEFAULT_INTERVAL_SECS: f64 = 1.1;

/// Seconds the emitter waits after the last probe before firing the watchdog
pub const WATCHDOG_GRACE_SECS: f64 = 60.0;

/// Default RPC server binary
pub const DEFAULT_RPC_SERVER: &str = "deltachat-rpc-server";

/// Directory name under the user cache dir holding prober accounts
pub const ACCOUNTS_DIR_NAME: &str = "cmping";

/// Spinner tick interval in milliseconds
pub const SPINNER_TICK_INTERVAL_MS: u64 = 100;

/// Histogram lower bound in microseconds
pub const HISTOGRAM_LOW_BOUND_US: u64 = 1;

/// Histogram upper bound in microseconds (one hour)
pub const HISTOGRAM_HIGH_BOUND_US: u64 = 3_600_000_000;

/// Histogram significant digits for precision
pub const HISTOGRAM_SIGNIFICANT_DIGITS: u8 = 3;
