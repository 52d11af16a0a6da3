//! Probe engine: emits tagged probes, correlates their arrival and reports
//! round-trip statistics.

pub mod config;
pub mod constants;
pub mod correlator;
pub mod counters;
pub mod emitter;
pub mod error;
pub mod logging;
pub mod probe;
pub mod progress;
pub mod reporter;
pub mod session;
pub mod statistics;
pub mod waiter;

pub use config::Config;
pub use constants::*;
pub use correlator::{ProbeCorrelator, ProbeMatcher, Sample, Termination};
pub use counters::{CounterSnapshot, SessionCounters};
pub use emitter::{EmitterHandle, EmitterSettings, ProbeEmitter};
pub use error::{PingError, Result};
pub use logging::{init_logging_with_config, level_for_verbosity};
pub use probe::{unix_now, ParsedProbe, Probe, SequenceNumber, SessionTag};
pub use progress::SetupSpinner;
pub use reporter::{Reporter, Route};
pub use session::{AccountMaker, ExitStatus, PingOptions, PingOutcome, Session};
pub use statistics::Statistics;
pub use waiter::{ChatModifiedIn, EventMatcher, EventWaiter, HandshakeComplete, InboxIdle};
