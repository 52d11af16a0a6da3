//! Session controller: sets up both endpoints, runs one probe session and
//! reports it.

use crate::cancel::{CancelReason, CancelToken};
use crate::ping::correlator::{ProbeCorrelator, ProbeMatcher, Sample, Termination};
use crate::ping::counters::{CounterSnapshot, SessionCounters};
use crate::ping::emitter::{EmitterSettings, ProbeEmitter};
use crate::ping::error::{PingError, Result};
use crate::ping::probe::{SequenceNumber, SessionTag};
use crate::ping::progress::SetupSpinner;
use crate::ping::reporter::{Reporter, Route};
use crate::ping::statistics::Statistics;
use crate::ping::waiter::{EventWaiter, InboxIdle};
use crate::relay::{AccountId, MessagingClient};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct PingOptions {
    pub relay1: String,
    pub relay2: String,
    pub count: u64,
    pub interval: Duration,
    pub grace: Duration,
    pub quiet: bool,
    pub percentiles: bool,
    pub color: bool,
}

/// Process exit status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Every transmitted probe came back.
    Success,
    Loss,
    Interrupted,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Loss => 1,
            ExitStatus::Interrupted => 2,
        }
    }
}

/// Result of a session that got as far as probing.
#[derive(Debug, Clone)]
pub struct PingOutcome {
    pub counters: CounterSnapshot,
    /// Round-trip milliseconds by sequence.
    pub samples: BTreeMap<SequenceNumber, f64>,
    pub cancelled: Option<CancelReason>,
    /// Set when the emitter stopped on a send failure. A truncated run never
    /// counts as a success.
    pub emitter_error: Option<String>,
}

impl PingOutcome {
    pub fn exit_status(&self) -> ExitStatus {
        if self.cancelled == Some(CancelReason::Interrupted) {
            ExitStatus::Interrupted
        } else if self.counters.is_complete() && self.emitter_error.is_none() {
            ExitStatus::Success
        } else {
            ExitStatus::Loss
        }
    }
}

/// Resolves relay domains to started accounts.
pub struct AccountMaker<'a, C: MessagingClient + ?Sized> {
    client: &'a C,
    online: Vec<AccountId>,
}

impl<'a, C: MessagingClient + ?Sized> AccountMaker<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self {
            client,
            online: Vec::new(),
        }
    }

    pub fn online(&self) -> &[AccountId] {
        &self.online
    }

    /// Reuse a configured account on `domain` that is not yet in use, or
    /// create one, then start its I/O. Returns the account and its address.
    pub fn get_relay_account<W: Write>(
        &mut self,
        domain: &str,
        out: &mut W,
    ) -> Result<(AccountId, String)> {
        let (account, addr) = match self.find_unused(domain)? {
            Some(found) => found,
            None => {
                writeln!(out, "# creating account on {}", domain)?;
                let account = self.client.add_account()?;
                self.client
                    .configure_from_qr(account, &format!("dcaccount:{}", domain))?;
                let addr = self.client.configured_addr(account)?.ok_or_else(|| {
                    PingError::Account(format!(
                        "account {} has no address after configuring on {}",
                        account, domain
                    ))
                })?;
                (account, addr)
            }
        };

        self.client.start_io(account)?;
        self.online.push(account);
        info!(account = %account, addr = %addr, "Account started");
        Ok((account, addr))
    }

    fn find_unused(&self, domain: &str) -> Result<Option<(AccountId, String)>> {
        for account in self.client.account_ids()? {
            if self.online.contains(&account) {
                continue;
            }
            if let Some(addr) = self.client.configured_addr(account)? {
                if addr.rsplit_once('@').map(|(_, d)| d) == Some(domain) {
                    debug!(account = %account, addr = %addr, "Reusing account");
                    return Ok(Some((account, addr)));
                }
            }
        }
        Ok(None)
    }

    /// Block until every started account reports a listening inbox.
    pub fn wait_all_online(&self, cancel: &CancelToken, spinner: &SetupSpinner) -> Result<()> {
        for &account in self.online.iter().rev() {
            spinner.set_message(format!("waiting for account {} to come online", account));
            EventWaiter::new(self.client, account, cancel.clone()).wait(&mut InboxIdle)?;
            debug!(account = %account, "Account online");
        }
        Ok(())
    }

    pub fn stop_all(&self) {
        for &account in &self.online {
            if let Err(e) = self.client.stop_io(account) {
                warn!(account = %account, error = %e, "Failed to stop account I/O");
            }
        }
    }
}

pub struct Session<C: MessagingClient + ?Sized> {
    client: Arc<C>,
    options: PingOptions,
    cancel: CancelToken,
}

impl<C: MessagingClient + ?Sized + 'static> Session<C> {
    /// `cancel` is the session's interrupt token; the watchdog fires it too.
    pub fn new(client: Arc<C>, options: PingOptions, cancel: CancelToken) -> Self {
        Self {
            client,
            options,
            cancel,
        }
    }

    /// Run one session, writing the report to `out`.
    ///
    /// Cancellation during setup surfaces as [`PingError::Cancelled`]; once
    /// probing has started it ends the session early and is recorded in the
    /// outcome instead.
    pub fn run<W: Write>(&self, out: &mut W) -> Result<PingOutcome> {
        let mut maker = AccountMaker::new(&*self.client);
        let result = self.run_with(&mut maker, out);
        maker.stop_all();
        result
    }

    fn run_with<W: Write>(
        &self,
        maker: &mut AccountMaker<'_, C>,
        out: &mut W,
    ) -> Result<PingOutcome> {
        let options = &self.options;
        let spinner = SetupSpinner::new(options.quiet)?;
        spinner.set_message(format!("resolving accounts on {}", options.relay1));
        let (sender, addr1) = maker.get_relay_account(&options.relay1, out)?;
        let (receiver, addr2) = maker.get_relay_account(&options.relay2, out)?;
        maker.wait_all_online(&self.cancel, &spinner)?;
        spinner.finish();

        self.client.create_chat(receiver, &addr1)?;
        let outbound = self.client.create_chat(sender, &addr2)?;

        let reporter = Reporter::new(Route::new(&addr1, &addr2)?)
            .with_color(options.color)
            .with_percentiles(options.percentiles);
        reporter.print_header(out, options.count, options.interval.as_secs_f64())?;

        let tag = SessionTag::generate();
        let counters = SessionCounters::new();
        let shutdown = CancelToken::new();
        debug!(tag = %tag, "Starting probe session");

        let emitter = ProbeEmitter::new(
            Arc::clone(&self.client),
            sender,
            outbound,
            tag.clone(),
            counters.clone(),
            EmitterSettings {
                count: options.count,
                interval: options.interval,
                grace: options.grace,
            },
            self.cancel.clone(),
            shutdown.clone(),
        )
        .spawn()?;

        let mut correlator = ProbeCorrelator::new(
            EventWaiter::new(&*self.client, receiver, self.cancel.clone()),
            ProbeMatcher::new(tag),
            counters.clone(),
            options.count,
        );
        let mut samples = BTreeMap::new();
        let printed = Self::collect(&reporter, &mut correlator, &mut samples, out);

        if !emitter.is_finished() {
            debug!("Stopping probe emitter");
        }
        shutdown.cancel(CancelReason::Shutdown);
        let emitter_error = emitter.join().err().map(|e| e.to_string());
        printed?;

        match correlator.into_termination() {
            Some(Termination::Failed(e)) => error!(error = %e, "Correlation aborted"),
            Some(Termination::StreamClosed) => warn!("Event stream ended before all probes returned"),
            Some(Termination::Cancelled(reason)) => info!(reason = %reason, "Probing stopped early"),
            Some(Termination::Completed) | None => {}
        }

        let snapshot = counters.snapshot();
        let latencies: Vec<f64> = samples.values().copied().collect();
        let stats = Statistics::new(&latencies)?;
        reporter.print_summary(out, snapshot, &stats)?;

        Ok(PingOutcome {
            counters: snapshot,
            samples,
            cancelled: self.cancel.reason(),
            emitter_error,
        })
    }

    fn collect<W: Write>(
        reporter: &Reporter,
        samples_in: impl Iterator<Item = Sample>,
        samples: &mut BTreeMap<SequenceNumber, f64>,
        out: &mut W,
    ) -> Result<()> {
        for sample in samples_in {
            reporter.print_sample(out, &sample)?;
            samples.insert(sample.sequence, sample.round_trip_ms);
        }
        Ok(())
    }
}
