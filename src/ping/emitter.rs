//! Background producer of sequenced probes.

use crate::cancel::{CancelReason, CancelToken};
use crate::ping::counters::SessionCounters;
use crate::ping::error::{PingError, Result};
use crate::ping::probe::{unix_now, Probe, SequenceNumber, SessionTag};
use crate::relay::{AccountId, ChatId, MessagingClient};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmitterSettings {
    pub count: u64,
    /// Pause after each send. Not compensated for send latency.
    pub interval: Duration,
    /// Wait after the last probe before the watchdog fires.
    pub grace: Duration,
}

pub struct ProbeEmitter<C: MessagingClient + ?Sized> {
    client: Arc<C>,
    account: AccountId,
    chat: ChatId,
    tag: SessionTag,
    counters: SessionCounters,
    settings: EmitterSettings,
    watchdog: CancelToken,
    shutdown: CancelToken,
}

impl<C: MessagingClient + ?Sized + 'static> ProbeEmitter<C> {
    /// `watchdog` is cancelled with [`CancelReason::WatchdogExpired`] once the
    /// grace window passes; `shutdown` stops the emitter early.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<C>,
        account: AccountId,
        chat: ChatId,
        tag: SessionTag,
        counters: SessionCounters,
        settings: EmitterSettings,
        watchdog: CancelToken,
        shutdown: CancelToken,
    ) -> Self {
        Self {
            client,
            account,
            chat,
            tag,
            counters,
            settings,
            watchdog,
            shutdown,
        }
    }

    pub fn spawn(self) -> Result<EmitterHandle> {
        let handle = thread::Builder::new()
            .name("probe-emitter".into())
            .spawn(move || self.run())?;
        Ok(EmitterHandle { handle })
    }

    fn run(&self) -> Result<()> {
        let sent = self.send_probes();
        if let Err(e) = &sent {
            error!(error = %e, sent = self.counters.sent(), "Probe emission stopped");
        }

        // Arm the watchdog even after a failed send so the correlator does not
        // wait forever for probes that will never exist.
        info!(
            grace_secs = self.settings.grace.as_secs_f64(),
            "All probes sent, arming watchdog"
        );
        if !self.shutdown.wait_timeout(self.settings.grace)
            && self.watchdog.cancel(CancelReason::WatchdogExpired)
        {
            warn!(
                sent = self.counters.sent(),
                received = self.counters.received(),
                "Watchdog expired with probes outstanding"
            );
        }
        sent
    }

    fn send_probes(&self) -> Result<()> {
        for seq in 0..self.settings.count {
            if self.shutdown.is_cancelled() {
                debug!(seq, "Emitter shut down early");
                return Ok(());
            }
            let probe = Probe::new(self.tag.clone(), SequenceNumber(seq), unix_now());
            let msg_id = self.client.send_text(self.account, self.chat, &probe.encode())?;
            self.counters.increment_sent();
            debug!(seq, msg_id = %msg_id, "Probe sent");

            if self.shutdown.wait_timeout(self.settings.interval) {
                return Ok(());
            }
        }
        Ok(())
    }
}

/// Join handle for a running [`ProbeEmitter`].
pub struct EmitterHandle {
    handle: JoinHandle<Result<()>>,
}

impl EmitterHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> Result<()> {
        self.handle
            .join()
            .map_err(|_| PingError::Emitter("emitter thread panicked".into()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ping::probe::ParsedProbe;
    use crate::relay::{MockMessagingClient, MsgId, RelayError};
    use std::sync::Mutex;

    fn settings(count: u64) -> EmitterSettings {
        EmitterSettings {
            count,
            interval: Duration::from_millis(1),
            grace: Duration::from_millis(20),
        }
    }

    fn recording_client(fail_at: Option<usize>) -> (MockMessagingClient, Arc<Mutex<Vec<String>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&sent);
        let mut client = MockMessagingClient::new();
        client.expect_send_text().returning(move |_, _, text| {
            let mut sent = record.lock().unwrap();
            if Some(sent.len()) == fail_at {
                return Err(RelayError::Closed);
            }
            sent.push(text.to_string());
            Ok(MsgId(sent.len() as u32))
        });
        (client, sent)
    }

    fn emitter(
        client: MockMessagingClient,
        counters: &SessionCounters,
        settings: EmitterSettings,
        watchdog: &CancelToken,
        shutdown: &CancelToken,
    ) -> ProbeEmitter<MockMessagingClient> {
        ProbeEmitter::new(
            Arc::new(client),
            AccountId(1),
            ChatId(10),
            SessionTag::from("tag"),
            counters.clone(),
            settings,
            watchdog.clone(),
            shutdown.clone(),
        )
    }

    #[test]
    fn test_probes_sent_in_sequence_then_watchdog_fires() -> Result<()> {
        let (client, sent) = recording_client(None);
        let counters = SessionCounters::new();
        let watchdog = CancelToken::new();
        let shutdown = CancelToken::new();

        emitter(client, &counters, settings(4), &watchdog, &shutdown)
            .spawn()?
            .join()?;

        let sent = sent.lock().unwrap();
        let sequences: Vec<u64> = sent
            .iter()
            .map(|text| {
                let parsed = ParsedProbe::parse(text).unwrap();
                assert_eq!(parsed.tag, "tag");
                parsed.sequence.0
            })
            .collect();
        assert_eq!(sequences, vec![0, 1, 2, 3]);
        assert_eq!(counters.sent(), 4);
        assert_eq!(watchdog.reason(), Some(CancelReason::WatchdogExpired));
        Ok(())
    }

    #[test]
    fn test_send_failure_propagates_and_still_arms_watchdog() {
        let (client, _) = recording_client(Some(2));
        let counters = SessionCounters::new();
        let watchdog = CancelToken::new();
        let shutdown = CancelToken::new();

        let result = emitter(client, &counters, settings(5), &watchdog, &shutdown)
            .spawn()
            .and_then(EmitterHandle::join);

        assert!(matches!(result, Err(PingError::Relay(RelayError::Closed))));
        assert_eq!(counters.sent(), 2);
        assert!(watchdog.is_cancelled());
    }

    #[test]
    fn test_shutdown_disarms_watchdog() -> Result<()> {
        let (client, _) = recording_client(None);
        let counters = SessionCounters::new();
        let watchdog = CancelToken::new();
        let shutdown = CancelToken::new();
        let slow = EmitterSettings {
            count: 1,
            interval: Duration::from_millis(1),
            grace: Duration::from_secs(30),
        };

        let handle = emitter(client, &counters, slow, &watchdog, &shutdown).spawn()?;
        thread::sleep(Duration::from_millis(20));
        shutdown.cancel(CancelReason::Shutdown);
        handle.join()?;

        assert_eq!(counters.sent(), 1);
        assert!(!watchdog.is_cancelled());
        Ok(())
    }

    #[test]
    fn test_zero_count_sends_nothing() -> Result<()> {
        let (client, sent) = recording_client(None);
        let counters = SessionCounters::new();
        let shutdown = CancelToken::new();
        shutdown.cancel(CancelReason::Shutdown);

        emitter(client, &counters, settings(0), &CancelToken::new(), &shutdown)
            .spawn()?
            .join()?;

        assert!(sent.lock().unwrap().is_empty());
        assert_eq!(counters.sent(), 0);
        Ok(())
    }
}
