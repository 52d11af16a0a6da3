//! Correlates inbound messages with this session's probes.

use crate::cancel::CancelReason;
use crate::ping::counters::SessionCounters;
use crate::ping::error::PingError;
use crate::ping::probe::{unix_now, ParsedProbe, SequenceNumber, SessionTag};
use crate::ping::waiter::{EventMatcher, EventWaiter};
use crate::relay::{Event, MessageSnapshot, MessagingClient};
use std::collections::HashSet;
use tracing::{debug, trace, warn};

/// A probe that made the round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub sequence: SequenceNumber,
    pub round_trip_ms: f64,
    /// Length of the received message text in bytes
    pub size: usize,
}

/// Recognises this session's probes among inbound messages.
pub struct ProbeMatcher {
    tag: SessionTag,
    clock: fn() -> f64,
    seen: HashSet<SequenceNumber>,
}

impl ProbeMatcher {
    pub fn new(tag: SessionTag) -> Self {
        Self::with_clock(tag, unix_now)
    }

    /// Use `clock` (Unix seconds) instead of the system time.
    pub fn with_clock(tag: SessionTag, clock: fn() -> f64) -> Self {
        Self {
            tag,
            clock,
            seen: HashSet::new(),
        }
    }

    /// Turn `text` observed at `now` into a sample if it is one of ours.
    ///
    /// Foreign tags, malformed payloads and repeated deliveries of a sequence
    /// already matched are unrelated traffic.
    pub fn match_text(&mut self, text: &str, now: f64) -> Option<Sample> {
        let parsed = ParsedProbe::parse(text)?;
        if parsed.tag != self.tag.as_str() {
            trace!(tag = parsed.tag, "Ignoring probe from another session");
            return None;
        }
        if !self.seen.insert(parsed.sequence) {
            debug!(seq = parsed.sequence.0, "Ignoring duplicate probe delivery");
            return None;
        }
        Some(Sample {
            sequence: parsed.sequence,
            round_trip_ms: (now - parsed.sent_at) * 1000.0,
            size: text.len(),
        })
    }
}

impl EventMatcher for ProbeMatcher {
    type Output = Sample;

    fn try_match(&mut self, event: &Event, message: Option<&MessageSnapshot>) -> Option<Sample> {
        match (event, message) {
            (Event::IncomingMsg { .. }, Some(message)) => {
                let now = (self.clock)();
                self.match_text(&message.text, now)
            }
            _ => None,
        }
    }
}

/// Why a correlator stopped yielding samples.
#[derive(Debug)]
pub enum Termination {
    /// Every expected probe was received.
    Completed,
    Cancelled(CancelReason),
    StreamClosed,
    Failed(PingError),
}

/// Lazy, finite sequence of [`Sample`]s. Stops after `count` samples, on
/// cancellation, or when the event stream fails; see
/// [`ProbeCorrelator::termination`].
pub struct ProbeCorrelator<'a, C: MessagingClient + ?Sized> {
    waiter: EventWaiter<'a, C>,
    matcher: ProbeMatcher,
    counters: SessionCounters,
    num_pending: u64,
    termination: Option<Termination>,
}

impl<'a, C: MessagingClient + ?Sized> ProbeCorrelator<'a, C> {
    pub fn new(
        waiter: EventWaiter<'a, C>,
        matcher: ProbeMatcher,
        counters: SessionCounters,
        count: u64,
    ) -> Self {
        Self {
            waiter,
            matcher,
            counters,
            num_pending: count,
            termination: None,
        }
    }

    pub fn num_pending(&self) -> u64 {
        self.num_pending
    }

    /// `None` while the correlator can still yield samples.
    pub fn termination(&self) -> Option<&Termination> {
        self.termination.as_ref()
    }

    pub fn into_termination(self) -> Option<Termination> {
        self.termination
    }
}

impl<C: MessagingClient + ?Sized> Iterator for ProbeCorrelator<'_, C> {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        if self.termination.is_some() {
            return None;
        }
        if self.num_pending == 0 {
            self.termination = Some(Termination::Completed);
            return None;
        }

        match self.waiter.wait(&mut self.matcher) {
            Ok(sample) => {
                self.counters.increment_received();
                self.num_pending -= 1;
                debug!(
                    seq = sample.sequence.0,
                    round_trip_ms = sample.round_trip_ms,
                    pending = self.num_pending,
                    "Probe received"
                );
                Some(sample)
            }
            Err(PingError::Cancelled(reason)) => {
                debug!(reason = %reason, pending = self.num_pending, "Correlation cancelled");
                self.termination = Some(Termination::Cancelled(reason));
                None
            }
            Err(PingError::StreamClosed) => {
                warn!(pending = self.num_pending, "Event stream closed during correlation");
                self.termination = Some(Termination::StreamClosed);
                None
            }
            Err(e) => {
                warn!(error = %e, pending = self.num_pending, "Correlation failed");
                self.termination = Some(Termination::Failed(e));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::ping::probe::Probe;
    use crate::ping::waiter::scripted_client;
    use crate::relay::{AccountId, ChatId, MockMessagingClient, MsgId};

    const NOW: f64 = 1_700_000_000.05;

    fn fixed_clock() -> f64 {
        NOW
    }

    fn probe_text(tag: &str, seq: u64) -> String {
        Probe::new(SessionTag::from(tag), SequenceNumber(seq), 1_700_000_000.0).encode()
    }

    /// Mock delivering one incoming message per text, then closing.
    fn inbox(texts: Vec<String>) -> MockMessagingClient {
        let events = (0..texts.len())
            .map(|i| Event::IncomingMsg {
                chat_id: ChatId(1),
                msg_id: MsgId(i as u32),
            })
            .collect();
        let mut client = scripted_client(events);
        client.expect_message().returning(move |_, id| {
            Ok(MessageSnapshot {
                id,
                text: texts[id.0 as usize].clone(),
            })
        });
        client
    }

    fn correlator<'a>(
        client: &'a MockMessagingClient,
        counters: &SessionCounters,
        cancel: CancelToken,
        count: u64,
    ) -> ProbeCorrelator<'a, MockMessagingClient> {
        ProbeCorrelator::new(
            EventWaiter::new(client, AccountId(2), cancel),
            ProbeMatcher::with_clock(SessionTag::from("tag"), fixed_clock),
            counters.clone(),
            count,
        )
    }

    #[test]
    fn test_match_text_computes_round_trip() {
        let mut matcher = ProbeMatcher::new(SessionTag::from("tag"));
        let text = "tag 1700000000.0000 00000000000000003";
        let sample = matcher.match_text(text, 1_700_000_000.05).unwrap();

        assert_eq!(sample.sequence, SequenceNumber(3));
        assert!((sample.round_trip_ms - 50.0).abs() < 1e-3);
        assert_eq!(sample.size, text.len());
    }

    #[test]
    fn test_match_text_ignores_foreign_and_malformed() {
        let mut matcher = ProbeMatcher::new(SessionTag::from("tag"));
        assert!(matcher.match_text("tag 1700000000.0000", NOW).is_none());
        assert!(matcher
            .match_text("other 1700000000.0000 00000000000000003", NOW)
            .is_none());
        assert!(matcher.match_text("hello there", NOW).is_none());
    }

    #[test]
    fn test_duplicate_delivery_counts_once() {
        let mut matcher = ProbeMatcher::new(SessionTag::from("tag"));
        let text = probe_text("tag", 1);
        assert!(matcher.match_text(&text, NOW).is_some());
        assert!(matcher.match_text(&text, NOW).is_none());
    }

    #[test]
    fn test_out_of_order_samples_complete_session() {
        let client = inbox(vec![
            probe_text("tag", 2),
            "unrelated chat traffic".to_string(),
            probe_text("tag", 0),
            probe_text("old", 1),
            probe_text("tag", 1),
        ]);
        let counters = SessionCounters::new();
        let mut correlator = correlator(&client, &counters, CancelToken::new(), 3);

        let sequences: Vec<u64> = correlator.by_ref().map(|s| s.sequence.0).collect();
        assert_eq!(sequences, vec![2, 0, 1]);
        assert_eq!(counters.received(), 3);
        assert_eq!(correlator.num_pending(), 0);
        assert!(matches!(
            correlator.termination(),
            Some(Termination::Completed)
        ));
    }

    #[test]
    fn test_unrelated_traffic_leaves_state_unchanged() {
        let client = inbox(vec![
            "tag 1700000000.0000".to_string(),
            probe_text("nottag", 0),
        ]);
        let counters = SessionCounters::new();
        let mut correlator = correlator(&client, &counters, CancelToken::new(), 2);

        assert_eq!(correlator.next(), None);
        assert_eq!(counters.received(), 0);
        assert_eq!(correlator.num_pending(), 2);
        assert!(matches!(
            correlator.termination(),
            Some(Termination::StreamClosed)
        ));
    }

    #[test]
    fn test_zero_count_terminates_immediately() {
        // No expectations: any call into the client would panic.
        let client = MockMessagingClient::new();
        let counters = SessionCounters::new();
        let mut correlator = correlator(&client, &counters, CancelToken::new(), 0);

        assert_eq!(correlator.next(), None);
        assert!(matches!(
            correlator.into_termination(),
            Some(Termination::Completed)
        ));
    }

    #[test]
    fn test_cancellation_keeps_yielded_samples() {
        let client = inbox(vec![probe_text("tag", 0), probe_text("tag", 1)]);
        let counters = SessionCounters::new();
        let cancel = CancelToken::new();
        let mut correlator = correlator(&client, &counters, cancel.clone(), 5);

        let first = correlator.next().unwrap();
        assert_eq!(first.sequence, SequenceNumber(0));
        cancel.cancel(CancelReason::Interrupted);

        assert_eq!(correlator.next(), None);
        assert_eq!(correlator.next(), None);
        assert_eq!(counters.received(), 1);
        assert!(matches!(
            correlator.termination(),
            Some(Termination::Cancelled(CancelReason::Interrupted))
        ));
    }
}
