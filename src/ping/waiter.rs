//! Blocking, matcher-driven consumer of one account's event stream.

use crate::cancel::{CancelReason, CancelToken};
use crate::ping::error::{PingError, Result};
use crate::relay::{
    AccountId, ChatId, ContactId, Event, MessageSnapshot, MessagingClient, MsgId, RelayError,
    JOINER_PROGRESS_DONE,
};
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Decides whether an event ends a [`EventWaiter::wait`] call.
///
/// `message` carries the resolved snapshot for message events, when the
/// client could provide one.
pub trait EventMatcher {
    type Output;

    fn try_match(&mut self, event: &Event, message: Option<&MessageSnapshot>)
        -> Option<Self::Output>;
}

/// Matches once the inbox reports it is listening.
#[derive(Debug, Clone, Copy, Default)]
pub struct InboxIdle;

impl EventMatcher for InboxIdle {
    type Output = ();

    fn try_match(&mut self, event: &Event, _: Option<&MessageSnapshot>) -> Option<()> {
        matches!(event, Event::ImapInboxIdle).then_some(())
    }
}

/// Matches when a secure-join handshake reaches 100%, yielding the inviter.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandshakeComplete;

impl EventMatcher for HandshakeComplete {
    type Output = ContactId;

    fn try_match(&mut self, event: &Event, _: Option<&MessageSnapshot>) -> Option<ContactId> {
        match event {
            Event::SecurejoinJoinerProgress {
                contact_id,
                progress,
            } if *progress >= JOINER_PROGRESS_DONE => Some(*contact_id),
            _ => None,
        }
    }
}

/// Matches the membership confirmation for one chat.
#[derive(Debug, Clone, Copy)]
pub struct ChatModifiedIn(pub ChatId);

impl EventMatcher for ChatModifiedIn {
    type Output = ();

    fn try_match(&mut self, event: &Event, _: Option<&MessageSnapshot>) -> Option<()> {
        matches!(event, Event::ChatModified { chat_id } if *chat_id == self.0).then_some(())
    }
}

pub struct EventWaiter<'a, C: MessagingClient + ?Sized> {
    client: &'a C,
    account: AccountId,
    cancel: CancelToken,
    clock_start: Instant,
}

impl<'a, C: MessagingClient + ?Sized> EventWaiter<'a, C> {
    pub fn new(client: &'a C, account: AccountId, cancel: CancelToken) -> Self {
        Self {
            client,
            account,
            cancel,
            clock_start: Instant::now(),
        }
    }

    /// Pull events until `matcher` accepts one, logging each on the way.
    ///
    /// Blocks indefinitely; only cancellation or the end of the stream stops
    /// it early.
    pub fn wait<M: EventMatcher>(&mut self, matcher: &mut M) -> Result<M::Output> {
        self.clock_start = Instant::now();
        loop {
            if let Some(reason) = self.cancel.reason() {
                return Err(PingError::Cancelled(reason));
            }
            let event = match self.client.next_event(self.account, &self.cancel) {
                Ok(Some(event)) => event,
                Ok(None) => {
                    let reason = self.cancel.reason().unwrap_or(CancelReason::Interrupted);
                    return Err(PingError::Cancelled(reason));
                }
                Err(RelayError::Closed) => return Err(PingError::StreamClosed),
                Err(e) => return Err(e.into()),
            };

            let message = self.classify(&event);
            if let Some(output) = matcher.try_match(&event, message.as_ref()) {
                return Ok(output);
            }
        }
    }

    /// Two-phase join tracking: the handshake completes, then the chat
    /// membership change for `chat` arrives.
    pub fn wait_joined(&mut self, chat: ChatId) -> Result<ContactId> {
        let inviter = self.wait(&mut HandshakeComplete)?;
        debug!(account = %self.account, inviter = %inviter, "Handshake complete");
        self.wait(&mut ChatModifiedIn(chat))?;
        Ok(inviter)
    }

    fn classify(&self, event: &Event) -> Option<MessageSnapshot> {
        match event {
            Event::IncomingMsg { chat_id, msg_id } => {
                let message = self.resolve(*msg_id);
                if let Some(message) = &message {
                    debug!(
                        account = %self.account,
                        chat_id = %chat_id,
                        msg_id = %msg_id,
                        text = %message.text,
                        "Incoming message"
                    );
                }
                message
            }
            Event::MsgFailed { msg_id, .. } => {
                let message = self.resolve(*msg_id);
                let text = message.as_ref().map(|m| m.text.as_str()).unwrap_or_default();
                error!(account = %self.account, msg_id = %msg_id, text, "Message failed");
                message
            }
            Event::Error { msg } => {
                error!(account = %self.account, "{}", msg);
                None
            }
            Event::Info { msg } | Event::Warning { msg } => {
                info!(elapsed_ms = %self.elapsed_ms(), "{}", msg);
                None
            }
            Event::ConfigureProgress { progress, comment } => {
                info!(
                    elapsed_ms = %self.elapsed_ms(),
                    progress,
                    comment = comment.as_deref().unwrap_or_default(),
                    "Configure progress"
                );
                None
            }
            Event::SecurejoinJoinerProgress {
                contact_id,
                progress,
            } => {
                info!(
                    elapsed_ms = %self.elapsed_ms(),
                    contact_id = %contact_id,
                    progress,
                    "Join progress"
                );
                None
            }
            Event::ImapInboxIdle => {
                debug!(account = %self.account, "Inbox idle");
                None
            }
            Event::ChatModified { chat_id } => {
                debug!(account = %self.account, chat_id = %chat_id, "Chat modified");
                None
            }
            Event::Other => {
                trace!(account = %self.account, "Unclassified event");
                None
            }
        }
    }

    fn resolve(&self, msg_id: MsgId) -> Option<MessageSnapshot> {
        match self.client.message(self.account, msg_id) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(account = %self.account, msg_id = %msg_id, error = %e, "Failed to load message");
                None
            }
        }
    }

    fn elapsed_ms(&self) -> String {
        format!("{:07.1}", self.clock_start.elapsed().as_secs_f64() * 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::MockMessagingClient;

    /// Mock whose event stream yields `events` and then closes.
    pub(crate) fn scripted_client(events: Vec<Event>) -> MockMessagingClient {
        let mut client = MockMessagingClient::new();
        let mut events = events.into_iter();
        client
            .expect_next_event()
            .returning(move |_, _| events.next().map(Some).ok_or(RelayError::Closed));
        client
    }

    #[test]
    fn test_wait_skips_unmatched_events() -> Result<()> {
        let client = scripted_client(vec![
            Event::Info {
                msg: "connecting".into(),
            },
            Event::Error {
                msg: "temporary failure".into(),
            },
            Event::ImapInboxIdle,
        ]);
        let mut waiter = EventWaiter::new(&client, AccountId(1), CancelToken::new());
        waiter.wait(&mut InboxIdle)?;
        Ok(())
    }

    #[test]
    fn test_wait_reports_closed_stream() {
        let client = scripted_client(vec![Event::Other]);
        let mut waiter = EventWaiter::new(&client, AccountId(1), CancelToken::new());
        assert!(matches!(
            waiter.wait(&mut InboxIdle),
            Err(PingError::StreamClosed)
        ));
    }

    #[test]
    fn test_wait_returns_cancel_reason() {
        let client = scripted_client(Vec::new());
        let cancel = CancelToken::new();
        cancel.cancel(CancelReason::WatchdogExpired);
        let mut waiter = EventWaiter::new(&client, AccountId(1), cancel);
        assert!(matches!(
            waiter.wait(&mut InboxIdle),
            Err(PingError::Cancelled(CancelReason::WatchdogExpired))
        ));
    }

    #[test]
    fn test_incoming_message_is_resolved_for_matcher() -> Result<()> {
        let mut client = scripted_client(vec![Event::IncomingMsg {
            chat_id: ChatId(3),
            msg_id: MsgId(9),
        }]);
        client.expect_message().times(1).returning(|_, id| {
            Ok(MessageSnapshot {
                id,
                text: "hello".into(),
            })
        });

        struct TextOf;
        impl EventMatcher for TextOf {
            type Output = String;
            fn try_match(&mut self, _: &Event, message: Option<&MessageSnapshot>) -> Option<String> {
                message.map(|m| m.text.clone())
            }
        }

        let mut waiter = EventWaiter::new(&client, AccountId(1), CancelToken::new());
        assert_eq!(waiter.wait(&mut TextOf)?, "hello");
        Ok(())
    }

    #[test]
    fn test_failed_lookup_hands_matcher_no_snapshot() {
        let mut client = scripted_client(vec![Event::IncomingMsg {
            chat_id: ChatId(3),
            msg_id: MsgId(9),
        }]);
        client
            .expect_message()
            .returning(|_, _| Err(RelayError::Protocol("gone".into())));

        let mut seen = None;
        struct Record<'s>(&'s mut Option<bool>);
        impl EventMatcher for Record<'_> {
            type Output = ();
            fn try_match(&mut self, _: &Event, message: Option<&MessageSnapshot>) -> Option<()> {
                *self.0 = Some(message.is_some());
                None
            }
        }

        let mut waiter = EventWaiter::new(&client, AccountId(1), CancelToken::new());
        assert!(waiter.wait(&mut Record(&mut seen)).is_err());
        assert_eq!(seen, Some(false));
    }

    #[test]
    fn test_wait_joined_needs_both_phases() -> Result<()> {
        let client = scripted_client(vec![
            Event::SecurejoinJoinerProgress {
                contact_id: ContactId(5),
                progress: 400,
            },
            Event::ChatModified { chat_id: ChatId(8) },
            Event::SecurejoinJoinerProgress {
                contact_id: ContactId(5),
                progress: JOINER_PROGRESS_DONE,
            },
            Event::ChatModified { chat_id: ChatId(2) },
            Event::ChatModified { chat_id: ChatId(8) },
        ]);
        let mut waiter = EventWaiter::new(&client, AccountId(1), CancelToken::new());
        assert_eq!(waiter.wait_joined(ChatId(8))?, ContactId(5));
        Ok(())
    }
}

#[cfg(test)]
pub(crate) use tests::scripted_client;
