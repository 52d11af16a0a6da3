use crate::cancel::CancelToken;
use crate::relay::error::Result;
use crate::relay::event::{AccountId, ChatId, Event, MsgId};

/// Text snapshot of a stored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSnapshot {
    pub id: MsgId,
    pub text: String,
}

/// Operations the prober needs from a messaging client.
///
/// Implementations must tolerate concurrent calls: the emitter thread sends
/// while the foreground thread is blocked in [`MessagingClient::next_event`].
pub trait MessagingClient: Send + Sync {
    /// All accounts known to the client.
    fn account_ids(&self) -> Result<Vec<AccountId>>;

    /// Create a fresh, unconfigured account.
    fn add_account(&self) -> Result<AccountId>;

    /// The configured address (`user@domain`), if the account is configured.
    fn configured_addr(&self, account: AccountId) -> Result<Option<String>>;

    /// Provision the account from a QR payload such as `dcaccount:example.org`.
    fn configure_from_qr(&self, account: AccountId, qr: &str) -> Result<()>;

    /// Start background I/O. Readiness is reported later as
    /// [`Event::ImapInboxIdle`].
    fn start_io(&self, account: AccountId) -> Result<()>;

    fn stop_io(&self, account: AccountId) -> Result<()>;

    /// Create (or look up) a one-to-one chat with `peer_addr`.
    fn create_chat(&self, account: AccountId, peer_addr: &str) -> Result<ChatId>;

    /// Queue `text` for delivery. Delivery outcome arrives as an event.
    fn send_text(&self, account: AccountId, chat: ChatId, text: &str) -> Result<MsgId>;

    fn message(&self, account: AccountId, msg: MsgId) -> Result<MessageSnapshot>;

    /// Block until the next event for `account` arrives.
    ///
    /// Returns `Ok(None)` once `cancel` fires and
    /// [`RelayError::Closed`](crate::relay::RelayError::Closed) when the
    /// stream has ended.
    fn next_event(&self, account: AccountId, cancel: &CancelToken) -> Result<Option<Event>>;
}


#[cfg(test)]
pub(crate) use tests::MockMessagingClient;
