//! Boundary to the messaging client that owns accounts, transport and
//! encryption.

pub mod client;
pub mod error;
pub mod event;
pub mod rpc;

pub use client::{MessageSnapshot, MessagingClient};
pub use error::{RelayError, Result};
pub use event::{AccountEvent, AccountId, ChatId, ContactId, Event, MsgId, JOINER_PROGRESS_DONE};
pub use rpc::RpcClient;

#[cfg(test)]
pub(crate) use client::MockMessagingClient;
