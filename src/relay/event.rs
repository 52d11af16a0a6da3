//! Events delivered by the messaging client.
//!
//! The wire shape is the one emitted by `deltachat-rpc-server`:
//! `{"kind": "IncomingMsg", "chatId": 12, "msgId": 34}`.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_type!(
    /// A profile managed by the messaging client.
    AccountId
);
id_type!(ChatId);
id_type!(MsgId);
id_type!(ContactId);

/// Secure-join progress value that marks a completed handshake.
pub const JOINER_PROGRESS_DONE: u16 = 1000;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all_fields = "camelCase")]
pub enum Event {
    Info {
        msg: String,
    },
    Warning {
        msg: String,
    },
    /// Transport-level error reported by the client.
    Error {
        msg: String,
    },
    IncomingMsg {
        chat_id: ChatId,
        msg_id: MsgId,
    },
    /// An outgoing message could not be delivered.
    MsgFailed {
        chat_id: ChatId,
        msg_id: MsgId,
    },
    /// The inbox is connected and listening.
    ImapInboxIdle,
    ConfigureProgress {
        progress: u16,
        #[serde(default)]
        comment: Option<String>,
    },
    SecurejoinJoinerProgress {
        contact_id: ContactId,
        progress: u16,
    },
    ChatModified {
        chat_id: ChatId,
    },
    #[serde(other)]
    Other,
}

/// An event tagged with the account it belongs to.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountEvent {
    pub context_id: AccountId,
    pub event: Event,
}
