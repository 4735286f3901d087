//! Cloneable facade over the send queue.
//!
//! Plugins and room actors never touch the queue directly; they get a
//! [`Sender`] that knows how to render chat and moderation requests.
//! Moderation helpers are plain chat commands sent to the room, using the
//! `.`-prefixed form so the line cannot be confused with a message.

use std::sync::Arc;

use tmi_proto::{Message, OutboundEvent};

use crate::queue::{Receipt, SendQueue};

/// Handle for producing outbound traffic.
#[derive(Clone)]
pub struct Sender {
    queue: Arc<SendQueue>,
}

impl Sender {
    /// Wrap a queue.
    pub fn new(queue: Arc<SendQueue>) -> Self {
        Sender { queue }
    }

    /// Queue a pre-built message.
    pub fn raw(&self, message: Message) -> Receipt {
        self.queue.push(OutboundEvent::Raw(message))
    }

    /// Queue a chat message to a room.
    pub fn say(&self, room: &str, text: impl Into<String>) -> Receipt {
        self.queue.push(OutboundEvent::Text {
            room: room.to_owned(),
            text: text.into(),
        })
    }

    /// Queue a reply addressed to a user by name.
    pub fn respond(&self, room: &str, user: &str, text: impl AsRef<str>) -> Receipt {
        self.say(room, format!("{user}, {}", text.as_ref()))
    }

    /// Permanently ban a user from a room.
    pub fn ban(&self, room: &str, user: &str) -> Receipt {
        self.say(room, format!(".ban {user}"))
    }

    /// Time a user out for `seconds` seconds.
    pub fn timeout(&self, room: &str, user: &str, seconds: u32) -> Receipt {
        self.say(room, format!(".timeout {user} {seconds}"))
    }

    /// Clear a room's chat.
    pub fn clear_chat(&self, room: &str) -> Receipt {
        self.say(room, ".clear")
    }
}
