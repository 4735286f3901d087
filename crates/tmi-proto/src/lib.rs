//! # tmi-proto
//!
//! Parsing and serialization for the Twitch Messaging Interface, the
//! IRC-style protocol chat clients speak, with support for IRCv3 message
//! tags and the Twitch-specific event vocabulary.
//!
//! ## Features
//!
//! - Line parsing with tags, prefixes, commands, and parameters
//! - Typed inbound/outbound chat events via [`EventCodec`]
//! - Tag-derived sender metadata (rank, flags, emote ranges)
//! - Optional Tokio integration for async framing
//!
//! ## Quick Start
//!
//! ```rust
//! use tmi_proto::{EventCodec, InboundEvent, ProtocolEvent};
//!
//! let codec = EventCodec::new("mybot");
//! let raw = "@display-name=Foo :foo!foo@foo.tmi.twitch.tv PRIVMSG #chan :hello";
//! match codec.decode(raw).unwrap() {
//!     Some(ProtocolEvent::Event(InboundEvent::Text(text))) => {
//!         assert_eq!(text.room, "chan");
//!         assert_eq!(text.user.name, "Foo");
//!     }
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod error;
pub mod event;
#[cfg(feature = "tokio")]
pub mod line;
pub mod message;
pub mod tags;
pub mod user;

pub use error::ProtocolError;
pub use event::{
    normalize_room, wire_room, Capability, ClearChatEvent, EventCodec, InboundEvent,
    OutboundEvent, ProtocolEvent, RoomStateEvent, SubscriberNoticeEvent, TextEvent,
};
#[cfg(feature = "tokio")]
pub use line::{LineCodec, MAX_LINE_LEN};
pub use message::{Message, Prefix, Tag};
pub use user::{EmoteMarker, EmoteMarkers, FlagState, Rank, User};
