//! Typed chat events and the event codec.
//!
//! [`EventCodec`] sits between raw [`Message`] lines and the typed events
//! the bot consumes. Decoding dispatches on the command verb; unknown verbs
//! produce no event. Twitch routes a fair amount of metadata through the
//! pseudo-users `jtv` and `twitchnotify`, whose PRIVMSG bodies carry their
//! own little sub-command grammar, handled here as well.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ProtocolError;
use crate::message::Message;
use crate::user::{FlagState, User};

lazy_static! {
    static ref JUST_SUBSCRIBED: Regex =
        Regex::new(r"^([a-zA-Z0-9_]+) just subscribed!$").unwrap();
    static ref RESUBSCRIBED: Regex =
        Regex::new(r"^([a-zA-Z0-9_]+) subscribed for ([0-9]+) months in a row!$").unwrap();
}

/// Normalize a room name to its canonical form: lowercase, no leading `#`.
pub fn normalize_room(name: &str) -> String {
    name.trim_start_matches('#').to_ascii_lowercase()
}

/// The wire form of a room name (`#` + canonical name).
pub fn wire_room(name: &str) -> String {
    format!("#{}", normalize_room(name))
}

/// A chat message sent to a room.
#[derive(Clone, Debug, PartialEq)]
pub struct TextEvent {
    /// Canonical room name.
    pub room: String,
    /// The sender, as described by the line's tags.
    pub user: User,
    /// Message text; `/me`-prefixed if the payload was an ACTION.
    pub text: String,
}

/// Room metadata update, from `ROOMSTATE`/`NOTICE` tags or `jtv` commands.
///
/// The `subscriber`/`turbo`/`staff`/`admin`/`emote_sets` fields describe the
/// sender of the *next* text message, not the room itself; the room actor
/// carries them until that message arrives.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoomStateEvent {
    /// Canonical room name.
    pub room: String,
    /// Subscribers-only chat flag.
    pub subs_only: FlagState,
    /// Slow-mode flag.
    pub slow: FlagState,
    /// R9K (unique chat) flag.
    pub r9k: FlagState,
    /// Next sender is a subscriber.
    pub subscriber: Option<bool>,
    /// Next sender has turbo.
    pub turbo: Option<bool>,
    /// Next sender is Twitch staff.
    pub staff: Option<bool>,
    /// Next sender is a Twitch admin.
    pub admin: Option<bool>,
    /// Emote sets available to the next sender.
    pub emote_sets: Option<Vec<u32>>,
}

impl RoomStateEvent {
    fn for_room(room: &str) -> Self {
        RoomStateEvent {
            room: normalize_room(room),
            ..RoomStateEvent::default()
        }
    }
}

/// Chat (or a single user's messages) was cleared by a moderator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClearChatEvent {
    /// Canonical room name.
    pub room: String,
    /// Affected user, or `None` when the whole chat was cleared.
    pub user: Option<String>,
}

/// A subscription announcement from the `twitchnotify` pseudo-user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriberNoticeEvent {
    /// Canonical room name.
    pub room: String,
    /// Subscriber name, when the body matched a known pattern.
    pub user: Option<String>,
    /// Consecutive months; 1 for a first-time subscription.
    pub months: u32,
    /// The raw notice body.
    pub text: String,
}

/// A parsed inbound protocol occurrence, addressed to one room.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundEvent {
    /// The bot joined a room (self-JOIN echo).
    Join {
        /// Canonical room name.
        room: String,
    },
    /// The bot left a room (self-PART echo).
    Part {
        /// Canonical room name.
        room: String,
    },
    /// A chat message.
    Text(TextEvent),
    /// Room metadata update.
    RoomState(RoomStateEvent),
    /// Chat cleared / user timed out.
    ClearChat(ClearChatEvent),
    /// Subscription announcement.
    SubscriberNotice(SubscriberNoticeEvent),
}

impl InboundEvent {
    /// The room this event is addressed to.
    pub fn room(&self) -> &str {
        match self {
            InboundEvent::Join { room } | InboundEvent::Part { room } => room,
            InboundEvent::Text(e) => &e.room,
            InboundEvent::RoomState(e) => &e.room,
            InboundEvent::ClearChat(e) => &e.room,
            InboundEvent::SubscriberNotice(e) => &e.room,
        }
    }
}

/// An opt-in protocol extension requested during the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    /// JOIN/PART/NAMES membership messages.
    Membership,
    /// Twitch-specific commands (ROOMSTATE, CLEARCHAT, ...).
    Commands,
    /// IRCv3 message tags.
    Tags,
}

impl Capability {
    /// All capabilities, in the order they are requested.
    pub const ALL: [Capability; 3] =
        [Capability::Membership, Capability::Commands, Capability::Tags];

    /// The capability's protocol name.
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Membership => "membership",
            Capability::Commands => "commands",
            Capability::Tags => "tags",
        }
    }
}

/// A request to affect the wire. Each variant renders to one line.
#[derive(Clone, Debug, PartialEq)]
pub enum OutboundEvent {
    /// A pre-built raw message (login sequence, etc.).
    Raw(Message),
    /// A chat message to a room.
    Text {
        /// Target room (any form; normalized on render).
        room: String,
        /// Message text.
        text: String,
    },
    /// A capability request.
    CapReq(Capability),
    /// Heartbeat response, echoing the PING's params and token.
    Pong {
        /// Middle params of the PING.
        params: Vec<String>,
        /// Trailing token of the PING.
        token: Option<String>,
    },
    /// Join a room.
    Join(String),
    /// Leave a room.
    Part(String),
}

impl OutboundEvent {
    /// Render to a wire message.
    pub fn to_message(&self) -> Message {
        match self {
            OutboundEvent::Raw(msg) => msg.clone(),
            OutboundEvent::Text { room, text } => {
                Message::with_trailing("PRIVMSG", vec![wire_room(room)], text.clone())
            }
            OutboundEvent::CapReq(cap) => Message::with_trailing(
                "CAP",
                vec!["REQ".to_owned()],
                format!("twitch.tv/{}", cap.as_str()),
            ),
            OutboundEvent::Pong { params, token } => {
                let mut msg = Message::new("PONG", params.clone());
                msg.trailing = token.clone();
                msg
            }
            OutboundEvent::Join(room) => Message::new("JOIN", vec![wire_room(room)]),
            OutboundEvent::Part(room) => Message::new("PART", vec![wire_room(room)]),
        }
    }
}

/// A decoded protocol occurrence, before client-internal handling.
///
/// `Welcome` and `Ping` are consumed by the transport client itself;
/// everything else reaches the application as [`InboundEvent`]s.
#[derive(Clone, Debug, PartialEq)]
pub enum ProtocolEvent {
    /// The welcome numeric (001); triggers the capability request sequence.
    Welcome,
    /// Server heartbeat; answered with a PONG carrying the same token.
    Ping {
        /// Middle params of the PING.
        params: Vec<String>,
        /// Trailing token.
        token: Option<String>,
    },
    /// An application-level event.
    Event(InboundEvent),
}

/// Stateless translator between wire lines and typed events.
///
/// Holds the bot's login name so that JOIN/PART echoes can be filtered to
/// the bot's own.
#[derive(Clone, Debug)]
pub struct EventCodec {
    username: String,
}

impl EventCodec {
    /// Create a codec for the given login name.
    pub fn new(username: impl Into<String>) -> Self {
        EventCodec {
            username: username.into().to_ascii_lowercase(),
        }
    }

    /// Decode one raw line. Unknown verbs and irrelevant lines yield `None`.
    pub fn decode(&self, line: &str) -> Result<Option<ProtocolEvent>, ProtocolError> {
        let msg: Message = line.parse()?;

        let event = match msg.command.as_str() {
            "001" => Some(ProtocolEvent::Welcome),
            "PING" => Some(ProtocolEvent::Ping {
                params: msg.params.clone(),
                token: msg.trailing.clone(),
            }),
            "JOIN" => self
                .self_event(&msg)
                .map(|room| ProtocolEvent::Event(InboundEvent::Join { room })),
            "PART" => self
                .self_event(&msg)
                .map(|room| ProtocolEvent::Event(InboundEvent::Part { room })),
            "PRIVMSG" => self.decode_privmsg(&msg).map(ProtocolEvent::Event),
            "ROOMSTATE" | "NOTICE" => {
                decode_room_state(&msg).map(|e| ProtocolEvent::Event(InboundEvent::RoomState(e)))
            }
            "CLEARCHAT" => msg.params.first().map(|room| {
                ProtocolEvent::Event(InboundEvent::ClearChat(ClearChatEvent {
                    room: normalize_room(room),
                    user: msg.trailing.clone().filter(|u| !u.is_empty()),
                }))
            }),
            _ => None,
        };

        Ok(event)
    }

    /// Encode an outbound event to its wire line (without CRLF).
    pub fn encode(&self, event: &OutboundEvent) -> String {
        event.to_message().to_string()
    }

    /// For JOIN/PART: the room, but only when the acting user is the bot.
    fn self_event(&self, msg: &Message) -> Option<String> {
        let prefix = msg.prefix.as_ref()?;
        let acting = prefix.user.as_deref().unwrap_or(&prefix.nick);
        if acting.eq_ignore_ascii_case(&self.username) {
            msg.params.first().map(|room| normalize_room(room))
        } else {
            None
        }
    }

    fn decode_privmsg(&self, msg: &Message) -> Option<InboundEvent> {
        let room = msg.params.first()?;
        let nickname = msg.source_nickname().unwrap_or("");
        let body = msg.trailing_or_empty();

        match nickname {
            "twitchnotify" => Some(InboundEvent::SubscriberNotice(parse_sub_notice(
                room, body,
            ))),
            "jtv" => decode_jtv_command(room, body),
            _ => {
                let user = User::from_message(nickname, msg);
                Some(InboundEvent::Text(TextEvent {
                    room: normalize_room(room),
                    user,
                    text: unwrap_action(body),
                }))
            }
        }
    }
}

/// Unwrap a `\x01ACTION ...\x01` payload into `/me `-prefixed text.
fn unwrap_action(text: &str) -> String {
    if let Some(inner) = text.strip_prefix('\u{1}') {
        let inner = inner.trim_end_matches('\u{1}');
        if let Some(action) = inner.strip_prefix("ACTION ") {
            return format!("/me {action}");
        }
    }
    text.to_owned()
}

/// Decode a system notice from the `jtv` pseudo-user.
///
/// The first whitespace-delimited token of the body is the sub-command.
fn decode_jtv_command(room: &str, body: &str) -> Option<InboundEvent> {
    let mut parts = body.split_whitespace();
    let command = parts.next()?.to_ascii_lowercase();

    match command.as_str() {
        "clearchat" => Some(InboundEvent::ClearChat(ClearChatEvent {
            room: normalize_room(room),
            user: parts.next().map(str::to_owned),
        })),
        "specialuser" => {
            // "specialuser <name> <kind>" flags the next message's sender.
            let _name = parts.next()?;
            let kind = parts.next()?;
            let mut event = RoomStateEvent::for_room(room);
            match kind {
                "subscriber" => event.subscriber = Some(true),
                "turbo" => event.turbo = Some(true),
                "staff" => event.staff = Some(true),
                "admin" => event.admin = Some(true),
                _ => return None,
            }
            Some(InboundEvent::RoomState(event))
        }
        "emoteset" => {
            // "emoteset <name> [1,33,42]"
            let _name = parts.next()?;
            let sets = parts.next()?;
            let ids = sets
                .trim_start_matches('[')
                .trim_end_matches(']')
                .split(',')
                .filter_map(|id| id.parse().ok())
                .collect();
            let mut event = RoomStateEvent::for_room(room);
            event.emote_sets = Some(ids);
            Some(InboundEvent::RoomState(event))
        }
        _ => None,
    }
}

fn decode_room_state(msg: &Message) -> Option<RoomStateEvent> {
    let room = msg.params.first()?;
    let mut event = RoomStateEvent::for_room(room);
    event.subs_only = FlagState::parse(msg.tag_value("subs-only").unwrap_or(""));
    event.slow = FlagState::parse(msg.tag_value("slow").unwrap_or(""));
    event.r9k = FlagState::parse(msg.tag_value("r9k").unwrap_or(""));
    Some(event)
}

fn parse_sub_notice(room: &str, body: &str) -> SubscriberNoticeEvent {
    let mut notice = SubscriberNoticeEvent {
        room: normalize_room(room),
        user: None,
        months: 0,
        text: body.to_owned(),
    };

    if let Some(captures) = JUST_SUBSCRIBED.captures(body) {
        notice.user = Some(captures[1].to_owned());
        notice.months = 1;
    } else if let Some(captures) = RESUBSCRIBED.captures(body) {
        notice.user = Some(captures[1].to_owned());
        notice.months = captures[2].parse().unwrap_or(0);
    }

    notice
}
