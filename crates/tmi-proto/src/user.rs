//! Chat users and the tag fields that describe them.

use std::collections::HashMap;

use crate::message::Message;

/// A user's privilege tier within a room.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rank {
    /// No special privileges.
    #[default]
    Plain,
    /// Room moderator.
    Moderator,
    /// Network-wide moderator.
    GlobalModerator,
    /// Twitch staff member.
    Staff,
    /// Twitch administrator.
    Admin,
}

impl Rank {
    /// Parse the `user-type` tag value. Unknown or absent values are plain.
    pub fn parse(value: &str) -> Rank {
        match value {
            "mod" => Rank::Moderator,
            "global_mod" => Rank::GlobalModerator,
            "staff" => Rank::Staff,
            "admin" => Rank::Admin,
            _ => Rank::Plain,
        }
    }
}

/// Tri-state room flag, as reported by `ROOMSTATE` tags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FlagState {
    /// Explicitly enabled (`"1"`).
    Enabled,
    /// Explicitly disabled (`"0"`).
    Disabled,
    /// Not reported.
    #[default]
    Undefined,
}

impl FlagState {
    /// Parse a flag tag value.
    pub fn parse(value: &str) -> FlagState {
        match value {
            "1" => FlagState::Enabled,
            "0" => FlagState::Disabled,
            _ => FlagState::Undefined,
        }
    }
}

/// One occurrence of an emote, as character offsets into the message text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EmoteMarker {
    /// Offset of the first character.
    pub first: usize,
    /// Offset of the last character (inclusive).
    pub last: usize,
}

/// Emote id to the positions at which it occurs.
pub type EmoteMarkers = HashMap<u32, Vec<EmoteMarker>>;

/// Parse the `emotes` tag value.
///
/// The encoded form is `"34:67-70,100-103/14:56-61"`: a `/`-separated list
/// of `emoteId:first-last,first-last` ranges. Malformed entries are skipped.
pub fn parse_emotes_tag(encoded: &str) -> EmoteMarkers {
    let mut result = EmoteMarkers::new();

    for part in encoded.split('/') {
        let Some((id, ranges)) = part.split_once(':') else {
            continue;
        };
        let Ok(emote_id) = id.parse::<u32>() else {
            continue;
        };

        let mut positions = Vec::new();
        for item in ranges.split(',') {
            let Some((from, to)) = item.split_once('-') else {
                continue;
            };
            let (Ok(first), Ok(last)) = (from.parse(), to.parse()) else {
                continue;
            };
            positions.push(EmoteMarker { first, last });
        }

        result.insert(emote_id, positions);
    }

    result
}

/// The sender of a chat event, contextual to one room.
///
/// Constructed per inbound event from the message prefix and tag fields;
/// never persisted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct User {
    /// Display name if the tags carried one, otherwise the prefix nick.
    pub name: String,
    /// Numeric Twitch user id, when tagged.
    pub id: Option<u64>,
    /// Chat color, when tagged.
    pub color: Option<String>,
    /// Subscriber badge.
    pub subscriber: bool,
    /// Turbo badge.
    pub turbo: bool,
    /// Privilege tier from the `user-type` tag.
    pub rank: Rank,
    /// Emote occurrences within the accompanying message text.
    pub emotes: EmoteMarkers,
    /// Emote-set ids announced for this user ahead of the message.
    pub emote_sets: Vec<u32>,
}

impl User {
    /// Build a user from a message's prefix nick and tag fields.
    pub fn from_message(nickname: &str, msg: &Message) -> User {
        let mut user = User {
            name: nickname.to_owned(),
            ..User::default()
        };

        if let Some(display_name) = msg.tag_value("display-name") {
            if !display_name.is_empty() {
                user.name = display_name.to_owned();
            }
        }
        if let Some(flag) = msg.tag_value("subscriber") {
            user.subscriber = flag == "1";
        }
        if let Some(flag) = msg.tag_value("turbo") {
            user.turbo = flag == "1";
        }
        if let Some(value) = msg.tag_value("user-id") {
            user.id = value.parse().ok();
        }
        if let Some(value) = msg.tag_value("color") {
            if !value.is_empty() {
                user.color = Some(value.to_owned());
            }
        }
        if let Some(value) = msg.tag_value("emotes") {
            user.emotes = parse_emotes_tag(value);
        }
        if let Some(value) = msg.tag_value("user-type") {
            user.rank = Rank::parse(value);
        }

        user
    }

    /// Whether the user moderates the room (or outranks a moderator).
    pub fn is_moderator(&self) -> bool {
        self.rank >= Rank::Moderator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_parsing() {
        assert_eq!(Rank::parse("mod"), Rank::Moderator);
        assert_eq!(Rank::parse("global_mod"), Rank::GlobalModerator);
        assert_eq!(Rank::parse("staff"), Rank::Staff);
        assert_eq!(Rank::parse("admin"), Rank::Admin);
        assert_eq!(Rank::parse(""), Rank::Plain);
        assert_eq!(Rank::parse("what"), Rank::Plain);
    }

    #[test]
    fn emotes_single_range() {
        let markers = parse_emotes_tag("25:0-4");
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[&25], vec![EmoteMarker { first: 0, last: 4 }]);
    }

    #[test]
    fn emotes_multiple_ids_and_ranges() {
        let markers = parse_emotes_tag("34:67-70,100-103/14:56-61");
        assert_eq!(markers.len(), 2);
        assert_eq!(
            markers[&34],
            vec![
                EmoteMarker { first: 67, last: 70 },
                EmoteMarker { first: 100, last: 103 },
            ]
        );
        assert_eq!(markers[&14], vec![EmoteMarker { first: 56, last: 61 }]);
    }

    #[test]
    fn emotes_skip_malformed() {
        let markers = parse_emotes_tag("nope/25:0-4/13:x-y");
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[&25].len(), 1);
        assert!(markers[&13].is_empty());
    }

    #[test]
    fn user_from_tagged_message() {
        let msg: Message =
            "@display-name=Foo;subscriber=1;turbo=0;user-id=42;color=#FF0000;user-type=mod \
             :foo!foo@x PRIVMSG #bar :hi"
                .parse()
                .unwrap();
        let user = User::from_message("foo", &msg);
        assert_eq!(user.name, "Foo");
        assert!(user.subscriber);
        assert!(!user.turbo);
        assert_eq!(user.id, Some(42));
        assert_eq!(user.color.as_deref(), Some("#FF0000"));
        assert_eq!(user.rank, Rank::Moderator);
        assert!(user.is_moderator());
    }

    #[test]
    fn empty_display_name_keeps_nick() {
        let msg: Message = "@display-name= :foo!foo@x PRIVMSG #bar :hi".parse().unwrap();
        let user = User::from_message("foo", &msg);
        assert_eq!(user.name, "foo");
    }
}
