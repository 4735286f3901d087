//! Raw protocol messages.
//!
//! [`Message`] is the generic wire representation: an optional IRCv3 tag
//! list, an optional prefix, a command verb, middle parameters, and an
//! optional trailing parameter. Typed chat events are built on top of this
//! in [`crate::event`].

use std::fmt;
use std::str::FromStr;

use nom::{
    bytes::complete::{take_until, take_while1},
    character::complete::char,
    combinator::opt,
    sequence::preceded,
    IResult,
};
use smallvec::SmallVec;

use crate::error::ProtocolError;
use crate::tags::{escape_tag_value, parse_tag_segment};

/// An IRCv3 message tag: key and optional value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag(pub String, pub Option<String>);

impl Tag {
    /// Create a new tag with a key and optional value.
    pub fn new(key: impl Into<String>, value: Option<String>) -> Self {
        Tag(key.into(), value)
    }
}

/// A message prefix (`nick!user@host`, or a bare server name).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prefix {
    /// Nickname or server name.
    pub nick: String,
    /// The `user` part, if present.
    pub user: Option<String>,
    /// The `host` part, if present.
    pub host: Option<String>,
}

impl Prefix {
    /// Parse a prefix from its wire form (without the leading `:`).
    pub fn parse(raw: &str) -> Self {
        let (nick_user, host) = match raw.split_once('@') {
            Some((nu, h)) => (nu, Some(h.to_owned())),
            None => (raw, None),
        };
        let (nick, user) = match nick_user.split_once('!') {
            Some((n, u)) => (n.to_owned(), Some(u.to_owned())),
            None => (nick_user.to_owned(), None),
        };
        Prefix { nick, user, host }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.nick)?;
        if let Some(user) = &self.user {
            write!(f, "!{user}")?;
        }
        if let Some(host) = &self.host {
            write!(f, "@{host}")?;
        }
        Ok(())
    }
}

/// A raw protocol message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// IRCv3 tags, if the line carried a tag segment.
    pub tags: Option<Vec<Tag>>,
    /// Message source, if the line carried a prefix.
    pub prefix: Option<Prefix>,
    /// The command verb (`PRIVMSG`, `PING`, `001`, ...).
    pub command: String,
    /// Middle parameters (never contain spaces).
    pub params: Vec<String>,
    /// Trailing parameter (may contain spaces), serialized after ` :`.
    pub trailing: Option<String>,
}

impl Message {
    /// Create a message with a command and middle parameters only.
    pub fn new(command: impl Into<String>, params: Vec<String>) -> Self {
        Message {
            tags: None,
            prefix: None,
            command: command.into(),
            params,
            trailing: None,
        }
    }

    /// Create a message with a trailing parameter.
    pub fn with_trailing(
        command: impl Into<String>,
        params: Vec<String>,
        trailing: impl Into<String>,
    ) -> Self {
        Message {
            trailing: Some(trailing.into()),
            ..Message::new(command, params)
        }
    }

    /// Get the value of a tag by key.
    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags
            .as_ref()?
            .iter()
            .find(|Tag(k, _)| k == key)
            .and_then(|Tag(_, v)| v.as_deref())
    }

    /// Nickname of the message source, if a prefix is present.
    pub fn source_nickname(&self) -> Option<&str> {
        self.prefix.as_ref().map(|p| p.nick.as_str())
    }

    /// The trailing parameter, or an empty string.
    pub fn trailing_or_empty(&self) -> &str {
        self.trailing.as_deref().unwrap_or("")
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(tags) = &self.tags {
            if !tags.is_empty() {
                f.write_str("@")?;
                for (i, Tag(key, value)) in tags.iter().enumerate() {
                    if i > 0 {
                        f.write_str(";")?;
                    }
                    f.write_str(key)?;
                    if let Some(value) = value {
                        f.write_str("=")?;
                        escape_tag_value(f, value)?;
                    }
                }
                f.write_str(" ")?;
            }
        }
        if let Some(prefix) = &self.prefix {
            write!(f, ":{prefix} ")?;
        }
        f.write_str(&self.command)?;
        for param in &self.params {
            write!(f, " {param}")?;
        }
        if let Some(trailing) = &self.trailing {
            write!(f, " :{trailing}")?;
        }
        Ok(())
    }
}

/// Parse the tag segment: `@` up to the first space.
fn parse_tags(input: &str) -> IResult<&str, &str> {
    preceded(char('@'), take_until(" "))(input)
}

/// Parse the prefix: `:` up to the first space.
fn parse_prefix(input: &str) -> IResult<&str, &str> {
    preceded(char(':'), take_while1(|c| c != ' '))(input)
}

/// Parse the command verb (letters, or a numeric like `001`).
fn parse_command(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric())(input)
}

/// Parse middle parameters and the optional trailing parameter.
///
/// Consecutive spaces collapse; a parameter starting with `:` is the
/// trailing parameter and swallows the rest of the line.
fn parse_params(input: &str) -> (SmallVec<[&str; 8]>, Option<&str>) {
    let mut params: SmallVec<[&str; 8]> = SmallVec::new();
    let mut rest = input;

    loop {
        while rest.as_bytes().first() == Some(&b' ') {
            rest = &rest[1..];
        }
        if rest.is_empty() || rest.starts_with('\r') || rest.starts_with('\n') {
            return (params, None);
        }
        if let Some(trailing) = rest.strip_prefix(':') {
            let end = trailing.find(['\r', '\n']).unwrap_or(trailing.len());
            return (params, Some(&trailing[..end]));
        }
        let end = rest.find([' ', '\r', '\n']).unwrap_or(rest.len());
        params.push(&rest[..end]);
        rest = &rest[end..];
        if !rest.starts_with(' ') {
            return (params, None);
        }
    }
}

impl FromStr for Message {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Message, Self::Err> {
        let stripped = s.trim_end_matches(['\r', '\n']);
        if stripped.is_empty() {
            return Err(ProtocolError::EmptyMessage);
        }

        let invalid = |cause: &str| ProtocolError::InvalidMessage {
            string: s.to_owned(),
            cause: cause.to_owned(),
        };

        let (rest, tags) =
            opt(parse_tags)(stripped).map_err(|_: nom::Err<nom::error::Error<&str>>| {
                invalid("malformed tag segment")
            })?;
        let rest = rest.trim_start_matches(' ');

        let (rest, prefix) =
            opt(parse_prefix)(rest).map_err(|_: nom::Err<nom::error::Error<&str>>| {
                invalid("malformed prefix")
            })?;
        let rest = rest.trim_start_matches(' ');

        let (rest, command) = parse_command(rest)
            .map_err(|_: nom::Err<nom::error::Error<&str>>| invalid("missing command"))?;

        let (params, trailing) = parse_params(rest);

        Ok(Message {
            tags: tags.map(parse_tag_segment),
            prefix: prefix.map(Prefix::parse),
            command: command.to_owned(),
            params: params.iter().map(|p| (*p).to_owned()).collect(),
            trailing: trailing.map(str::to_owned),
        })
    }
}
