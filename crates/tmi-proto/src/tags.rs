//! IRCv3 message tag escaping and the tag-segment grammar.
//!
//! A line beginning with `@` carries a `key=value;key=value` segment before
//! the first space. The generic message grammar does not understand this
//! segment, so it is split off and parsed here before anything else.

use std::fmt::{Result as FmtResult, Write};

use crate::message::Tag;

/// Escape a tag value for serialization per the IRCv3 message-tags spec.
pub fn escape_tag_value(f: &mut dyn Write, value: &str) -> FmtResult {
    for c in value.chars() {
        match c {
            ';' => f.write_str("\\:")?,
            ' ' => f.write_str("\\s")?,
            '\\' => f.write_str("\\\\")?,
            '\r' => f.write_str("\\r")?,
            '\n' => f.write_str("\\n")?,
            c => f.write_char(c)?,
        }
    }
    Ok(())
}

/// Unescape a tag value from wire format.
///
/// Reverses the escaping applied by [`escape_tag_value`]. A trailing lone
/// backslash is dropped, matching the IRCv3 "drop invalid escapes" rule.
pub fn unescape_tag_value(value: &str) -> String {
    let mut unescaped = String::with_capacity(value.len());
    let mut iter = value.chars();
    while let Some(c) = iter.next() {
        let r = if c == '\\' {
            match iter.next() {
                Some(':') => ';',
                Some('s') => ' ',
                Some('\\') => '\\',
                Some('r') => '\r',
                Some('n') => '\n',
                Some(c) => c,
                None => break,
            }
        } else {
            c
        };
        unescaped.push(r);
    }
    unescaped
}

/// Parse a raw tag segment (without the leading `@`) into `Tag` pairs.
///
/// Empty entries are skipped; a key without `=` maps to a valueless tag.
pub fn parse_tag_segment(tags_str: &str) -> Vec<Tag> {
    tags_str
        .split(';')
        .filter(|s| !s.is_empty())
        .map(|tag| {
            let mut iter = tag.splitn(2, '=');
            let key = iter.next().unwrap_or("");
            let value = iter.next().map(unescape_tag_value);
            Tag(key.to_owned(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unescape_roundtrip() {
        let mut escaped = String::new();
        escape_tag_value(&mut escaped, "a b;c\\d").unwrap();
        assert_eq!(escaped, "a\\sb\\:c\\\\d");
        assert_eq!(unescape_tag_value(&escaped), "a b;c\\d");
    }

    #[test]
    fn unescape_drops_trailing_backslash() {
        assert_eq!(unescape_tag_value("abc\\"), "abc");
    }

    #[test]
    fn segment_parsing() {
        let tags = parse_tag_segment("display-name=Foo;subscriber=1;flag");
        assert_eq!(tags.len(), 3);
        assert_eq!(tags[0].0, "display-name");
        assert_eq!(tags[0].1.as_deref(), Some("Foo"));
        assert_eq!(tags[2].0, "flag");
        assert!(tags[2].1.is_none());
    }

    #[test]
    fn segment_skips_empty_entries() {
        let tags = parse_tag_segment("a=1;;b=2");
        assert_eq!(tags.len(), 2);
    }
}
