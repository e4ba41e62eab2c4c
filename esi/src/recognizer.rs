//! An incremental, chunk-safe tag recognizer.
//!
//! This is deliberately not a conformant XML tokenizer: it tolerates
//! HTML-style unclosed default tags living alongside well-formed ESI
//! markup, and it never blocks forever on a tag that straddles a chunk
//! boundary; it reports [`ScanEvent::Unknown`] and waits for more bytes
//! instead.

use once_cell::sync::Lazy;
use regex::Regex;

const NAME: &str = r"[A-Za-z][-A-Za-z0-9]*";

fn build_name_re() -> Regex {
    Regex::new(&format!(r"^{NAME}(?::{NAME})?")).unwrap()
}

fn build_attr_re() -> Regex {
    Regex::new(&format!(
        r#"(?:({NAME}):)?({NAME})\s*=\s*(?:"([^"]*)"|'([^']*)')"#
    ))
    .unwrap()
}

fn build_open_re() -> Regex {
    Regex::new(&format!(
        r#"(?s)^<({NAME})((?::)({NAME}))?((?:\s+{NAME}(?::{NAME})?\s*=\s*(?:"[^"]*"|'[^']*'))*)\s*>"#
    ))
    .unwrap()
}

fn build_self_close_re() -> Regex {
    Regex::new(&format!(
        r#"(?s)^<({NAME})((?::)({NAME}))?((?:\s+{NAME}(?::{NAME})?\s*=\s*(?:"[^"]*"|'[^']*'))*)\s+/>"#
    ))
    .unwrap()
}

fn build_close_re() -> Regex {
    Regex::new(&format!(r#"^</({NAME})((?::)({NAME}))?\s*>"#)).unwrap()
}

static OPEN_RE: Lazy<Regex> = Lazy::new(build_open_re);
static SELF_CLOSE_RE: Lazy<Regex> = Lazy::new(build_self_close_re);
static CLOSE_RE: Lazy<Regex> = Lazy::new(build_close_re);
static ATTR_RE: Lazy<Regex> = Lazy::new(build_attr_re);
static NAME_RE: Lazy<Regex> = Lazy::new(build_name_re);

/// One attribute as recognized from the source, with entity-decoded value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    pub prefix: Option<String>,
    pub local: String,
    pub value: String,
}

/// A tag's prefix + local name, still joined (`"esi:include"`, `"div"`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagName {
    pub prefix: Option<String>,
    pub local: String,
}

impl TagName {
    pub fn full(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{p}:{}", self.local),
            None => self.local.clone(),
        }
    }
}

/// The result of scanning the head of a character buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// Literal text, with the number of bytes consumed from the buffer.
    Text { content: String, consumed: usize },
    ElementOpen {
        name: TagName,
        attrs: Vec<RawAttribute>,
        consumed: usize,
    },
    ElementSelfClose {
        name: TagName,
        attrs: Vec<RawAttribute>,
        consumed: usize,
    },
    ElementClose { name: TagName, consumed: usize },
    /// The buffer might be the start of a tag, but isn't complete yet.
    Unknown,
}

fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let (replacement, skip) = if let Some(r) = tail.strip_prefix("&lt;") {
            ("<", tail.len() - r.len())
        } else if let Some(r) = tail.strip_prefix("&gt;") {
            (">", tail.len() - r.len())
        } else if let Some(r) = tail.strip_prefix("&quot;") {
            ("\"", tail.len() - r.len())
        } else if let Some(r) = tail.strip_prefix("&apos;") {
            ("'", tail.len() - r.len())
        } else if let Some(r) = tail.strip_prefix("&amp;") {
            ("&", tail.len() - r.len())
        } else {
            ("&", 1)
        };
        out.push_str(replacement);
        rest = &tail[skip..];
    }
    out.push_str(rest);
    out
}

fn parse_attrs(attrs_src: &str) -> Vec<RawAttribute> {
    ATTR_RE
        .captures_iter(attrs_src)
        .map(|caps| {
            let prefix = caps.get(1).map(|m| m.as_str().to_string());
            let local = caps[2].to_string();
            let value = caps
                .get(3)
                .or_else(|| caps.get(4))
                .map(|m| m.as_str())
                .unwrap_or_default();
            RawAttribute {
                prefix,
                local,
                value: decode_entities(value),
            }
        })
        .collect()
}

/// `true` if `c` could begin a tag name (open, close, or self-close).
fn tag_opener(second_char: char) -> bool {
    second_char.is_ascii_alphabetic() || second_char == '/'
}

/// Scans the head of `buf` and classifies it.
pub fn scan(buf: &str, ignore_default_tags: bool) -> ScanEvent {
    if buf.is_empty() {
        return ScanEvent::Unknown;
    }

    let mut search_from = 0usize;
    loop {
        let Some(rel) = buf[search_from..].find('<') else {
            return ScanEvent::Text {
                content: buf.to_string(),
                consumed: buf.len(),
            };
        };
        let pos = search_from + rel;

        if pos + 1 >= buf.len() {
            // Trailing "<" with nothing after it yet.
            return if pos == 0 {
                ScanEvent::Unknown
            } else {
                ScanEvent::Text {
                    content: buf[..pos].to_string(),
                    consumed: pos,
                }
            };
        }

        let second = buf[pos + 1..].chars().next().unwrap();
        if !tag_opener(second) {
            search_from = pos + 1;
            continue;
        }

        return if pos == 0 {
            scan_tag_at_start(buf, ignore_default_tags)
        } else {
            ScanEvent::Text {
                content: buf[..pos].to_string(),
                consumed: pos,
            }
        };
    }
}

fn scan_tag_at_start(buf: &str, ignore_default_tags: bool) -> ScanEvent {
    debug_assert!(buf.starts_with('<'));

    if buf.as_bytes().get(1) == Some(&b'/') {
        return match CLOSE_RE.captures(buf) {
            Some(caps) => {
                let matched = caps.get(0).unwrap();
                let name = tag_name_from_caps(&caps);
                finish_close(name, matched.end(), ignore_default_tags, matched.as_str())
            }
            None => {
                if buf.contains('>') {
                    degrade_one_char(buf)
                } else {
                    ScanEvent::Unknown
                }
            }
        };
    }

    if let Some(caps) = SELF_CLOSE_RE.captures(buf) {
        let matched = caps.get(0).unwrap();
        let name = tag_name_from_caps(&caps);
        let attrs = parse_attrs(caps.get(4).map(|m| m.as_str()).unwrap_or_default());
        return finish_open(name, attrs, matched.end(), true, ignore_default_tags, matched.as_str());
    }

    if let Some(caps) = OPEN_RE.captures(buf) {
        let matched = caps.get(0).unwrap();
        let name = tag_name_from_caps(&caps);
        let attrs = parse_attrs(caps.get(4).map(|m| m.as_str()).unwrap_or_default());
        return finish_open(name, attrs, matched.end(), false, ignore_default_tags, matched.as_str());
    }

    // Neither pattern matched yet. If the buffer already has a `>` the tag
    // text is fully present but malformed by our grammar (stray characters,
    // an unquoted value, a missing space before `/>`): give up on treating it
    // as a tag and fall back to literal text one character at a time.
    if buf.contains('>') {
        degrade_one_char(buf)
    } else {
        ScanEvent::Unknown
    }
}

fn tag_name_from_caps(caps: &regex::Captures) -> TagName {
    match caps.get(3) {
        Some(local) => TagName {
            prefix: Some(caps[1].to_string()),
            local: local.as_str().to_string(),
        },
        None => TagName {
            prefix: None,
            local: caps[1].to_string(),
        },
    }
}

fn finish_open(
    name: TagName,
    attrs: Vec<RawAttribute>,
    consumed: usize,
    self_close: bool,
    ignore_default_tags: bool,
    raw: &str,
) -> ScanEvent {
    if ignore_default_tags && name.prefix.is_none() {
        return ScanEvent::Text {
            content: raw.to_string(),
            consumed,
        };
    }
    if self_close {
        ScanEvent::ElementSelfClose { name, attrs, consumed }
    } else {
        ScanEvent::ElementOpen { name, attrs, consumed }
    }
}

fn finish_close(name: TagName, consumed: usize, ignore_default_tags: bool, raw: &str) -> ScanEvent {
    if ignore_default_tags && name.prefix.is_none() {
        return ScanEvent::Text {
            content: raw.to_string(),
            consumed,
        };
    }
    ScanEvent::ElementClose { name, consumed }
}

fn degrade_one_char(buf: &str) -> ScanEvent {
    ScanEvent::Text {
        content: buf[..1].to_string(),
        consumed: 1,
    }
}

/// Validates a standalone identifier, e.g. a custom `esi_prefix`.
pub fn is_valid_identifier(s: &str) -> bool {
    NAME_RE.find(s).is_some_and(|m| m.as_str() == s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_plain_text_before_a_tag() {
        let ev = scan("hello <b>", false);
        assert_eq!(
            ev,
            ScanEvent::Text {
                content: "hello ".to_string(),
                consumed: 6
            }
        );
    }

    #[test]
    fn scans_open_tag_with_attrs() {
        let ev = scan(r#"<esi:include src="/x" alt='/y'/>rest"#, false);
        match ev {
            ScanEvent::ElementSelfClose { name, attrs, consumed } => {
                assert_eq!(name.full(), "esi:include");
                assert_eq!(attrs[0].local, "src");
                assert_eq!(attrs[0].value, "/x");
                assert_eq!(attrs[1].value, "/y");
                assert_eq!(&r#"<esi:include src="/x" alt='/y'/>rest"#[..consumed], r#"<esi:include src="/x" alt='/y'/>"#);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn self_close_requires_space_before_slash() {
        // No space before `/>`: falls back to open-tag matching, which
        // itself fails (trailing "/" isn't part of the open grammar), so
        // this degrades a character at a time. Matches the spec's documented
        // implementation-dependent quirk.
        let ev = scan("<foo/>", false);
        assert_eq!(
            ev,
            ScanEvent::Text {
                content: "<".to_string(),
                consumed: 1
            }
        );
    }

    #[test]
    fn incomplete_tag_is_unknown() {
        assert_eq!(scan("<esi:include src", false), ScanEvent::Unknown);
        assert_eq!(scan("<", false), ScanEvent::Unknown);
    }

    #[test]
    fn close_tag_is_recognized() {
        let ev = scan("</esi:try>", false);
        assert_eq!(
            ev,
            ScanEvent::ElementClose {
                name: TagName {
                    prefix: Some("esi".to_string()),
                    local: "try".to_string()
                },
                consumed: 10
            }
        );
    }

    #[test]
    fn default_tags_pass_through_as_text_when_ignored() {
        let ev = scan("<div class=\"x\">", true);
        match ev {
            ScanEvent::Text { content, .. } => assert_eq!(content, "<div class=\"x\">"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn prefixed_tags_still_recognized_when_ignoring_defaults() {
        let ev = scan("<esi:remove>", true);
        assert!(matches!(ev, ScanEvent::ElementOpen { .. }));
    }

    #[test]
    fn entity_decoding_in_attribute_values() {
        let ev = scan(r#"<a href="x?y=1&amp;z=2&lt;&gt;&quot;&apos;"/>"#, false);
        match ev {
            ScanEvent::ElementSelfClose { attrs, .. } => {
                assert_eq!(attrs[0].value, "x?y=1&z=2<>\"'");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unrelated_entities_pass_through_unchanged() {
        let ev = scan(r#"<a href="x&copy;y"/>"#, false);
        match ev {
            ScanEvent::ElementSelfClose { attrs, .. } => {
                assert_eq!(attrs[0].value, "x&copy;y");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn plain_less_than_is_passed_through() {
        let ev = scan("a < b", false);
        assert_eq!(
            ev,
            ScanEvent::Text {
                content: "a < b".to_string(),
                consumed: 5
            }
        );
    }
}
