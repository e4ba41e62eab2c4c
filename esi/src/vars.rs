//! The ESI variables subsystem: request-derived values with scalar, list,
//! dictionary, user-agent, and default-value semantics.
//!
//! A [`Variables`] implementation is read-only after construction and may be
//! shared across concurrently-running streams; [`RequestVariables`] is the
//! built-in resolver derived from a request URL and its headers.

use std::collections::HashMap;

use http::HeaderMap;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

/// Resolves the six built-in ESI variable names (or any host-registered
/// scalar) to a quoted whole-value string and/or a sub-keyed value.
///
/// Both methods return a quoted form: whole-value getters return a
/// single-quoted string with embedded `'` backslash-escaped; sub-value
/// getters return either that same quoted form or the bare literal tokens
/// `true`/`false`. Callers that need the unquoted value call [`unquote`].
pub trait Variables: Send + Sync {
    /// Returns the named variable's whole value, or `None` if the variable
    /// doesn't exist (e.g. `HTTP_HOST` with no `Host` header).
    fn get_value(&self, name: &str) -> Option<String>;

    /// Returns a named variable's sub-value (e.g. `HTTP_COOKIE{session}`),
    /// or `None` if the variable or the sub-key doesn't exist.
    fn get_sub_value(&self, name: &str, key: &str) -> Option<String>;
}

/// Wraps a string in single quotes, backslash-escaping embedded `'`.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

/// Strips a single layer of surrounding single quotes (un-escaping `\'`), or
/// returns `s` unchanged if it isn't quoted. The literals `true`/`false` map
/// to the empty string.
pub fn unquote(s: &str) -> String {
    if s == "true" || s == "false" {
        return String::new();
    }
    if s.len() >= 2 && s.starts_with('\'') && s.ends_with('\'') {
        let inner = &s[1..s.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\\' && chars.peek() == Some(&'\'') {
                out.push('\'');
                chars.next();
            } else {
                out.push(c);
            }
        }
        return out;
    }
    s.to_string()
}

enum Kind {
    /// A plain string value, absent if the backing header was not sent.
    Scalar(Option<String>),
    /// A membership list (Accept-Language): sub-value is `true`/`false`.
    List(Vec<String>),
    /// A key-value map (Cookie, Query-String): sub-value is the entry, or
    /// for Cookie specifically, `''` when the key is missing.
    Dict { raw: String, entries: HashMap<String, String>, missing_is_empty_quoted: bool },
    /// User-Agent, which additionally classifies into `browser`/`version`/`os`.
    UserAgent(Option<String>),
}

/// The built-in variable resolver, populated once from a request's URL and
/// headers. Read-only after construction.
pub struct RequestVariables {
    vars: HashMap<&'static str, Kind>,
    /// Host-registered scalar variables: an extension seam for hosts that
    /// want to add variables beyond the built-in six without introducing
    /// new ESI-visible semantics.
    extra: HashMap<String, String>,
}

impl RequestVariables {
    pub fn from_request(url: &Url, headers: &HeaderMap) -> Self {
        let mut vars = HashMap::new();

        let accept_language = header_str(headers, "accept-language").unwrap_or_default();
        vars.insert("HTTP_ACCEPT_LANGUAGE", Kind::List(parse_accept_language(accept_language)));

        let cookie = header_str(headers, "cookie").unwrap_or_default();
        vars.insert(
            "HTTP_COOKIE",
            Kind::Dict {
                raw: cookie.to_string(),
                entries: parse_cookie(cookie),
                missing_is_empty_quoted: true,
            },
        );

        vars.insert("HTTP_HOST", Kind::Scalar(header_str(headers, "host").map(str::to_string)));
        vars.insert("HTTP_REFERER", Kind::Scalar(header_str(headers, "referer").map(str::to_string)));
        vars.insert("HTTP_USER_AGENT", Kind::UserAgent(header_str(headers, "user-agent").map(str::to_string)));

        let query = url.query().unwrap_or_default();
        vars.insert(
            "QUERY_STRING",
            Kind::Dict {
                raw: query.to_string(),
                entries: url::form_urlencoded::parse(query.as_bytes())
                    .into_owned()
                    .collect(),
                missing_is_empty_quoted: false,
            },
        );

        Self { vars, extra: HashMap::new() }
    }

    /// Registers an additional scalar variable available by name, alongside
    /// the six built-ins. Does not affect ESI-visible sub-value semantics.
    pub fn register_scalar(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.extra.insert(name.into(), value.into());
    }
}

impl Variables for RequestVariables {
    fn get_value(&self, name: &str) -> Option<String> {
        if let Some(v) = self.extra.get(name) {
            return Some(quote(v));
        }
        match self.vars.get(name)? {
            Kind::Scalar(v) => v.as_deref().map(quote),
            Kind::List(_) => Some(quote(self.raw_list_or_dict(name))),
            Kind::Dict { raw, .. } => Some(quote(raw)),
            Kind::UserAgent(v) => v.as_deref().map(quote),
        }
    }

    fn get_sub_value(&self, name: &str, key: &str) -> Option<String> {
        match self.vars.get(name)? {
            Kind::Scalar(_) => None,
            Kind::List(tags) => {
                let present = tags
                    .iter()
                    .any(|t| t == key || t.starts_with(&format!("{key}-")));
                Some(if present { "true".to_string() } else { "false".to_string() })
            }
            Kind::Dict { entries, missing_is_empty_quoted, .. } => match entries.get(key) {
                Some(v) => Some(quote(v)),
                None if *missing_is_empty_quoted => Some("''".to_string()),
                None => None,
            },
            Kind::UserAgent(ua) => {
                let ua = ua.as_deref()?;
                let classified = classify_user_agent(ua);
                match key {
                    "browser" => Some(quote(&classified.browser)),
                    "version" => Some(quote(&classified.version)),
                    "os" => Some(quote(&classified.os)),
                    _ => None,
                }
            }
        }
    }
}

impl RequestVariables {
    fn raw_list_or_dict(&self, name: &str) -> &str {
        match self.vars.get(name) {
            Some(Kind::Dict { raw, .. }) => raw,
            _ => "",
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn parse_accept_language(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|part| part.split(';').next().unwrap_or("").trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn parse_cookie(raw: &str) -> HashMap<String, String> {
    raw.split(';')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let k = parts.next()?.trim();
            if k.is_empty() {
                return None;
            }
            let v = parts.next().unwrap_or("").trim();
            Some((k.to_string(), v.to_string()))
        })
        .collect()
}

struct ClassifiedUserAgent {
    browser: String,
    version: String,
    os: String,
}

static MSIE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"MSIE\s+(\d+\.\d+)").unwrap());
static TRIDENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"rv:(\d+\.\d+)").unwrap());
static VERSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:Firefox|Chrome|Version)/(\d+\.\d+)").unwrap());

fn classify_user_agent(ua: &str) -> ClassifiedUserAgent {
    let (browser, version) = if let Some(caps) = MSIE_RE.captures(ua) {
        ("MSIE".to_string(), caps[1].to_string())
    } else if ua.contains("Trident") {
        let version = TRIDENT_RE
            .captures(ua)
            .map(|c| c[1].to_string())
            .unwrap_or_default();
        ("MSIE".to_string(), version)
    } else if ua.contains("Mozilla") {
        let version = VERSION_RE
            .captures(ua)
            .map(|c| c[1].to_string())
            .unwrap_or_default();
        ("MOZILLA".to_string(), version)
    } else {
        ("OTHER".to_string(), String::new())
    };

    let os = if ua.contains("Windows") {
        "WIN"
    } else if ua.contains("Macintosh") || ua.contains("Mac OS") {
        "MAC"
    } else if ua.contains("Linux") || ua.contains("X11") || ua.contains("Unix") {
        "UNIX"
    } else {
        "OTHER"
    }
    .to_string();

    ClassifiedUserAgent { browser, version, os }
}
