//! Variable substitution: the `$(NAME{SUB}|default)` token grammar shared by
//! plain-text substitution and the expression lexer's
//! variable token.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::vars::{quote, unquote, Variables};

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\(([A-Za-z_][A-Za-z0-9_]*)(?:\{([^}]*)\})?(?:\|(?:'([^']*)'|([^)]*)))?\)").unwrap()
});

/// A parsed `$(...)` token, still unresolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarToken {
    pub name: String,
    pub sub: Option<String>,
    pub default: Option<String>,
}

/// Parses a single `$(...)` token at the start of `s`, if present, returning
/// the token and the number of bytes it consumed.
pub fn parse_token(s: &str) -> Option<(VarToken, usize)> {
    let caps = TOKEN_RE.captures(s)?;
    let m = caps.get(0)?;
    if m.start() != 0 {
        return None;
    }
    let name = caps[1].to_string();
    let sub = caps.get(2).map(|m| m.as_str().to_string());
    let default = caps
        .get(3)
        .or_else(|| caps.get(4))
        .map(|m| m.as_str().to_string());
    Some((VarToken { name, sub, default }, m.end()))
}

/// Resolves a token to its raw (still-quoted-or-literal) form, applying
/// default substitution: absent, empty (`''`), or literal `false` falls back
/// to the (quoted) default, else the empty string.
pub fn resolve_raw(token: &VarToken, vars: &dyn Variables) -> Option<String> {
    let resolved = match &token.sub {
        Some(key) => vars.get_sub_value(&token.name, key),
        None => vars.get_value(&token.name),
    };

    let is_empty_or_false = matches!(resolved.as_deref(), None | Some("''") | Some("false"));

    if is_empty_or_false {
        token.default.as_ref().map(|d| quote(d))
    } else {
        resolved
    }
}

/// Replaces every `$(...)` token in `text` with its resolved, unquoted value
/// (the form used inside element text and attribute values). Unresolved
/// tokens with no default become the empty string.
pub fn substitute_text(text: &str, vars: &dyn Variables) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        let Some(dollar) = rest.find('$') else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..dollar]);
        let tail = &rest[dollar..];
        match parse_token(tail) {
            Some((token, consumed)) => {
                let raw = resolve_raw(&token, vars);
                out.push_str(&raw.map(|r| unquote(&r)).unwrap_or_default());
                rest = &tail[consumed..];
            }
            None => {
                out.push('$');
                rest = &tail[1..];
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vars::RequestVariables;
    use http::HeaderMap;
    use url::Url;

    fn vars(pairs: &[(&str, &str)]) -> RequestVariables {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(
                http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                http::HeaderValue::from_str(v).unwrap(),
            );
        }
        RequestVariables::from_request(&Url::parse("http://example.com/").unwrap(), &h)
    }

    #[test]
    fn substitutes_known_variable() {
        let v = vars(&[("host", "example.com")]);
        assert_eq!(substitute_text("host=$(HTTP_HOST)", &v), "host=example.com");
    }

    #[test]
    fn falls_back_to_default_when_absent() {
        let v = vars(&[]);
        assert_eq!(substitute_text("$(HTTP_HOST|'none')", &v), "none");
    }

    #[test]
    fn unknown_variable_with_no_default_is_empty() {
        let v = vars(&[]);
        assert_eq!(substitute_text("[$(NOPE)]", &v), "[]");
    }

    #[test]
    fn sub_key_lookup() {
        let v = vars(&[("cookie", "session=abc123")]);
        assert_eq!(substitute_text("$(HTTP_COOKIE{session})", &v), "abc123");
    }
}
