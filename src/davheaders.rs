//! Typed WebDAV request headers.
//!
//! Every header the handler consumes gets a struct implementing
//! `headers::Header`, so handlers read them with `typed_try_get` and get
//! parse failures reported instead of silently ignored.

use std::time::Duration;

use headers::{self, Header, HeaderName, HeaderValue};

use crate::ls::Condition;

lazy_static! {
    static ref DEPTH: HeaderName = HeaderName::from_static("depth");
    static ref TIMEOUT: HeaderName = HeaderName::from_static("timeout");
    static ref DESTINATION: HeaderName = HeaderName::from_static("destination");
    static ref OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
    static ref LOCK_TOKEN: HeaderName = HeaderName::from_static("lock-token");
    static ref IF: HeaderName = HeaderName::from_static("if");
}

/// The `Depth:` request header. Methods put further constraints on which
/// values they accept; those live in the handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Depth {
    Zero,
    One,
    Infinity,
}

impl Header for Depth {
    fn name() -> &'static HeaderName {
        &DEPTH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        match value.as_bytes() {
            b"0" => Ok(Depth::Zero),
            b"1" => Ok(Depth::One),
            b"infinity" => Ok(Depth::Infinity),
            _ => Err(headers::Error::invalid()),
        }
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let s = match self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "infinity",
        };
        values.extend(std::iter::once(HeaderValue::from_static(s)));
    }
}

/// The `Timeout:` request header. `None` means an infinite validity
/// window. A comma-separated preference list is accepted; the first
/// recognized entry wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DavTimeout(pub Option<Duration>);

impl Header for DavTimeout {
    fn name() -> &'static HeaderName {
        &TIMEOUT
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        let s = value.to_str().map_err(|_| headers::Error::invalid())?;
        let s = match s.find(',') {
            Some(idx) => &s[..idx],
            None => s,
        };
        let s = s.trim();
        if s == "Infinite" {
            return Ok(DavTimeout(None));
        }
        let digits = s
            .strip_prefix("Second-")
            .ok_or_else(headers::Error::invalid)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(headers::Error::invalid());
        }
        let n: u64 = digits.parse().map_err(|_| headers::Error::invalid())?;
        if n > u32::MAX as u64 {
            return Err(headers::Error::invalid());
        }
        Ok(DavTimeout(Some(Duration::from_secs(n))))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let s = match self.0 {
            None => "Infinite".to_string(),
            Some(d) => format!("Second-{}", d.as_secs()),
        };
        if let Ok(value) = HeaderValue::from_str(&s) {
            values.extend(std::iter::once(value));
        }
    }
}

/// The `Destination:` request header: a fully qualified URL.
#[derive(Debug, Clone)]
pub(crate) struct Destination(pub http::Uri);

impl Header for Destination {
    fn name() -> &'static HeaderName {
        &DESTINATION
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        let s = value.to_str().map_err(|_| headers::Error::invalid())?;
        let uri: http::Uri = s.parse().map_err(|_| headers::Error::invalid())?;
        Ok(Destination(uri))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        if let Ok(value) = HeaderValue::from_str(&self.0.to_string()) {
            values.extend(std::iter::once(value));
        }
    }
}

/// The `Overwrite:` request header. Exactly `"F"` means do-not-overwrite;
/// anything else (including an absent header) means overwrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Overwrite(pub bool);

impl Header for Overwrite {
    fn name() -> &'static HeaderName {
        &OVERWRITE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        Ok(Overwrite(value.as_bytes() != b"F"))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let s = if self.0 { "T" } else { "F" };
        values.extend(std::iter::once(HeaderValue::from_static(s)));
    }
}

/// The `Lock-Token:` request header: a Coded-URL, stored here with the
/// angle brackets stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LockToken(pub String);

impl Header for LockToken {
    fn name() -> &'static HeaderName {
        &LOCK_TOKEN
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        let s = value.to_str().map_err(|_| headers::Error::invalid())?;
        let s = s.trim();
        let token = s
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .ok_or_else(headers::Error::invalid)?;
        if token.is_empty() {
            return Err(headers::Error::invalid());
        }
        Ok(LockToken(token.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        if let Ok(value) = HeaderValue::from_str(&format!("<{}>", self.0)) {
            values.extend(std::iter::once(value));
        }
    }
}

/// The parsed `If:` request header: a disjunction of lists, each list a
/// conjunction of conditions, optionally retargeted at another resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct If {
    pub lists: Vec<IfList>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct IfList {
    pub resource_tag: Option<String>,
    pub conditions: Vec<Condition>,
}

impl Header for If {
    fn name() -> &'static HeaderName {
        &IF
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        let s = value.to_str().map_err(|_| headers::Error::invalid())?;
        parse_if_header(s).ok_or_else(headers::Error::invalid)
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let mut out = String::new();
        for list in &self.lists {
            if let Some(tag) = &list.resource_tag {
                out.push_str(&format!("<{}> ", tag));
            }
            out.push('(');
            let mut parts = Vec::new();
            for c in &list.conditions {
                let mut p = String::new();
                if c.not {
                    p.push_str("Not ");
                }
                if let Some(t) = &c.token {
                    p.push_str(&format!("<{}>", t));
                } else if let Some(e) = &c.etag {
                    p.push_str(&format!("[{}]", e));
                }
                parts.push(p);
            }
            out.push_str(&parts.join(" "));
            out.push_str(") ");
        }
        if let Ok(value) = HeaderValue::from_str(out.trim_end()) {
            values.extend(std::iter::once(value));
        }
    }
}

// Lexer tokens for the If header grammar.
#[derive(Debug, PartialEq, Eq)]
enum Tok<'a> {
    Eof,
    Invalid,
    LParen,
    RParen,
    // "<...>", contents without the brackets.
    Angle(&'a str),
    // "[...]", contents without the brackets.
    Square(&'a str),
    Not,
    Word,
}

fn lex(s: &str) -> (Tok<'_>, &str) {
    let s = s.trim_start_matches(|c| c == ' ' || c == '\t');
    let mut bytes = s.bytes();
    let first = match bytes.next() {
        Some(b) => b,
        None => return (Tok::Eof, s),
    };
    match first {
        b'(' => (Tok::LParen, &s[1..]),
        b')' => (Tok::RParen, &s[1..]),
        b'<' => match s.find('>') {
            Some(j) => (Tok::Angle(&s[1..j]), &s[j + 1..]),
            None => (Tok::Invalid, s),
        },
        b'[' => match s.find(']') {
            Some(j) => (Tok::Square(&s[1..j]), &s[j + 1..]),
            None => (Tok::Invalid, s),
        },
        b'>' | b']' => (Tok::Invalid, s),
        _ => {
            let end = s
                .find(|c| " \t()<>[]".contains(c))
                .unwrap_or(s.len());
            let word = &s[..end];
            if word == "Not" {
                (Tok::Not, &s[end..])
            } else {
                (Tok::Word, &s[end..])
            }
        }
    }
}

/// Parse an `If:` header value. Returns `None` when it is malformed.
pub(crate) fn parse_if_header(header: &str) -> Option<If> {
    let s = header.trim();
    match lex(s).0 {
        Tok::LParen => parse_no_tag_lists(s),
        Tok::Angle(_) => parse_tagged_lists(s),
        _ => None,
    }
}

fn parse_no_tag_lists(mut s: &str) -> Option<If> {
    let mut h = If::default();
    loop {
        match lex(s) {
            (Tok::Eof, _) => {
                if h.lists.is_empty() {
                    return None;
                }
                return Some(h);
            }
            _ => {
                let (list, remaining) = parse_list(s, None)?;
                h.lists.push(list);
                s = remaining;
            }
        }
    }
}

fn parse_tagged_lists(mut s: &str) -> Option<If> {
    let mut h = If::default();
    let mut resource_tag: Option<String> = None;
    let mut lists_for_tag = 0;
    loop {
        let (tok, remaining) = lex(s);
        match tok {
            Tok::Angle(tag) => {
                // A tag must be followed by at least one list.
                if resource_tag.is_some() && lists_for_tag == 0 {
                    return None;
                }
                resource_tag = Some(tag.to_string());
                lists_for_tag = 0;
                s = remaining;
            }
            Tok::LParen => {
                lists_for_tag += 1;
                let (list, remaining) = parse_list(s, resource_tag.clone())?;
                h.lists.push(list);
                s = remaining;
            }
            Tok::Eof => {
                if lists_for_tag == 0 {
                    return None;
                }
                return Some(h);
            }
            _ => return None,
        }
    }
}

// `s` starts at the opening parenthesis.
fn parse_list<'a>(s: &'a str, resource_tag: Option<String>) -> Option<(IfList, &'a str)> {
    let (tok, mut s) = lex(s);
    if tok != Tok::LParen {
        return None;
    }
    let mut list = IfList {
        resource_tag,
        conditions: Vec::new(),
    };
    loop {
        let (tok, remaining) = lex(s);
        match tok {
            Tok::RParen => {
                if list.conditions.is_empty() {
                    return None;
                }
                return Some((list, remaining));
            }
            _ => {
                let (cond, remaining) = parse_condition(s)?;
                list.conditions.push(cond);
                s = remaining;
            }
        }
    }
}

fn parse_condition(s: &str) -> Option<(Condition, &str)> {
    let mut cond = Condition::default();
    let (mut tok, mut s) = lex(s);
    if tok == Tok::Not {
        cond.not = true;
        let next = lex(s);
        tok = next.0;
        s = next.1;
    }
    match tok {
        Tok::Angle(token) => cond.token = Some(token.to_string()),
        Tok::Square(etag) => cond.etag = Some(etag.to_string()),
        _ => return None,
    }
    Some((cond, s))
}
