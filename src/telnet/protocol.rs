//! ClientQuery line framing
//!
//! Every command is answered by zero or more informational lines followed by
//! exactly one status line of the form `error id=<code> msg=<text>`. Only
//! `id=0` means success. Values travel as space separated `key=value` tokens.

use std::fmt;

/// First line sent by the client after a connection is accepted
pub const GREETING_PREFIX: &str = "TS3 Client";

/// Commands issued by the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    /// `auth apikey=<key>`
    Auth { api_key: &'a str },
    /// `whoami`
    WhoAmI,
    /// `clientvariable clid=<clid> <flag>`
    ClientVariable { clid: &'a str, flag: &'a str },
}

impl Command<'_> {
    /// Short name used in logs; never includes arguments
    pub fn name(&self) -> &'static str {
        match self {
            Command::Auth { .. } => "auth",
            Command::WhoAmI => "whoami",
            Command::ClientVariable { .. } => "clientvariable",
        }
    }

    /// Render the CRLF terminated wire form
    pub fn to_wire(&self) -> String {
        format!("{self}\r\n")
    }
}

impl fmt::Display for Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Auth { api_key } => write!(f, "auth apikey={api_key}"),
            Command::WhoAmI => write!(f, "whoami"),
            Command::ClientVariable { clid, flag } => {
                write!(f, "clientvariable clid={clid} {flag}")
            }
        }
    }
}

/// Terminal status line of a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub id: u32,
    pub msg: String,
}

impl StatusLine {
    /// Parse a status line, returning `None` for informational lines
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.strip_prefix("error ")?;
        let id = find_value(rest, "id")?.parse().ok()?;
        let msg = find_value(rest, "msg").map(unescape).unwrap_or_default();
        Some(Self { id, msg })
    }

    pub fn is_ok(&self) -> bool {
        self.id == 0
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "id={} msg={}", self.id, self.msg)
    }
}

/// Find the value of `key` among the space separated tokens of `line`
pub fn find_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.split(' ').find_map(|token| {
        token
            .strip_prefix(key)
            .and_then(|rest| rest.strip_prefix('='))
    })
}

/// Strip CR/LF from both ends of a line
///
/// The client separates reply lines with `\n\r`, so after splitting on LF
/// every line but the first starts with a stray CR.
pub fn trim_line(line: &str) -> &str {
    line.trim_matches(['\r', '\n'])
}

/// Undo ClientQuery value escaping
pub fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('s') => out.push(' '),
            Some('p') => out.push('|'),
            Some('/') => out.push('/'),
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
