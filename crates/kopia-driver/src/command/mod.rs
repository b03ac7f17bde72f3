//! Redaction-aware command lines.
//!
//! A [`RedactedCommand`] is an append-only list of tokens. Each token is either
//! loggable or redacted; the log rendering replaces redacted values with
//! [`REDACTED_PLACEHOLDER`] while the argv rendering keeps the real values.
//! `Debug` and `Display` both use the log rendering so a command can be
//! formatted anywhere without leaking a secret.

use std::fmt;

pub mod flags;
pub mod kopia;

pub const REDACTED_PLACEHOLDER: &str = "<****>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Loggable,
    Redacted,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    key: Option<String>,
    value: String,
    visibility: Visibility,
}

impl Token {
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    fn render_log(&self) -> String {
        let value = match self.visibility {
            Visibility::Loggable => self.value.as_str(),
            Visibility::Redacted => REDACTED_PLACEHOLDER,
        };
        match &self.key {
            Some(k) => format!("{k}={value}"),
            None => value.to_string(),
        }
    }

    fn render_arg(&self) -> String {
        match &self.key {
            Some(k) => format!("{k}={}", self.value),
            None => self.value.clone(),
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.render_log())
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct RedactedCommand {
    tokens: Vec<Token>,
}

impl RedactedCommand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_loggable<I, S>(&mut self, values: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for v in values {
            self.push(None, v.into(), Visibility::Loggable);
        }
        self
    }

    pub fn append_loggable_kv(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.push(Some(key.to_string()), value.into(), Visibility::Loggable)
    }

    /// The key stays visible in logs, only the value is hidden.
    pub fn append_redacted_kv(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.push(Some(key.to_string()), value.into(), Visibility::Redacted)
    }

    pub fn append_redacted(&mut self, value: impl Into<String>) -> &mut Self {
        self.push(None, value.into(), Visibility::Redacted)
    }

    /// Appends every token of `other`, in order.
    pub fn combine(&mut self, other: &RedactedCommand) -> &mut Self {
        self.tokens.extend(other.tokens.iter().cloned());
        self
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn render_log(&self) -> String {
        self.tokens
            .iter()
            .map(Token::render_log)
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn render_argv(&self) -> Vec<String> {
        self.tokens.iter().map(Token::render_arg).collect()
    }

    fn push(&mut self, key: Option<String>, value: String, visibility: Visibility) -> &mut Self {
        self.tokens.push(Token {
            key,
            value,
            visibility,
        });
        self
    }
}

impl fmt::Display for RedactedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render_log())
    }
}

impl fmt::Debug for RedactedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RedactedCommand({:?})", self.render_log())
    }
}

/// A string that never shows up in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED_PLACEHOLDER)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
