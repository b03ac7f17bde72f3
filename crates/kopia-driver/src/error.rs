use std::fmt;

use crate::classify::EngineErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Other,
    Config,
    Parse,
    Cancelled,
    Engine(EngineErrorKind),
}

/// Coarse failure classes callers branch on when deciding whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Configuration,
    Credential,
    TransientConnection,
    ResourceExhaustion,
    Parse,
    Cancelled,
    Other,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::TransientConnection)
    }
}

#[derive(Debug)]
pub struct Error {
    msg: String,
    kind: ErrorKind,
    // Non-empty only for errors built with `join`/`append`.
    causes: Vec<Error>,
}

impl Error {
    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self::with_kind(ErrorKind::Other, msg)
    }

    pub fn config<M: Into<String>>(msg: M) -> Self {
        Self::with_kind(ErrorKind::Config, msg)
    }

    pub fn parse<M: Into<String>>(msg: M) -> Self {
        Self::with_kind(ErrorKind::Parse, msg)
    }

    pub fn cancelled<M: Into<String>>(msg: M) -> Self {
        Self::with_kind(ErrorKind::Cancelled, msg)
    }

    pub fn engine<M: Into<String>>(kind: EngineErrorKind, msg: M) -> Self {
        Self::with_kind(ErrorKind::Engine(kind), msg)
    }

    pub fn with_kind<M: Into<String>>(kind: ErrorKind, msg: M) -> Self {
        Self {
            msg: msg.into(),
            kind,
            causes: Vec::new(),
        }
    }

    /// Combines several errors into one without dropping any of them.
    /// The combined kind is the kind of the first error.
    pub fn join<I: IntoIterator<Item = Error>>(errors: I) -> Self {
        let mut causes = Vec::new();
        for e in errors {
            if e.msg.is_empty() && !e.causes.is_empty() {
                causes.extend(e.causes);
            } else {
                causes.push(e);
            }
        }
        if causes.len() == 1 {
            if let Some(only) = causes.pop() {
                return only;
            }
        }
        let kind = causes.first().map(|e| e.kind).unwrap_or(ErrorKind::Other);
        Self {
            msg: String::new(),
            kind,
            causes,
        }
    }

    pub fn append(self, other: Error) -> Self {
        Self::join([self, other])
    }

    /// Prefixes the message, keeping the kind.
    pub fn context<C: fmt::Display>(self, ctx: C) -> Self {
        let msg = if self.msg.is_empty() {
            ctx.to_string()
        } else {
            format!("{ctx}: {}", self.msg)
        };
        Self { msg, ..self }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn causes(&self) -> &[Error] {
        &self.causes
    }

    /// True when this error, or any error combined into it, has `kind`.
    pub fn has_kind(&self, kind: ErrorKind) -> bool {
        self.kind == kind || self.causes.iter().any(|c| c.has_kind(kind))
    }

    pub fn engine_kind(&self) -> Option<EngineErrorKind> {
        match self.kind {
            ErrorKind::Engine(k) => Some(k),
            _ => None,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self.kind {
            ErrorKind::Other => ErrorClass::Other,
            ErrorKind::Config => ErrorClass::Configuration,
            ErrorKind::Parse => ErrorClass::Parse,
            ErrorKind::Cancelled => ErrorClass::Cancelled,
            ErrorKind::Engine(k) => k.class(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.causes.is_empty() {
            return write!(f, "{}", self.msg);
        }
        let rendered: Vec<String> = self.causes.iter().map(ToString::to_string).collect();
        let list = serde_json::to_string(&rendered).map_err(|_| fmt::Error)?;
        if self.msg.is_empty() {
            write!(f, "{list}")
        } else {
            write!(f, "{}: {list}", self.msg)
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
