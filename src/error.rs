//! Information about a failed run and the location in the input at which it failed.

use std::fmt::{self, Display};
use std::io;

pub type Result<T> = std::result::Result<T, Error>;

// --- Error ----------------------------------------------------------------------------------------------------------

/// Details of a configuration, parse or output failure.
///
/// An error consists of an [ErrorKind] that identifies the kind of error that occurred, and optionally an
/// [ItemContext] describing the element being parsed when the problem was detected. Parse errors always carry the
/// context; configuration and resource errors usually do not.
#[derive(Debug)]
#[non_exhaustive]
pub struct Error {
    kind: ErrorKind,
    context: Option<ItemContext>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self { kind, context: None }
    }

    pub(crate) fn pinpoint(kind: ErrorKind, context: ItemContext) -> Self {
        Self {
            kind,
            context: Some(context),
        }
    }

    /// Get details about the kind of error that occurred.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Get details about the element being parsed when the error occurred, if any.
    pub fn context(&self) -> Option<&ItemContext> {
        self.context.as_ref()
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.kind, f)?;
        if let Some(context) = &self.context {
            write!(f, "\n{}", context)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.kind)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

// --- ErrorKind ------------------------------------------------------------------------------------------------------

// Errors raised deep in the parse loop know the current element but not the configuration line; errors raised while
// loading the configuration know the line number but no element. Hence kind and context are kept apart and joined
// at the point where both are known.

/// Details about the kind of error that occurred.
///
/// Errors fall into four groups: configuration (file syntax, missing or dangling definition names), resources
/// (opening files and pipes), parsing (invalid tag/length data, premature end of file, over-large children) and
/// output (write failures, bad expressions, impossible character set conversions). Every error is fatal to the run.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ErrorKind {
    #[error("cannot open '{path}': {source}")]
    Open { path: String, source: io::Error },

    #[error("error reading '{path}': {source}")]
    Read { path: String, source: io::Error },

    #[error("cannot run input command '{command}': {source}")]
    Preprocess { command: String, source: io::Error },

    #[error("error in configuration file, line {line}: {message}")]
    Config { line: u32, message: String },

    /// A post-load validation failure, e.g. a dangling definition name or a misspelled filter name.
    #[error("{0}")]
    Invalid(String),

    #[error("error in regular expression '{pattern}': {source}")]
    Regex { pattern: String, source: regex::Error },

    /// Invalid data in the input stream. `offset` is rewound to the start of the failed triplet.
    #[error("{message}, in file '{file}', offset {offset}")]
    Parse { message: String, file: String, offset: i64 },

    #[error("error writing to output: {0}")]
    Write(#[source] io::Error),

    #[error("character set conversion not possible: {from} -> {to}")]
    Recode { from: String, to: String },
}

// --- ItemContext ----------------------------------------------------------------------------------------------------

/// A snapshot of the element being parsed when a parse error was raised.
///
/// `consumed` counts the tag/length bytes plus the value bytes read so far; `dump` holds up to the first ten raw
/// bytes of the element rendered as `xNN` pairs.
#[derive(Clone, Debug, Default)]
pub struct ItemContext {
    pub level: usize,
    pub tag: String,
    pub length: i64,
    pub consumed: i64,
    pub remaining: usize,
    pub dump: String,
}

impl Display for ItemContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Item info: Level: {}, Tag: {}, Length: {}, Consumed: {}, Remaining in buffer: {}, Dump: {}",
            self.level, self.tag, self.length, self.consumed, self.remaining, self.dump
        )
    }
}
