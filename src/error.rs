//! Library-wide error and result types.

use std::fmt;
use std::io;

use thiserror::Error;

/// Result alias used throughout nitrofs.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors the library can produce.
///
/// Error messages are kept intentionally terse; callers that need richer
/// context should wrap `Error` in their own type.
#[derive(Debug, Error)]
pub enum Error {
    /// The file source failed validation; nothing was written.
    #[error("{0}")]
    Validation(ValidationErrors),
    /// No entry matches the requested path.
    #[error("not found: {0}")]
    NotFound(String),
    /// The path is malformed (empty segments, `.`/`..` segments, rooted).
    #[error("invalid path: {0}")]
    InvalidPath(String),
    /// A path segment other than the last one names a file.
    #[error("not a directory: {0}")]
    NotADirectory(String),
    /// An ID, offset or size field would read outside the valid region.
    #[error("invalid offset or size")]
    InvalidRange,
    /// A structural constraint was violated (message describes which one).
    #[error("parse error: {0}")]
    Parse(&'static str),
    /// An underlying I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// The rule a single name or tree property broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// Names must be at least one byte long.
    EmptyName,
    /// Names are limited to 127 bytes.
    NameTooLong,
    /// Names are limited to printable ASCII minus `\ / ? " < > * : ; |`.
    IllegalCharacters,
    /// The projected image exceeds the 512 MiB ceiling.
    TooLarge,
    /// More files (tree plus overlays) than a 16-bit file ID can address.
    TooManyFiles,
    /// More directories than a 12-bit directory reference can address.
    TooManyDirectories,
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::EmptyName => "file name is empty",
            Self::NameTooLong => "file name exceeds 127 byte limit",
            Self::IllegalCharacters => "file name contains illegal symbols",
            Self::TooLarge => "filesystem exceeds 512 MB",
            Self::TooManyFiles => "filesystem exceeds 65536 files",
            Self::TooManyDirectories => "filesystem exceeds 4096 directories",
        };
        f.write_str(s)
    }
}

/// One failed check, tied to the path that failed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Slash-separated path of the offending entry (`.` for whole-tree checks).
    pub path: String,
    pub kind: ValidationErrorKind,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.kind)
    }
}

/// Every check that failed during validation, in walk order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationErrors {
    pub(crate) fn push(&mut self, path: impl Into<String>, kind: ValidationErrorKind) {
        self.issues.push(ValidationIssue {
            path: path.into(),
            kind,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Whether any issue of the given kind was recorded.
    pub fn contains(&self, kind: ValidationErrorKind) -> bool {
        self.issues.iter().any(|i| i.kind == kind)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed")?;
        for (i, issue) in self.issues.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

impl From<ValidationErrors> for Error {
    fn from(e: ValidationErrors) -> Self {
        Error::Validation(e)
    }
}
