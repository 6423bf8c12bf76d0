//! Error types for the library.
//!
//! Every fallible operation returns [`Result`]. Errors are never retried
//! internally; they propagate to the caller, and a failed save leaves the
//! original file untouched (see `Document::save`).

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while reading, mutating, or writing a document.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed syntax: unexpected token, missing terminator, truncated
    /// stream body. Fatal to the current parse call.
    #[error("malformed syntax at byte {offset}: {found}")]
    Syntax {
        /// Byte offset where the parse failed, relative to the parsed source.
        offset: usize,
        /// The offending token or a short description of what was found.
        found: String,
    },

    /// Explicitly rejected functionality (encrypted documents, linearized
    /// serialization). Never silently degraded.
    #[error("unsupported feature: {0}")]
    Unsupported(String),

    /// Resolution of an object number absent from the cross-reference table.
    #[error("broken reference: {number} {generation} R")]
    BrokenReference {
        /// Object number that could not be resolved.
        number: u32,
        /// Generation number of the failed lookup.
        generation: u16,
    },

    /// A reference owned by another document context was resolved directly.
    /// Cross-context access must go through the cloner.
    #[error("foreign reference: {number} {generation} R belongs to a different document")]
    ForeignReference {
        /// Object number of the foreign reference.
        number: u32,
        /// Generation number of the foreign reference.
        generation: u16,
    },

    /// Underlying read/write/seek failure from the byte source/sink.
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a [`Error::Syntax`] from an offset and whatever was found there.
    pub(crate) fn syntax(offset: usize, found: impl Into<String>) -> Self {
        Error::Syntax {
            offset,
            found: found.into(),
        }
    }
}
