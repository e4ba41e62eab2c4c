use thiserror::Error;

use crate::document::ElementId;

/// Describes an error encountered during ESI parsing or execution.
#[derive(Error, Debug)]
pub enum EsiError {
    /// The chunk recognizer found a closing tag with nothing open.
    #[error("closing tag `{0}` found with no open elements")]
    ClosingEmptyStack(String),

    /// The chunk recognizer found a closing tag that doesn't match the top of the open-element stack.
    #[error("closing tag `{0}` does not match currently open element `{1}`")]
    ClosingUnmatched(String, String),

    /// A prefixed tag referenced a namespace prefix that isn't declared anywhere in scope.
    #[error("unknown namespace prefix `{0}`")]
    UnknownPrefix(String),

    /// A cycle was detected while walking the element tree.
    #[error("cycle detected in element tree at `{0}`")]
    Cycle(String),

    /// An ESI-specific structural violation, e.g. a `try` without exactly one `attempt`/`except`.
    #[error("structure error: {0}")]
    Structure(String, Option<ElementId>),

    /// All candidate URLs for an `esi:include` failed and there was no fallback.
    #[error("include failed for `{0}`")]
    Include(String, Option<ElementId>),

    /// The `esi_prefix` option was not a valid XML identifier.
    #[error("invalid esi_prefix `{0}`: must match [A-Za-z][-A-Za-z0-9]*")]
    Configuration(String),

    /// The host's fetch implementation returned an error.
    #[error("fetch error: {0}")]
    Fetch(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Writing to the output sink failed.
    #[error("write error: {0}")]
    Write(#[source] std::io::Error),

    /// Reading the input byte stream failed.
    #[error("read error: {0}")]
    Read(#[source] std::io::Error),

    /// A fetched fragment body was not valid UTF-8.
    #[error("fragment body was not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

impl EsiError {
    /// Returns `true` for the only error kind that `esi:try`/`esi:except` is permitted to catch.
    pub fn is_include_error(&self) -> bool {
        matches!(self, EsiError::Include(_, _))
    }
}

pub type Result<T> = std::result::Result<T, EsiError>;
