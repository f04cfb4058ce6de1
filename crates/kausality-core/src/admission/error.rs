//! Fatal admission errors.

use thiserror::Error;

use crate::object::ObjectError;
use crate::store::StoreError;

/// Errors that abort the decision pipeline.
///
/// These surface as admission errors; the webhook scaffolding maps them to
/// HTTP responses using [`AdmissionError::status_code`]. Everything else in
/// the pipeline is local recovery with logging: detection failures never
/// silently allow, and dispatch or recording failures never affect the
/// response.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// The object bytes in the request were malformed.
    #[error("failed to parse object: {0}")]
    Parse(#[from] ObjectError),

    /// The store could not serve a fetch during decision making.
    #[error("store failure during admission: {0}")]
    Store(#[from] StoreError),
}

impl AdmissionError {
    /// The HTTP status code the webhook scaffolding should answer with.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Parse(_) => 400,
            Self::Store(_) => 500,
        }
    }
}
