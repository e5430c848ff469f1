pub mod cleanup;
pub mod discussions;
pub mod lifecycle;
pub mod matcher;
pub mod mentions;
pub mod messages;

/// Domain error taxonomy. The route layer maps these onto HTTP statuses;
/// store failures carry their context up untouched.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),
    #[error("not a participant in this discussion")]
    NotParticipant,
    #[error("forbidden")]
    Forbidden,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
