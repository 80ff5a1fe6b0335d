pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A chunk, buffer or codec setting breaks a write-configuration invariant.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// A configuration does not line up with the tree it is applied to.
    #[error("structural mismatch: {0}")]
    StructuralMismatch(String),
    /// An array source failed to service a request.
    #[error("array source error: {0}")]
    Source(BoxError),
    #[error("invalid container tree: {0}")]
    InvalidTree(String),
    #[error(transparent)]
    Storage(#[from] zarrs::storage::StorageError),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    Wrapped(BoxError),
}

impl Error {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn structural_mismatch(message: impl Into<String>) -> Self {
        Self::StructuralMismatch(message.into())
    }

    pub fn invalid_tree(message: impl Into<String>) -> Self {
        Self::InvalidTree(message.into())
    }

    pub fn source_error(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Source(Box::new(error))
    }

    pub fn wrap(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Wrapped(Box::new(error))
    }
}
