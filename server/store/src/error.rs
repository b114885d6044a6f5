use dmr_proto::HubError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(&'static str),

    #[error("already exists: {0}")]
    AlreadyExists(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The hub never sees a `StoreError` directly — it only ever drops a
/// packet on `UnknownEntity`/`Transient`, per spec §7. This is the
/// single place that narrows the store's richer error surface down
/// to the hub's abstract taxonomy.
impl From<StoreError> for HubError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => HubError::UnknownEntity(what),
            StoreError::AlreadyExists(_) | StoreError::InvalidArgument(_) => {
                HubError::Transient(err.to_string())
            }
            StoreError::Database(e) => HubError::Transient(e.to_string()),
        }
    }
}
