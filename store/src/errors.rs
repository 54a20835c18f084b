use thiserror::Error;

/// Mirrors `mecomp_storage::errors::Error`'s shape (`NotFound`/`NoId` plus a
/// boxed backend error), generalised from `surrealdb::Error` to an opaque
/// `StorageError` since this crate's only shipped backend is in-memory (see
/// `DESIGN.md`).
#[derive(Error, Debug)]
pub enum Error {
    #[error("recording or category not found")]
    NotFound,
    #[error("item already exists")]
    AlreadyExists,
    #[error("missing an id")]
    NoId,
    /// Propagated from a backing-store collaborator (spec.md §7's
    /// `StorageError`); wraps a rollback the caller already performed.
    #[error("storage backend error: {0}")]
    StorageError(String),
    /// No open transaction/savepoint to end or roll back.
    #[error("no transaction is open")]
    NoOpenTransaction,
}

pub type StoreResult<T> = std::result::Result<T, Error>;
