use std::{io, path::Path, path::PathBuf, sync::Arc};

use rocksdb::{DBIterator, Options, DB as Rocks};
use tracing::info;

pub use bridge_db::*;
pub use typed_db::*;

mod bridge_db;
mod typed_db;

/// Shared handle to the rocksdb instance holding cursors and queued tasks.
#[derive(Debug, Clone)]
pub struct DB(Arc<Rocks>);

/// Errors of the database layer
#[derive(thiserror::Error, Debug)]
pub enum DbError {
    /// rocksdb rejected a read or a write
    #[error(transparent)]
    Rocks(#[from] rocksdb::Error),
    /// rocksdb refused to open the database
    #[error("Cannot open database at {path:?} (resolved to {resolved:?}): {source}")]
    Open {
        /// rocksdb error
        #[source]
        source: rocksdb::Error,
        /// Configured path
        path: PathBuf,
        /// Absolute path handed to rocksdb
        resolved: PathBuf,
    },
    /// The parent directory of the configured path does not exist
    #[error("Database path {path:?} cannot be resolved: {source}")]
    InvalidPath {
        /// Filesystem error
        #[source]
        source: io::Error,
        /// Configured path
        path: PathBuf,
    },
    /// A stored value is not valid JSON for its type
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    /// A cursor entry does not hold a decimal integer
    #[error("Cursor {key} holds {value:?}, which is not a block number")]
    InvalidCursor {
        /// Cursor key
        key: String,
        /// Raw stored value
        value: String,
    },
}

/// Result of a database operation
pub type DbResult<T> = std::result::Result<T, DbError>;

/// `path` made absolute through its parent directory, which must exist.
fn resolve(path: &Path) -> DbResult<PathBuf> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut resolved = parent.canonicalize().map_err(|source| DbError::InvalidPath {
        source,
        path: path.to_owned(),
    })?;
    if let Some(name) = path.file_name() {
        resolved.push(name);
    }
    Ok(resolved)
}

impl DB {
    /// Open the database at `path`, creating it when absent
    #[tracing::instrument(err)]
    pub fn from_path(path: &Path) -> DbResult<DB> {
        let resolved = resolve(path)?;
        let existing = resolved.is_dir();
        info!(path = %resolved.display(), existing, "Opening bridge database");

        let mut opts = Options::default();
        opts.create_if_missing(true);
        let rocks = Rocks::open(&opts, &resolved).map_err(|source| DbError::Open {
            source,
            path: path.to_owned(),
            resolved,
        })?;
        Ok(DB(Arc::new(rocks)))
    }

    /// Write `value` under `key`
    pub fn store(&self, key: &[u8], value: &[u8]) -> DbResult<()> {
        self.0.put(key, value).map_err(Into::into)
    }

    /// Read the value under `key`
    pub fn retrieve(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        self.0.get(key).map_err(Into::into)
    }

    /// Whether anything is stored under `key`
    pub fn contains(&self, key: &[u8]) -> DbResult<bool> {
        Ok(self.0.get_pinned(key)?.is_some())
    }

    /// Remove the value under `key`
    pub fn delete(&self, key: &[u8]) -> DbResult<()> {
        self.0.delete(key).map_err(Into::into)
    }

    /// Iterate over every entry whose key starts with `prefix`
    pub fn prefix_iterator(&self, prefix: &[u8]) -> DBIterator {
        self.0.prefix_iterator(prefix)
    }
}
