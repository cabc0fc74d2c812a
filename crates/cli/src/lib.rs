//! Application layer behind the `taskweave` binary.
//!
//! [`import`] reads task records; [`pipeline`] runs the purge, validate,
//! reuse-or-recompute and replace sequence against any
//! [`PartitionStore`](taskweave_core::PartitionStore).

pub mod import;
pub mod pipeline;

use std::path::Path;
use taskweave_core::StoreError;
use taskweave_store::SqliteStore;

/// Connection string for a database path. `:memory:` stays in memory.
pub fn sqlite_url(path: &Path) -> String {
    let raw = path.to_string_lossy();
    if raw.contains(":memory:") {
        "sqlite::memory:".into()
    } else {
        format!("sqlite://{raw}")
    }
}

/// Open the SQLite store at `path`, creating its directory if needed.
pub async fn open_store(path: &Path) -> Result<SqliteStore, StoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !path.to_string_lossy().contains(":memory:")
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            StoreError::Storage(format!("Failed to create {}: {e}", parent.display()))
        })?;
    }
    SqliteStore::new(&sqlite_url(path)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_path_maps_to_memory_url() {
        assert_eq!(sqlite_url(Path::new(":memory:")), "sqlite::memory:");
    }

    #[test]
    fn file_path_maps_to_file_url() {
        assert_eq!(
            sqlite_url(Path::new("/var/lib/taskweave/tasks.db")),
            "sqlite:///var/lib/taskweave/tasks.db"
        );
    }
}
