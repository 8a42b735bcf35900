pub mod in_memory;
pub mod sqlite;
pub mod traits;

pub use in_memory::InMemoryTranscriptStore;
pub use sqlite::SqliteTranscriptStore;
pub use traits::{Conversation, MessagePair, TranscriptError, TranscriptStore, UserRecord};

use crate::config::StorageConfig;
use std::path::Path;
use std::sync::Arc;

/// Factory: create the right transcript backend from config
pub fn create_transcript_store(
    config: &StorageConfig,
    workspace_dir: &Path,
    default_model: &str,
) -> anyhow::Result<Arc<dyn TranscriptStore>> {
    match config.backend.as_str() {
        "memory" | "in_memory" => Ok(Arc::new(InMemoryTranscriptStore::new(default_model))),
        "sqlite" => {
            let path = config.resolved_db_path(workspace_dir);
            Ok(Arc::new(SqliteTranscriptStore::new(&path, default_model)?))
        }
        other => {
            tracing::warn!("Unknown storage backend '{other}', falling back to sqlite");
            let path = config.resolved_db_path(workspace_dir);
            Ok(Arc::new(SqliteTranscriptStore::new(&path, default_model)?))
        }
    }
}
