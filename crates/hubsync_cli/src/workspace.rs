//! JSON workspace holding both stores.
//!
//! The CLI runs the engine over the in-memory clients. A workspace file is
//! the serialized state of both of them; every command loads it, and
//! commands that write save it back.

use hubsync_engine::{
    HubSnapshot, MemoryHub, MemoryRemote, RemoteSnapshot, SyncConfig, SyncEngine, SyncError,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Engine over the in-memory clients.
pub type Engine = SyncEngine<MemoryRemote, MemoryHub>;

/// Errors reading or writing workspace and configuration files.
#[derive(Error, Debug)]
pub enum WorkspaceError {
    /// The file could not be read or written.
    #[error("cannot access {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The file is not valid JSON of the expected shape.
    #[error("{path} is malformed: {source}")]
    Format {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// The snapshot could not be restored.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Serialized state of both stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    /// Remote tracking service.
    #[serde(default)]
    pub remote: RemoteSnapshot,
    /// Local hub.
    #[serde(default)]
    pub hub: HubSnapshot,
}

impl Workspace {
    /// Reads a workspace file.
    pub fn load(path: &Path) -> Result<Self, WorkspaceError> {
        read_json(path)
    }

    /// Writes the workspace, replacing the file only once the new content is on disk.
    pub fn save(&self, path: &Path) -> Result<(), WorkspaceError> {
        let json = serde_json::to_string_pretty(self).map_err(|source| WorkspaceError::Format {
            path: path.to_path_buf(),
            source,
        })?;
        let staging = path.with_extension("json.tmp");
        let io_err = |source| WorkspaceError::Io {
            path: path.to_path_buf(),
            source,
        };
        fs::write(&staging, json).map_err(io_err)?;
        fs::rename(&staging, path).map_err(io_err)?;
        debug!(path = %path.display(), "workspace saved");
        Ok(())
    }

    /// Restores both stores and builds an engine over them.
    pub fn into_engine(self, config: SyncConfig) -> Result<Engine, WorkspaceError> {
        let remote = MemoryRemote::from_snapshot(self.remote)?;
        let hub = MemoryHub::from_snapshot(self.hub);
        Ok(SyncEngine::new(config, remote, hub))
    }

    /// Captures the current state of an engine's stores.
    pub fn capture(engine: &Engine) -> Self {
        Self {
            remote: engine.remote().snapshot(),
            hub: engine.hub().snapshot(),
        }
    }
}

/// Loads the engine configuration; defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> Result<SyncConfig, WorkspaceError> {
    match path {
        Some(path) => read_json(path),
        None => Ok(SyncConfig::default()),
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, WorkspaceError> {
    let content = fs::read_to_string(path).map_err(|source| WorkspaceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| WorkspaceError::Format {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubsync_engine::{LocalEntity, LocalProject};
    use hubsync_model::{Fields, RemoteType};
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let engine = Workspace::default().into_engine(SyncConfig::default()).unwrap();
        let mut fields = Fields::new();
        fields.insert("code".into(), json!("demo"));
        engine.remote().insert(RemoteType::Project, fields);
        engine.hub().add_project(LocalProject::new("demo"));
        engine
            .hub()
            .add_entity("demo", LocalEntity::folder("f1", None, "Shot", "sh010"));

        let saved = Workspace::capture(&engine);
        saved.save(&path).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = Workspace::load(&path).unwrap();
        assert_eq!(loaded, saved);
        let restored = loaded.into_engine(SyncConfig::default()).unwrap();
        assert_eq!(restored.remote().records(RemoteType::Project).len(), 1);
        assert_eq!(restored.hub().entities("demo")[0].id, "f1");
    }

    #[test]
    fn missing_and_malformed_files_are_reported() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(Workspace::load(&missing), Err(WorkspaceError::Io { .. })));

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{ not json").unwrap();
        let err = Workspace::load(&broken).unwrap_err();
        assert!(matches!(err, WorkspaceError::Format { .. }));
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn config_defaults_without_a_file() {
        let config = load_config(None).unwrap();
        assert_eq!(config.project_code_field, "code");

        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"project_code_field": "sg_code", "enabled_entities": ["Shot"]}"#).unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.project_code_field, "sg_code");
        assert!(config.is_enabled(RemoteType::Shot));
        assert!(!config.is_enabled(RemoteType::Asset));
    }
}
