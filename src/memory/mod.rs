//! # Task Memory
//!
//! Append-only per-node/per-stage artifact and log storage, owned by the
//! orchestrator. Layout:
//!
//! ```text
//! <root>/<node_id>/<stage>/{task.json, result.json, log.txt, artifact.*}
//! <root>/specs/                     # spec passthrough
//! ```
//!
//! Writes are atomic per file (write-to-temp + rename), so concurrent
//! readers observe either the prior or the new version, never a torn
//! write. Retries write sibling attempt files (`task.2.json`, ...); nothing
//! is ever overwritten in place except via the atomic rename.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::contracts::{ResultMessage, TaskMessage};
use crate::state_machine::Stage;

#[derive(Error, Debug)]
pub enum TaskMemoryError {
    #[error("task memory io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("task memory serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TaskMemoryError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Paths produced by recording a result.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedResult {
    pub result_path: PathBuf,
    pub log_path: PathBuf,
    /// Canonical artifact location after any transient-path copy.
    pub artifact_path: Option<PathBuf>,
}

/// One prior attempt of a stage, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub task_path: PathBuf,
    pub result_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
}

/// Filesystem-backed task memory store.
#[derive(Debug, Clone)]
pub struct TaskMemory {
    root: PathBuf,
    artifacts_root: PathBuf,
}

impl TaskMemory {
    pub fn new(root: impl Into<PathBuf>, artifacts_root: impl Into<PathBuf>) -> Result<Self, TaskMemoryError> {
        let root = root.into();
        let artifacts_root = artifacts_root.into();
        fs::create_dir_all(&root).map_err(|e| TaskMemoryError::io(&root, e))?;
        let specs = root.join("specs");
        fs::create_dir_all(&specs).map_err(|e| TaskMemoryError::io(&specs, e))?;
        Ok(Self {
            root,
            artifacts_root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stage_dir(&self, node_id: &str, stage: Stage) -> PathBuf {
        self.root.join(node_id).join(stage.dir_name())
    }

    fn attempt_file(dir: &Path, base: &str, ext: &str, attempt: u32) -> PathBuf {
        if attempt <= 1 {
            dir.join(format!("{base}.{ext}"))
        } else {
            dir.join(format!("{base}.{attempt}.{ext}"))
        }
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), TaskMemoryError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| TaskMemoryError::io(parent, e))?;
        }
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp).map_err(|e| TaskMemoryError::io(&tmp, e))?;
            file.write_all(bytes)
                .map_err(|e| TaskMemoryError::io(&tmp, e))?;
            file.sync_all().map_err(|e| TaskMemoryError::io(&tmp, e))?;
        }
        fs::rename(&tmp, path).map_err(|e| TaskMemoryError::io(path, e))?;
        Ok(())
    }

    /// Persist the outbound task envelope for an attempt.
    pub fn record_publish(
        &self,
        node_id: &str,
        stage: Stage,
        attempt: u32,
        task: &TaskMessage,
    ) -> Result<PathBuf, TaskMemoryError> {
        let dir = self.stage_dir(node_id, stage);
        let path = Self::attempt_file(&dir, "task", "json", attempt);
        self.write_atomic(&path, &serde_json::to_vec_pretty(task)?)?;
        Ok(path)
    }

    /// Persist a result envelope, its log, and resolve the artifact path.
    ///
    /// An artifact the worker wrote outside the artifacts root is copied
    /// into the stage directory; one already under the artifacts root is
    /// recorded by its canonical path.
    pub fn record_result(
        &self,
        node_id: &str,
        stage: Stage,
        attempt: u32,
        result: &ResultMessage,
    ) -> Result<RecordedResult, TaskMemoryError> {
        let dir = self.stage_dir(node_id, stage);

        let result_path = Self::attempt_file(&dir, "result", "json", attempt);
        self.write_atomic(&result_path, &serde_json::to_vec_pretty(result)?)?;

        let log_path = Self::attempt_file(&dir, "log", "txt", attempt);
        self.write_atomic(&log_path, result.log_output.as_bytes())?;

        let artifact_path = match &result.artifacts_path {
            Some(raw) => Some(self.resolve_artifact(&dir, Path::new(raw))?),
            None => None,
        };
        if let Some(artifact) = &artifact_path {
            let pointer = dir.join("artifact_path.txt");
            self.write_atomic(&pointer, artifact.to_string_lossy().as_bytes())?;
        }

        Ok(RecordedResult {
            result_path,
            log_path,
            artifact_path,
        })
    }

    fn resolve_artifact(&self, stage_dir: &Path, raw: &Path) -> Result<PathBuf, TaskMemoryError> {
        let canonical = raw.starts_with(&self.artifacts_root) || raw.starts_with(&self.root);
        if canonical || !raw.exists() {
            return Ok(raw.to_path_buf());
        }
        let file_name = raw
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        let dest = stage_dir.join(format!("artifact.{file_name}"));
        fs::create_dir_all(stage_dir).map_err(|e| TaskMemoryError::io(stage_dir, e))?;
        fs::copy(raw, &dest).map_err(|e| TaskMemoryError::io(&dest, e))?;
        Ok(dest)
    }

    /// Write an arbitrary JSON record into a stage directory.
    pub fn record_json(
        &self,
        node_id: &str,
        stage: Stage,
        filename: &str,
        payload: &serde_json::Value,
    ) -> Result<PathBuf, TaskMemoryError> {
        let path = self.stage_dir(node_id, stage).join(filename);
        self.write_atomic(&path, &serde_json::to_vec_pretty(payload)?)?;
        Ok(path)
    }

    /// Spec passthrough under `<root>/specs/`.
    pub fn record_spec(
        &self,
        filename: &str,
        payload: &serde_json::Value,
    ) -> Result<PathBuf, TaskMemoryError> {
        let path = self.root.join("specs").join(filename);
        self.write_atomic(&path, &serde_json::to_vec_pretty(payload)?)?;
        Ok(path)
    }

    /// Canonical artifact path recorded for a stage, if any.
    pub fn get_artifact_path(&self, node_id: &str, stage: Stage) -> Option<PathBuf> {
        let pointer = self.stage_dir(node_id, stage).join("artifact_path.txt");
        fs::read_to_string(pointer).ok().map(PathBuf::from)
    }

    /// Log path of the most recent recorded attempt, if any.
    pub fn last_log_path(&self, node_id: &str, stage: Stage) -> Option<PathBuf> {
        self.list_attempts(node_id, stage)
            .into_iter()
            .rev()
            .find_map(|a| a.log_path)
    }

    /// The most recent recorded result for a stage, if any. Used on restart
    /// to decide which stages need re-publishing.
    pub fn last_result(&self, node_id: &str, stage: Stage) -> Option<ResultMessage> {
        let attempt = self
            .list_attempts(node_id, stage)
            .into_iter()
            .rev()
            .find(|a| a.result_path.is_some())?;
        let raw = fs::read(attempt.result_path?).ok()?;
        serde_json::from_slice(&raw).ok()
    }

    /// Attempt descriptors for a stage, oldest first.
    pub fn list_attempts(&self, node_id: &str, stage: Stage) -> Vec<AttemptRecord> {
        let dir = self.stage_dir(node_id, stage);
        let mut attempts = Vec::new();
        let mut attempt = 1u32;
        loop {
            let task_path = Self::attempt_file(&dir, "task", "json", attempt);
            if !task_path.exists() {
                break;
            }
            let result_path = Self::attempt_file(&dir, "result", "json", attempt);
            let log_path = Self::attempt_file(&dir, "log", "txt", attempt);
            attempts.push(AttemptRecord {
                attempt,
                task_path,
                result_path: result_path.exists().then_some(result_path),
                log_path: log_path.exists().then_some(log_path),
            });
            attempt += 1;
        }
        attempts
    }
}
