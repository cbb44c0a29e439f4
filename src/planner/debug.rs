//! Debug artifact sinks
//!
//! The driver can hand parsed statements, per-candidate plans and the
//! winner's statistics to a sink for offline inspection. Writes are best
//! effort: the driver logs and drops any error a sink returns.
//!
//! `FileDebugSink` lays artifacts out as
//!
//! ```text
//! <root>/statement-parsed/<proc>_<stmt>.txt
//! <root>/statement-all-plans/<proc>_<stmt>/<candidate>.txt
//! <root>/statement-all-plans/<proc>_<stmt>/<candidate>-json.txt
//! <root>/statement-all-plans/<proc>_<stmt>/<candidate>.dot
//! <root>/statement-stats/<proc>_<stmt>.txt
//! ```
//!
//! and renames the winning candidate's files with a `WINNER-` prefix.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::planner::error::{PlannerError, PlannerResult};

/// Identifies the statement (and candidate) an artifact belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub procedure: String,
    pub statement: String,
    /// Candidate index within the compile, `None` for per-statement output
    pub candidate: Option<usize>,
}

impl ArtifactKey {
    pub fn statement(procedure: impl Into<String>, statement: impl Into<String>) -> Self {
        Self {
            procedure: procedure.into(),
            statement: statement.into(),
            candidate: None,
        }
    }

    pub fn candidate(&self, index: usize) -> Self {
        Self {
            candidate: Some(index),
            ..self.clone()
        }
    }

    fn statement_dir_name(&self) -> String {
        format!("{}_{}", self.procedure, self.statement)
    }
}

/// Kinds of artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    ParsedStatement,
    Explain,
    PlanJson,
    PlanDot,
    Statistics,
}

/// Write-only destination for debug artifacts
pub trait PlanDebugSink: Send + Sync {
    /// Whether artifacts should be produced at all
    fn enabled(&self) -> bool;

    /// Store one artifact
    fn write(&self, key: &ArtifactKey, kind: ArtifactKind, contents: &str) -> PlannerResult<()>;

    /// Flag a candidate's artifacts as the winner's
    fn mark_winner(&self, key: &ArtifactKey) -> PlannerResult<()>;
}

/// Sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDebugSink;

impl PlanDebugSink for NoopDebugSink {
    fn enabled(&self) -> bool {
        false
    }

    fn write(&self, _key: &ArtifactKey, _kind: ArtifactKind, _contents: &str) -> PlannerResult<()> {
        Ok(())
    }

    fn mark_winner(&self, _key: &ArtifactKey) -> PlannerResult<()> {
        Ok(())
    }
}

/// Sink writing text files under a root directory
#[derive(Debug, Clone)]
pub struct FileDebugSink {
    root: PathBuf,
}

impl FileDebugSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn plans_dir(&self, key: &ArtifactKey) -> PathBuf {
        self.root
            .join("statement-all-plans")
            .join(key.statement_dir_name())
    }

    fn path_for(&self, key: &ArtifactKey, kind: ArtifactKind) -> PathBuf {
        let stem = match key.candidate {
            Some(idx) => idx.to_string(),
            None => "plan".to_string(),
        };
        match kind {
            ArtifactKind::ParsedStatement => self
                .root
                .join("statement-parsed")
                .join(format!("{}.txt", key.statement_dir_name())),
            ArtifactKind::Statistics => self
                .root
                .join("statement-stats")
                .join(format!("{}.txt", key.statement_dir_name())),
            ArtifactKind::Explain => self.plans_dir(key).join(format!("{}.txt", stem)),
            ArtifactKind::PlanJson => self.plans_dir(key).join(format!("{}-json.txt", stem)),
            ArtifactKind::PlanDot => self.plans_dir(key).join(format!("{}.dot", stem)),
        }
    }
}

fn io_error(path: &Path, err: std::io::Error) -> PlannerError {
    PlannerError::Serialization(format!("{}: {}", path.display(), err))
}

impl PlanDebugSink for FileDebugSink {
    fn enabled(&self) -> bool {
        true
    }

    fn write(&self, key: &ArtifactKey, kind: ArtifactKind, contents: &str) -> PlannerResult<()> {
        let path = self.path_for(key, kind);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
        }
        fs::write(&path, contents).map_err(|e| io_error(&path, e))
    }

    fn mark_winner(&self, key: &ArtifactKey) -> PlannerResult<()> {
        for kind in [ArtifactKind::Explain, ArtifactKind::PlanJson, ArtifactKind::PlanDot] {
            let path = self.path_for(key, kind);
            if !path.exists() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let renamed = path.with_file_name(format!("WINNER-{}", name));
            fs::rename(&path, &renamed).map_err(|e| io_error(&path, e))?;
        }
        Ok(())
    }
}

/// A recorded artifact
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedArtifact {
    pub key: ArtifactKey,
    pub kind: ArtifactKind,
    pub contents: String,
}

/// Sink that keeps artifacts in memory
#[derive(Debug, Default)]
pub struct MemoryDebugSink {
    enabled: bool,
    artifacts: Mutex<Vec<RecordedArtifact>>,
    winners: Mutex<Vec<ArtifactKey>>,
}

impl MemoryDebugSink {
    /// Enabled sink
    pub fn new() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Sink that reports itself disabled but still records any write
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn artifacts(&self) -> Vec<RecordedArtifact> {
        self.artifacts.lock().clone()
    }

    pub fn winners(&self) -> Vec<ArtifactKey> {
        self.winners.lock().clone()
    }

    /// Number of write and mark calls received
    pub fn calls(&self) -> usize {
        self.artifacts.lock().len() + self.winners.lock().len()
    }
}

impl PlanDebugSink for MemoryDebugSink {
    fn enabled(&self) -> bool {
        self.enabled
    }

    fn write(&self, key: &ArtifactKey, kind: ArtifactKind, contents: &str) -> PlannerResult<()> {
        self.artifacts.lock().push(RecordedArtifact {
            key: key.clone(),
            kind,
            contents: contents.to_string(),
        });
        Ok(())
    }

    fn mark_winner(&self, key: &ArtifactKey) -> PlannerResult<()> {
        self.winners.lock().push(key.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_sink_layout_and_winner() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileDebugSink::new(dir.path());
        let stmt = ArtifactKey::statement("proc", "sql");

        sink.write(&stmt, ArtifactKind::ParsedStatement, "parsed").unwrap();
        for idx in 0..2 {
            let key = stmt.candidate(idx);
            sink.write(&key, ArtifactKind::Explain, "explain").unwrap();
            sink.write(&key, ArtifactKind::PlanJson, "{}").unwrap();
        }
        sink.mark_winner(&stmt.candidate(1)).unwrap();

        let plans = dir.path().join("statement-all-plans").join("proc_sql");
        assert!(dir.path().join("statement-parsed/proc_sql.txt").exists());
        assert!(plans.join("0.txt").exists());
        assert!(plans.join("WINNER-1.txt").exists());
        assert!(plans.join("WINNER-1-json.txt").exists());
        assert!(!plans.join("1.txt").exists());
    }

    #[test]
    fn test_memory_sink_records() {
        let sink = MemoryDebugSink::new();
        assert!(sink.enabled());
        let key = ArtifactKey::statement("p", "s").candidate(3);
        sink.write(&key, ArtifactKind::PlanDot, "digraph {}").unwrap();
        sink.mark_winner(&key).unwrap();

        assert_eq!(sink.artifacts()[0].key.candidate, Some(3));
        assert_eq!(sink.winners(), vec![key]);
        assert_eq!(sink.calls(), 2);
        assert!(!MemoryDebugSink::disabled().enabled());
        assert!(!NoopDebugSink.enabled());
    }
}
