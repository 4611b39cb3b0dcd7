//! On-disk artifacts of a run.
//!
//! Layout under `{work_dir}/{run_id}/`, where `{task}` and `{function}`
//! directory names are sanitized and suffixed with a hash of the raw name:
//!
//! - `{task}/{function}/{function}.rhai`: live source
//! - `{task}/{function}/{function}.round_{n}.rhai`: source executed in round n,
//!   kept when a later round replaces it
//! - `{task}/{function}/{function}.round_{n}.log`: captured output of round n
//!
//! Files are replaced with backup-before-overwrite; nothing is deleted.

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use crate::utils::{sanitize_identifier, unique_slug};

/// Per-run artifact directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    run_id: String,
    run_dir: PathBuf,
}

impl ArtifactStore {
    /// Creates `{work_dir}/{run_id}` for a fresh run id.
    pub fn create(work_dir: &Path) -> io::Result<Self> {
        let run_id = Uuid::new_v4().to_string();
        let run_dir = work_dir.join(&run_id);
        std::fs::create_dir_all(&run_dir)?;
        Ok(Self { run_id, run_dir })
    }

    /// Run identifier.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Root directory of this run.
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Directory holding everything for one (task, function).
    pub fn function_dir(&self, task: &str, function: &str) -> PathBuf {
        self.run_dir
            .join(unique_slug(task))
            .join(unique_slug(function))
    }

    /// Live source path for a function.
    pub fn source_path(&self, task: &str, function: &str, extension: &str) -> PathBuf {
        self.function_dir(task, function)
            .join(format!("{}.{}", sanitize_identifier(function), extension))
    }

    /// Writes `code` to `path`, first moving any existing file to its
    /// round-`replaced_round` backup. Returns the backup path, if one was made.
    pub fn commit(&self, path: &Path, code: &str, replaced_round: u32) -> io::Result<Option<PathBuf>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let backup = if path.exists() {
            let backup = backup_path(path, replaced_round);
            std::fs::rename(path, &backup)?;
            debug!(from = %path.display(), to = %backup.display(), "Backed up artifact");
            Some(backup)
        } else {
            None
        };

        std::fs::write(path, code)?;
        Ok(backup)
    }

    /// Writes the captured output of one round.
    pub fn write_log(&self, task: &str, function: &str, round: u32, log: &str) -> io::Result<PathBuf> {
        let dir = self.function_dir(task, function);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.round_{}.log", sanitize_identifier(function), round));
        std::fs::write(&path, log)?;
        Ok(path)
    }
}

/// `dir/name.ext` becomes `dir/name.round_{n}.ext`.
pub fn backup_path(path: &Path, round: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}.round_{}.{}", stem, round, ext.to_string_lossy()),
        None => format!("{}.round_{}", stem, round),
    };
    path.with_file_name(name)
}
