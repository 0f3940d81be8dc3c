//! Persisted cleanup state.
//!
//! Written before the first state-mutating DDL and deleted as the last
//! cleanup step, so a crashed run can always be cleaned by name alone.
//! The file is line-delimited: one self-describing JSON record per line,
//! the last line wins (a rewrite after cutover appends rather than
//! truncating mid-crash).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::idents::RunIdents;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanupState {
    pub database: String,
    pub source_table: String,
    pub shadow_table: String,
    pub delta_table: String,
    pub old_table: String,
    pub outfile_dir: PathBuf,
    pub triggers: Vec<String>,
    pub pid: u32,
    pub created_at: DateTime<Utc>,
}

impl CleanupState {
    pub fn new(database: &str, idents: &RunIdents, pid: u32) -> Self {
        CleanupState {
            database: database.to_string(),
            source_table: idents.source.clone(),
            shadow_table: idents.shadow.clone(),
            delta_table: idents.delta.clone(),
            old_table: idents.old.clone(),
            outfile_dir: idents.outfile_dir.clone(),
            triggers: idents.triggers().iter().map(|t| t.to_string()).collect(),
            pid,
            created_at: Utc::now(),
        }
    }

    /// Append this record as one line; creates the file when missing.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let line = serde_json::to_string(self).map_err(std::io::Error::other)?;
        writeln!(file, "{line}")?;
        file.sync_all()?;
        Ok(())
    }

    /// Read the newest record; `None` when the file does not exist.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let last = content.lines().rev().find(|l| !l.trim().is_empty());
        match last {
            None => Ok(None),
            Some(line) => {
                let state = serde_json::from_str(line).map_err(std::io::Error::other)?;
                Ok(Some(state))
            }
        }
    }

    pub fn delete(path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// All state files under `dir`, oldest first. Used by `cleanup` with no
/// explicit target.
pub fn find_state_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("osc.") && name.ends_with(".state") {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_idents(dir: &Path) -> RunIdents {
        RunIdents::new("table1", dir, "cafebabe", 77)
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let idents = sample_idents(dir.path());
        let state = CleanupState::new("testdb", &idents, 77);
        state.write(&idents.state_file).unwrap();
        let loaded = CleanupState::read(&idents.state_file).unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn last_line_wins() {
        let dir = tempfile::tempdir().unwrap();
        let idents = sample_idents(dir.path());
        let first = CleanupState::new("db1", &idents, 77);
        let mut second = first.clone();
        second.database = "db2".to_string();
        first.write(&idents.state_file).unwrap();
        second.write(&idents.state_file).unwrap();
        let loaded = CleanupState::read(&idents.state_file).unwrap().unwrap();
        assert_eq!(loaded.database, "db2");
    }

    #[test]
    fn missing_file_reads_as_none_and_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("osc.1.state");
        assert!(CleanupState::read(&path).unwrap().is_none());
        CleanupState::delete(&path).unwrap();
        CleanupState::delete(&path).unwrap();
    }

    #[test]
    fn finds_state_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("osc.12.state"), "{}").unwrap();
        std::fs::write(dir.path().join("osc.9.state"), "{}").unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), "x").unwrap();
        let files = find_state_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files
            .iter()
            .all(|f| f.file_name().unwrap().to_string_lossy().starts_with("osc.")));
    }
}
