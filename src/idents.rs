//! Session-scoped identifier generation.
//!
//! For a source table `T` one run owns: shadow table `_T_new`, delta table
//! `_T_chg`, renamed old table `_T_old`, three triggers `_T_chg_<op>`, an
//! outfile directory and the cleanup-state file. Identifiers are truncated
//! to MySQL's 64-character limit; a truncated name keeps uniqueness through
//! the per-run nonce.

use rand::Rng;
use std::path::{Path, PathBuf};

/// MySQL identifier length limit, in characters.
const MAX_IDENT_CHARS: usize = 64;

/// All artifact names for one run against a single table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunIdents {
    pub source: String,
    pub shadow: String,
    pub delta: String,
    pub old: String,
    pub trigger_ins: String,
    pub trigger_upd: String,
    pub trigger_del: String,
    pub outfile_dir: PathBuf,
    pub state_file: PathBuf,
}

/// Hex nonce distinguishing concurrent/successive runs.
pub fn new_nonce() -> String {
    let n: u32 = rand::thread_rng().gen();
    format!("{n:08x}")
}

/// `_<table><suffix>`, shortened around the nonce when the result would
/// exceed the identifier limit.
fn derived_name(table: &str, suffix: &str, nonce: &str) -> String {
    let full = format!("_{table}{suffix}");
    if full.chars().count() <= MAX_IDENT_CHARS {
        return full;
    }
    // _<head>_<nonce><suffix> with head cut to fit
    let budget = MAX_IDENT_CHARS - 2 - nonce.chars().count() - suffix.chars().count();
    let head: String = table.chars().take(budget).collect();
    format!("_{head}_{nonce}{suffix}")
}

impl RunIdents {
    pub fn new(table: &str, tmpdir: &Path, nonce: &str, pid: u32) -> Self {
        let delta = derived_name(table, "_chg", nonce);
        RunIdents {
            source: table.to_string(),
            shadow: derived_name(table, "_new", nonce),
            old: derived_name(table, "_old", nonce),
            trigger_ins: derived_name(table, "_chg_ins", nonce),
            trigger_upd: derived_name(table, "_chg_upd", nonce),
            trigger_del: derived_name(table, "_chg_del", nonce),
            delta,
            outfile_dir: tmpdir.join(format!("_{table}_{nonce}")),
            state_file: tmpdir.join(format!("osc.{pid}.state")),
        }
    }

    /// Chunk outfile path: `<dir>/chunk.<n>`.
    pub fn chunk_outfile(&self, chunk_id: u64) -> PathBuf {
        self.outfile_dir.join(format!("chunk.{chunk_id}"))
    }

    pub fn triggers(&self) -> [&str; 3] {
        [&self.trigger_ins, &self.trigger_upd, &self.trigger_del]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_suffix_convention() {
        let idents = RunIdents::new("table1", Path::new("/tmp"), "deadbeef", 42);
        assert_eq!(idents.shadow, "_table1_new");
        assert_eq!(idents.delta, "_table1_chg");
        assert_eq!(idents.old, "_table1_old");
        assert_eq!(idents.trigger_ins, "_table1_chg_ins");
        assert_eq!(idents.trigger_upd, "_table1_chg_upd");
        assert_eq!(idents.trigger_del, "_table1_chg_del");
        assert_eq!(idents.state_file, PathBuf::from("/tmp/osc.42.state"));
        assert_eq!(
            idents.outfile_dir,
            PathBuf::from("/tmp/_table1_deadbeef")
        );
    }

    #[test]
    fn unicode_table_names_survive() {
        let idents = RunIdents::new("(╯°□°）╯︵ ┻━┻", Path::new("/tmp"), "deadbeef", 1);
        assert_eq!(idents.shadow, "_(╯°□°）╯︵ ┻━┻_new");
    }

    #[test]
    fn long_names_are_truncated_with_nonce() {
        let long = "x".repeat(70);
        let idents = RunIdents::new(&long, Path::new("/tmp"), "deadbeef", 1);
        for name in [
            &idents.shadow,
            &idents.delta,
            &idents.old,
            &idents.trigger_ins,
            &idents.trigger_upd,
            &idents.trigger_del,
        ] {
            assert!(name.chars().count() <= 64, "{name} too long");
            assert!(name.contains("deadbeef"), "{name} lost the nonce");
        }
        // Distinct suffixes stay distinct after truncation
        assert_ne!(idents.shadow, idents.delta);
        assert_ne!(idents.trigger_ins, idents.trigger_upd);
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let long = "┻".repeat(63);
        let idents = RunIdents::new(&long, Path::new("/tmp"), "cafecafe", 1);
        assert!(idents.shadow.chars().count() <= 64);
    }
}
