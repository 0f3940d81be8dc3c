//! Run configuration.
//!
//! Option groups are clap `Args` structs so the CLI can flatten them; the
//! library consumes them directly.

use clap::Args;
use std::path::PathBuf;

use crate::schema::diff::DiffOptions;
use crate::session::ConnectOpts;

/// Connection parameters (`--socket` preferred, TCP as fallback).
#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Path to the MySQL unix socket
    #[arg(long, env = "MYSQL_SOCKET")]
    pub socket: Option<String>,

    /// Server hostname, used when no socket is given
    #[arg(long)]
    pub host: Option<String>,

    #[arg(long, default_value = "3306")]
    pub port: u16,

    #[arg(long, default_value = "root", env = "MYSQL_USER")]
    pub user: String,

    #[arg(long, env = "MYSQL_PWD")]
    pub password: Option<String>,

    /// Database the target table lives in
    #[arg(long)]
    pub database: String,
}

impl ConnectArgs {
    pub fn to_opts(&self) -> ConnectOpts {
        ConnectOpts {
            socket: self.socket.clone(),
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
        }
    }
}

/// Behavior switches for the copy pipeline.
#[derive(Args, Debug, Clone)]
pub struct CopyArgs {
    /// Allow the schema change to replace the primary key
    #[arg(long)]
    pub allow_new_pk: bool,

    /// Allow a new schema without any primary or unique key
    #[arg(long = "unblock-table-creation-without-pk", alias = "allow-no-pk")]
    pub allow_no_pk: bool,

    /// Resolve duplicate-key conflicts by keeping the last row instead of
    /// failing (REPLACE semantics during load and replay)
    #[arg(long)]
    pub eliminate_dups: bool,

    /// Reject the change when any column needs a lossy implicit conversion
    #[arg(long)]
    pub fail_for_implicit_conv: bool,

    /// Strip the partition clause from the new schema before applying
    #[arg(long)]
    pub rm_partition: bool,

    /// Skip the engine-equality check between old and new schema
    #[arg(long)]
    pub no_engine_check: bool,

    /// Drop leftover artifacts from a previous unclean run before starting
    #[arg(long)]
    pub force_cleanup: bool,

    /// Skip statements other than CREATE TABLE in the DDL file instead of
    /// rejecting the file
    #[arg(long)]
    pub skip_extra_statements: bool,

    /// Rows per copy chunk
    #[arg(long, default_value = "500")]
    pub chunk_size: u64,

    /// Rows per replay batch
    #[arg(long, default_value = "500")]
    pub replay_batch_size: u64,

    /// Catch-up target: keep replaying until the delta backlog is at most
    /// this many rows
    #[arg(long, default_value = "1000")]
    pub max_replay_lag: u64,

    /// Give up catch-up after this many seconds
    #[arg(long, default_value = "600")]
    pub max_replay_time: u64,

    /// Backlog size below which the cutover may begin
    #[arg(long, default_value = "100")]
    pub final_replay_limit: u64,

    /// Upper bound on the time spent holding the cutover locks, seconds
    #[arg(long, default_value = "30")]
    pub replay_timeout: u64,

    /// How many times the cutover may be abandoned for lag and retried
    #[arg(long, default_value = "10")]
    pub replay_max_attempt: u32,

    /// Retries for a failed chunk before the run fails
    #[arg(long, default_value = "3")]
    pub max_chunk_retries: u32,

    /// Extra WHERE predicate ANDed into every chunk select
    #[arg(long)]
    pub additional_where: Option<String>,

    /// Skip the replay affected-rows sanity check
    #[arg(long)]
    pub skip_affected_rows_check: bool,

    /// Skip the pre-cutover checksum comparison
    #[arg(long)]
    pub skip_checksum: bool,

    /// Compress chunk outfiles between dump and load
    #[arg(long)]
    pub enable_outfile_compression: bool,

    /// Compressor executable used for outfiles
    #[arg(long, default_value = "zstd")]
    pub compression_command: String,

    /// File extension the compressor appends
    #[arg(long, default_value = "zst")]
    pub compressed_outfile_extension: String,

    /// Directory for chunk outfiles and the state file; defaults to the
    /// system temp directory
    #[arg(long)]
    pub outfile_dir: Option<PathBuf>,

    /// Throttle when the server runs more than this many threads
    #[arg(long, default_value = "200")]
    pub max_running_threads: u64,

    /// Throttle when replication lags behind by more than this many seconds
    #[arg(long, default_value = "30")]
    pub max_replication_lag: u64,

    /// Cap for the throttle's exponential backoff, seconds
    #[arg(long, default_value = "64")]
    pub throttle_max_sleep: u64,

    /// Directory of hook files, named after their hook point
    #[arg(long)]
    pub hook_dir: Option<PathBuf>,
}

impl CopyArgs {
    pub fn diff_options(&self) -> DiffOptions {
        DiffOptions {
            allow_no_pk: self.allow_no_pk,
            allow_new_pk: self.allow_new_pk,
            eliminate_dups: self.eliminate_dups,
            fail_for_implicit_conv: self.fail_for_implicit_conv,
            no_engine_check: self.no_engine_check,
        }
    }

    pub fn outfile_base(&self) -> PathBuf {
        self.outfile_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Probe {
        #[command(flatten)]
        copy: CopyArgs,
    }

    #[test]
    fn defaults_match_documented_values() {
        let p = Probe::parse_from(["probe"]);
        assert_eq!(p.copy.chunk_size, 500);
        assert_eq!(p.copy.replay_batch_size, 500);
        assert_eq!(p.copy.replay_timeout, 30);
        assert_eq!(p.copy.replay_max_attempt, 10);
        assert_eq!(p.copy.compression_command, "zstd");
        assert!(!p.copy.eliminate_dups);
    }

    #[test]
    fn long_option_spellings() {
        let p = Probe::parse_from([
            "probe",
            "--unblock-table-creation-without-pk",
            "--eliminate-dups",
            "--chunk-size",
            "200",
            "--additional-where",
            "id > 10",
        ]);
        assert!(p.copy.allow_no_pk);
        assert!(p.copy.eliminate_dups);
        assert_eq!(p.copy.chunk_size, 200);
        assert_eq!(p.copy.additional_where.as_deref(), Some("id > 10"));
    }
}
