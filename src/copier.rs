//! Chunked copy of the source table into the shadow table.
//!
//! Rows move in PK-ordered chunks: each chunk is dumped with
//! `SELECT ... INTO OUTFILE` (the chunk boundary rides in session
//! variables), optionally compressed while parked on disk, then loaded with
//! `LOAD DATA INFILE ... CHARACTER SET binary`. Between chunks the copier
//! consults a health probe and backs off exponentially while the server is
//! under pressure.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{OscError, Result};
use crate::hooks::{HookPoint, Hooks};
use crate::idents::RunIdents;
use crate::progress::{CancelFlag, CopyProgress, RunStats};
use crate::session::DbSession;
use crate::sqlgen;

/// A pluggable health check consulted between chunks.
#[async_trait]
pub trait HealthProbe: Send {
    /// `false` means the server is under pressure and the copier should
    /// sleep before the next chunk.
    async fn healthy(&mut self) -> Result<bool>;
}

/// Probe backed by its own session: running-thread count and replica lag.
pub struct ServerHealthProbe {
    session: DbSession,
    max_running_threads: u64,
    max_replication_lag: u64,
}

impl ServerHealthProbe {
    pub fn new(session: DbSession, max_running_threads: u64, max_replication_lag: u64) -> Self {
        ServerHealthProbe {
            session,
            max_running_threads,
            max_replication_lag,
        }
    }
}

#[async_trait]
impl HealthProbe for ServerHealthProbe {
    async fn healthy(&mut self) -> Result<bool> {
        let running: Option<(String, u64)> = self
            .session
            .query_first("SHOW GLOBAL STATUS LIKE 'Threads_running'")
            .await?;
        if let Some((_, threads)) = running {
            if threads > self.max_running_threads {
                warn!(threads, "throttling: too many running threads");
                return Ok(false);
            }
        }
        // Replica lag applies only when this host replicates from elsewhere;
        // the statement returns no row on a primary.
        let replica_row = self
            .session
            .query("SHOW SLAVE STATUS")
            .await
            .unwrap_or_default();
        if let Some(row) = replica_row.into_iter().next() {
            let seconds: Option<u64> = row
                .get::<Option<u64>, _>("Seconds_Behind_Master")
                .flatten();
            if let Some(s) = seconds {
                if s > self.max_replication_lag {
                    warn!(lag = s, "throttling: replication lag");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

/// Probe that never throttles; used when no probe session is available.
pub struct NullProbe;

#[async_trait]
impl HealthProbe for NullProbe {
    async fn healthy(&mut self) -> Result<bool> {
        Ok(true)
    }
}

/// Exponential backoff between health checks, reset on a healthy report.
#[derive(Debug, Clone)]
pub struct Throttler {
    base: Duration,
    cap: Duration,
    current: Duration,
}

impl Throttler {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Throttler {
            base,
            cap,
            current: base,
        }
    }

    /// Next sleep duration; doubles up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.cap);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

/// Per-run copier configuration, the relevant slice of [`crate::config::CopyArgs`].
#[derive(Debug, Clone)]
pub struct CopierConfig {
    pub chunk_size: u64,
    pub max_chunk_retries: u32,
    pub eliminate_dups: bool,
    pub additional_where: Option<String>,
    pub enable_outfile_compression: bool,
    pub compression_command: String,
    pub compressed_outfile_extension: String,
    pub throttle_max_sleep: Duration,
}

pub struct ChunkCopier {
    session: DbSession,
    idents: RunIdents,
    pk: Vec<String>,
    /// Name of the index the chunk scan forces (`PRIMARY`, or the unique
    /// index standing in for a missing primary key)
    index_name: String,
    non_pk_projection: Vec<String>,
    config: CopierConfig,
    probe: Box<dyn HealthProbe>,
    throttler: Throttler,
    hooks: Hooks,
    cancel: CancelFlag,
    progress: Arc<CopyProgress>,
}

impl ChunkCopier {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: DbSession,
        idents: RunIdents,
        pk: Vec<String>,
        index_name: String,
        non_pk_projection: Vec<String>,
        config: CopierConfig,
        probe: Box<dyn HealthProbe>,
        hooks: Hooks,
        cancel: CancelFlag,
        progress: Arc<CopyProgress>,
    ) -> Self {
        let throttler = Throttler::new(Duration::from_secs(1), config.throttle_max_sleep);
        ChunkCopier {
            session,
            idents,
            pk,
            index_name,
            non_pk_projection,
            config,
            probe,
            throttler,
            hooks,
            cancel,
            progress,
        }
    }

    /// Copy until an empty chunk terminates the phase. Returns the session
    /// (for reuse) and the accumulated stats.
    pub async fn run(mut self) -> Result<(DbSession, RunStats)> {
        let mut stats = RunStats::default();
        let mut chunk_id: u64 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(OscError::Cancelled);
            }
            self.wait_until_healthy().await?;

            let rows = self.copy_chunk_with_retries(chunk_id, &mut stats).await?;
            if rows == 0 {
                break;
            }
            self.progress.record_chunk(rows);
            stats.rows_copied += rows;
            debug!(chunk_id, rows, "chunk copied");
            chunk_id += 1;
        }
        self.progress.mark_copy_done();
        info!(
            chunks = chunk_id,
            rows = stats.rows_copied,
            "copy phase complete"
        );
        Ok((self.session, stats))
    }

    async fn wait_until_healthy(&mut self) -> Result<()> {
        loop {
            if self.probe.healthy().await? {
                self.throttler.reset();
                return Ok(());
            }
            let delay = self.throttler.next_delay();
            info!(?delay, "health probe unhealthy, backing off");
            tokio::time::sleep(delay).await;
            if self.cancel.is_cancelled() {
                return Err(OscError::Cancelled);
            }
        }
    }

    async fn copy_chunk_with_retries(
        &mut self,
        chunk_id: u64,
        stats: &mut RunStats,
    ) -> Result<u64> {
        let mut attempt = 0;
        loop {
            match self.copy_chunk(chunk_id, stats).await {
                Ok(rows) => return Ok(rows),
                Err(e) if e.is_transient() && attempt < self.config.max_chunk_retries => {
                    attempt += 1;
                    let delay = Duration::from_secs(1 << attempt.min(6));
                    warn!(chunk_id, attempt, error = %e, "transient chunk failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Dump one chunk into an outfile and load it into the shadow table.
    async fn copy_chunk(&mut self, chunk_id: u64, stats: &mut RunStats) -> Result<u64> {
        let outfile = self.idents.chunk_outfile(chunk_id);
        // INTO OUTFILE refuses to overwrite; a leftover from a retried
        // attempt must go first
        remove_if_exists(&outfile).await?;

        let use_where = chunk_id > 0;
        let outfile_str = outfile.to_string_lossy().into_owned();
        let dump_sql = sqlgen::select_chunk_into_outfile(
            &self.idents.source,
            &self.pk,
            &self.non_pk_projection,
            self.config.chunk_size,
            use_where,
            self.config.additional_where.as_deref(),
            &self.index_name,
            &outfile_str,
        );
        let dump_started = Instant::now();
        let dumped = self.session.exec(&dump_sql).await?;
        stats.time_in_dump += dump_started.elapsed();
        self.hooks.fire(HookPoint::AfterSelectChunkIntoOutfile).await?;
        if dumped == 0 {
            remove_if_exists(&outfile).await?;
            return Ok(0);
        }

        if self.config.enable_outfile_compression {
            self.compress(&outfile).await?;
            self.decompress(&outfile).await?;
        }

        let load_sql = sqlgen::load_chunk(
            &self.idents.shadow,
            &self.pk,
            &self.non_pk_projection,
            self.config.eliminate_dups,
            &outfile_str,
        );
        let load_started = Instant::now();
        self.session.exec(&load_sql).await?;
        stats.time_in_load += load_started.elapsed();

        tokio::fs::remove_file(&outfile).await?;
        // Next chunk starts where this one ended
        self.session
            .exec(&sqlgen::advance_range_start(self.pk.len()))
            .await?;
        Ok(dumped)
    }

    async fn compress(&self, outfile: &Path) -> Result<()> {
        let status = tokio::process::Command::new(&self.config.compression_command)
            .arg("-q")
            .arg("-f")
            .arg("--rm")
            .arg(outfile)
            .status()
            .await?;
        if !status.success() {
            return Err(OscError::Io(std::io::Error::other(format!(
                "compressor exited with {status} for {}",
                outfile.display()
            ))));
        }
        Ok(())
    }

    async fn decompress(&self, outfile: &Path) -> Result<()> {
        let compressed = compressed_path(outfile, &self.config.compressed_outfile_extension);
        let status = tokio::process::Command::new(&self.config.compression_command)
            .arg("-d")
            .arg("-q")
            .arg("-f")
            .arg("--rm")
            .arg(&compressed)
            .status()
            .await?;
        if !status.success() {
            return Err(OscError::Io(std::io::Error::other(format!(
                "decompressor exited with {status} for {}",
                compressed.display()
            ))));
        }
        Ok(())
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// The name the compressor writes: the extension is appended to the chunk
/// file name, never substituted for its numeric suffix (`chunk.5` becomes
/// `chunk.5.zst`, not `chunk.zst`).
fn compressed_path(outfile: &Path, extension: &str) -> std::path::PathBuf {
    std::path::PathBuf::from(format!("{}.{extension}", outfile.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressed_path_appends_instead_of_replacing() {
        let chunk = Path::new("/tmp/_t_cafe/chunk.5");
        assert_eq!(
            compressed_path(chunk, "zst"),
            Path::new("/tmp/_t_cafe/chunk.5.zst")
        );
        // with_extension would have produced chunk.zst and lost the id
        assert_ne!(compressed_path(chunk, "zst"), chunk.with_extension("zst"));
    }

    #[test]
    fn throttler_doubles_to_cap_and_resets() {
        let mut t = Throttler::new(Duration::from_secs(1), Duration::from_secs(8));
        assert_eq!(t.next_delay(), Duration::from_secs(1));
        assert_eq!(t.next_delay(), Duration::from_secs(2));
        assert_eq!(t.next_delay(), Duration::from_secs(4));
        assert_eq!(t.next_delay(), Duration::from_secs(8));
        assert_eq!(t.next_delay(), Duration::from_secs(8));
        t.reset();
        assert_eq!(t.next_delay(), Duration::from_secs(1));
    }
}
