//! The copy pipeline: the state machine that sequences validation, shadow
//! creation, change capture, chunked copy, replay, cutover and cleanup.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::capture;
use crate::config::{ConnectArgs, CopyArgs};
use crate::copier::{ChunkCopier, CopierConfig, ServerHealthProbe};
use crate::error::{OscError, Result};
use crate::hooks::{HookPoint, Hooks};
use crate::idents::{new_nonce, RunIdents};
use crate::payload::cleanup::{drop_artifacts, DropPlan};
use crate::payload::OscState;
use crate::progress::{CancelFlag, CopyProgress, RunStats, ThreadRegistry};
use crate::replay::{Replayer, ReplayerConfig};
use crate::schema::diff::{diff, Classification};
use crate::schema::parse::{parse_create, parse_creates, OtherStatements};
use crate::schema::Table;
use crate::session::{ConnectOpts, DbSession};
use crate::sqlgen;
use crate::state_file::CleanupState;

pub struct CopyPayload {
    connect: ConnectOpts,
    args: CopyArgs,
    hooks: Hooks,
    cancel: CancelFlag,
    registry: ThreadRegistry,
}

/// Everything the run accumulates between phases.
struct RunContext {
    pool: mysql_async::Pool,
    main: DbSession,
    idents: RunIdents,
    old_table: Table,
    new_table: Table,
    projection: Vec<String>,
    copy_key: Vec<String>,
    copy_key_index: String,
    state: CleanupState,
    state_written: bool,
    renamed: bool,
    lock_name: String,
}

impl CopyPayload {
    pub fn new(
        connect_args: &ConnectArgs,
        args: CopyArgs,
        cancel: CancelFlag,
        registry: ThreadRegistry,
    ) -> Self {
        let connect = connect_args.to_opts();
        let hooks = Hooks::new(args.hook_dir.clone(), connect.clone());
        CopyPayload {
            connect,
            args,
            hooks,
            cancel,
            registry,
        }
    }

    /// Run the full pipeline for every CREATE TABLE statement in the DDL
    /// file, one table at a time.
    pub async fn run(&self, ddl: &str) -> Result<RunStats> {
        let other = if self.args.skip_extra_statements {
            OtherStatements::Skip
        } else {
            OtherStatements::Reject
        };
        let mut total = RunStats::default();
        for table in parse_creates(ddl, other)? {
            let stats = self.run_table(table).await?;
            total.merge(&stats);
        }
        Ok(total)
    }

    /// The state machine for a single table.
    async fn run_table(&self, mut new_table: Table) -> Result<RunStats> {
        info!(state = %OscState::Init, table = %new_table.name, "starting schema change");
        if self.args.rm_partition {
            new_table.partition = None;
        }

        self.hooks.fire(HookPoint::BeforeInitConnection).await?;
        let pool = self.connect.pool();
        let mut main = DbSession::connect(&pool).await?;
        main.init_worker_session().await?;
        self.registry.register(main.thread_id());

        let lock_name = format!("osc-{}", self.connect.database);
        main.acquire_run_lock(&lock_name).await?;

        let mut ctx = match self.validate(pool, main, new_table, lock_name).await {
            Ok(Some(ctx)) => ctx,
            Ok(None) => return Ok(RunStats::default()),
            Err(e) => return Err(e),
        };

        let result = self.execute(&mut ctx).await;
        match result {
            Ok(stats) => {
                self.hooks.fire(HookPoint::BeforeCleanup).await?;
                info!(state = %OscState::Cleanup, "cleaning up after successful cutover");
                match self.final_cleanup(&mut ctx, DropPlan::after_rename()).await {
                    Ok(()) => {
                        self.hooks.fire(HookPoint::AfterCleanup).await?;
                        info!(state = %OscState::Done, "schema change complete");
                        self.log_stats(&stats);
                        Ok(stats)
                    }
                    Err(e) => {
                        warn!(state = %OscState::CleanupFailed, error = %e, "cleanup failed; \
                               rerun the cleanup subcommand");
                        Err(e)
                    }
                }
            }
            Err(e) => {
                warn!(state = %OscState::Cleanup, error = %e, "run failed, cleaning up");
                let _ = self.hooks.fire(HookPoint::BeforeCleanup).await;
                if ctx.renamed {
                    // The rename landed: the source already has the new
                    // schema and user data is safe. The old copy stays on
                    // disk for the cleanup subcommand.
                    warn!(
                        old = %ctx.idents.old,
                        "failure after rename; leaving old table for `cleanup`"
                    );
                    return Err(OscError::Cleanup(format!(
                        "cutover succeeded but post-rename work failed ({e}); \
                         rerun the cleanup subcommand to drop `{}`",
                        ctx.idents.old
                    )));
                }
                let plan = DropPlan::before_rename();
                match self.final_cleanup(&mut ctx, plan).await {
                    Ok(()) => {
                        let _ = self.hooks.fire(HookPoint::AfterCleanup).await;
                        Err(e)
                    }
                    Err(cleanup_err) => {
                        warn!(state = %OscState::CleanupFailed, error = %cleanup_err,
                              "cleanup failed; state file retained");
                        Err(cleanup_err)
                    }
                }
            }
        }
    }

    /// VALIDATE: preconditions, schema fetch, diff. `Ok(None)` means the
    /// table already has the desired schema.
    async fn validate(
        &self,
        pool: mysql_async::Pool,
        mut main: DbSession,
        new_table: Table,
        lock_name: String,
    ) -> Result<Option<RunContext>> {
        info!(state = %OscState::Validate, table = %new_table.name, "validating");
        let db = &self.connect.database;

        let exists: Option<i64> = main
            .query_first_params(sqlgen::table_existence(), (db, &new_table.name))
            .await?;
        if exists.is_none() {
            main.release_run_lock(&lock_name).await?;
            return Err(OscError::Precondition(format!(
                "table `{db}`.`{}` does not exist",
                new_table.name
            )));
        }

        let create: Option<(String, String)> = main
            .query_first(&sqlgen::show_create_table(&new_table.name))
            .await?;
        let Some((_, create_sql)) = create else {
            main.release_run_lock(&lock_name).await?;
            return Err(OscError::Precondition(format!(
                "SHOW CREATE TABLE returned nothing for `{}`",
                new_table.name
            )));
        };
        let old_table = parse_create(&create_sql, OtherStatements::Reject)?;

        let schema_diff = diff(&old_table, &new_table, &self.args.diff_options());
        match schema_diff.classification {
            Classification::Identical => {
                info!("table already has the desired schema, nothing to do");
                main.release_run_lock(&lock_name).await?;
                main.disconnect().await?;
                return Ok(None);
            }
            Classification::Rejected => {
                main.release_run_lock(&lock_name).await?;
                return Err(OscError::Validation(schema_diff.reasons.join("; ")));
            }
            Classification::Unsafe => {
                warn!("diff needs implicit conversions; proceeding because \
                       --fail-for-implicit-conv is off");
            }
            Classification::SafeCopy => {}
        }

        let Some(key_index) = old_table.copy_key_index() else {
            main.release_run_lock(&lock_name).await?;
            return Err(OscError::Precondition(format!(
                "table `{}` has no primary or unique key to chunk on",
                old_table.name
            )));
        };
        let copy_key = key_index.column_names();
        let copy_key_index = key_index.name.clone();
        for key_col in &copy_key {
            if new_table.column(key_col).is_none() {
                main.release_run_lock(&lock_name).await?;
                return Err(OscError::Precondition(format!(
                    "key column `{key_col}` is dropped in the new schema; \
                     split this into two separate schema changes"
                )));
            }
        }

        let fk_count: Option<u64> = main
            .query_first_params(
                sqlgen::foreign_key_count(),
                (db, &old_table.name, &old_table.name),
            )
            .await?;
        if fk_count.unwrap_or(0) > 0 {
            main.release_run_lock(&lock_name).await?;
            return Err(OscError::Precondition(format!(
                "table `{}` participates in foreign key constraints",
                old_table.name
            )));
        }

        let idents = RunIdents::new(
            &old_table.name,
            &self.args.outfile_base(),
            &new_nonce(),
            std::process::id(),
        );
        let state = CleanupState::new(db, &idents, std::process::id());

        self.check_leftovers(&mut main, &idents, &state).await?;

        let triggers: Vec<mysql_async::Row> = main
            .query_params(sqlgen::trigger_existence(), (db, &old_table.name))
            .await?;
        if !triggers.is_empty() {
            main.release_run_lock(&lock_name).await?;
            return Err(OscError::Precondition(format!(
                "table `{}` already has triggers; online copy cannot stack \
                 change capture on top of them",
                old_table.name
            )));
        }

        let projection = schema_diff.projection.clone();
        Ok(Some(RunContext {
            pool,
            main,
            idents,
            old_table,
            new_table,
            projection,
            copy_key,
            copy_key_index,
            state,
            state_written: false,
            renamed: false,
            lock_name,
        }))
    }

    /// Leftover `_T_new`/`_T_chg`/`_T_old` artifacts from an unclean run
    /// either fail the preconditions or, with `--force-cleanup`, get swept.
    async fn check_leftovers(
        &self,
        main: &mut DbSession,
        idents: &RunIdents,
        state: &CleanupState,
    ) -> Result<()> {
        let db = &self.connect.database;
        let mut leftovers = Vec::new();
        for table in [&idents.shadow, &idents.delta, &idents.old] {
            let exists: Option<i64> = main
                .query_first_params(sqlgen::table_existence(), (db, table))
                .await?;
            if exists.is_some() {
                leftovers.push(table.clone());
            }
        }
        if leftovers.is_empty() {
            return Ok(());
        }
        if self.args.force_cleanup {
            info!(?leftovers, "force-cleanup: dropping leftover artifacts");
            drop_artifacts(main, state, DropPlan::everything()).await?;
            Ok(())
        } else {
            Err(OscError::Precondition(format!(
                "leftover tables from a previous run: {}; \
                 run `cleanup` or pass --force-cleanup",
                leftovers.join(", ")
            )))
        }
    }

    /// CREATE_SHADOW through CUTOVER.
    async fn execute(&self, ctx: &mut RunContext) -> Result<RunStats> {
        let mut stats = RunStats::default();

        // The state file lands before the first state-mutating DDL
        std::fs::create_dir_all(&ctx.idents.outfile_dir)?;
        ctx.state.write(&ctx.idents.state_file)?;
        ctx.state_written = true;

        info!(state = %OscState::CreateShadow, shadow = %ctx.idents.shadow, "creating shadow table");
        ctx.main
            .exec(&ctx.new_table.to_sql_named(&ctx.idents.shadow, false))
            .await?;

        info!(state = %OscState::InstallTriggers, "installing change capture");
        capture::install(&mut ctx.main, &ctx.idents, &ctx.old_table).await?;

        info!(state = %OscState::Copy, "copying rows");
        let mut replayer = self.copy_phase(ctx, &mut stats).await?;

        info!(state = %OscState::ReplayCatchup, "catching up on captured changes");
        let replay_started = Instant::now();
        replayer
            .catch_up(
                self.args.max_replay_lag,
                Duration::from_secs(self.args.max_replay_time),
            )
            .await?;
        stats.time_in_replay += replay_started.elapsed();

        self.cutover(ctx, &mut replayer, &mut stats).await?;
        stats.changes_replayed = replayer.changes_replayed();
        replayer.disconnect().await?;

        self.hooks.fire(HookPoint::AfterRunDdl).await?;
        Ok(stats)
    }

    /// COPY: the chunk copier and the replayer run concurrently on their
    /// own sessions, stitched together by the shared progress structure.
    async fn copy_phase(&self, ctx: &mut RunContext, stats: &mut RunStats) -> Result<Replayer> {
        let progress = Arc::new(CopyProgress::default());

        let mut copy_session = DbSession::connect(&ctx.pool).await?;
        copy_session.init_worker_session().await?;
        self.registry.register(copy_session.thread_id());

        let probe_session = DbSession::connect(&ctx.pool).await?;
        let probe = ServerHealthProbe::new(
            probe_session,
            self.args.max_running_threads,
            self.args.max_replication_lag,
        );

        let mut replay_session = DbSession::connect(&ctx.pool).await?;
        replay_session.init_worker_session().await?;
        self.registry.register(replay_session.thread_id());

        let non_pk_projection: Vec<String> = ctx
            .projection
            .iter()
            .filter(|c| !ctx.copy_key.contains(c))
            .cloned()
            .collect();

        let copier = ChunkCopier::new(
            copy_session,
            ctx.idents.clone(),
            ctx.copy_key.clone(),
            ctx.copy_key_index.clone(),
            non_pk_projection,
            CopierConfig {
                chunk_size: self.args.chunk_size,
                max_chunk_retries: self.args.max_chunk_retries,
                eliminate_dups: self.args.eliminate_dups,
                additional_where: self.args.additional_where.clone(),
                enable_outfile_compression: self.args.enable_outfile_compression,
                compression_command: self.args.compression_command.clone(),
                compressed_outfile_extension: self.args.compressed_outfile_extension.clone(),
                throttle_max_sleep: Duration::from_secs(self.args.throttle_max_sleep),
            },
            Box::new(probe),
            self.hooks.clone(),
            self.cancel.clone(),
            Arc::clone(&progress),
        );

        let mut replayer = Replayer::new(
            replay_session,
            ctx.idents.clone(),
            ctx.copy_key.clone(),
            ctx.projection.clone(),
            ReplayerConfig {
                batch_size: self.args.replay_batch_size,
                skip_affected_rows_check: self.args.skip_affected_rows_check,
            },
            self.cancel.clone(),
        );

        let replay_progress = Arc::clone(&progress);
        let replay_task = async move {
            // Delta consumption starts once the copier finishes: a delete
            // replayed between a chunk's dump and its load would let the
            // load resurrect the row after its delta entry was consumed.
            // Until then this task watches the backlog so the operator sees
            // the lag building up.
            while !replay_progress.copy_done() {
                let backlog = replayer.backlog().await?;
                if backlog > 0 {
                    tracing::debug!(backlog, "changes queued behind the copy");
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            while replayer.replay_batch().await? > 0 {}
            Ok::<Replayer, OscError>(replayer)
        };

        let ((copy_session, copy_stats), replayer) =
            tokio::try_join!(copier.run(), replay_task)?;
        stats.merge(&copy_stats);
        copy_session.disconnect().await?;
        Ok(replayer)
    }

    /// CUTOVER: lock, drain, checksum, rename. Abandons the attempt and
    /// falls back to catch-up when the final replay cannot finish inside
    /// the lock budget.
    async fn cutover(
        &self,
        ctx: &mut RunContext,
        replayer: &mut Replayer,
        stats: &mut RunStats,
    ) -> Result<()> {
        let tables = [
            ctx.idents.source.clone(),
            ctx.idents.shadow.clone(),
            ctx.idents.delta.clone(),
        ];
        for attempt in 1..=self.args.replay_max_attempt {
            if self.cancel.is_cancelled() {
                return Err(OscError::Cancelled);
            }
            let backlog = replayer.backlog().await?;
            if backlog > self.args.final_replay_limit {
                info!(backlog, attempt, "backlog too large for cutover, catching up");
                replayer
                    .catch_up(
                        self.args.final_replay_limit,
                        Duration::from_secs(self.args.max_replay_time),
                    )
                    .await?;
                continue;
            }

            info!(state = %OscState::Cutover, attempt, "entering cutover window");
            let lock_started = Instant::now();
            replayer.session_mut().lock_tables_write(&tables).await?;
            replayer.set_holding_locks(true);

            let deadline = lock_started + Duration::from_secs(self.args.replay_timeout);
            let drained = replayer.drain(deadline).await;
            match drained {
                Ok(true) => {}
                Ok(false) => {
                    replayer.set_holding_locks(false);
                    replayer.session_mut().unlock_tables().await?;
                    stats.time_in_lock += lock_started.elapsed();
                    warn!(attempt, "final replay exceeded the lock budget, retrying");
                    continue;
                }
                Err(e) => {
                    replayer.set_holding_locks(false);
                    let _ = replayer.session_mut().unlock_tables().await;
                    return Err(e);
                }
            }

            if !self.args.skip_checksum {
                if let Err(e) = self.verify_checksum(ctx, replayer).await {
                    replayer.set_holding_locks(false);
                    let _ = replayer.session_mut().unlock_tables().await;
                    return Err(e);
                }
            }

            let rename = sqlgen::rename_cutover(&ctx.idents.source, &ctx.idents.old, &ctx.idents.shadow);
            replayer.session_mut().exec(&rename).await?;
            ctx.renamed = true;
            replayer.set_holding_locks(false);
            replayer.session_mut().unlock_tables().await?;
            stats.time_in_lock += lock_started.elapsed();
            info!("cutover complete, new schema is serving");
            return Ok(());
        }
        Err(OscError::FatalDb {
            state: "HY000".to_string(),
            message: format!(
                "cutover abandoned {} times; writes outpace the final replay budget",
                self.args.replay_max_attempt
            ),
        })
    }

    /// Pre-rename checksum over the shared, unmodified projection. Both
    /// tables are stable here: the source is write-locked and the delta is
    /// drained.
    async fn verify_checksum(&self, ctx: &RunContext, replayer: &mut Replayer) -> Result<()> {
        let old_canon = ctx.old_table.canonical();
        let new_canon = ctx.new_table.canonical();
        let columns: Vec<String> = ctx
            .projection
            .iter()
            .filter(|name| {
                ctx.copy_key.contains(name)
                    || old_canon.column(name).map(|c| c.to_sql())
                        == new_canon.column(name).map(|c| c.to_sql())
            })
            .cloned()
            .collect();
        let source_sql = sqlgen::checksum_table(&ctx.idents.source, &columns);
        let shadow_sql = sqlgen::checksum_table(&ctx.idents.shadow, &columns);
        let session = replayer.session_mut();
        let source_row = session.query(&source_sql).await?;
        let shadow_row = session.query(&shadow_sql).await?;
        let source_vals: Vec<mysql_async::Value> =
            source_row.into_iter().next().map(|r| r.unwrap()).unwrap_or_default();
        let shadow_vals: Vec<mysql_async::Value> =
            shadow_row.into_iter().next().map(|r| r.unwrap()).unwrap_or_default();
        if source_vals != shadow_vals {
            return Err(OscError::FatalDb {
                state: "HY000".to_string(),
                message: format!(
                    "checksum mismatch between `{}` and `{}` before rename",
                    ctx.idents.source, ctx.idents.shadow
                ),
            });
        }
        info!("checksum verified across {} columns", columns.len());
        Ok(())
    }

    /// Shared cleanup tail: drop artifacts per plan, delete the state file,
    /// release the run lock.
    async fn final_cleanup(&self, ctx: &mut RunContext, plan: DropPlan) -> Result<()> {
        if ctx.state_written {
            drop_artifacts(&mut ctx.main, &ctx.state, plan).await?;
            CleanupState::delete(&ctx.idents.state_file)?;
        }
        ctx.main.release_run_lock(&ctx.lock_name).await?;
        Ok(())
    }

    fn log_stats(&self, stats: &RunStats) {
        info!(
            rows_copied = stats.rows_copied,
            changes_replayed = stats.changes_replayed,
            time_in_dump = ?stats.time_in_dump,
            time_in_load = ?stats.time_in_load,
            time_in_replay = ?stats.time_in_replay,
            time_in_lock = ?stats.time_in_lock,
            "run statistics"
        );
    }
}
