//! Cleanup of run artifacts, both as the tail of a copy run and as the
//! standalone `cleanup` subcommand.
//!
//! Triggers are always dropped before their delta table: a trigger whose
//! delta table is missing breaks every write to the source. File removal
//! happens first so a full disk cannot block the SQL part. Each step is
//! independent and idempotent, so running cleanup twice converges to the
//! same post-state.

use std::path::Path;
use tracing::{info, warn};

use crate::error::{OscError, Result};
use crate::session::{ConnectOpts, DbSession};
use crate::sqlgen;
use crate::state_file::{find_state_files, CleanupState};

/// Which tables a cleanup pass may drop. After a successful cutover the
/// shadow name points at live data and must survive; before it, the old
/// name does not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropPlan {
    pub shadow: bool,
    pub old: bool,
}

impl DropPlan {
    /// Standalone cleanup: nothing is live except the source, drop all.
    pub fn everything() -> Self {
        DropPlan {
            shadow: true,
            old: true,
        }
    }

    /// Failure before the rename: the shadow is scratch, the old name
    /// never materialized.
    pub fn before_rename() -> Self {
        DropPlan {
            shadow: true,
            old: false,
        }
    }

    /// Success path: the shadow was renamed into place, the old copy goes.
    pub fn after_rename() -> Self {
        DropPlan {
            shadow: false,
            old: true,
        }
    }
}

/// Drop the artifacts recorded in `state`. Errors are collected rather than
/// short-circuiting so one stuck DROP does not strand the rest.
pub async fn drop_artifacts(
    session: &mut DbSession,
    state: &CleanupState,
    plan: DropPlan,
) -> Result<()> {
    let mut failures: Vec<String> = Vec::new();

    if state.outfile_dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(&state.outfile_dir) {
            failures.push(format!(
                "remove {}: {e}",
                state.outfile_dir.display()
            ));
        }
    }

    for trigger in &state.triggers {
        if let Err(e) = session
            .exec(&sqlgen::drop_trigger_if_exists(trigger))
            .await
        {
            failures.push(format!("drop trigger {trigger}: {e}"));
        }
    }

    let mut tables: Vec<&String> = vec![&state.delta_table];
    if plan.shadow {
        tables.push(&state.shadow_table);
    }
    if plan.old {
        tables.push(&state.old_table);
    }
    for table in tables {
        if let Err(e) = session.exec(&sqlgen::drop_table_if_exists(table)).await {
            failures.push(format!("drop table {table}: {e}"));
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(OscError::Cleanup(failures.join("; ")))
    }
}

/// The standalone `cleanup` subcommand: process every state file under
/// `state_dir` (or just `state_file` when given), optionally killing the
/// schema-change connection holding the run lock on the instance first.
/// A run with no state files is a no-op.
pub async fn run_cleanup(
    connect: &ConnectOpts,
    state_dir: &Path,
    state_file: Option<&Path>,
    kill_running: bool,
) -> Result<()> {
    let files = match state_file {
        Some(f) => vec![f.to_path_buf()],
        None => find_state_files(state_dir)?,
    };
    if files.is_empty() {
        info!("no state files found, nothing to clean up");
        return Ok(());
    }

    let pool = connect.pool();
    let mut session = DbSession::connect(&pool).await?;

    for path in files {
        let Some(state) = CleanupState::read(&path)? else {
            warn!(path = %path.display(), "state file is empty, removing");
            CleanupState::delete(&path)?;
            continue;
        };
        if kill_running {
            kill_lock_holder(&mut session, &state.database).await?;
        }
        info!(
            table = %state.source_table,
            pid = state.pid,
            "cleaning up artifacts from state file"
        );
        drop_artifacts(&mut session, &state, DropPlan::everything()).await?;
        CleanupState::delete(&path)?;
    }

    session.disconnect().await?;
    Ok(())
}

/// Find the connection holding the run lock on the instance and kill it.
/// Whoever holds `osc-<db>` is the running schema change; killing the
/// connection releases the lock and aborts its statements, independent of
/// which host the process runs on.
async fn kill_lock_holder(session: &mut DbSession, database: &str) -> Result<()> {
    let lock_name = format!("osc-{database}");
    let holder: Option<u64> = session
        .query_first_params::<Option<u64>, _>(sqlgen::is_used_lock(), (&lock_name,))
        .await?
        .flatten();
    match holder {
        Some(connection_id) => {
            info!(connection_id, lock = %lock_name, "killing running schema-change connection");
            session.exec(&sqlgen::kill_connection(connection_id)).await?;
        }
        None => info!(lock = %lock_name, "no running schema change holds the lock"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_plans_cover_the_three_lifecycles() {
        assert!(DropPlan::everything().shadow && DropPlan::everything().old);
        assert!(DropPlan::before_rename().shadow && !DropPlan::before_rename().old);
        assert!(!DropPlan::after_rename().shadow && DropPlan::after_rename().old);
    }
}
