//! Replay of captured changes onto the shadow table.
//!
//! The replayer streams the delta table in `chg_id` order and converges the
//! shadow toward the source tail. Inserts and updates re-read the current
//! source row (`REPLACE INTO shadow ... SELECT ... FROM source`), so running
//! ahead of the copier is safe; a source row that vanished since capture
//! degrades into a delete, which collapses insert-then-delete sequences.
//! The high-water mark only moves forward; rows at or below it are never
//! reapplied.

use mysql_async::{Params, Value};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::{OscError, Result};
use crate::idents::RunIdents;
use crate::progress::CancelFlag;
use crate::session::DbSession;
use crate::sqlgen;

/// What a delta row asks the replayer to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowAction {
    /// Re-read the source row and REPLACE it into the shadow
    Replace,
    /// Delete the PK from the shadow
    Delete,
}

/// Map a `chg_type` onto its replay action.
pub fn plan_row(chg_type: u8) -> Result<RowAction> {
    match chg_type {
        sqlgen::CHG_INSERT | sqlgen::CHG_UPDATE => Ok(RowAction::Replace),
        sqlgen::CHG_DELETE => Ok(RowAction::Delete),
        other => Err(OscError::FatalDb {
            state: "HY000".to_string(),
            message: format!("unknown change type {other} in delta table"),
        }),
    }
}

pub struct ReplayerConfig {
    pub batch_size: u64,
    pub skip_affected_rows_check: bool,
}

pub struct Replayer {
    session: DbSession,
    idents: RunIdents,
    pk: Vec<String>,
    config: ReplayerConfig,
    cancel: CancelFlag,
    replace_sql: String,
    delete_sql: String,
    batch_sql: String,
    backlog_sql: String,
    highwater: u64,
    replayed: u64,
    holding_locks: bool,
}

impl Replayer {
    pub fn new(
        session: DbSession,
        idents: RunIdents,
        pk: Vec<String>,
        projection: Vec<String>,
        config: ReplayerConfig,
        cancel: CancelFlag,
    ) -> Self {
        let replace_sql =
            sqlgen::replay_replace_row(&idents.shadow, &idents.source, &projection, &pk);
        let delete_sql = sqlgen::replay_delete_row(&idents.shadow, &pk);
        let batch_sql = sqlgen::select_delta_batch(&idents.delta, &pk, config.batch_size);
        let backlog_sql = sqlgen::count_delta_backlog(&idents.delta);
        Replayer {
            session,
            idents,
            pk,
            config,
            cancel,
            replace_sql,
            delete_sql,
            batch_sql,
            backlog_sql,
            highwater: 0,
            replayed: 0,
            holding_locks: false,
        }
    }

    /// Inside the cutover's `LOCK TABLES` window, `START TRANSACTION` would
    /// release the locks; statements run under autocommit instead.
    pub fn set_holding_locks(&mut self, holding: bool) {
        self.holding_locks = holding;
    }

    /// Largest `chg_id` applied so far.
    pub fn highwater(&self) -> u64 {
        self.highwater
    }

    pub fn changes_replayed(&self) -> u64 {
        self.replayed
    }

    /// Unconsumed delta rows beyond the high-water mark.
    pub async fn backlog(&mut self) -> Result<u64> {
        let count: Option<u64> = self
            .session
            .query_first_params(&self.backlog_sql.clone(), (self.highwater,))
            .await?;
        Ok(count.unwrap_or(0))
    }

    /// Replay one batch inside a transaction; the high-water mark advances
    /// only after the commit. Returns the number of rows consumed.
    pub async fn replay_batch(&mut self) -> Result<u64> {
        if self.cancel.is_cancelled() {
            return Err(OscError::Cancelled);
        }
        let batch_sql = self.batch_sql.clone();
        let rows = self.session.query_params(&batch_sql, (self.highwater,)).await?;
        if rows.is_empty() {
            return Ok(0);
        }

        let mut last_id = self.highwater;
        if !self.holding_locks {
            self.session.begin().await?;
        }
        for row in &rows {
            let chg_id: u64 = row.get(0).ok_or_else(|| OscError::FatalDb {
                state: "HY000".to_string(),
                message: "delta row missing chg_id".to_string(),
            })?;
            let chg_type: u8 = row.get(1).ok_or_else(|| OscError::FatalDb {
                state: "HY000".to_string(),
                message: "delta row missing chg_type".to_string(),
            })?;
            let pk_values: Vec<Value> = (0..self.pk.len())
                .map(|i| row.as_ref(2 + i).cloned().unwrap_or(Value::NULL))
                .collect();

            match plan_row(chg_type)? {
                RowAction::Replace => {
                    let replace_sql = self.replace_sql.clone();
                    let affected = self
                        .session
                        .exec_params(&replace_sql, Params::Positional(pk_values.clone()))
                        .await?;
                    if affected == 0 {
                        // Source row is gone; the capture was superseded by
                        // a delete we have not reached yet
                        let delete_sql = self.delete_sql.clone();
                        self.session
                            .exec_params(&delete_sql, Params::Positional(pk_values))
                            .await?;
                    }
                }
                RowAction::Delete => {
                    let delete_sql = self.delete_sql.clone();
                    let affected = self
                        .session
                        .exec_params(&delete_sql, Params::Positional(pk_values))
                        .await?;
                    if affected > 1 && !self.config.skip_affected_rows_check {
                        if !self.holding_locks {
                            self.session.rollback().await?;
                        }
                        return Err(OscError::FatalDb {
                            state: "HY000".to_string(),
                            message: format!(
                                "replay delete affected {affected} rows in {}, expected at most 1",
                                self.idents.shadow
                            ),
                        });
                    }
                }
            }
            last_id = chg_id;
        }
        if !self.holding_locks {
            self.session.commit().await?;
        }
        let consumed = rows.len() as u64;
        self.highwater = last_id;
        self.replayed += consumed;
        debug!(highwater = self.highwater, consumed, "replayed batch");
        Ok(consumed)
    }

    /// Catch-up phase: replay until the backlog is within `max_lag` rows or
    /// `max_time` has elapsed.
    pub async fn catch_up(&mut self, max_lag: u64, max_time: Duration) -> Result<u64> {
        let started = Instant::now();
        loop {
            let consumed = self.replay_batch().await?;
            let backlog = self.backlog().await?;
            if backlog <= max_lag {
                info!(backlog, "catch-up converged");
                return Ok(backlog);
            }
            if started.elapsed() > max_time {
                info!(backlog, "catch-up timed out, proceeding with current lag");
                return Ok(backlog);
            }
            if consumed == 0 {
                // backlog > max_lag but nothing consumable yet: writers are
                // racing ahead of our snapshot, try again immediately
                tokio::task::yield_now().await;
            }
        }
    }

    /// Final replay inside the cutover lock: drain the delta table
    /// completely or give up at the deadline. Returns whether it drained.
    pub async fn drain(&mut self, deadline: Instant) -> Result<bool> {
        loop {
            let consumed = self.replay_batch().await?;
            if consumed == 0 {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
        }
    }

    /// Hand the underlying session back for the cutover statements.
    pub fn session_mut(&mut self) -> &mut DbSession {
        &mut self.session
    }

    pub async fn disconnect(self) -> Result<()> {
        self.session.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_types_map_to_actions() {
        assert_eq!(plan_row(1).unwrap(), RowAction::Replace);
        assert_eq!(plan_row(2).unwrap(), RowAction::Replace);
        assert_eq!(plan_row(3).unwrap(), RowAction::Delete);
        assert!(plan_row(0).is_err());
        assert!(plan_row(9).is_err());
    }
}
