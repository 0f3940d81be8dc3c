//! Online schema change for MySQL.
//!
//! Rebuilds a table under a new schema without blocking writers: the target
//! definition goes into a shadow table, rows stream over in PK-ordered
//! chunks while triggers capture concurrent DML into a delta table, a
//! replayer converges the shadow toward the source tail, and a short locked
//! window runs the final replay and an atomic `RENAME TABLE` swap.
//!
//! # Pipeline
//!
//! `INIT → VALIDATE → CREATE_SHADOW → INSTALL_TRIGGERS → COPY →
//! REPLAY_CATCHUP → CUTOVER → CLEANUP → DONE`
//!
//! Any failure or signal diverts to `CLEANUP`; a cleanup-state file written
//! before the first DDL makes the artifacts recoverable by name alone, so
//! `osc_cli cleanup` can finish the job after a crash.
//!
//! # CLI Usage
//!
//! ```bash
//! # Copy mode: full online pipeline
//! osc_cli copy --socket /var/run/mysqld/mysqld.sock --database app \
//!     --ddl-file new_schema.sql
//!
//! # Direct mode: execute the DDL as-is
//! osc_cli direct --socket ... --database app --ddl-file change.sql
//!
//! # Cleanup mode: drop leftovers recorded in state files
//! osc_cli cleanup --socket ... --database app
//! ```

pub mod capture;
pub mod config;
pub mod copier;
pub mod error;
pub mod hooks;
pub mod idents;
pub mod payload;
pub mod progress;
pub mod replay;
pub mod schema;
pub mod session;
pub mod sqlgen;
pub mod state_file;

pub use config::{ConnectArgs, CopyArgs};
pub use error::{OscError, Result};
pub use payload::cleanup::run_cleanup;
pub use payload::copy::CopyPayload;
pub use payload::direct::run_direct;
pub use progress::{CancelFlag, RunStats, ThreadRegistry};
