//! Thin typed execution surface over one MySQL connection.
//!
//! Every worker task owns its own session; sessions are never shared. The
//! connection's server thread id is captured at connect time so a side
//! session can abort an in-flight statement with `KILL QUERY`.
//!
//! Plain statements go through the text protocol: much of what this tool
//! runs (`LOAD DATA`, `INTO OUTFILE`, `LOCK TABLES`, trigger DDL, `RENAME`)
//! cannot be prepared. Parameterized DML uses prepared statements.

use mysql_async::prelude::*;
use mysql_async::{Conn, Params, Pool, Row};
use tracing::debug;

use crate::error::{OscError, Result};
use crate::sqlgen;

/// Connection parameters for the target instance. Socket wins over TCP when
/// both are given; the tool normally runs on the database host.
#[derive(Debug, Clone)]
pub struct ConnectOpts {
    pub socket: Option<String>,
    pub host: Option<String>,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
}

impl ConnectOpts {
    pub fn pool(&self) -> Pool {
        let mut builder = mysql_async::OptsBuilder::default()
            .user(Some(self.user.clone()))
            .pass(self.password.clone())
            .db_name(Some(self.database.clone()));
        if let Some(socket) = &self.socket {
            builder = builder.socket(Some(socket.clone()));
        } else {
            builder = builder
                .ip_or_hostname(self.host.clone().unwrap_or_else(|| "localhost".to_string()))
                .tcp_port(self.port);
        }
        Pool::new(builder)
    }
}

pub struct DbSession {
    conn: Conn,
    thread_id: u32,
    in_transaction: bool,
}

impl DbSession {
    pub async fn connect(pool: &Pool) -> Result<Self> {
        let conn = pool.get_conn().await?;
        let thread_id = conn.id();
        Ok(DbSession {
            conn,
            thread_id,
            in_transaction: false,
        })
    }

    /// Session tuning applied to every worker connection: snapshot-friendly
    /// isolation, strict but portable SQL mode, and a wait timeout that
    /// outlives a long copy.
    pub async fn init_worker_session(&mut self) -> Result<()> {
        self.exec("SET SESSION transaction_isolation = 'REPEATABLE-READ'")
            .await?;
        self.exec("SET SESSION sql_mode = 'STRICT_ALL_TABLES'").await?;
        self.exec("SET SESSION wait_timeout = 3600").await?;
        Ok(())
    }

    /// Server thread id of this connection, the target for `KILL QUERY`.
    pub fn thread_id(&self) -> u32 {
        self.thread_id
    }

    /// Execute a plain statement (text protocol), returning affected rows.
    pub async fn exec(&mut self, stmt: &str) -> Result<u64> {
        debug!(stmt, "exec");
        self.conn.query_drop(stmt).await?;
        Ok(self.conn.affected_rows())
    }

    /// Execute a parameterized statement (prepared), returning affected rows.
    pub async fn exec_params<P: Into<Params> + Send>(&mut self, stmt: &str, params: P) -> Result<u64> {
        debug!(stmt, "exec_params");
        self.conn.exec_drop(stmt, params).await?;
        Ok(self.conn.affected_rows())
    }

    /// Run a plain query and collect all rows.
    pub async fn query(&mut self, stmt: &str) -> Result<Vec<Row>> {
        debug!(stmt, "query");
        Ok(self.conn.query(stmt).await?)
    }

    /// Run a parameterized query and collect all rows.
    pub async fn query_params<P: Into<Params> + Send>(&mut self, stmt: &str, params: P) -> Result<Vec<Row>> {
        debug!(stmt, "query_params");
        Ok(self.conn.exec(stmt, params).await?)
    }

    /// Plain query expected to produce at most one row.
    pub async fn query_first<T>(&mut self, stmt: &str) -> Result<Option<T>>
    where
        T: FromRow + Send + 'static,
    {
        debug!(stmt, "query_first");
        Ok(self.conn.query_first(stmt).await?)
    }

    /// Parameterized query expected to produce at most one row.
    pub async fn query_first_params<T, P>(&mut self, stmt: &str, params: P) -> Result<Option<T>>
    where
        T: FromRow + Send + 'static,
        P: Into<Params> + Send,
    {
        debug!(stmt, "query_first_params");
        Ok(self.conn.exec_first(stmt, params).await?)
    }

    /// Read a session/server variable.
    pub async fn var(&mut self, name: &str) -> Result<Option<String>> {
        let row: Option<(String, String)> = self
            .query_first_params("SHOW SESSION VARIABLES LIKE ?", (name,))
            .await?;
        Ok(row.map(|(_, value)| value))
    }

    pub async fn begin(&mut self) -> Result<()> {
        self.exec("START TRANSACTION").await?;
        self.in_transaction = true;
        Ok(())
    }

    pub async fn commit(&mut self) -> Result<()> {
        self.exec("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    pub async fn rollback(&mut self) -> Result<()> {
        self.exec("ROLLBACK").await?;
        self.in_transaction = false;
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub async fn lock_tables_write(&mut self, tables: &[String]) -> Result<()> {
        self.exec(&sqlgen::lock_tables_write(tables)).await?;
        Ok(())
    }

    pub async fn unlock_tables(&mut self) -> Result<()> {
        self.exec("UNLOCK TABLES").await?;
        Ok(())
    }

    /// Abort a statement running on another connection.
    pub async fn kill_query(&mut self, thread_id: u32) -> Result<()> {
        self.exec(&sqlgen::kill_query(thread_id)).await?;
        Ok(())
    }

    /// Take the instance-wide advisory lock that serializes schema-change
    /// runs against one database.
    pub async fn acquire_run_lock(&mut self, name: &str) -> Result<()> {
        let locked: Option<i64> = self
            .query_first_params(sqlgen::get_lock(), (name,))
            .await?;
        if locked != Some(1) {
            return Err(OscError::Precondition(format!(
                "another schema change is already running (lock '{name}' is held)"
            )));
        }
        Ok(())
    }

    pub async fn release_run_lock(&mut self, name: &str) -> Result<()> {
        let _: Option<i64> = self
            .query_first_params(sqlgen::release_lock(), (name,))
            .await?;
        Ok(())
    }

    /// Tear down the connection, returning it to the pool's reaper.
    pub async fn disconnect(self) -> Result<()> {
        self.conn.disconnect().await?;
        Ok(())
    }
}
