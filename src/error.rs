//! Error types for the schema change tool.

use thiserror::Error;

/// Errors that can occur during an online schema change run.
#[derive(Error, Debug)]
pub enum OscError {
    /// The DDL file could not be parsed as a CREATE TABLE statement
    #[error("parse error at line {line}, column {column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    /// The schema diff was rejected by policy
    #[error("schema change rejected: {0}")]
    Validation(String),

    /// A server-side precondition does not hold (missing table, leftover
    /// artifacts, foreign keys, another run in progress, ...)
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A retryable MySQL error (deadlock, lock wait timeout, lost connection)
    #[error("transient MySQL error [{state}]: {message}")]
    TransientDb { state: String, message: String },

    /// A MySQL error that must not be retried
    #[error("MySQL error [{state}]: {message}")]
    FatalDb { state: String, message: String },

    /// Outfile or hook file i/o failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The run was interrupted by a signal or by a concurrent cleanup
    #[error("operation cancelled")]
    Cancelled,

    /// Cleanup itself failed; the state file is retained for a later
    /// `cleanup` invocation
    #[error("cleanup failed: {0}")]
    Cleanup(String),
}

impl OscError {
    /// Process exit code for this error kind.
    ///
    /// 0 = success, 1 = validation/parse, 2 = runtime, 3 = cleanup needed.
    pub fn exit_code(&self) -> i32 {
        match self {
            OscError::Parse { .. } | OscError::Validation(_) => 1,
            OscError::Cleanup(_) => 3,
            _ => 2,
        }
    }

    /// Wrap a driver error, classifying it as transient or fatal.
    ///
    /// Deadlocks (1213), lock wait timeouts (1205) and lost connections
    /// (2006, 2013) are worth retrying; everything else is not.
    pub fn from_db(err: mysql_async::Error) -> Self {
        match &err {
            mysql_async::Error::Server(server) => {
                let state = server.state.clone();
                let message = server.message.clone();
                if matches!(server.code, 1205 | 1213) {
                    OscError::TransientDb { state, message }
                } else {
                    OscError::FatalDb { state, message }
                }
            }
            mysql_async::Error::Io(_) | mysql_async::Error::Driver(_) => OscError::TransientDb {
                state: "HY000".to_string(),
                message: err.to_string(),
            },
            _ => OscError::FatalDb {
                state: "HY000".to_string(),
                message: err.to_string(),
            },
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, OscError::TransientDb { .. })
    }
}

impl From<mysql_async::Error> for OscError {
    fn from(err: mysql_async::Error) -> Self {
        OscError::from_db(err)
    }
}

pub type Result<T, E = OscError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_cli_contract() {
        let parse = OscError::Parse {
            line: 1,
            column: 1,
            message: "x".into(),
        };
        assert_eq!(parse.exit_code(), 1);
        assert_eq!(OscError::Validation("pk".into()).exit_code(), 1);
        assert_eq!(OscError::Cancelled.exit_code(), 2);
        assert_eq!(
            OscError::FatalDb {
                state: "42S02".into(),
                message: "no table".into()
            }
            .exit_code(),
            2
        );
        assert_eq!(OscError::Cleanup("drop failed".into()).exit_code(), 3);
    }
}
