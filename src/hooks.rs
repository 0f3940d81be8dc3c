//! Integration-test hook points.
//!
//! A hook is a SQL file named after its hook point, living in `--hook-dir`.
//! When the run reaches the point, the file is piped through the `mysql`
//! client against the same instance. A failing hook aborts the run.

use std::path::PathBuf;
use tracing::{debug, info};

use crate::error::{OscError, Result};
use crate::session::ConnectOpts;

/// The closed set of hook points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    BeforeInitConnection,
    AfterRunDdl,
    AfterSelectChunkIntoOutfile,
    BeforeCleanup,
    AfterCleanup,
}

impl HookPoint {
    pub fn file_name(&self) -> &'static str {
        match self {
            HookPoint::BeforeInitConnection => "before_init_connection",
            HookPoint::AfterRunDdl => "after_run_ddl",
            HookPoint::AfterSelectChunkIntoOutfile => "after_select_chunk_into_outfile",
            HookPoint::BeforeCleanup => "before_cleanup",
            HookPoint::AfterCleanup => "after_cleanup",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Hooks {
    dir: Option<PathBuf>,
    connect: ConnectOpts,
}

impl Hooks {
    pub fn new(dir: Option<PathBuf>, connect: ConnectOpts) -> Self {
        Hooks { dir, connect }
    }

    /// Execute the hook file for `point` if one exists.
    pub async fn fire(&self, point: HookPoint) -> Result<()> {
        let Some(dir) = &self.dir else { return Ok(()) };
        let path = dir.join(point.file_name());
        if !path.exists() {
            debug!(hook = point.file_name(), "no hook file, skipping");
            return Ok(());
        }
        info!(hook = point.file_name(), "executing hook");

        let file = std::fs::File::open(&path)?;
        let mut cmd = tokio::process::Command::new("mysql");
        cmd.arg(format!("--user={}", self.connect.user));
        if let Some(password) = &self.connect.password {
            cmd.arg(format!("--password={password}"));
        }
        if let Some(socket) = &self.connect.socket {
            cmd.arg(format!("--socket={socket}"));
        } else {
            cmd.arg(format!(
                "--host={}",
                self.connect.host.as_deref().unwrap_or("localhost")
            ));
            cmd.arg(format!("--port={}", self.connect.port));
        }
        cmd.arg(&self.connect.database);
        cmd.stdin(std::process::Stdio::from(file));

        let status = cmd.status().await?;
        if !status.success() {
            return Err(OscError::Io(std::io::Error::other(format!(
                "hook {} exited with {status}",
                point.file_name()
            ))));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_points_map_to_stable_file_names() {
        assert_eq!(
            HookPoint::BeforeInitConnection.file_name(),
            "before_init_connection"
        );
        assert_eq!(
            HookPoint::AfterSelectChunkIntoOutfile.file_name(),
            "after_select_chunk_into_outfile"
        );
        assert_eq!(HookPoint::AfterCleanup.file_name(), "after_cleanup");
    }

    #[tokio::test]
    async fn missing_hook_dir_is_a_no_op() {
        let hooks = Hooks::new(
            None,
            ConnectOpts {
                socket: None,
                host: None,
                port: 3306,
                user: "root".into(),
                password: None,
                database: "testdb".into(),
            },
        );
        hooks.fire(HookPoint::AfterRunDdl).await.unwrap();
    }
}
