//! Top-level payloads: the copy pipeline, cleanup, and direct DDL.

pub mod cleanup;
pub mod copy;
pub mod direct;

use std::fmt;

/// Controller states. Transitions run forward; any error or signal jumps to
/// `Cleanup`, and a failed cleanup parks in `CleanupFailed` with the state
/// file retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OscState {
    Init,
    Validate,
    CreateShadow,
    InstallTriggers,
    Copy,
    ReplayCatchup,
    Cutover,
    Cleanup,
    CleanupFailed,
    Done,
}

impl fmt::Display for OscState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OscState::Init => "INIT",
            OscState::Validate => "VALIDATE",
            OscState::CreateShadow => "CREATE_SHADOW",
            OscState::InstallTriggers => "INSTALL_TRIGGERS",
            OscState::Copy => "COPY",
            OscState::ReplayCatchup => "REPLAY_CATCHUP",
            OscState::Cutover => "CUTOVER",
            OscState::Cleanup => "CLEANUP",
            OscState::CleanupFailed => "CLEANUP_FAILED",
            OscState::Done => "DONE",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_render_like_the_log_format() {
        assert_eq!(OscState::InstallTriggers.to_string(), "INSTALL_TRIGGERS");
        assert_eq!(OscState::ReplayCatchup.to_string(), "REPLAY_CATCHUP");
        assert_eq!(OscState::CleanupFailed.to_string(), "CLEANUP_FAILED");
    }
}
