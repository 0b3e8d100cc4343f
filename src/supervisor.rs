//! Detector process supervision.
//!
//! The supervisor owns the external motion detector's lifecycle. At most
//! one tracked process handle is live at any time; `start` is idempotent
//! and `stop` targets the tracked handle rather than signalling by
//! process name. The state/handle pair sits behind a single mutex so
//! concurrent start/stop calls serialize.

use serde::Serialize;
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The detector binary or its configuration could not be launched.
    /// The supervisor stays `Stopped` and a later `start` may retry.
    #[error("failed to launch detector: {0}")]
    LaunchFailure(#[source] std::io::Error),
    /// Terminating or reaping the tracked process failed. The handle is
    /// cleared regardless so a future `start` is not blocked.
    #[error("failed to stop detector: {0}")]
    StopFailure(#[source] std::io::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorState {
    Stopped,
    Running,
}

/// Outcome of a `stop` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopAck {
    Stopped,
    /// Nothing was running; stop is a no-op.
    NotRunning,
}

#[derive(Clone, Debug)]
pub struct DetectorConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            program: "motion".to_string(),
            args: vec!["-c".to_string(), "config/motion.conf".to_string()],
        }
    }
}

enum DetectorSession {
    Stopped,
    Running { child: Child },
}

pub struct Supervisor {
    config: DetectorConfig,
    session: Mutex<DetectorSession>,
}

impl Supervisor {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            session: Mutex::new(DetectorSession::Stopped),
        }
    }

    /// Launches the detector if it is not already running. A tracked
    /// process that died outside our control is reaped and replaced.
    pub fn start(&self) -> Result<(), SupervisorError> {
        let mut session = self.lock_session();

        if let DetectorSession::Running { child } = &mut *session {
            match child.try_wait() {
                Ok(None) => {
                    log::info!("detector already running (pid {})", child.id());
                    return Ok(());
                }
                Ok(Some(status)) => {
                    log::warn!("detector exited outside supervision ({status}); relaunching");
                }
                Err(err) => {
                    log::warn!("could not poll tracked detector ({err}); relaunching");
                }
            }
            *session = DetectorSession::Stopped;
        }

        let child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(SupervisorError::LaunchFailure)?;
        log::info!(
            "detector started: {} (pid {})",
            self.config.program,
            child.id()
        );
        *session = DetectorSession::Running { child };
        Ok(())
    }

    /// Terminates the tracked detector. Even when termination fails the
    /// handle is cleared, so the supervisor never reports `Running` for
    /// a handle it knows to be invalid.
    pub fn stop(&self) -> Result<StopAck, SupervisorError> {
        let mut session = self.lock_session();

        let mut child = match std::mem::replace(&mut *session, DetectorSession::Stopped) {
            DetectorSession::Stopped => {
                log::info!("detector stop requested but nothing is running");
                return Ok(StopAck::NotRunning);
            }
            DetectorSession::Running { child } => child,
        };

        let pid = child.id();
        if let Err(err) = child.kill() {
            log::warn!("failed to signal detector pid {pid}: {err}");
            let _ = child.wait();
            return Err(SupervisorError::StopFailure(err));
        }
        match child.wait() {
            Ok(status) => {
                log::info!("detector pid {pid} stopped ({status})");
                Ok(StopAck::Stopped)
            }
            Err(err) => {
                log::warn!("failed to reap detector pid {pid}: {err}");
                Err(SupervisorError::StopFailure(err))
            }
        }
    }

    /// Reports the current state, reaping a process that exited on its
    /// own so the answer reflects reality rather than the last command.
    pub fn status(&self) -> DetectorState {
        let mut session = self.lock_session();
        if let DetectorSession::Running { child } = &mut *session {
            match child.try_wait() {
                Ok(None) => return DetectorState::Running,
                Ok(Some(status)) => {
                    log::warn!("detector exited outside supervision ({status})");
                }
                Err(err) => {
                    log::warn!("could not poll tracked detector: {err}");
                    return DetectorState::Running;
                }
            }
            *session = DetectorSession::Stopped;
        }
        DetectorState::Stopped
    }

    fn lock_session(&self) -> MutexGuard<'_, DetectorSession> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        let session = self.session.get_mut().unwrap_or_else(|p| p.into_inner());
        if let DetectorSession::Running { child } = session {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sleeper() -> Supervisor {
        Supervisor::new(DetectorConfig {
            program: "sleep".to_string(),
            args: vec!["30".to_string()],
        })
    }

    #[test]
    fn start_is_idempotent() {
        let supervisor = sleeper();
        supervisor.start().expect("first start");
        let first_pid = match &*supervisor.lock_session() {
            DetectorSession::Running { child } => child.id(),
            DetectorSession::Stopped => panic!("expected running session"),
        };

        supervisor.start().expect("second start");
        let second_pid = match &*supervisor.lock_session() {
            DetectorSession::Running { child } => child.id(),
            DetectorSession::Stopped => panic!("expected running session"),
        };

        assert_eq!(first_pid, second_pid);
        assert_eq!(supervisor.stop().expect("stop"), StopAck::Stopped);
    }

    #[test]
    fn stop_when_stopped_is_a_noop() {
        let supervisor = sleeper();
        assert_eq!(supervisor.stop().expect("stop"), StopAck::NotRunning);
        assert_eq!(supervisor.status(), DetectorState::Stopped);
    }

    #[test]
    fn launch_failure_leaves_supervisor_retryable() {
        let supervisor = Supervisor::new(DetectorConfig {
            program: "/nonexistent/warden-detector".to_string(),
            args: vec![],
        });
        let err = supervisor.start().unwrap_err();
        assert!(matches!(err, SupervisorError::LaunchFailure(_)));
        assert_eq!(supervisor.status(), DetectorState::Stopped);

        // A retry with a valid command succeeds from the same state.
        let retry = sleeper();
        retry.start().expect("retry start");
        assert_eq!(retry.status(), DetectorState::Running);
        retry.stop().expect("stop");
    }

    #[test]
    fn stop_clears_the_tracked_handle() {
        let supervisor = sleeper();
        supervisor.start().expect("start");
        assert_eq!(supervisor.status(), DetectorState::Running);
        assert_eq!(supervisor.stop().expect("stop"), StopAck::Stopped);
        assert_eq!(supervisor.status(), DetectorState::Stopped);
        assert_eq!(supervisor.stop().expect("stop again"), StopAck::NotRunning);
    }

    #[test]
    fn start_replaces_a_process_that_died_on_its_own() {
        let supervisor = Supervisor::new(DetectorConfig {
            program: "true".to_string(),
            args: vec![],
        });
        supervisor.start().expect("start");
        // `true` exits immediately; wait for it so try_wait sees the exit.
        std::thread::sleep(std::time::Duration::from_millis(100));
        assert_eq!(supervisor.status(), DetectorState::Stopped);
        supervisor.start().expect("restart");
    }
}
