//! Hook runner: executes configured commands inside the target container via
//! `docker exec` for the pre-update and post-update phases.

use std::time::Duration;

use tracing::{info, warn};

use dockwarden_docker::ContainerEngine;

use crate::error::{EngineCrateError, Result};

const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);
/// BSD sysexits `EX_TEMPFAIL`: the distilled "skip this update" convention.
const EXIT_SKIP: i64 = 75;
/// Truncate captured hook output before it's logged or stored on the record.
const MAX_CAPTURED_OUTPUT: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    PreUpdate,
    PostUpdate,
}

#[derive(Debug, Clone)]
pub struct Hook {
    pub command: Vec<String>,
    pub timeout: Duration,
}

impl Hook {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            timeout: DEFAULT_HOOK_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn label(&self) -> String {
        self.command.join(" ")
    }
}

fn truncate(s: &str) -> String {
    if s.len() <= MAX_CAPTURED_OUTPUT {
        s.to_string()
    } else {
        format!("{}... [truncated]", &s[..MAX_CAPTURED_OUTPUT])
    }
}

/// Run `hooks` sequentially inside `container_name`, in declaration order. The
/// first non-zero exit (other than a pre-update "skip") short-circuits the rest.
pub async fn run_hooks(
    engine: &dyn ContainerEngine,
    container_name: &str,
    phase: HookPhase,
    hooks: &[Hook],
) -> Result<()> {
    for hook in hooks {
        let outcome = engine
            .exec(container_name, &hook.command, hook.timeout)
            .await;

        match outcome {
            Ok(output) => {
                info!(
                    container = container_name,
                    hook = %hook.label(),
                    stdout = %truncate(&output.stdout),
                    "hook completed"
                );
            }
            Err(dockwarden_docker::EngineError::ExecFailed { exit_code, stderr })
                if phase == HookPhase::PreUpdate && exit_code == EXIT_SKIP =>
            {
                info!(container = container_name, hook = %hook.label(), "pre-update hook requested skip");
                return Err(EngineCrateError::HookSkip {
                    command: hook.label(),
                });
            }
            Err(dockwarden_docker::EngineError::ExecFailed { exit_code, stderr }) => {
                warn!(
                    container = container_name,
                    hook = %hook.label(),
                    exit_code,
                    stderr = %truncate(&stderr),
                    "hook failed"
                );
                return Err(EngineCrateError::HookFailed {
                    command: hook.label(),
                    exit_code: exit_code as i32,
                    stderr: truncate(&stderr),
                });
            }
            Err(dockwarden_docker::EngineError::Other(msg)) if msg.contains("timed out") => {
                return Err(EngineCrateError::HookTimeout {
                    command: hook.label(),
                });
            }
            Err(e) => {
                return Err(EngineCrateError::Container(e));
            }
        }
    }
    Ok(())
}
