//! Command executor seam.
//!
//! Firewall mutations, readiness probes and promotion commands are all shell
//! commands run somewhere else (inside the gateway container, inside a node
//! container). Everything that issues them goes through [`CommandExecutor`]
//! so it can be driven by an in-memory fake in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Runs command strings on some endpoint.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Returns true if the endpoint can currently run commands.
    async fn is_available(&self) -> Result<bool>;

    /// Runs `command` and captures its output.
    ///
    /// A non-zero exit code is not an error at this level; an error means
    /// the command could not be run at all.
    async fn run(&self, command: &str) -> Result<ExecOutput>;
}

/// Output from running a command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Standard output from the command.
    pub stdout: String,

    /// Standard error from the command.
    pub stderr: String,

    /// Exit code of the command.
    pub exit_code: i64,
}

impl ExecOutput {
    /// Creates a new exec output.
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i64) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    /// Output of a command that succeeded without printing anything.
    pub fn ok() -> Self {
        Self::default()
    }

    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined stdout and stderr.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Returns stdout lines as a vector.
    pub fn stdout_lines(&self) -> Vec<&str> {
        self.stdout.lines().collect()
    }
}
