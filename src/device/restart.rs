//! Device restart

use crate::transport::traits::Restarter;
use anyhow::Result;
use tracing::warn;

/// Exit code the service supervisor treats as "restart into the new image"
pub const RESTART_EXIT_CODE: i32 = 75;

/// Restarts by exiting the process; the supervisor relaunches the agent
/// from the committed firmware image.
pub struct ExitRestarter {
    exit_code: i32,
}

impl ExitRestarter {
    pub fn new() -> Self {
        Self {
            exit_code: RESTART_EXIT_CODE,
        }
    }
}

impl Default for ExitRestarter {
    fn default() -> Self {
        Self::new()
    }
}

impl Restarter for ExitRestarter {
    fn restart(&self) -> Result<()> {
        warn!("Restarting device (exit code {})", self.exit_code);
        std::process::exit(self.exit_code)
    }
}
