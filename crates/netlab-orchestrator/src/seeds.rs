//! Seed list served by the directory service.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::info;

use crate::error::Result;

/// Port nodes accept discovery connections on.
pub const DISCOVERY_PORT: u16 = 8110;

/// Path the seed file is mounted at inside the directory service.
pub const SEEDS_MOUNT: &str = "/usr/share/nginx/html/seeds";

/// The seed file on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedFile {
    path: PathBuf,
}

impl SeedFile {
    /// Seed file named `seeds` inside `work_dir`.
    pub fn in_dir(work_dir: impl AsRef<Path>) -> Self {
        Self {
            path: work_dir.as_ref().join("seeds"),
        }
    }

    /// Returns the host path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Renders one `address:port` line per seed address.
    pub fn render(addresses: &[Ipv4Addr]) -> String {
        addresses
            .iter()
            .map(|addr| format!("{}:{}", addr, DISCOVERY_PORT))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Writes the seed list, creating the parent directory if needed.
    pub async fn write(&self, addresses: &[Ipv4Addr]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.path, Self::render(addresses)).await?;
        info!(path = %self.path.display(), seeds = addresses.len(), "Wrote seed file");
        Ok(())
    }
}
