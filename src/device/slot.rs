//! File-backed firmware update slot
//!
//! The image is staged next to the active image and swapped in by rename on
//! commit, so a torn download never replaces the running firmware.

use crate::transport::traits::{FirmwareSlot, ImageWriter};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::info;

const STAGED_IMAGE: &str = "firmware.partial";
const BOOT_IMAGE: &str = "firmware.bin";

pub struct FileFirmwareSlot {
    dir: PathBuf,
    max_image_bytes: u64,
}

impl FileFirmwareSlot {
    pub fn new(dir: impl Into<PathBuf>, max_image_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            max_image_bytes,
        }
    }

    /// Path of the image the next boot will run
    pub fn boot_image(&self) -> PathBuf {
        self.dir.join(BOOT_IMAGE)
    }
}

#[async_trait]
impl FirmwareSlot for FileFirmwareSlot {
    async fn begin(&self, size: u64) -> Result<Box<dyn ImageWriter>> {
        if size == 0 || size > self.max_image_bytes {
            bail!(
                "invalid image size {} (max {})",
                size,
                self.max_image_bytes
            );
        }

        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;

        let staged = self.dir.join(STAGED_IMAGE);
        let file = File::create(&staged)
            .await
            .with_context(|| format!("creating {}", staged.display()))?;

        Ok(Box::new(FileImageWriter {
            file,
            staged,
            target: self.boot_image(),
            expected: size,
            written: 0,
        }))
    }
}

struct FileImageWriter {
    file: File,
    staged: PathBuf,
    target: PathBuf,
    expected: u64,
    written: u64,
}

#[async_trait]
impl ImageWriter for FileImageWriter {
    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let after = self.written + chunk.len() as u64;
        if after > self.expected {
            bail!("image exceeds advertised size {}", self.expected);
        }
        self.file.write_all(chunk).await?;
        self.written = after;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if self.written != self.expected {
            bail!(
                "image incomplete: {} of {} bytes",
                self.written,
                self.expected
            );
        }
        self.file.flush().await?;
        self.file.sync_all().await?;
        fs::rename(&self.staged, &self.target)
            .await
            .with_context(|| format!("activating {}", self.target.display()))?;
        info!("Firmware image committed: {}", self.target.display());
        Ok(())
    }
}
