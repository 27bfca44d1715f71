//! In-memory collaborators for unit tests

use crate::persist::RecordStore;
use crate::transport::traits::{
    ChunkStream, FirmwareSlot, FirmwareSource, ImageWriter, MessageChannel, Restarter,
};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use device_agent_shared::StatusMessage;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Records every publish; can be switched to fail
#[derive(Default)]
pub struct RecordingChannel {
    published: Mutex<Vec<(String, String)>>,
    failing: AtomicBool,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }

    /// Decoded messages published on the action status topic
    pub fn statuses(&self) -> Vec<StatusMessage> {
        self.published()
            .iter()
            .filter(|(topic, _)| topic.ends_with("/action_status"))
            .map(|(_, payload)| serde_json::from_str(payload).unwrap())
            .collect()
    }
}

#[async_trait]
impl MessageChannel for RecordingChannel {
    async fn publish(&self, topic: &str, payload: String) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("broker unreachable");
        }
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }
}

/// Store with a staged/committed split so restarts can be simulated
#[derive(Default)]
pub struct MemoryRecordStore {
    staged: Mutex<BTreeMap<String, i64>>,
    committed: Mutex<BTreeMap<String, i64>>,
    fail_commit: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `commit` fail
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    /// Value as it would be seen after a restart
    pub fn committed(&self, key: &str) -> Option<i64> {
        self.committed.lock().unwrap().get(key).copied()
    }

    /// Drop everything that was never committed
    pub fn reboot(&self) {
        let committed = self.committed.lock().unwrap().clone();
        *self.staged.lock().unwrap() = committed;
    }
}

impl RecordStore for MemoryRecordStore {
    fn get(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.staged.lock().unwrap().get(key).copied())
    }

    fn set(&self, key: &str, value: i64) -> Result<()> {
        self.staged.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        self.staged.lock().unwrap().remove(key);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(anyhow!("flash write failed"));
        }
        let staged = self.staged.lock().unwrap().clone();
        *self.committed.lock().unwrap() = staged;
        Ok(())
    }
}

/// Firmware source serving a fixed image in fixed-size chunks
pub struct ScriptedSource {
    /// Size reported by the probe; `None` makes the probe fail
    pub probe_size: Option<u64>,
    pub image: Vec<u8>,
    pub chunk_size: usize,
    /// Fail the stream after this many chunks
    pub fail_after: Option<usize>,
}

impl ScriptedSource {
    pub fn new(image: Vec<u8>, chunk_size: usize) -> Self {
        Self {
            probe_size: Some(image.len() as u64),
            image,
            chunk_size,
            fail_after: None,
        }
    }
}

#[async_trait]
impl FirmwareSource for ScriptedSource {
    async fn probe(&self, _url: &str) -> Result<u64> {
        self.probe_size.ok_or_else(|| anyhow!("connection refused"))
    }

    async fn open(&self, _url: &str) -> Result<Box<dyn ChunkStream>> {
        let chunks = self
            .image
            .chunks(self.chunk_size)
            .map(Bytes::copy_from_slice)
            .collect::<Vec<_>>();
        Ok(Box::new(ScriptedStream {
            chunks: chunks.into_iter(),
            served: 0,
            fail_after: self.fail_after,
        }))
    }
}

struct ScriptedStream {
    chunks: std::vec::IntoIter<Bytes>,
    served: usize,
    fail_after: Option<usize>,
}

#[async_trait]
impl ChunkStream for ScriptedStream {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.fail_after == Some(self.served) {
            bail!("connection reset");
        }
        self.served += 1;
        Ok(self.chunks.next())
    }
}

/// Update slot keeping the image in memory
#[derive(Default)]
pub struct MemorySlot {
    pub image: Arc<Mutex<Vec<u8>>>,
    pub committed: Arc<AtomicBool>,
    pub fail_commit: bool,
}

#[async_trait]
impl FirmwareSlot for MemorySlot {
    async fn begin(&self, _size: u64) -> Result<Box<dyn ImageWriter>> {
        self.image.lock().unwrap().clear();
        Ok(Box::new(MemoryWriter {
            image: self.image.clone(),
            committed: self.committed.clone(),
            fail_commit: self.fail_commit,
        }))
    }
}

struct MemoryWriter {
    image: Arc<Mutex<Vec<u8>>>,
    committed: Arc<AtomicBool>,
    fail_commit: bool,
}

#[async_trait]
impl ImageWriter for MemoryWriter {
    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.image.lock().unwrap().extend_from_slice(chunk);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if self.fail_commit {
            bail!("image validation failed");
        }
        self.committed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Counts restart requests instead of restarting
#[derive(Default)]
pub struct CountingRestarter {
    pub restarts: AtomicUsize,
}

impl Restarter for CountingRestarter {
    fn restart(&self) -> Result<()> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
