//! Producer side of the transfer ring
//!
//! [`UploadPipeline::begin`] allocates the ring and spawns the storage writer;
//! the returned [`UploadSession`] is fed from the network receive path.

use super::ring::{allocate_ring, BufferAllocator, HeapAllocator, Slot, SlotState};
use super::writer::{self, ActiveGuard, WriterTask};
use super::{UploadReport, WriterSignal};
use crate::config::UploadConfig;
use crate::error::{Error, Result};
use crate::peripherals::SubsystemControl;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Extra time the producer waits beyond the writer's own stall timeout
const GRACE: Duration = Duration::from_secs(5);

/// Starts uploads; only one may be in flight at a time
#[derive(Clone)]
pub struct UploadPipeline {
    config: UploadConfig,
    allocator: Arc<dyn BufferAllocator>,
    subsystems: Arc<dyn SubsystemControl>,
    active: Arc<AtomicBool>,
}

impl UploadPipeline {
    pub fn new(config: UploadConfig, subsystems: Arc<dyn SubsystemControl>) -> Self {
        Self::with_allocator(config, subsystems, Arc::new(HeapAllocator))
    }

    pub fn with_allocator(
        config: UploadConfig,
        subsystems: Arc<dyn SubsystemControl>,
        allocator: Arc<dyn BufferAllocator>,
    ) -> Self {
        Self {
            config,
            allocator,
            subsystems,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a session (or its writer) is still running
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Allocate the ring and start the storage writer for `path`
    ///
    /// Allocation failure is reported before any writer is spawned.
    pub fn begin(&self, path: impl AsRef<Path>) -> Result<UploadSession> {
        let path = path.as_ref().to_path_buf();

        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Upload of {} rejected: another upload is running", path.display());
            return Err(Error::UploadBusy);
        }
        let guard = ActiveGuard(self.active.clone());

        // The guard drops on error and releases the flag again
        let ring = allocate_ring(&self.config, self.allocator.as_ref())?;
        let slot_count = ring.slots.len();

        let (free_tx, free_rx) = mpsc::channel(slot_count);
        let (full_tx, full_rx) = mpsc::channel(slot_count);
        let (signal_tx, signal_rx) = mpsc::channel(2);
        let (done_tx, done_rx) = oneshot::channel();

        for slot in ring.slots {
            // Capacity equals the slot count, so this cannot fail
            if free_tx.try_send(slot).is_err() {
                return Err(Error::Internal("transfer ring handoff failed".into()));
            }
        }

        let id = Uuid::new_v4();
        info!(
            "Upload {} started: {} ({} x {} bytes)",
            id,
            path.display(),
            slot_count,
            ring.chunk_size
        );

        let stall_timeout = self.config.stall_timeout();
        tokio::spawn(writer::run(WriterTask {
            path: path.clone(),
            full_rx,
            free_tx,
            signal_rx,
            done_tx,
            subsystems: self.subsystems.clone(),
            stall_timeout,
            guard,
        }));

        Ok(UploadSession {
            id,
            path,
            chunk_size: ring.chunk_size,
            free_rx,
            full_tx,
            signal_tx,
            done_rx: Some(done_rx),
            current: None,
            bytes_received: 0,
            wait_limit: stall_timeout + GRACE,
            closed: false,
        })
    }
}

/// One in-flight upload
///
/// Dropping a session that was neither finished nor cancelled cancels it,
/// which is how a client disconnect reaches the writer.
pub struct UploadSession {
    id: Uuid,
    path: PathBuf,
    chunk_size: usize,
    free_rx: mpsc::Receiver<Slot>,
    full_tx: mpsc::Sender<Slot>,
    signal_tx: mpsc::Sender<WriterSignal>,
    done_rx: Option<oneshot::Receiver<UploadReport>>,
    current: Option<Slot>,
    bytes_received: u64,
    wait_limit: Duration,
    closed: bool,
}

impl UploadSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    async fn acquire(&mut self) -> Result<Slot> {
        match tokio::time::timeout(self.wait_limit, self.free_rx.recv()).await {
            Ok(Some(slot)) => Ok(slot),
            Ok(None) => Err(Error::UploadAborted("storage writer stopped".into())),
            Err(_) => Err(Error::UploadAborted("no free transfer buffer".into())),
        }
    }

    async fn hand_off(&mut self, mut slot: Slot) -> Result<()> {
        slot.set_state(SlotState::Full);
        self.full_tx
            .send(slot)
            .await
            .map_err(|_| Error::UploadAborted("storage writer stopped".into()))
    }

    /// Copy `data` into the ring, handing off every slot that becomes exactly full
    pub async fn write_chunk(&mut self, mut data: &[u8]) -> Result<()> {
        self.bytes_received += data.len() as u64;

        while !data.is_empty() {
            if self.current.is_none() {
                let slot = self.acquire().await?;
                self.current = Some(slot);
            }
            let Some(slot) = self.current.as_mut() else {
                return Err(Error::Internal("no transfer buffer held".into()));
            };

            let taken = slot.fill_from(data);
            data = &data[taken..];

            if slot.is_full() {
                if let Some(full) = self.current.take() {
                    self.hand_off(full).await?;
                }
            }
        }
        Ok(())
    }

    /// Flush the partially filled slot, tell the writer to finish and wait
    /// for its report
    pub async fn finish(mut self) -> Result<UploadReport> {
        self.closed = true;

        if let Some(slot) = self.current.take() {
            if !slot.is_empty() {
                self.hand_off(slot).await?;
            }
        }

        self.signal_tx
            .send(WriterSignal::Finished)
            .await
            .map_err(|_| Error::UploadAborted("storage writer stopped".into()))?;

        let done_rx = self
            .done_rx
            .take()
            .ok_or_else(|| Error::Internal("completion channel already consumed".into()))?;

        match tokio::time::timeout(self.wait_limit, done_rx).await {
            Ok(Ok(report)) => {
                debug!("Upload {} completed", self.id);
                Ok(report)
            }
            Ok(Err(_)) => Err(Error::UploadAborted(format!(
                "{} was not completed",
                self.path.display()
            ))),
            Err(_) => Err(Error::UploadAborted(format!(
                "timed out waiting for {}",
                self.path.display()
            ))),
        }
    }

    /// Abort the transfer and discard the partial file
    pub fn cancel(mut self) {
        self.closed = true;
        let _ = self.signal_tx.try_send(WriterSignal::Cancelled);
    }
}

impl Drop for UploadSession {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Upload {} dropped before completion, cancelling", self.id);
            let _ = self.signal_tx.try_send(WriterSignal::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peripherals::{HostPeripherals, Subsystem};

    fn pipeline(start_chunk_size: usize, stall_timeout_secs: u64) -> (UploadPipeline, Arc<HostPeripherals>) {
        let host = Arc::new(HostPeripherals::default());
        let config = UploadConfig {
            start_chunk_size,
            stall_timeout_secs,
            ..UploadConfig::default()
        };
        (UploadPipeline::new(config, host.clone()), host)
    }

    async fn wait_idle(pipeline: &UploadPipeline) {
        for _ in 0..100 {
            if !pipeline.is_active() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("pipeline never became idle");
    }

    #[tokio::test]
    async fn test_ten_thousand_bytes_in_three_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("music").join("a.mp3");
        let (pipeline, host) = pipeline(4096, 20);

        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut session = pipeline.begin(&target).unwrap();
        assert_eq!(session.chunk_size(), 4096);

        for fragment in payload.chunks(1000) {
            session.write_chunk(fragment).await.unwrap();
        }
        let report = session.finish().await.unwrap();

        assert_eq!(report.chunk_lengths, vec![4096, 4096, 1808]);
        assert_eq!(report.bytes_ok, 10_000);
        assert_eq!(report.bytes_failed, 0);
        assert_eq!(std::fs::read(&target).unwrap(), payload);

        wait_idle(&pipeline).await;
        assert!(!host.is_paused(Subsystem::Playback));
        assert!(!host.is_paused(Subsystem::TagReader));
    }

    #[tokio::test]
    async fn test_fragment_spanning_several_slots() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("big.bin");
        let (pipeline, _) = pipeline(1024, 20);

        let payload: Vec<u8> = (0..5_000u32).map(|i| (i * 7 % 256) as u8).collect();
        let mut session = pipeline.begin(&target).unwrap();
        session.write_chunk(&payload[..3]).await.unwrap();
        session.write_chunk(&payload[3..4_500]).await.unwrap();
        session.write_chunk(&payload[4_500..]).await.unwrap();
        assert_eq!(session.bytes_received(), 5_000);

        let report = session.finish().await.unwrap();
        assert_eq!(report.total_bytes(), 5_000);
        assert_eq!(report.chunks(), 5);
        assert_eq!(std::fs::read(&target).unwrap(), payload);
    }

    #[tokio::test]
    async fn test_second_session_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _) = pipeline(4096, 20);

        let first = pipeline.begin(dir.path().join("one")).unwrap();
        assert!(matches!(
            pipeline.begin(dir.path().join("two")),
            Err(Error::UploadBusy)
        ));

        first.finish().await.unwrap();
        wait_idle(&pipeline).await;
        let second = pipeline.begin(dir.path().join("two")).unwrap();
        second.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_allocation_failure_spawns_nothing() {
        struct NoMemory;
        impl BufferAllocator for NoMemory {
            fn allocate(&self, _size: usize) -> Option<Vec<u8>> {
                None
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("never.bin");
        let host = Arc::new(HostPeripherals::default());
        let pipeline =
            UploadPipeline::with_allocator(UploadConfig::default(), host.clone(), Arc::new(NoMemory));

        assert!(matches!(
            pipeline.begin(&target),
            Err(Error::BufferAllocation { .. })
        ));
        assert!(!pipeline.is_active());
        assert!(!target.exists());
        assert!(!host.is_paused(Subsystem::Led));
    }

    #[tokio::test]
    async fn test_dropped_session_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("partial.bin");
        let (pipeline, host) = pipeline(1024, 20);

        let mut session = pipeline.begin(&target).unwrap();
        session.write_chunk(&[1u8; 3000]).await.unwrap();
        drop(session);

        wait_idle(&pipeline).await;
        assert!(!target.exists());
        assert!(!host.is_paused(Subsystem::Led));
    }

    #[tokio::test]
    async fn test_unwritable_target_fails_the_upload() {
        let dir = tempfile::tempdir().unwrap();
        // A directory in the way of the target file
        let target = dir.path().join("clash.mp3");
        std::fs::create_dir(&target).unwrap();
        let (pipeline, host) = pipeline(1024, 20);

        let mut session = pipeline.begin(&target).unwrap();
        session.write_chunk(&[7u8; 5000]).await.unwrap();

        let result = session.finish().await;
        assert!(matches!(result, Err(Error::UploadAborted(_))));
        wait_idle(&pipeline).await;
        assert!(target.is_dir());
        assert!(!host.is_paused(Subsystem::Playback));
    }

    #[tokio::test]
    async fn test_stalled_upload_is_aborted() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("stalled.bin");
        let (pipeline, _) = pipeline(1024, 1);

        let mut session = pipeline.begin(&target).unwrap();
        session.write_chunk(&[9u8; 100]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let result = session.finish().await;
        assert!(matches!(result, Err(Error::UploadAborted(_))));
        wait_idle(&pipeline).await;
        assert!(!target.exists());
    }
}
