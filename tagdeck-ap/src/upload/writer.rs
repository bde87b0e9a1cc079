//! Storage writer task
//!
//! Runs for the lifetime of one upload. Drains full slots in order, returns
//! them to the producer, and finishes on [`WriterSignal::Finished`]. A
//! cancellation, a vanished producer, a failed write or a stall longer than
//! the configured timeout aborts the transfer: subsystems are resumed, the
//! partial file is removed and the completion channel is dropped unsent.

use super::ring::{Slot, SlotState};
use super::{UploadReport, WriterSignal};
use crate::peripherals::{pause_all, resume_all, SubsystemControl};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Clears the pipeline's "upload active" flag when dropped
pub(crate) struct ActiveGuard(pub(crate) Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Everything the writer owns for one transfer
pub(crate) struct WriterTask {
    pub(crate) path: PathBuf,
    pub(crate) full_rx: mpsc::Receiver<Slot>,
    pub(crate) free_tx: mpsc::Sender<Slot>,
    pub(crate) signal_rx: mpsc::Receiver<WriterSignal>,
    pub(crate) done_tx: oneshot::Sender<UploadReport>,
    pub(crate) subsystems: Arc<dyn SubsystemControl>,
    pub(crate) stall_timeout: Duration,
    pub(crate) guard: ActiveGuard,
}

#[derive(Default)]
struct Stats {
    bytes_ok: u64,
    bytes_failed: u64,
    chunk_lengths: Vec<usize>,
}

enum Exit {
    Complete,
    Abort(&'static str),
}

async fn open_target(path: &Path) -> Option<File> {
    if let Some(parent) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            error!("Cannot create {}: {}", parent.display(), e);
            return None;
        }
    }
    match File::create(path).await {
        Ok(file) => Some(file),
        Err(e) => {
            error!("Cannot open {} for writing: {}", path.display(), e);
            None
        }
    }
}

async fn drain(file: &mut Option<File>, mut slot: Slot, stats: &mut Stats, free_tx: &mpsc::Sender<Slot>) {
    slot.set_state(SlotState::Draining);
    let len = slot.len();

    let written = match file.as_mut() {
        Some(f) => f.write_all(slot.data()).await.is_ok(),
        None => false,
    };
    if written {
        stats.bytes_ok += len as u64;
    } else {
        stats.bytes_failed += len as u64;
        // Give the runtime a breather when storage is misbehaving
        tokio::task::yield_now().await;
    }
    stats.chunk_lengths.push(len);
    debug!("Chunk {} drained from slot {} ({} bytes)", stats.chunk_lengths.len(), slot.index(), len);

    slot.reset();
    // The producer may already be gone; the slot is simply dropped then
    let _ = free_tx.send(slot).await;
}

/// Writer main loop
pub(crate) async fn run(task: WriterTask) {
    let WriterTask {
        path,
        mut full_rx,
        free_tx,
        mut signal_rx,
        done_tx,
        subsystems,
        stall_timeout,
        guard,
    } = task;

    let started = Instant::now();
    let mut stats = Stats::default();
    let mut file = open_target(&path).await;

    pause_all(subsystems.as_ref());

    let exit = loop {
        tokio::select! {
            biased;

            slot = full_rx.recv() => match slot {
                Some(slot) => drain(&mut file, slot, &mut stats, &free_tx).await,
                None => break Exit::Abort("producer went away"),
            },

            signal = signal_rx.recv() => match signal {
                Some(WriterSignal::Finished) => {
                    // Every handed-off slot was queued before the signal was sent
                    while let Ok(slot) = full_rx.try_recv() {
                        drain(&mut file, slot, &mut stats, &free_tx).await;
                    }
                    break Exit::Complete;
                }
                Some(WriterSignal::Cancelled) => break Exit::Abort("cancelled by client"),
                None => break Exit::Abort("producer went away"),
            },

            _ = tokio::time::sleep(stall_timeout) => break Exit::Abort("stalled"),
        }
    };

    // Lost bytes make the file unusable
    let exit = match exit {
        Exit::Complete if stats.bytes_failed > 0 => {
            warn!(
                "Bytes [ok] {} / [not ok] {} for {}",
                stats.bytes_ok,
                stats.bytes_failed,
                path.display()
            );
            Exit::Abort("storage write failed")
        }
        other => other,
    };

    match exit {
        Exit::Complete => {
            if let Some(mut f) = file.take() {
                if let Err(e) = f.flush().await {
                    warn!("Flushing {} failed: {}", path.display(), e);
                }
            }
            let report = UploadReport {
                path,
                bytes_ok: stats.bytes_ok,
                bytes_failed: stats.bytes_failed,
                chunk_lengths: stats.chunk_lengths,
                elapsed: started.elapsed(),
            };
            info!(
                "File {} written: {} bytes in {} ms ({} KB/s)",
                report.path.display(),
                report.total_bytes(),
                report.elapsed.as_millis(),
                report.throughput()
            );
            debug!(
                "Bytes [ok] {} / [not ok] {}, Chunks: {}",
                report.bytes_ok,
                report.bytes_failed,
                report.chunks()
            );

            resume_all(subsystems.as_ref());
            drop(guard);
            let _ = done_tx.send(report);
        }
        Exit::Abort(reason) => {
            error!("Transfer of {} aborted: {}", path.display(), reason);
            drop(file);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                debug!("Partial file {} not removed: {}", path.display(), e);
            }
            resume_all(subsystems.as_ref());
            drop(full_rx);
            drop(guard);
            drop(done_tx);
        }
    }
}
