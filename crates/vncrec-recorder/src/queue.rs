// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Strictly ordered write queue
//
// A single consumer task owns the frame sink and performs one append at a time, in
// submission order. The queue depth is unbounded, so a slow sink throttles the
// consumer without ever reordering writes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::progress::{NoProgress, Progress, ProgressSink};
use crate::storage::FrameSink;

/// Running counters shared between producers and the consumer task
#[derive(Debug, Default)]
pub struct QueueStats {
    frames_written: AtomicU64,
    bytes_written: AtomicU64,
    frames_pending: AtomicU64,
    write_failures: AtomicU64,
}

/// Point-in-time view of the queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderProgress {
    pub frames_written: u64,
    pub bytes_written: u64,
    pub frames_pending: u64,
    pub write_failures: u64,
}

impl QueueStats {
    pub fn snapshot(&self) -> RecorderProgress {
        RecorderProgress {
            frames_written: self.frames_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            frames_pending: self.frames_pending.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

enum QueueCommand {
    Write(Vec<u8>),
    Drain(oneshot::Sender<Option<String>>),
    Close,
}

/// Producer side of the write queue
#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::UnboundedSender<QueueCommand>,
    stats: Arc<QueueStats>,
}

impl QueueSender {
    /// Submit bytes for appending; returns false once the queue has closed
    pub fn enqueue(&self, bytes: Vec<u8>) -> bool {
        self.stats.frames_pending.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(QueueCommand::Write(bytes)).is_err() {
            self.stats.frames_pending.fetch_sub(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    pub fn stats(&self) -> RecorderProgress {
        self.stats.snapshot()
    }
}

/// FIFO queue with exactly one consumer task
pub struct WriteQueue {
    sender: QueueSender,
    worker: JoinHandle<std::io::Result<()>>,
}

impl WriteQueue {
    /// Spawn the consumer task that owns `sink`
    pub fn spawn(sink: Box<dyn FrameSink>) -> Self {
        Self::spawn_with_progress(sink, Arc::new(NoProgress), 0)
    }

    /// Like [`WriteQueue::spawn`], reporting `Progress::Recording` every
    /// `progress_every` written frames (never when zero)
    pub fn spawn_with_progress(
        sink: Box<dyn FrameSink>,
        progress: Arc<dyn ProgressSink>,
        progress_every: u64,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(QueueStats::default());
        let reporter = Reporter {
            sink: progress,
            every: progress_every,
        };
        let worker = tokio::spawn(run_consumer(sink, rx, stats.clone(), reporter));

        Self {
            sender: QueueSender { tx, stats },
            worker,
        }
    }

    pub fn sender(&self) -> QueueSender {
        self.sender.clone()
    }

    pub fn enqueue(&self, bytes: Vec<u8>) -> bool {
        self.sender.enqueue(bytes)
    }

    pub fn stats(&self) -> RecorderProgress {
        self.sender.stats()
    }

    /// Wait until every write submitted before this call has completed
    ///
    /// Fails with the first write error seen so far, if any.
    pub async fn drain(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.sender
            .tx
            .send(QueueCommand::Drain(ack_tx))
            .map_err(|_| Error::WriteFailed {
                message: "write queue consumer has stopped".to_string(),
            })?;

        match ack_rx.await {
            Ok(None) => Ok(()),
            Ok(Some(message)) => Err(Error::WriteFailed { message }),
            Err(_) => Err(Error::WriteFailed {
                message: "write queue consumer exited during drain".to_string(),
            }),
        }
    }

    /// Finish outstanding writes, then release the sink
    pub async fn close(self) -> Result<RecorderProgress> {
        // Close sits behind every queued write, so nothing is dropped
        let _ = self.sender.tx.send(QueueCommand::Close);
        let stats = self.sender.stats.clone();

        match self.worker.await {
            Ok(Ok(())) => Ok(stats.snapshot()),
            Ok(Err(e)) => Err(Error::WriteFailed {
                message: format!("closing write target: {}", e),
            }),
            Err(e) => Err(Error::WriteFailed {
                message: format!("write queue consumer panicked: {}", e),
            }),
        }
    }
}

struct Reporter {
    sink: Arc<dyn ProgressSink>,
    every: u64,
}

impl Reporter {
    fn written(&self, frames: u64, bytes: u64) {
        if self.every > 0 && frames % self.every == 0 {
            self.sink.report(Progress::Recording { frames, bytes });
        }
    }
}

async fn run_consumer(
    mut sink: Box<dyn FrameSink>,
    mut rx: mpsc::UnboundedReceiver<QueueCommand>,
    stats: Arc<QueueStats>,
    reporter: Reporter,
) -> std::io::Result<()> {
    let mut first_error: Option<String> = None;

    while let Some(command) = rx.recv().await {
        match command {
            QueueCommand::Write(bytes) => {
                match sink.append(&bytes).await {
                    Ok(()) => {
                        let frames = stats.frames_written.fetch_add(1, Ordering::Relaxed) + 1;
                        let total = stats
                            .bytes_written
                            .fetch_add(bytes.len() as u64, Ordering::Relaxed)
                            + bytes.len() as u64;
                        reporter.written(frames, total);
                    }
                    Err(e) => {
                        warn!(error = %e, bytes = bytes.len(), "Recording write failed");
                        stats.write_failures.fetch_add(1, Ordering::Relaxed);
                        first_error.get_or_insert_with(|| e.to_string());
                    }
                }
                stats.frames_pending.fetch_sub(1, Ordering::Relaxed);
            }
            QueueCommand::Drain(ack) => {
                let _ = ack.send(first_error.clone());
            }
            QueueCommand::Close => break,
        }
    }

    // Late submissions are rejected from here on
    rx.close();
    while let Ok(command) = rx.try_recv() {
        if let QueueCommand::Write(bytes) = command {
            debug!(bytes = bytes.len(), "Discarding write submitted after close");
            stats.frames_pending.fetch_sub(1, Ordering::Relaxed);
        }
    }

    sink.close().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct SlowSink {
        written: Arc<Mutex<Vec<Vec<u8>>>>,
        closed: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl FrameSink for SlowSink {
        async fn append(&mut self, bytes: &[u8]) -> std::io::Result<()> {
            // Later writes finish faster; order must still hold
            let delay = 20u64.saturating_sub(bytes[0] as u64 * 2);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.written.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }

        async fn close(&mut self) -> std::io::Result<()> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl FrameSink for FailingSink {
        async fn append(&mut self, _bytes: &[u8]) -> std::io::Result<()> {
            Err(std::io::Error::other("disk full"))
        }

        async fn close(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_writes_complete_in_submission_order() {
        let sink = SlowSink::default();
        let queue = WriteQueue::spawn(Box::new(sink.clone()));

        for i in 0..10u8 {
            assert!(queue.enqueue(vec![i]));
        }
        queue.drain().await.unwrap();

        let written = sink.written.lock().unwrap().clone();
        assert_eq!(written, (0..10u8).map(|i| vec![i]).collect::<Vec<_>>());
        assert_eq!(queue.stats().frames_written, 10);
        assert_eq!(queue.stats().frames_pending, 0);
    }

    #[tokio::test]
    async fn test_close_waits_for_pending_writes() {
        let sink = SlowSink::default();
        let queue = WriteQueue::spawn(Box::new(sink.clone()));
        let sender = queue.sender();

        for i in 0..5u8 {
            sender.enqueue(vec![i]);
        }
        let progress = queue.close().await.unwrap();

        assert_eq!(progress.frames_written, 5);
        assert_eq!(sink.written.lock().unwrap().len(), 5);
        assert!(*sink.closed.lock().unwrap());
        assert!(!sender.enqueue(vec![99]));
    }

    #[tokio::test]
    async fn test_drain_reports_write_failure() {
        let queue = WriteQueue::spawn(Box::new(FailingSink));
        queue.enqueue(vec![1, 2, 3]);

        let err = queue.drain().await.unwrap_err();
        assert!(matches!(err, Error::WriteFailed { ref message } if message.contains("disk full")));
        assert_eq!(queue.stats().write_failures, 1);
    }

    #[tokio::test]
    async fn test_reports_recording_progress() {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let progress = {
            let reports = reports.clone();
            move |p: Progress| reports.lock().unwrap().push(p)
        };
        let queue = WriteQueue::spawn_with_progress(
            Box::new(SlowSink::default()),
            Arc::new(progress),
            3,
        );

        for i in 0..7u8 {
            queue.enqueue(vec![i, 0]);
        }
        queue.close().await.unwrap();

        assert_eq!(
            *reports.lock().unwrap(),
            vec![
                Progress::Recording { frames: 3, bytes: 6 },
                Progress::Recording { frames: 6, bytes: 12 },
            ]
        );
    }
}
