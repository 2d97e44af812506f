//! Log line streams.
//!
//! A [`LogStream`] is a finite, non-restartable sequence of lines backed by
//! a bounded channel. Materialized output is a stream whose lines are all
//! buffered up front; a followed stream ends when its [`LogSender`] side is
//! dropped.

use tokio::sync::mpsc;

/// Receiving half of a log line stream.
#[derive(Debug)]
pub struct LogStream {
    rx: mpsc::Receiver<String>,
}

/// Sending half of a log line stream.
#[derive(Debug, Clone)]
pub struct LogSender {
    tx: mpsc::Sender<String>,
}

impl LogStream {
    /// Creates a connected sender and stream with the given buffer size.
    #[must_use]
    pub fn channel(capacity: usize) -> (LogSender, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (LogSender { tx }, Self { rx })
    }

    /// Creates an already-complete stream over the given lines.
    #[must_use]
    pub fn from_lines(lines: Vec<String>) -> Self {
        let (tx, rx) = mpsc::channel(lines.len().max(1));
        for line in lines {
            // Capacity covers every line and the receiver is alive.
            let _ = tx.try_send(line);
        }
        Self { rx }
    }

    /// Creates a stream with no lines.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_lines(Vec::new())
    }

    /// Waits for the next line. Returns `None` once the stream is exhausted.
    pub async fn next(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Returns the next line if one is already buffered.
    pub fn try_next(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// Drains the stream to completion.
    pub async fn collect(mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = self.rx.recv().await {
            lines.push(line);
        }
        lines
    }
}

impl LogSender {
    /// Sends a line, waiting for buffer space.
    ///
    /// Returns `false` if the stream was dropped.
    pub async fn send(&self, line: impl Into<String>) -> bool {
        self.tx.send(line.into()).await.is_ok()
    }

    /// Sends a line if buffer space is available right now.
    ///
    /// Returns `false` if the buffer is full or the stream was dropped.
    pub fn try_send(&self, line: impl Into<String>) -> bool {
        self.tx.try_send(line.into()).is_ok()
    }

    /// Resolves once the receiving stream has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    /// Returns whether the receiving stream has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
