use std::{collections::VecDeque, sync::Arc};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    sync::{Mutex, mpsc},
};

/// Ring buffer capacity. Oldest lines are evicted first once full.
pub(crate) const RING_CAPACITY: usize = 200;

/// Chunks buffered between the stream readers and the single writer task.
pub(crate) const CHUNK_CHANNEL_CAPACITY: usize = 256;

/// Fixed-capacity buffer of recent service log lines, tagged with a
/// monotonically increasing sequence number for cursor-based tailing.
#[derive(Debug)]
pub struct LogBuffer {
    next_seq: u64,
    lines: VecDeque<(u64, String)>,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self {
            next_seq: 1,
            lines: VecDeque::new(),
        }
    }
}

impl LogBuffer {
    pub(crate) fn push_line(&mut self, line: String) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        self.lines.push_back((seq, line));
        while self.lines.len() > RING_CAPACITY {
            self.lines.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Lines with sequence numbers greater than `cursor`, up to `limit`,
    /// plus the cursor to resume from. A zero cursor returns the most
    /// recent `limit` lines (UI polling convenience).
    pub fn tail_after(&self, cursor: u64, limit: usize) -> (Vec<String>, u64) {
        if cursor == 0 {
            let start = self.lines.len().saturating_sub(limit);
            let mut out = Vec::new();
            let mut last = 0;
            for (seq, line) in self.lines.iter().skip(start) {
                out.push(line.clone());
                last = *seq;
            }
            return (out, last);
        }

        let mut out = Vec::new();
        let mut last = cursor;
        for (seq, line) in self.lines.iter() {
            if *seq > cursor {
                out.push(line.clone());
                last = *seq;
                if out.len() >= limit {
                    break;
                }
            }
        }
        (out, last)
    }
}

/// Handle for feeding supervisor-side messages through the same serialized
/// path as subprocess output, so file and ring ordering stay consistent.
#[derive(Clone)]
pub(crate) struct LogSink {
    tx: mpsc::Sender<String>,
}

impl LogSink {
    pub(crate) fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    /// A sender feeding the same writer, for the subprocess stream pumps.
    pub(crate) fn sender(&self) -> mpsc::Sender<String> {
        self.tx.clone()
    }

    pub(crate) async fn emit(&self, line: impl Into<String>) {
        let mut chunk = line.into();
        if !chunk.ends_with('\n') {
            chunk.push('\n');
        }
        let _ = self.tx.send(chunk).await;
    }
}

/// Forward raw chunks from a subprocess stream into the writer channel.
/// Ends on EOF (process exit or stop) or when the writer has gone away.
pub(crate) async fn pump_stream<R>(mut stream: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 8192];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Single consumer of the chunk channel: appends each chunk verbatim to the
/// log file, then folds its non-empty trimmed lines into the ring buffer.
/// Runs until every sender (readers and supervisor sink) is dropped.
pub(crate) async fn run_log_writer(
    mut rx: mpsc::Receiver<String>,
    mut file: tokio::fs::File,
    ring: Arc<Mutex<LogBuffer>>,
) {
    while let Some(chunk) = rx.recv().await {
        let _ = file.write_all(chunk.as_bytes()).await;

        let mut ring = ring.lock().await;
        for line in chunk.lines() {
            let line = line.trim();
            if !line.is_empty() {
                ring.push_line(line.to_string());
            }
        }
    }
    let _ = file.flush().await;
}
