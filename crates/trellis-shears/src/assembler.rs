//! GPS line assembler.
//!
//! The GPS module streams NMEA bytes continuously over its UART. This
//! worker drains that stream and keeps exactly one thing: the most recent
//! fully-terminated sentence, published into a shared latest-line slot for
//! the save worker to consume. Partial lines never become visible; a line
//! is only published once its terminating newline was observed.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};

/// In-progress line buffer capacity. A GGA sentence is ≤82 bytes by the
/// NMEA spec; anything that outgrows this without a newline is line noise
/// and gets discarded.
pub const LINE_BUFFER_CAPACITY: usize = 512;

/// How long one stream read may block before the loop comes up for air.
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

// ── Latest-line slot ──────────────────────────────────────────────────────────

/// The single latest-line slot shared between the assembler (writer) and
/// the save worker (reader). The validity bit is only set after the content
/// is in place, which is the whole coordination protocol.
#[derive(Debug, Default)]
pub struct LatestLine {
    line: String,
    valid: bool,
}

impl LatestLine {
    /// Publish a fully-terminated sentence.
    pub fn publish(&mut self, line: String) {
        self.line = line;
        self.valid = true;
    }

    /// Read the current sentence, if a valid one is present.
    pub fn peek(&self) -> Option<&str> {
        self.valid.then_some(self.line.as_str())
    }

    /// Invalidate the slot. Called by the save worker after a commit.
    pub fn clear(&mut self) {
        self.valid = false;
    }
}

pub type SharedLatestLine = Arc<Mutex<LatestLine>>;

pub fn shared_latest_line() -> SharedLatestLine {
    Arc::new(Mutex::new(LatestLine::default()))
}

// ── Assembler worker ──────────────────────────────────────────────────────────

/// Reassembles NMEA sentences from the raw UART byte stream.
pub struct LineAssembler {
    bytes_rx: mpsc::Receiver<Bytes>,
    latest: SharedLatestLine,
    buf: Vec<u8>,
    shutdown: broadcast::Receiver<()>,
}

impl LineAssembler {
    pub fn new(
        bytes_rx: mpsc::Receiver<Bytes>,
        latest: SharedLatestLine,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            bytes_rx,
            latest,
            buf: Vec::with_capacity(LINE_BUFFER_CAPACITY),
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("line assembler shutting down");
                    return Ok(());
                }

                read = tokio::time::timeout(READ_TIMEOUT, self.bytes_rx.recv()) => {
                    match read {
                        Ok(Some(data)) => self.consume(&data),
                        Ok(None) => {
                            tracing::info!("GPS byte stream closed, line assembler exiting");
                            return Ok(());
                        }
                        // Quiet stretch on the UART. Nothing to assemble.
                        Err(_) => {}
                    }
                }
            }
        }
    }

    /// Feed received bytes through the line buffer.
    fn consume(&mut self, data: &[u8]) {
        for &byte in data {
            self.buf.push(byte);

            if byte == b'\n' {
                match String::from_utf8(std::mem::take(&mut self.buf)) {
                    Ok(line) => {
                        self.latest.lock().unwrap().publish(line);
                    }
                    Err(_) => {
                        tracing::warn!("non-UTF-8 bytes in GPS line, discarded");
                    }
                }
                self.buf.reserve(LINE_BUFFER_CAPACITY);
            } else if self.buf.len() >= LINE_BUFFER_CAPACITY {
                tracing::warn!(
                    len = self.buf.len(),
                    "line buffer overflow without terminator, resetting"
                );
                self.buf.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler_with_feed() -> (mpsc::Sender<Bytes>, SharedLatestLine, LineAssembler) {
        let (tx, rx) = mpsc::channel(16);
        let latest = shared_latest_line();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let assembler = LineAssembler::new(rx, latest.clone(), shutdown_rx);
        (tx, latest, assembler)
    }

    #[test]
    fn publishes_on_newline() {
        let (_tx, latest, mut assembler) = assembler_with_feed();
        assembler.consume(b"$GPGGA,192928.00,2934.5678,N\n");
        let slot = latest.lock().unwrap();
        assert_eq!(slot.peek().unwrap(), "$GPGGA,192928.00,2934.5678,N\n");
    }

    #[test]
    fn partial_line_stays_invisible() {
        let (_tx, latest, mut assembler) = assembler_with_feed();
        assembler.consume(b"$GPGGA,192928.00");
        assert!(latest.lock().unwrap().peek().is_none());
    }

    #[test]
    fn line_split_across_reads_assembles() {
        let (_tx, latest, mut assembler) = assembler_with_feed();
        assembler.consume(b"$GPGGA,1929");
        assembler.consume(b"28.00,X\r\n");
        assert_eq!(
            latest.lock().unwrap().peek().unwrap(),
            "$GPGGA,192928.00,X\r\n"
        );
    }

    #[test]
    fn keeps_only_latest_line() {
        let (_tx, latest, mut assembler) = assembler_with_feed();
        assembler.consume(b"$GPGGA,old\n$GPGGA,new\n");
        assert_eq!(latest.lock().unwrap().peek().unwrap(), "$GPGGA,new\n");
    }

    #[test]
    fn overflow_discards_in_progress_line() {
        let (_tx, latest, mut assembler) = assembler_with_feed();
        assembler.consume(&vec![b'x'; LINE_BUFFER_CAPACITY]);
        // Buffer reset; the next complete line still assembles cleanly.
        assembler.consume(b"$GPGGA,fresh\n");
        assert_eq!(latest.lock().unwrap().peek().unwrap(), "$GPGGA,fresh\n");
    }

    #[test]
    fn clear_invalidates_without_erasing() {
        let (_tx, latest, mut assembler) = assembler_with_feed();
        assembler.consume(b"$GPGGA,row\n");
        latest.lock().unwrap().clear();
        assert!(latest.lock().unwrap().peek().is_none());
    }

    #[tokio::test]
    async fn run_drains_the_channel() {
        let (tx, latest, assembler) = assembler_with_feed();
        let handle = tokio::spawn(assembler.run());

        tx.send(Bytes::from_static(b"$GNGGA,via-task\n")).await.unwrap();
        // Dropping the sender closes the stream and ends the worker.
        drop(tx);
        handle.await.unwrap().unwrap();

        assert_eq!(latest.lock().unwrap().peek().unwrap(), "$GNGGA,via-task\n");
    }
}
