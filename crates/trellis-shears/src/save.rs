//! Save-request coordinator.
//!
//! A save is requested from two places: the trigger GPIO's edge interrupt
//! and a software entry point. Neither context may touch the filesystem,
//! so both only set a flag; a dedicated worker polls it at ~100 Hz and does
//! the actual commit — parse the latest GGA sentence, append one CSV row.
//!
//! The flag is a lock-free atomic boolean: release ordering on set,
//! acquire swap on consume, so the worker always observes everything the
//! raiser published before raising.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use trellis_core::nmea;

use crate::assembler::SharedLatestLine;
use crate::logfile::CsvLog;

/// Poll period of the save worker (~100 Hz).
pub const SAVE_POLL_INTERVAL: Duration = Duration::from_millis(10);

// ── Request flag ──────────────────────────────────────────────────────────────

/// The shared save-request flag. Clone freely; all clones observe one flag.
#[derive(Debug, Clone, Default)]
pub struct SaveRequest {
    flag: Arc<AtomicBool>,
}

impl SaveRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a save. Safe from interrupt context and idempotent while a
    /// request is already pending.
    pub fn raise(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Consume a pending request. Returns true at most once per raise.
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }

    /// Observe without consuming.
    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

// ── Save worker ───────────────────────────────────────────────────────────────

/// Polls the request flag and commits one CSV row per observed request.
pub struct SaveWorker {
    request: SaveRequest,
    latest: SharedLatestLine,
    log: CsvLog,
    shutdown: broadcast::Receiver<()>,
}

impl SaveWorker {
    pub fn new(
        request: SaveRequest,
        latest: SharedLatestLine,
        log: CsvLog,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            request,
            latest,
            log,
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(SAVE_POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("save worker shutting down");
                    return Ok(());
                }

                _ = interval.tick() => {
                    if self.request.take() {
                        self.commit();
                    }
                }
            }
        }
    }

    /// Handle one consumed save request. At most one row is appended per
    /// request; every failure path drops the request and reports why.
    fn commit(&self) {
        let line = match self.latest.lock().unwrap().peek() {
            Some(line) => line.to_string(),
            None => {
                tracing::warn!("save requested but no complete GPS sentence available, dropped");
                return;
            }
        };

        let fix = match nmea::parse_gga(&line) {
            Ok(fix) => fix,
            Err(e) => {
                tracing::warn!(error = %e, line = line.trim_end(), "unusable GPS sentence, save dropped");
                return;
            }
        };

        if let Err(e) = self.log.append(&fix) {
            tracing::error!(error = %e, path = %self.log.path().display(), "CSV append failed");
            return;
        }

        tracing::info!(
            utc = %fix.utc_time,
            lat = fix.latitude,
            lon = fix.longitude,
            sats = fix.num_satellites,
            "fix committed"
        );
        self.latest.lock().unwrap().clear();
    }
}
