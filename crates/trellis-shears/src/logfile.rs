//! The on-flash CSV log of committed GPS fixes.
//!
//! One file, append-only between offloads. Every save opens, appends one
//! row, and closes — the file is never held open between saves, so a
//! transfer session can read it concurrently without contending on a
//! handle. The header row is written when the file is first created (or
//! found empty) and restored by [`CsvLog::clear`].

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use trellis_core::nmea::GgaFix;

/// Column order of the log. The dashboard and the host both parse by
/// position, so this line is part of the product's data contract.
pub const CSV_HEADER: &str =
    "utc_time,latitude,longitude,fix_quality,num_satellites,hdop,altitude,geoid_height";

/// Handle on the CSV log file. Cheap to clone paths around; all I/O is
/// open-append-close per operation.
#[derive(Debug, Clone)]
pub struct CsvLog {
    path: PathBuf,
}

impl CsvLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one committed fix. Writes the header first if the file is
    /// new or empty.
    pub fn append(&self, fix: &GgaFix) -> std::io::Result<()> {
        let needs_header = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        if needs_header {
            writeln!(file, "{CSV_HEADER}")?;
        }
        writeln!(file, "{}", format_row(fix))?;
        Ok(())
    }

    /// Truncate the log back to its header row. Called by the application
    /// once the host has acknowledged a completed offload.
    pub fn clear(&self) -> std::io::Result<()> {
        let mut file = std::fs::File::create(&self.path)?;
        writeln!(file, "{CSV_HEADER}")?;
        Ok(())
    }
}

/// Render one row in the documented column order and precision:
/// coordinates to 7 decimal places, HDOP to 1, altitude and geoid to 3.
fn format_row(fix: &GgaFix) -> String {
    format!(
        "{},{:.7},{:.7},{},{},{:.1},{:.3},{:.3}",
        fix.utc_time,
        fix.latitude,
        fix.longitude,
        fix.fix_quality,
        fix.num_satellites,
        fix.hdop,
        fix.altitude,
        fix.geoid_height,
    )
}
