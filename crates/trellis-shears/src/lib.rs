//! trellis-shears — the handheld device stack.
//!
//! Wires together the GPS line assembler, the save coordinator, the CSV
//! log, the log-transfer server, and the peripheral link supervisor. The
//! radio stack, the GPS UART, and the trigger GPIO are external; they feed
//! the channels and the flag this crate exposes.

pub mod assembler;
pub mod link;
pub mod logfile;
pub mod save;
pub mod server;
pub mod supervisor;

pub use assembler::{shared_latest_line, LineAssembler, SharedLatestLine};
pub use link::{link_channels, LinkChannels, LinkId, PeripheralCommand, PeripheralEvent};
pub use logfile::CsvLog;
pub use save::{SaveRequest, SaveWorker};
pub use server::{LogServer, SharedLogServer, TransferEmitter};
pub use supervisor::{IndicatorState, ShearsSupervisor};
