//! Per-modem transport (`at`) and orchestration (`worker`) logic.

pub mod at;
pub mod worker;

pub use at::AtPort;
pub use worker::{rssi_to_dbm, DeliveryStatus, ModemWorker, WorkerState};
