#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! smsgated library — exposes the core building blocks of the SMS/USSD
//! gateway daemon.
//!
//! - `modem` — serial AT-command transport (`at`) and per-modem orchestration
//!   (`worker`)
//! - `pool` — aggregates modems, routes outgoing SMS, buffers incoming SMS
//! - `router` — recipient-number to modem-identifier prefix matching
//! - `smtp` — SMTP relay for forwarding delivered SMS as e-mail
//! - `rpc` — mTLS-terminated JSON RPC surface
//! - `gateway` — wires everything together and runs the event loop
//! - `config` — INI configuration loading
//! - `serialportmapper` — persistent IMEI-to-serial-device mapping
//! - `health` — shared health-state model
//! - `sms` — the `Sms` value type
//! - `modemconfig` — per-modem configuration
//! - `helper` — phone number cleanup, token checks, file permission checks
//! - `error` — error types shared across components

pub mod config;
pub mod error;
pub mod gateway;
pub mod health;
pub mod helper;
pub mod modem;
pub mod modemconfig;
pub mod pool;
pub mod router;
pub mod rpc;
pub mod serialportmapper;
pub mod sms;
pub mod smtp;
pub mod tls;

pub use config::Config;
pub use health::{Health, HealthState};
pub use pool::ModemPool;
pub use sms::Sms;
