//! ---
//! uev_section: "01-core-functionality"
//! uev_subsection: "module"
//! uev_type: "source"
//! uev_scope: "code"
//! uev_description: "Shared primitives and utilities for the events client."
//! uev_version: "v0.1.0"
//! uev_owner: "tbd"
//! ---
//! Shared primitives for the UDP events client workspace.
//! This crate exposes configuration loading, tracing initialisation and the
//! session clock used to timestamp soft events.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    AppConfig, LoadedAppConfig, LoggingConfig, RealConfig, SessionConfig, SoftConfig, TextFraming,
};
pub use logging::{init_tracing, LogFormat};
pub use time::{ClockMode, ManualClockHandle, SessionClock};
