//! In-process runtime for bridged extensions.
//!
//! Loads an [`AppConfig`], instantiates the configured extensions from an
//! [`aptima_bridge::AddonRegistry`] and routes commands, data and frames
//! between them through [`LocalCore`].

pub mod app;
pub mod config;
pub mod error;
pub mod local_core;
pub mod logging;
pub mod routes;
mod runner;

pub use app::App;
pub use config::{AppConfig, AppSettings, ConfigError, ConnectionConfig, ConnectionKind, ExtensionConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use local_core::{LocalCore, OUTER_SOURCE, ResultReceiver};
pub use logging::init_tracing;
pub use routes::RouteTable;
