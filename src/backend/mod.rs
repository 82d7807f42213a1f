//! Sound backend supervision
//!
//! Boots and supervises the sclang/SuperDirt process that turns pattern
//! messages into audio. The scheduler does not depend on this module;
//! sessions wire the two together.

mod config;
mod error;
mod process;

pub use config::BackendConfig;
pub use error::BackendError;
pub use process::{BackendNotice, BackendProcess, classify_line};
