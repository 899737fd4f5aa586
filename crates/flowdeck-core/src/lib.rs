pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod traits;
pub mod types;
pub mod validate;

pub use config::AppConfig;
pub use error::{FlowdeckError, Result};
pub use event::EventBus;
pub use types::*;
