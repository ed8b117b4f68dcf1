pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::{ExecutorConfig, FlowConfig, ReplayConfig, ReplayMode};
pub use error::{FlowError, Result};
pub use event::{EventBus, FlowEvent};
pub use traits::{from_fn, from_sync_fn, Processor};
pub use types::*;
