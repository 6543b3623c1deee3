pub mod config;
pub mod error;
pub mod event;
pub mod stage;
pub mod traits;
pub mod types;

pub use config::KitflowConfig;
pub use error::{KitError, Result};
pub use event::{EventBus, SessionEvents};
pub use stage::WorkflowStage;
pub use traits::KitHooks;
pub use types::*;
