pub mod audit;
pub mod context;
pub mod kit;
pub mod orchestrator;
pub mod sweeper;

pub use audit::AuditLogger;
pub use context::ExecutionContext;
pub use kit::{Kit, KitHandle};
pub use orchestrator::{EventListener, KitOrchestrator, KitRun};
pub use sweeper::SessionSweeper;
