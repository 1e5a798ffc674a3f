pub mod error;
pub mod event_bus;
pub mod events;
pub mod lock;
pub mod logging;
pub mod timestamp;

pub use error::{CaptureError, CaptureResult, SpawnFailureKind};
pub use event_bus::{EventBroadcastHandler, EventBus, EventHandler, EventLoggerHandler};
pub use events::{Event, EventBuilder, EventPriority, EventType};
pub use logging::{ComponentLogger, LogContext};
pub use timestamp::*;
