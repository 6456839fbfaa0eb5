pub mod config;
pub mod messages;
mod state;

pub use config::{EmitOrder, SchedulerConfig};
pub use messages::SchedulerMsg;
pub use state::{Scheduler, ShutdownReport};
