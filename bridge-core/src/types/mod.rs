pub use consensus::*;
pub use events::*;
pub use header::*;
pub use log::*;
pub use messages::*;
pub use task::*;

mod consensus;
mod events;
mod header;
mod log;
mod messages;
mod task;
