pub use retry::*;
pub use timeout::*;

mod retry;
mod timeout;
