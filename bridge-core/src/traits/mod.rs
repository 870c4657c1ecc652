pub use execution_chain::*;
pub use heimdall::*;
pub use root_chain::*;
pub use subgraph::*;

mod execution_chain;
mod heimdall;
mod root_chain;
mod subgraph;
