#[allow(clippy::module_inception)]
mod orchestrator;
pub use orchestrator::*;

mod shared_state;
pub use shared_state::*;

mod error;
pub use error::*;
