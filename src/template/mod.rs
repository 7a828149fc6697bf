mod engine;
pub use engine::*;

mod error;
pub use error::*;
