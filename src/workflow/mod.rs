mod engine;
pub use engine::*;

mod dag;
pub use dag::*;

mod meter;
pub use meter::*;

mod result;
pub use result::*;

mod retry;
pub use retry::*;

mod error;
pub use error::*;

#[cfg(test)]
pub(crate) mod test_utils;
