mod runtime;
pub use runtime::*;

mod data_source;
pub use data_source::*;

mod error;
pub use error::*;
