mod agent;
pub use agent::*;

mod step;
pub use step::*;

mod data_source;
pub use data_source::*;

mod orchestration;
pub use orchestration::*;
