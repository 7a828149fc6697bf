#[allow(clippy::module_inception)]
mod llm;
pub use llm::*;

mod options;
pub use options::*;

mod openai;
pub use openai::*;

mod claude;
pub use claude::*;

mod ollama;
pub use ollama::*;

mod factory;
pub use factory::*;

mod error;
pub use error::*;
