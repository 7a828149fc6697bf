mod embedder_trait;
pub use embedder_trait::*;

mod openai_embedder;
pub use openai_embedder::*;

mod error;
pub use error::*;
