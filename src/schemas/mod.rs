mod message_type;
pub use message_type::*;

pub mod messages;
pub use messages::*;

mod stream;
pub use stream::*;

mod token_usage;
pub use token_usage::*;

mod generate_result;
pub use generate_result::*;
