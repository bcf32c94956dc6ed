pub mod conversation;
pub mod id;
pub mod snowflake;

pub use conversation::ConversationId;
pub use snowflake::SnowflakeGenerator;
