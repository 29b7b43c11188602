pub mod conversation;
pub mod quote;
