pub mod chat;
pub mod lifecycle;
pub mod outcome;
pub mod parsing;
pub mod task;
