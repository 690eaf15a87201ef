pub mod activities;
pub mod chat_stream;
pub mod dedup;
pub mod generator;
