pub mod embedding;
pub mod error;
pub mod memory;
pub mod openai;
pub mod redis;
pub mod vectordb;
