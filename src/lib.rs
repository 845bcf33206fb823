// src/lib.rs

pub mod config;
pub mod fetch;
pub mod merge;
pub mod outcome;
pub mod pipeline;
pub mod publish;
pub mod reshape;
pub mod store;
pub mod table;

#[cfg(test)]
mod test_http;
