// src/publish/mod.rs

pub mod postgres;
pub mod sheets;

pub use postgres::publish_postgres;
pub use sheets::publish_sheets;
