pub mod catalog;
pub mod config;
pub mod db;
pub mod enrichment;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod projection;
pub mod warehouse;
