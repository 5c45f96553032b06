//! Rule-driven PoC vulnerability scanning engine.
//!
//! Targets are crossed with YAML rules into work items, evaluated by a
//! bounded worker pool, correlated with out-of-band callbacks, and recorded
//! in a durable progress log so interrupted scans can resume.

pub mod cli;
pub mod config;
pub mod errors;
pub mod http;
pub mod interpreter;
pub mod models;
pub mod oob;
pub mod progress;
pub mod rules;
pub mod scheduler;
pub mod sink;
