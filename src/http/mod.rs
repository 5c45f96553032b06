pub mod client;
pub mod executor;

pub use client::HttpStepExecutor;
pub use executor::{HttpResponse, RenderedRequest, StepExecutor};
