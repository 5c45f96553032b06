pub mod context;
pub mod evaluator;
pub mod extract;
pub mod render;

pub use context::EvaluationContext;
pub use evaluator::{render_request, resolve_variables, Interpreter};
pub use render::{placeholders, render};
