pub mod bundled;
pub mod expr;
pub mod loader;
pub mod types;

pub use bundled::load_bundled;
pub use loader::{load_rules, parse_rule, RuleFilter, RuleSet};
pub use types::{
    Chaining, ExtractSource, Extractor, Rule, RuleDefinition, Stage, Step, VariableSpec,
};
