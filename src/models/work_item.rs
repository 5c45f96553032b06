use std::sync::Arc;
use crate::rules::Rule;
use super::target::Target;

/// One (target, rule) scheduling unit.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub key: String,
    pub target: Target,
    pub rule: Arc<Rule>,
}

impl WorkItem {
    pub fn new(target: Target, rule: Arc<Rule>) -> Self {
        let key = work_item_key(&target, &rule.id);
        Self { key, target, rule }
    }
}

/// Stable key derived from the target string and rule id. Identical across
/// processes and runs, so a resumed scan recognises completed items.
pub fn work_item_key(target: &Target, rule_id: &str) -> String {
    let name = format!("{}\n{}", target.as_str(), rule_id);
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_URL, name.as_bytes())
        .simple()
        .to_string()
}
