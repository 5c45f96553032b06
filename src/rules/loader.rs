use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use crate::errors::PocScanError;
use crate::models::Severity;
use super::types::{Rule, RuleDefinition};
use tracing::{info, warn};

/// Rules loaded for one scan, in discovery order.
#[derive(Debug, Default)]
pub struct RuleSet {
    pub rules: Vec<Arc<Rule>>,
    /// Files that could not be read or parsed at all.
    pub unreadable: Vec<(PathBuf, String)>,
}

impl RuleSet {
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn defective(&self) -> impl Iterator<Item = &Arc<Rule>> {
        self.rules.iter().filter(|r| r.is_defective())
    }

    /// Append rules from `other`, keeping the first rule seen for each id.
    pub fn merge(&mut self, other: RuleSet) {
        let mut seen: HashSet<String> = self.rules.iter().map(|r| r.id.clone()).collect();
        for rule in other.rules {
            if seen.insert(rule.id.clone()) {
                self.rules.push(rule);
            } else {
                warn!(rule = %rule.id, "Duplicate rule id, keeping first");
            }
        }
        self.unreadable.extend(other.unreadable);
    }

    /// Keep only rules accepted by the filter.
    pub fn retain(&mut self, filter: &RuleFilter) {
        self.rules.retain(|r| filter.accepts(r));
    }
}

/// Operator-selected narrowing of the loaded rule set.
#[derive(Debug, Clone, Default)]
pub struct RuleFilter {
    pub severities: Option<Vec<Severity>>,
    /// Case-insensitive substring matched against rule ids.
    pub id_contains: Option<String>,
}

impl RuleFilter {
    pub fn accepts(&self, rule: &Rule) -> bool {
        if let Some(severities) = &self.severities {
            if !severities.contains(&rule.severity) {
                return false;
            }
        }
        if let Some(needle) = &self.id_contains {
            if !rule.id.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

/// Parse one rule document. YAML that does not match the schema is an error;
/// a well-formed document that fails validation becomes a defective rule so
/// its work items still report the problem.
pub fn parse_rule(content: &str) -> Result<Rule, PocScanError> {
    let def: RuleDefinition = serde_yaml::from_str(content)?;
    let (id, name, severity) = (def.id.clone(), def.info.name.clone(), def.info.severity);
    match Rule::compile(def) {
        Ok(rule) => Ok(rule),
        Err(PocScanError::RuleDefinition(msg)) if !id.trim().is_empty() => {
            Ok(Rule::defective(&id, &name, severity, msg))
        }
        Err(e) => Err(e),
    }
}

/// Load rules from files and directories (recursively, `*.yaml` / `*.yml`).
pub fn load_rules(paths: &[PathBuf]) -> Result<RuleSet, PocScanError> {
    let mut set = RuleSet::default();
    let mut seen_ids = HashSet::new();

    for file in discover_rule_files(paths)? {
        let parsed = std::fs::read_to_string(&file)
            .map_err(PocScanError::from)
            .and_then(|content| parse_rule(&content));

        let rule = match parsed {
            Ok(rule) => rule,
            Err(e) => {
                warn!(path = %file.display(), error = %e, "Skipping unreadable rule file");
                set.unreadable.push((file, e.to_string()));
                continue;
            }
        };

        if !seen_ids.insert(rule.id.clone()) {
            warn!(rule = %rule.id, path = %file.display(), "Duplicate rule id, keeping first");
            continue;
        }
        if let Some(defect) = &rule.defect {
            warn!(rule = %rule.id, path = %file.display(), defect = %defect, "Rule definition error");
        }
        set.rules.push(Arc::new(rule));
    }

    info!(
        rules = set.rules.len(),
        defective = set.defective().count(),
        unreadable = set.unreadable.len(),
        "Loaded rules"
    );
    Ok(set)
}

fn discover_rule_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>, PocScanError> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_file() {
            files.push(path.clone());
            continue;
        }
        if !path.is_dir() {
            return Err(PocScanError::Config(format!("Rule path not found: {}", path.display())));
        }
        let mut found = Vec::new();
        for ext in ["yaml", "yml"] {
            found.extend(glob_files(path, ext)?);
        }
        // Deterministic order keeps work item enumeration reproducible
        found.sort();
        files.extend(found);
    }
    Ok(files)
}

fn glob_files(dir: &Path, ext: &str) -> Result<Vec<PathBuf>, PocScanError> {
    let pattern = dir.join("**").join(format!("*.{}", ext));
    let pattern_str = pattern.to_string_lossy();
    let mut out = Vec::new();
    for entry in glob::glob(&pattern_str)
        .map_err(|e| PocScanError::Config(format!("Invalid glob pattern: {}", e)))?
    {
        let path = entry.map_err(|e| PocScanError::Config(format!("Glob error: {}", e)))?;
        if path.is_file() {
            out.push(path);
        }
    }
    Ok(out)
}
