use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use super::loader::{parse_rule, RuleSet};

/// Rules compiled into the binary, as (virtual path, YAML source).
const BUNDLED: &[(&str, &str)] = &[
    ("pocs/http/default-admin-login.yaml", include_str!("../../pocs/http/default-admin-login.yaml")),
    ("pocs/http/exposed-env-file.yaml", include_str!("../../pocs/http/exposed-env-file.yaml")),
    ("pocs/http/path-traversal-passwd.yaml", include_str!("../../pocs/http/path-traversal-passwd.yaml")),
    ("pocs/oob/blind-ssrf-url-param.yaml", include_str!("../../pocs/oob/blind-ssrf-url-param.yaml")),
    ("pocs/oob/log4shell-header.yaml", include_str!("../../pocs/oob/log4shell-header.yaml")),
];

/// Parse the embedded rule pack. Treated exactly like rules read from disk.
pub fn load_bundled() -> RuleSet {
    let mut set = RuleSet::default();
    let mut seen = HashSet::new();
    for (path, source) in BUNDLED {
        match parse_rule(source) {
            Ok(rule) => {
                if seen.insert(rule.id.clone()) {
                    set.rules.push(Arc::new(rule));
                }
            }
            Err(e) => {
                warn!(path, error = %e, "Skipping unreadable bundled rule");
                set.unreadable.push((PathBuf::from(path), e.to_string()));
            }
        }
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_rules_compile() {
        let set = load_bundled();
        assert!(set.unreadable.is_empty(), "{:?}", set.unreadable);
        assert_eq!(set.len(), BUNDLED.len());
        assert_eq!(set.defective().count(), 0);
    }
}
