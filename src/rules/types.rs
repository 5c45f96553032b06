use std::collections::{BTreeSet, HashSet};
use std::time::Duration;
use regex::Regex;
use serde::{Deserialize, Serialize};
use crate::errors::PocScanError;
use crate::models::Severity;
use super::expr::{parse_expression, Expr};

/// Variables every work item starts with, derived from the target.
pub const TARGET_VARIABLES: &[&str] = &[
    "target", "base_url", "root_url", "scheme", "host", "hostname", "port", "path",
];

/// Variables bound after each executed step from the response.
pub const RESPONSE_VARIABLES: &[&str] = &["status", "body", "headers", "content_type", "elapsed"];

/// Variables bound when entering a stage that declares `oob: true`.
pub const OOB_VARIABLES: &[&str] = &["oob_token", "oob_host", "oob_url"];

// ---------------------------------------------------------------------------
// On-disk schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleDefinition {
    pub id: String,
    pub info: RuleInfo,
    /// Ordered: later variables may reference earlier ones.
    #[serde(default)]
    pub variables: serde_yaml::Mapping,
    #[serde(default)]
    pub chaining: Chaining,
    /// Seconds to wait for an OOB interaction when `oob()` gives no timeout.
    pub oob_timeout: Option<u64>,
    pub stages: Vec<StageDefinition>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleInfo {
    pub name: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// How stage conditions combine into the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Chaining {
    /// Every stage must pass; the first failing stage ends evaluation.
    #[default]
    All,
    /// The first passing stage makes the target vulnerable.
    Any,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StageDefinition {
    #[serde(default)]
    pub name: Option<String>,
    /// Allocate an OOB token for this stage before its requests are sent.
    #[serde(default)]
    pub oob: bool,
    pub steps: Vec<StepDefinition>,
    pub condition: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StepDefinition {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub headers: serde_yaml::Mapping,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub follow_redirects: bool,
    #[serde(default)]
    pub extractors: Vec<ExtractorDefinition>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractorDefinition {
    pub name: String,
    /// `status`, `body`, `headers`, `content_type`, `elapsed` or `header:<name>`
    #[serde(default = "default_source")]
    pub from: String,
    pub regex: Option<String>,
    /// Capture group to keep; defaults to 1 when the regex has groups, else 0.
    #[serde(default)]
    pub group: Option<usize>,
}

fn default_source() -> String {
    "body".to_string()
}

// ---------------------------------------------------------------------------
// Compiled form
// ---------------------------------------------------------------------------

/// A parsed, validated rule. Shared read-only by every worker.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub severity: Severity,
    pub description: String,
    pub tags: Vec<String>,
    pub variables: Vec<(String, VariableSpec)>,
    pub chaining: Chaining,
    pub oob_timeout: Option<Duration>,
    pub stages: Vec<Stage>,
    /// Definition error found at load time. A defective rule is never
    /// executed; each of its work items yields an error verdict.
    pub defect: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Stage {
    pub name: String,
    pub oob: bool,
    pub steps: Vec<Step>,
    pub condition: Expr,
    pub condition_source: String,
}

#[derive(Debug, Clone)]
pub struct Step {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub follow_redirects: bool,
    pub extractors: Vec<Extractor>,
}

#[derive(Debug, Clone)]
pub struct Extractor {
    pub name: String,
    pub source: ExtractSource,
    pub regex: Option<Regex>,
    pub group: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractSource {
    Status,
    Body,
    Headers,
    ContentType,
    Elapsed,
    Header(String),
}

/// How a rule variable gets its per-work-item value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableSpec {
    RandStr(usize),
    RandLower(usize),
    RandInt(i64, i64),
    /// Literal text with optional `{{placeholders}}`.
    Template(String),
}

const METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS", "TRACE"];

impl Rule {
    /// A rule that failed to compile. Keeps identity so its work items can
    /// still be scheduled and reported.
    pub fn defective(id: &str, name: &str, severity: Severity, defect: String) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            severity,
            description: String::new(),
            tags: Vec::new(),
            variables: Vec::new(),
            chaining: Chaining::All,
            oob_timeout: None,
            stages: Vec::new(),
            defect: Some(defect),
        }
    }

    pub fn is_defective(&self) -> bool {
        self.defect.is_some()
    }

    pub fn uses_oob(&self) -> bool {
        self.stages.iter().any(|s| s.oob)
    }

    /// Compile a definition, validating every template, extractor and
    /// condition against the variables in scope at that point.
    pub fn compile(def: RuleDefinition) -> Result<Self, PocScanError> {
        let err = |msg: String| PocScanError::RuleDefinition(format!("rule '{}': {}", def.id, msg));

        if def.id.trim().is_empty() {
            return Err(PocScanError::RuleDefinition("rule id must not be empty".into()));
        }
        if def.stages.is_empty() {
            return Err(err("at least one stage is required".into()));
        }

        let mut scope: BTreeSet<String> = TARGET_VARIABLES.iter().map(|s| s.to_string()).collect();

        let mut variables = Vec::new();
        for (key, value) in &def.variables {
            let name = yaml_scalar(key).ok_or_else(|| err("variable names must be strings".into()))?;
            let raw = yaml_scalar(value)
                .ok_or_else(|| err(format!("variable '{}' must be a scalar", name)))?;
            check_identifier(&name).map_err(&err)?;
            let spec = VariableSpec::parse(&raw);
            if let VariableSpec::Template(template) = &spec {
                check_placeholders(template, &scope)
                    .map_err(|m| err(format!("variable '{}': {}", name, m)))?;
            }
            scope.insert(name.clone());
            variables.push((name, spec));
        }

        let mut stages = Vec::new();
        for (index, stage_def) in def.stages.iter().enumerate() {
            let stage_name = stage_def.name.clone().unwrap_or_else(|| format!("stage{}", index));
            let stage_err = |msg: String| err(format!("stage '{}': {}", stage_name, msg));

            if stage_def.steps.is_empty() {
                return Err(stage_err("at least one step is required".into()));
            }
            if stage_def.oob {
                scope.extend(OOB_VARIABLES.iter().map(|s| s.to_string()));
            }

            let mut steps = Vec::new();
            for step_def in &stage_def.steps {
                let step = Step::compile(step_def, &scope).map_err(&stage_err)?;
                scope.extend(RESPONSE_VARIABLES.iter().map(|s| s.to_string()));
                for extractor in &step.extractors {
                    scope.insert(extractor.name.clone());
                }
                steps.push(step);
            }

            let condition = parse_expression(&stage_def.condition)
                .map_err(|e| stage_err(definition_message(e)))?;
            if condition.uses_oob() && !stage_def.oob {
                return Err(stage_err("condition uses oob() but the stage does not declare `oob: true`".into()));
            }
            for var in condition.variables() {
                let known = scope.contains(&var)
                    || var.starts_with("header.")
                    || (var == "oob" && stage_def.oob);
                if !known {
                    return Err(stage_err(format!("condition references unknown variable '{}'", var)));
                }
            }

            stages.push(Stage {
                name: stage_name,
                oob: stage_def.oob,
                steps,
                condition,
                condition_source: stage_def.condition.clone(),
            });
        }

        Ok(Self {
            id: def.id,
            name: def.info.name,
            severity: def.info.severity,
            description: def.info.description,
            tags: def.info.tags,
            variables,
            chaining: def.chaining,
            oob_timeout: def.oob_timeout.map(Duration::from_secs),
            stages,
            defect: None,
        })
    }
}

impl Step {
    fn compile(def: &StepDefinition, scope: &BTreeSet<String>) -> Result<Self, String> {
        let method = def.method.trim().to_uppercase();
        if !METHODS.contains(&method.as_str()) {
            return Err(format!("unsupported method '{}'", def.method));
        }

        check_placeholders(&def.path, scope).map_err(|m| format!("path: {}", m))?;
        check_placeholders(&def.body, scope).map_err(|m| format!("body: {}", m))?;

        let mut headers = Vec::new();
        for (k, v) in &def.headers {
            let name = yaml_scalar(k).ok_or("header names must be strings")?;
            let value = yaml_scalar(v).ok_or_else(|| format!("header '{}' must be a scalar", name))?;
            check_placeholders(&value, scope).map_err(|m| format!("header '{}': {}", name, m))?;
            headers.push((name, value));
        }

        let mut seen = HashSet::new();
        let mut extractors = Vec::new();
        for ex in &def.extractors {
            check_identifier(&ex.name)?;
            if !seen.insert(ex.name.clone()) {
                return Err(format!("duplicate extractor '{}'", ex.name));
            }
            extractors.push(Extractor::compile(ex)?);
        }

        Ok(Self {
            method,
            path: def.path.clone(),
            headers,
            body: def.body.clone(),
            follow_redirects: def.follow_redirects,
            extractors,
        })
    }
}

impl Extractor {
    fn compile(def: &ExtractorDefinition) -> Result<Self, String> {
        let source = ExtractSource::parse(&def.from)
            .ok_or_else(|| format!("extractor '{}': unknown source '{}'", def.name, def.from))?;
        let (regex, group) = match &def.regex {
            Some(pattern) => {
                let re = Regex::new(pattern)
                    .map_err(|e| format!("extractor '{}': invalid regex: {}", def.name, e))?;
                let group = def.group.unwrap_or(if re.captures_len() > 1 { 1 } else { 0 });
                if group >= re.captures_len() {
                    return Err(format!(
                        "extractor '{}': group {} out of range ({} groups)",
                        def.name, group, re.captures_len() - 1
                    ));
                }
                (Some(re), group)
            }
            None => (None, 0),
        };
        Ok(Self { name: def.name.clone(), source, regex, group })
    }
}

impl ExtractSource {
    fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Some(name) = s.strip_prefix("header:") {
            let name = name.trim().to_lowercase();
            return (!name.is_empty()).then_some(ExtractSource::Header(name));
        }
        match s.to_lowercase().as_str() {
            "status" => Some(ExtractSource::Status),
            "body" => Some(ExtractSource::Body),
            "headers" => Some(ExtractSource::Headers),
            "content_type" => Some(ExtractSource::ContentType),
            "elapsed" => Some(ExtractSource::Elapsed),
            _ => None,
        }
    }
}

impl VariableSpec {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Some(args) = call_args(trimmed, "randstr") {
            if let Ok(n) = args.trim().parse::<usize>() {
                return VariableSpec::RandStr(n);
            }
        }
        if let Some(args) = call_args(trimmed, "randlower") {
            if let Ok(n) = args.trim().parse::<usize>() {
                return VariableSpec::RandLower(n);
            }
        }
        if let Some(args) = call_args(trimmed, "randint") {
            if let Some((lo, hi)) = args.split_once(',') {
                if let (Ok(lo), Ok(hi)) = (lo.trim().parse::<i64>(), hi.trim().parse::<i64>()) {
                    if lo <= hi {
                        return VariableSpec::RandInt(lo, hi);
                    }
                }
            }
        }
        VariableSpec::Template(raw.to_string())
    }
}

fn call_args<'a>(s: &'a str, name: &str) -> Option<&'a str> {
    s.strip_prefix(name)?.strip_prefix('(')?.strip_suffix(')')
}

fn definition_message(e: PocScanError) -> String {
    match e {
        PocScanError::RuleDefinition(msg) => msg,
        other => other.to_string(),
    }
}

fn yaml_scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn check_identifier(name: &str) -> Result<(), String> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid && name != "oob" {
        Ok(())
    } else {
        Err(format!("invalid variable name '{}'", name))
    }
}

fn check_placeholders(template: &str, scope: &BTreeSet<String>) -> Result<(), String> {
    for name in crate::interpreter::render::placeholders(template) {
        if !scope.contains(&name) && !name.starts_with("header.") {
            return Err(format!("unresolved placeholder '{{{{{}}}}}'", name));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_yaml(yaml: &str) -> Result<Rule, PocScanError> {
        let def: RuleDefinition = serde_yaml::from_str(yaml).unwrap();
        Rule::compile(def)
    }

    const VALID: &str = r#"
id: demo-admin-token
info:
  name: Admin token exposure
  severity: high
variables:
  nonce: randstr(8)
  marker: "x-{{nonce}}"
stages:
  - name: fetch
    steps:
      - method: get
        path: /admin?n={{nonce}}
        headers:
          X-Marker: "{{marker}}"
        extractors:
          - name: token
            regex: 'admin_token=(\w+)'
      - path: /verify?t={{token}}
    condition: status == 200 && body contains "admin_token" && token != ""
"#;

    #[test]
    fn test_compile_valid_rule() {
        let rule = compile_yaml(VALID).unwrap();
        assert_eq!(rule.id, "demo-admin-token");
        assert_eq!(rule.severity, Severity::High);
        assert_eq!(rule.chaining, Chaining::All);
        assert_eq!(rule.variables[0], ("nonce".to_string(), VariableSpec::RandStr(8)));
        assert_eq!(rule.stages.len(), 1);
        assert_eq!(rule.stages[0].steps[0].method, "GET");
        assert_eq!(rule.stages[0].steps[0].extractors[0].group, 1);
        assert!(!rule.is_defective());
        assert!(!rule.uses_oob());
    }

    #[test]
    fn test_variable_spec_parsing() {
        assert_eq!(VariableSpec::parse("randlower(6)"), VariableSpec::RandLower(6));
        assert_eq!(VariableSpec::parse("randint(10, 99)"), VariableSpec::RandInt(10, 99));
        assert_eq!(VariableSpec::parse("randint(9, 1)"), VariableSpec::Template("randint(9, 1)".into()));
        assert_eq!(VariableSpec::parse("plain"), VariableSpec::Template("plain".into()));
    }

    #[test]
    fn test_unknown_placeholder_rejected() {
        let yaml = r#"
id: bad-placeholder
info: { name: x }
stages:
  - steps:
      - path: /{{nowhere}}
    condition: status == 200
"#;
        let err = compile_yaml(yaml).unwrap_err().to_string();
        assert!(err.contains("nowhere"), "{}", err);
    }

    #[test]
    fn test_extractor_used_before_defined_rejected() {
        let yaml = r#"
id: order
info: { name: x }
stages:
  - steps:
      - path: /a?t={{token}}
      - path: /b
        extractors:
          - name: token
            regex: 't=(\w+)'
    condition: status == 200
"#;
        assert!(compile_yaml(yaml).is_err());
    }

    #[test]
    fn test_unknown_condition_variable_rejected() {
        let yaml = r#"
id: cond
info: { name: x }
stages:
  - steps:
      - path: /
    condition: secret == "1"
"#;
        assert!(compile_yaml(yaml).is_err());
    }

    #[test]
    fn test_oob_requires_stage_flag() {
        let without = r#"
id: oob-missing
info: { name: x }
stages:
  - steps:
      - path: /
    condition: oob()
"#;
        assert!(compile_yaml(without).is_err());

        let with = r#"
id: oob-ok
info: { name: x }
oob_timeout: 5
stages:
  - oob: true
    steps:
      - path: /fetch?url={{oob_url}}
    condition: oob()
"#;
        let rule = compile_yaml(with).unwrap();
        assert!(rule.uses_oob());
        assert_eq!(rule.oob_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_invalid_method_and_extractor_source() {
        let method = r#"
id: m
info: { name: x }
stages:
  - steps:
      - method: FETCH
    condition: status == 200
"#;
        assert!(compile_yaml(method).is_err());

        let source = r#"
id: s
info: { name: x }
stages:
  - steps:
      - extractors:
          - name: v
            from: cookies
    condition: v != ""
"#;
        assert!(compile_yaml(source).is_err());
    }

    #[test]
    fn test_header_extractor_source() {
        assert_eq!(
            ExtractSource::parse("header:X-Powered-By"),
            Some(ExtractSource::Header("x-powered-by".into()))
        );
        assert_eq!(ExtractSource::parse("header:"), None);
    }

    #[test]
    fn test_any_chaining_and_empty_stages() {
        let yaml = r#"
id: any
info: { name: x }
chaining: any
stages:
  - steps: [{ path: /a }]
    condition: status == 200
  - steps: [{ path: /b }]
    condition: status == 200
"#;
        assert_eq!(compile_yaml(yaml).unwrap().chaining, Chaining::Any);

        let empty = "id: e\ninfo: { name: x }\nstages: []\n";
        assert!(compile_yaml(empty).is_err());
    }
}
