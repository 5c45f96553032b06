use crate::errors::PocScanError;
use super::context::EvaluationContext;

/// Names referenced as `{{name}}` in `template`, in order of appearance.
/// Whitespace inside the braces is ignored.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else { break };
        names.push(after[..end].trim().to_string());
        rest = &after[end + 2..];
    }
    names
}

/// Substitute every `{{name}}` from `ctx`. A placeholder with no value is a
/// rule-definition error, never left in the output.
pub fn render(template: &str, ctx: &EvaluationContext) -> Result<String, PocScanError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else { break };
        let name = after[..end].trim();
        let value = ctx.lookup_var(name).ok_or_else(|| {
            PocScanError::RuleDefinition(format!("unresolved placeholder '{{{{{}}}}}'", name))
        })?;
        out.push_str(&rest[..start]);
        out.push_str(&value.to_string());
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}
