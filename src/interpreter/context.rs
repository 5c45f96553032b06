use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use crate::errors::PocScanError;
use crate::http::HttpResponse;
use crate::models::{Target, TargetParts};
use crate::oob::{OobCorrelator, OobInteraction, OobToken};
use crate::rules::expr::{EvalEnv, Value};

/// Per-work-item variables. Owned by the worker evaluating the item.
#[derive(Default)]
pub struct EvaluationContext {
    vars: HashMap<String, Value>,
    oob: Option<StageOob>,
}

/// Token state for the stage currently being evaluated.
struct StageOob {
    token: OobToken,
    correlator: Arc<OobCorrelator>,
    cancel: CancellationToken,
    timeout: Duration,
    /// `Some` once a wait has completed.
    outcome: Option<Option<OobInteraction>>,
}

impl EvaluationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_target(target: &Target, parts: &TargetParts) -> Self {
        let mut ctx = Self::new();
        ctx.set("target", Value::from(target.as_str()));
        ctx.set("base_url", Value::from(parts.base_url.as_str()));
        ctx.set("root_url", Value::from(parts.root_url.as_str()));
        ctx.set("scheme", Value::from(parts.scheme.as_str()));
        ctx.set("host", Value::from(parts.host.as_str()));
        ctx.set("hostname", Value::from(parts.hostname.as_str()));
        ctx.set("port", Value::from(parts.port));
        ctx.set("path", Value::from(parts.path.as_str()));
        ctx
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.vars.insert(name.to_string(), value);
    }

    /// Variable lookup. `header.*` names resolve to an empty string when the
    /// last response did not carry that header.
    pub fn lookup_var(&self, name: &str) -> Option<Value> {
        match self.vars.get(name) {
            Some(v) => Some(v.clone()),
            None if name.starts_with("header.") => Some(Value::from("")),
            None => None,
        }
    }

    /// Bind the response variables, replacing those of the previous step.
    pub fn bind_response(&mut self, response: &HttpResponse) {
        self.vars.retain(|k, _| !k.starts_with("header."));
        self.set("status", Value::from(response.status));
        self.set("body", Value::from(response.body.as_str()));
        self.set("headers", Value::from(response.headers_text()));
        self.set("content_type", Value::from(response.content_type()));
        self.set("elapsed", Value::from(response.elapsed_ms()));
        for (name, value) in &response.headers {
            let key = format!("header.{}", name.to_ascii_lowercase().replace('-', "_"));
            match self.vars.get_mut(&key) {
                Some(Value::Str(existing)) => {
                    existing.push_str(", ");
                    existing.push_str(value);
                }
                _ => self.set(&key, Value::from(value.as_str())),
            }
        }
    }

    /// Enter an OOB stage: bind `oob_token`, `oob_host` and `oob_url`.
    pub fn begin_oob_stage(
        &mut self,
        token: OobToken,
        correlator: Arc<OobCorrelator>,
        cancel: CancellationToken,
        timeout: Duration,
    ) {
        self.set("oob_token", Value::from(token.id.as_str()));
        self.set("oob_host", Value::from(token.host()));
        self.set("oob_url", Value::from(token.url()));
        self.vars.remove("oob");
        self.oob = Some(StageOob { token, correlator, cancel, timeout, outcome: None });
    }

    /// Leave the current OOB stage, releasing a token nobody waited on.
    /// Returns the correlated interaction, if any.
    pub fn end_oob_stage(&mut self) -> Option<OobInteraction> {
        let state = self.oob.take()?;
        match state.outcome {
            Some(outcome) => outcome,
            None => {
                state.correlator.release(&state.token);
                None
            }
        }
    }

    pub fn in_oob_stage(&self) -> bool {
        self.oob.is_some()
    }
}

#[async_trait]
impl EvalEnv for EvaluationContext {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.lookup_var(name)
    }

    async fn wait_oob(&mut self, timeout: Option<Duration>) -> Result<bool, PocScanError> {
        let state = self
            .oob
            .as_mut()
            .ok_or_else(|| PocScanError::RuleDefinition("oob() used outside an OOB stage".into()))?;

        // Memoised: a second oob() in the same condition does not wait again
        if let Some(outcome) = &state.outcome {
            return Ok(outcome.is_some());
        }

        let deadline = timeout.unwrap_or(state.timeout);
        let outcome = state.correlator.wait_for(&state.token, deadline, &state.cancel).await?;
        let hit = outcome.is_some();
        state.outcome = Some(outcome);
        self.set("oob", Value::Bool(hit));
        Ok(hit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response() -> HttpResponse {
        HttpResponse {
            status: 302,
            headers: vec![
                ("location".into(), "/login".into()),
                ("set-cookie".into(), "a=1".into()),
                ("set-cookie".into(), "b=2".into()),
                ("x-powered-by".into(), "PHP/7.4".into()),
            ],
            body: "moved".into(),
            elapsed: Duration::from_millis(42),
            ..Default::default()
        }
    }

    #[test]
    fn test_target_seeding() {
        let target = Target::new("https://t.local:8443/app");
        let ctx = EvaluationContext::for_target(&target, &target.parts().unwrap());
        assert_eq!(ctx.lookup_var("hostname"), Some(Value::from("t.local")));
        assert_eq!(ctx.lookup_var("port").map(|v| v.to_string()), Some("8443".to_string()));
        assert_eq!(ctx.lookup_var("base_url"), Some(Value::from("https://t.local:8443/app")));
    }

    #[test]
    fn test_bind_response_variables() {
        let mut ctx = EvaluationContext::new();
        ctx.bind_response(&response());
        assert_eq!(ctx.lookup_var("status"), Some(Value::Num(302.0)));
        assert_eq!(ctx.lookup_var("elapsed"), Some(Value::Num(42.0)));
        assert_eq!(ctx.lookup_var("header.x_powered_by"), Some(Value::from("PHP/7.4")));
        assert_eq!(ctx.lookup_var("header.set_cookie"), Some(Value::from("a=1, b=2")));
        assert_eq!(ctx.lookup_var("header.nope"), Some(Value::from("")));
        assert_eq!(ctx.lookup_var("nope"), None);

        ctx.bind_response(&HttpResponse { status: 200, ..Default::default() });
        assert_eq!(ctx.lookup_var("header.location"), Some(Value::from("")));
    }

    #[test]
    fn test_header_names_are_normalised() {
        let mut ctx = EvaluationContext::new();
        ctx.bind_response(&HttpResponse {
            status: 200,
            headers: vec![
                ("X-Powered-By".into(), "Express".into()),
                ("Set-Cookie".into(), "a=1".into()),
                ("set-cookie".into(), "b=2".into()),
            ],
            ..Default::default()
        });
        assert_eq!(ctx.lookup_var("header.x_powered_by"), Some(Value::from("Express")));
        assert_eq!(ctx.lookup_var("header.set_cookie"), Some(Value::from("a=1, b=2")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_oob_is_memoised() {
        let correlator = Arc::new(OobCorrelator::new(None));
        let token = correlator.new_token();
        let id = token.id.clone();
        let mut ctx = EvaluationContext::new();
        ctx.begin_oob_stage(token, correlator.clone(), CancellationToken::new(), Duration::from_secs(5));
        assert!(ctx.in_oob_stage());
        assert_eq!(ctx.lookup_var("oob_token"), Some(Value::from(id.as_str())));

        correlator.deliver(&id, OobInteraction::new(&id, "dns", "query"));
        assert!(ctx.wait_oob(None).await.unwrap());
        assert!(ctx.wait_oob(Some(Duration::from_secs(1))).await.unwrap());
        assert_eq!(ctx.lookup_var("oob"), Some(Value::Bool(true)));

        let interaction = ctx.end_oob_stage().unwrap();
        assert_eq!(interaction.protocol, "dns");
        assert!(!ctx.in_oob_stage());
    }

    #[tokio::test]
    async fn test_unwaited_token_released_on_stage_end() {
        let correlator = Arc::new(OobCorrelator::new(None));
        let mut ctx = EvaluationContext::new();
        ctx.begin_oob_stage(correlator.new_token(), correlator.clone(), CancellationToken::new(), Duration::from_secs(5));
        assert_eq!(correlator.pending_count(), 1);
        assert!(ctx.end_oob_stage().is_none());
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_outside_stage_is_error() {
        let mut ctx = EvaluationContext::new();
        assert!(matches!(ctx.wait_oob(None).await, Err(PocScanError::RuleDefinition(_))));
    }
}
