use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use crate::errors::PocScanError;
use crate::http::{RenderedRequest, StepExecutor};
use crate::models::{work_item_key, Evidence, ScanVerdict, Target, TargetParts};
use crate::oob::OobCorrelator;
use crate::rules::expr::{EvalEnv, Value};
use crate::rules::{Chaining, Rule, Stage, Step, VariableSpec};
use super::context::EvaluationContext;
use super::extract::run_extractors;
use super::render::render;

/// Drives one rule against one target. Holds only shared, read-only
/// collaborators, so a single instance serves every worker.
pub struct Interpreter {
    executor: Arc<dyn StepExecutor>,
    correlator: Arc<OobCorrelator>,
    default_oob_timeout: Duration,
}

struct Outcome {
    vulnerable: bool,
    oob_confirmed: bool,
}

impl Interpreter {
    pub fn new(
        executor: Arc<dyn StepExecutor>,
        correlator: Arc<OobCorrelator>,
        default_oob_timeout: Duration,
    ) -> Self {
        Self { executor, correlator, default_oob_timeout }
    }

    /// Evaluate `rule` against `target`. Every failure except cancellation
    /// is folded into the verdict's `error`; `Err(Cancelled)` means the item
    /// was aborted and must not be recorded.
    pub async fn evaluate(
        &self,
        rule: &Rule,
        target: &Target,
        cancel: &CancellationToken,
    ) -> Result<ScanVerdict, PocScanError> {
        let key = work_item_key(target, &rule.id);
        let mut verdict = ScanVerdict::new(&key, target, rule);

        if let Some(defect) = &rule.defect {
            return Ok(verdict.with_error(defect.clone()));
        }

        match self.run(rule, target, cancel, &mut verdict.evidence).await {
            Ok(outcome) => {
                verdict.vulnerable = outcome.vulnerable;
                verdict.oob_confirmed = outcome.oob_confirmed;
            }
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                debug!(rule = %rule.id, target = %target, error = %e, "Evaluation failed");
                verdict = verdict.with_error(e.to_string());
            }
        }
        verdict.completed_at = Utc::now();
        Ok(verdict)
    }

    async fn run(
        &self,
        rule: &Rule,
        target: &Target,
        cancel: &CancellationToken,
        evidence: &mut Vec<Evidence>,
    ) -> Result<Outcome, PocScanError> {
        let parts = target.parts()?;
        let mut ctx = EvaluationContext::for_target(target, &parts);
        resolve_variables(&rule.variables, &mut ctx)?;

        let mut oob_confirmed = false;
        for stage in &rule.stages {
            let (passed, confirmed) = self.run_stage(rule, stage, &parts, &mut ctx, cancel, evidence).await?;
            oob_confirmed |= confirmed;
            debug!(rule = %rule.id, target = %target, stage = %stage.name, passed, "Stage evaluated");

            match (rule.chaining, passed) {
                (Chaining::All, false) => return Ok(Outcome { vulnerable: false, oob_confirmed }),
                (Chaining::Any, true) => return Ok(Outcome { vulnerable: true, oob_confirmed }),
                _ => {}
            }
        }

        Ok(Outcome { vulnerable: rule.chaining == Chaining::All, oob_confirmed })
    }

    /// Returns (condition passed, OOB interaction correlated).
    async fn run_stage(
        &self,
        rule: &Rule,
        stage: &Stage,
        parts: &TargetParts,
        ctx: &mut EvaluationContext,
        cancel: &CancellationToken,
        evidence: &mut Vec<Evidence>,
    ) -> Result<(bool, bool), PocScanError> {
        if stage.oob {
            // Registered before any request that may embed it is sent
            let token = self.correlator.new_token();
            let timeout = rule.oob_timeout.unwrap_or(self.default_oob_timeout);
            ctx.begin_oob_stage(token, self.correlator.clone(), cancel.clone(), timeout);
        }

        let result = self.stage_body(stage, parts, ctx, cancel, evidence).await;

        let interaction = ctx.end_oob_stage();
        let confirmed = interaction.is_some();
        if let Some(interaction) = interaction {
            evidence.push(Evidence {
                stage: stage.name.clone(),
                request: format!("OOB {} callback for token {}", interaction.protocol, interaction.token),
                response: interaction.raw,
                status: 0,
                elapsed_ms: 0,
            });
        }
        Ok((result?, confirmed))
    }

    async fn stage_body(
        &self,
        stage: &Stage,
        parts: &TargetParts,
        ctx: &mut EvaluationContext,
        cancel: &CancellationToken,
        evidence: &mut Vec<Evidence>,
    ) -> Result<bool, PocScanError> {
        for step in &stage.steps {
            if cancel.is_cancelled() {
                return Err(PocScanError::Cancelled(format!("before step in stage '{}'", stage.name)));
            }
            let request = render_request(step, parts, ctx)?;
            let response = self.executor.send(&request).await?;
            evidence.push(Evidence {
                stage: stage.name.clone(),
                request: request.summary(),
                response: response.summary(),
                status: response.status,
                elapsed_ms: response.elapsed_ms(),
            });
            ctx.bind_response(&response);
            run_extractors(&step.extractors, &response, ctx);
        }

        // A bare `oob` reference still needs the wait to have happened
        if stage.oob && !stage.condition.uses_oob() && stage.condition.variables().contains("oob") {
            ctx.wait_oob(None).await?;
        }

        stage.condition.evaluate_bool(ctx).await
    }
}

/// Resolve rule variables once per work item, in declaration order.
pub fn resolve_variables(
    variables: &[(String, VariableSpec)],
    ctx: &mut EvaluationContext,
) -> Result<(), PocScanError> {
    let mut rng = rand::thread_rng();
    for (name, spec) in variables {
        let value = match spec {
            VariableSpec::RandStr(n) => {
                Value::Str((0..*n).map(|_| rng.sample(Alphanumeric) as char).collect())
            }
            VariableSpec::RandLower(n) => {
                Value::Str((0..*n).map(|_| rng.gen_range(b'a'..=b'z') as char).collect())
            }
            VariableSpec::RandInt(lo, hi) => Value::from(rng.gen_range(*lo..=*hi)),
            VariableSpec::Template(template) => Value::Str(render(template, ctx)?),
        };
        ctx.set(name, value);
    }
    Ok(())
}

/// Render a step into a concrete request. Relative paths are appended to
/// the target's base URL; absolute `http(s)://` paths are used as-is.
pub fn render_request(
    step: &Step,
    parts: &TargetParts,
    ctx: &EvaluationContext,
) -> Result<RenderedRequest, PocScanError> {
    let path = render(&step.path, ctx)?;
    let lower = path.to_ascii_lowercase();
    let url = if lower.starts_with("http://") || lower.starts_with("https://") {
        path
    } else if path.is_empty() || path.starts_with('/') || path.starts_with('?') {
        format!("{}{}", parts.base_url, if path.is_empty() { "/" } else { path.as_str() })
    } else {
        format!("{}/{}", parts.base_url, path)
    };

    let mut headers = Vec::with_capacity(step.headers.len());
    for (name, value) in &step.headers {
        headers.push((name.clone(), render(value, ctx)?));
    }

    Ok(RenderedRequest {
        method: step.method.clone(),
        url,
        headers,
        body: render(&step.body, ctx)?,
        follow_redirects: step.follow_redirects,
    })
}
