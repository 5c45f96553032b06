use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use crate::cli::commands::ScanArgs;
use crate::config::{self, EngineConfig};
use crate::errors::PocScanError;
use crate::http::HttpStepExecutor;
use crate::interpreter::Interpreter;
use crate::models::{dedup_targets, Severity, Target};
use crate::oob::{start_backend, OobCorrelator};
use crate::progress::ProgressStore;
use crate::rules::{load_bundled, load_rules, RuleFilter};
use crate::scheduler::Scheduler;
use crate::sink::{ConsoleSink, FanoutSink, JsonLinesSink, ResultSink};

pub async fn handle_scan(args: ScanArgs, quiet: bool) -> Result<(), PocScanError> {
    let file_config = match &args.config {
        Some(path) => Some(config::parse_config(path).await?),
        None => None,
    };
    let engine = build_engine_config(&args, file_config)?;

    let targets = assemble_targets(&args.targets, args.target_file.as_deref()).await?;
    let mut rule_set = load_rules(&args.rules)?;
    if args.builtin {
        rule_set.merge(load_bundled());
    }
    rule_set.retain(&build_filter(&args)?);
    if rule_set.is_empty() {
        return Err(PocScanError::Config("no rules to run after filtering".into()));
    }

    let resume_id = args
        .resume
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
    let progress = Arc::new(ProgressStore::load(&engine.resume_dir, &resume_id).await?);
    info!(resume_id = %resume_id, "Pass --resume {} to continue this scan if interrupted", resume_id);

    let correlator = Arc::new(OobCorrelator::new(engine.oob.domain.clone()));
    let backend_cancel = CancellationToken::new();
    let backend_task = if rule_set.rules.iter().any(|r| r.uses_oob()) {
        start_backend(&engine.oob, correlator.clone(), backend_cancel.clone()).await?
    } else {
        None
    };

    let executor = Arc::new(HttpStepExecutor::new(&engine.http)?);
    let interpreter = Arc::new(Interpreter::new(executor, correlator, engine.oob.timeout()));

    let cancel = CancellationToken::new();
    let scheduler = Scheduler::new(interpreter, progress, engine.concurrency).with_cancel_token(cancel.clone());
    let sink = build_sink(&args, quiet).await?;

    let signal_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; finishing in-flight steps");
                cancel.cancel();
            }
        })
    };

    let result = scheduler.run(&targets, &rule_set.rules, sink).await;

    signal_task.abort();
    backend_cancel.cancel();
    if let Some(task) = backend_task {
        let _ = task.await;
    }

    let summary = result?;
    if cancel.is_cancelled() && summary.cancelled > 0 {
        return Err(PocScanError::Cancelled(format!(
            "{} work items not evaluated; resume with --resume {}",
            summary.cancelled, resume_id
        )));
    }
    Ok(())
}

/// File configuration (or defaults) with command-line overrides applied.
pub fn build_engine_config(args: &ScanArgs, file_config: Option<EngineConfig>) -> Result<EngineConfig, PocScanError> {
    let mut engine = file_config.unwrap_or_default();
    if let Some(n) = args.concurrency {
        engine.concurrency = n;
    }
    if let Some(proxy) = &args.proxy {
        engine.http.proxy = Some(proxy.clone());
    }
    if let Some(secs) = args.timeout {
        engine.http.timeout_secs = secs;
    }
    if let Some(retries) = args.retries {
        engine.http.retries = retries;
    }
    if let Some(secs) = args.oob_timeout {
        engine.oob.timeout_secs = secs;
    }
    if let Some(dir) = &args.resume_dir {
        engine.resume_dir = dir.clone();
    }
    config::validate_conflicts(&engine)?;
    Ok(engine)
}

/// Merge `-t` targets and the target file, deduplicated in first-seen
/// order. Blank lines and `#` comments in the file are ignored.
pub async fn assemble_targets(direct: &[String], file: Option<&Path>) -> Result<Vec<Target>, PocScanError> {
    let mut raw: Vec<String> = direct.to_vec();
    if let Some(path) = file {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            PocScanError::InvalidTarget(format!("cannot read target file {}: {}", path.display(), e))
        })?;
        raw.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string),
        );
    }

    let targets = dedup_targets(raw);
    if targets.is_empty() {
        return Err(PocScanError::InvalidTarget("no targets given (use -t or -T)".into()));
    }
    Ok(targets)
}

fn build_filter(args: &ScanArgs) -> Result<RuleFilter, PocScanError> {
    let severities = match &args.severity {
        Some(list) => Some(
            list.split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.parse::<Severity>().map_err(PocScanError::Config))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        None => None,
    };
    Ok(RuleFilter { severities, id_contains: args.rule_id.clone() })
}

async fn build_sink(args: &ScanArgs, quiet: bool) -> Result<Arc<dyn ResultSink>, PocScanError> {
    let console: Arc<dyn ResultSink> = if quiet {
        Arc::new(ConsoleSink::hidden(args.show_all))
    } else {
        Arc::new(ConsoleSink::new(args.show_all))
    };
    match &args.output {
        Some(path) => {
            let file: Arc<dyn ResultSink> = Arc::new(JsonLinesSink::create(path).await?);
            Ok(Arc::new(FanoutSink::new(vec![console, file])))
        }
        None => Ok(console),
    }
}
