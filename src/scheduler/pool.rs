use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use crate::errors::PocScanError;
use crate::interpreter::Interpreter;
use crate::models::{ScanSummary, ScanVerdict, Target, WorkItem};
use crate::progress::ProgressStore;
use crate::rules::Rule;
use crate::sink::ResultSink;

/// Lazy target-major cross product: every rule against the first target
/// before the second target begins.
pub fn work_items<'a>(
    targets: &'a [Target],
    rules: &'a [Arc<Rule>],
) -> impl Iterator<Item = WorkItem> + 'a {
    targets
        .iter()
        .flat_map(move |target| rules.iter().map(move |rule| WorkItem::new(target.clone(), rule.clone())))
}

enum WorkerOutcome {
    Recorded(ScanVerdict),
    Cancelled,
    Fatal(PocScanError),
}

/// Bounded worker pool over (target, rule) work items.
pub struct Scheduler {
    interpreter: Arc<Interpreter>,
    progress: Arc<ProgressStore>,
    concurrency: usize,
    cancel_token: CancellationToken,
}

impl Scheduler {
    pub fn new(interpreter: Arc<Interpreter>, progress: Arc<ProgressStore>, concurrency: usize) -> Self {
        Self {
            interpreter,
            progress,
            concurrency: concurrency.max(1),
            cancel_token: CancellationToken::new(),
        }
    }

    /// Share an external cancel token (e.g. one triggered by Ctrl-C).
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Evaluate every pending work item and forward verdicts to `sink`.
    /// Items already in the progress store are skipped without network
    /// access. A progress-store failure cancels the pool and is returned
    /// once in-flight workers have drained.
    pub async fn run(
        &self,
        targets: &[Target],
        rules: &[Arc<Rule>],
        sink: Arc<dyn ResultSink>,
    ) -> Result<ScanSummary, PocScanError> {
        if targets.is_empty() {
            return Err(PocScanError::InvalidTarget("no targets to scan".into()));
        }
        if rules.is_empty() {
            return Err(PocScanError::Config("no rules to run".into()));
        }

        let mut summary = ScanSummary { total: targets.len() * rules.len(), ..Default::default() };
        let pending = work_items(targets, rules).filter(|item| !self.progress.is_done(&item.key)).count();
        sink.set_total(pending);
        info!(
            targets = targets.len(),
            rules = rules.len(),
            pending,
            concurrency = self.concurrency,
            resume_id = self.progress.resume_id(),
            "Scan started"
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut workers: JoinSet<WorkerOutcome> = JoinSet::new();
        let mut fatal: Option<PocScanError> = None;

        for item in work_items(targets, rules) {
            if self.cancel_token.is_cancelled() {
                break;
            }
            if self.progress.is_done(&item.key) {
                summary.skipped += 1;
                debug!(key = %item.key, rule = %item.rule.id, target = %item.target, "Skipping completed item");
                continue;
            }

            let permit = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => permit
                    .map_err(|_| PocScanError::Internal("worker semaphore closed".into()))?,
            };

            while let Some(joined) = workers.try_join_next() {
                self.collect(joined, &mut summary, &mut fatal);
            }

            let interpreter = self.interpreter.clone();
            let progress = self.progress.clone();
            let sink = sink.clone();
            let cancel = self.cancel_token.clone();
            workers.spawn(async move {
                let _permit = permit;
                run_item(item, &interpreter, &progress, sink.as_ref(), &cancel).await
            });
        }

        while let Some(joined) = workers.join_next().await {
            self.collect(joined, &mut summary, &mut fatal);
        }

        if let Err(e) = self.progress.flush().await {
            fatal.get_or_insert(e);
        }
        summary.cancelled = summary.total - summary.skipped - summary.evaluated();

        if let Some(e) = fatal {
            error!(error = %e, "Scan aborted");
            return Err(e);
        }

        if let Err(e) = sink.finish(&summary).await {
            warn!(error = %e, "Result sink failed to finish");
        }
        info!(
            total = summary.total,
            skipped = summary.skipped,
            vulnerable = summary.vulnerable,
            not_vulnerable = summary.not_vulnerable,
            errors = summary.errors,
            cancelled = summary.cancelled,
            "Scan finished"
        );
        Ok(summary)
    }

    fn collect(
        &self,
        joined: Result<WorkerOutcome, tokio::task::JoinError>,
        summary: &mut ScanSummary,
        fatal: &mut Option<PocScanError>,
    ) {
        match joined {
            Ok(WorkerOutcome::Recorded(verdict)) => summary.record(&verdict),
            Ok(WorkerOutcome::Cancelled) => {}
            Ok(WorkerOutcome::Fatal(e)) => {
                if fatal.is_none() {
                    error!(error = %e, "Fatal error, stopping scan");
                    self.cancel_token.cancel();
                    *fatal = Some(e);
                }
            }
            Err(e) => warn!(error = %e, "Worker task failed"),
        }
    }
}

async fn run_item(
    item: WorkItem,
    interpreter: &Interpreter,
    progress: &ProgressStore,
    sink: &dyn ResultSink,
    cancel: &CancellationToken,
) -> WorkerOutcome {
    let evaluation = AssertUnwindSafe(interpreter.evaluate(&item.rule, &item.target, cancel))
        .catch_unwind()
        .await;

    let verdict = match evaluation {
        Ok(Ok(verdict)) => verdict,
        Ok(Err(e)) if e.is_cancelled() => {
            debug!(key = %item.key, "Work item aborted by cancellation");
            return WorkerOutcome::Cancelled;
        }
        Ok(Err(e)) => ScanVerdict::new(&item.key, &item.target, &item.rule).with_error(e.to_string()),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(rule = %item.rule.id, target = %item.target, panic = %message, "Rule evaluation panicked");
            ScanVerdict::new(&item.key, &item.target, &item.rule)
                .with_error(format!("evaluation panicked: {}", message))
        }
    };

    // Durable before delivery: a crash after this point never loses the item
    if let Err(e) = progress.mark_done(&item.key).await {
        return WorkerOutcome::Fatal(e);
    }
    if let Err(e) = sink.emit(&verdict).await {
        warn!(key = %item.key, error = %e, "Result sink rejected verdict");
    }
    if verdict.vulnerable {
        info!(rule = %item.rule.id, target = %item.target, severity = %item.rule.severity, "Vulnerable");
    }
    WorkerOutcome::Recorded(verdict)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
