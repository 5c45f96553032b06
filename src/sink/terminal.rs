use std::time::Duration;
use async_trait::async_trait;
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use crate::errors::PocScanError;
use crate::models::{ScanSummary, ScanVerdict, Severity};
use super::ResultSink;

/// Live progress bar plus one colored line per finding.
pub struct ConsoleSink {
    bar: ProgressBar,
    /// Also print non-vulnerable and error verdicts.
    show_all: bool,
}

impl ConsoleSink {
    pub fn new(show_all: bool) -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("  {bar:30.cyan/dark_gray} {pos}/{len} | {elapsed_precise} | {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓░"),
        );
        bar.enable_steady_tick(Duration::from_millis(200));
        Self { bar, show_all }
    }

    /// Console sink that draws nothing, for non-interactive runs.
    pub fn hidden(show_all: bool) -> Self {
        let sink = Self::new(show_all);
        sink.bar.set_draw_target(ProgressDrawTarget::hidden());
        sink
    }

    fn line(&self, verdict: &ScanVerdict) -> Option<String> {
        if verdict.vulnerable {
            let marker = if verdict.oob_confirmed { " (oob)" } else { "" };
            return Some(format!(
                "  {} [{}] {} {}{}",
                style("[+]").green().bold(),
                severity_label(verdict.severity),
                style(&verdict.rule_id).bold(),
                verdict.target,
                marker,
            ));
        }
        if !self.show_all {
            return None;
        }
        Some(match &verdict.error {
            Some(error) => format!(
                "  {} {} {} {}",
                style("[!]").yellow(),
                verdict.rule_id,
                verdict.target,
                style(error).dim()
            ),
            None => format!("  {} {} {}", style("[-]").dim(), verdict.rule_id, verdict.target),
        })
    }
}

fn severity_label(severity: Severity) -> String {
    let label = severity.as_str();
    match severity {
        Severity::Critical => style(label).red().bold().to_string(),
        Severity::High => style(label).red().to_string(),
        Severity::Medium => style(label).yellow().to_string(),
        Severity::Low => style(label).cyan().to_string(),
        Severity::Info => style(label).dim().to_string(),
    }
}

#[async_trait]
impl ResultSink for ConsoleSink {
    fn set_total(&self, total: usize) {
        self.bar.set_length(total as u64);
    }

    async fn emit(&self, verdict: &ScanVerdict) -> Result<(), PocScanError> {
        if let Some(line) = self.line(verdict) {
            self.bar.println(line);
        }
        self.bar.inc(1);
        self.bar.set_message(format!("{} {}", verdict.rule_id, verdict.target));
        Ok(())
    }

    async fn finish(&self, summary: &ScanSummary) -> Result<(), PocScanError> {
        self.bar.finish_and_clear();
        let vulnerable = if summary.vulnerable > 0 {
            style(summary.vulnerable).red().bold().to_string()
        } else {
            summary.vulnerable.to_string()
        };
        println!(
            "  Scan complete: {} vulnerable | {} not vulnerable | {} errors | {} skipped | {} cancelled",
            vulnerable, summary.not_vulnerable, summary.errors, summary.skipped, summary.cancelled,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::testing::verdict;

    #[test]
    fn test_lines_respect_show_all() {
        let quiet = ConsoleSink::hidden(false);
        assert!(quiet.line(&verdict("a", true)).unwrap().contains("rule-1"));
        assert!(quiet.line(&verdict("b", false)).is_none());

        let loud = ConsoleSink::hidden(true);
        let mut errored = verdict("c", false);
        errored.error = Some("timeout".into());
        assert!(loud.line(&errored).unwrap().contains("timeout"));
        assert!(loud.line(&verdict("d", false)).is_some());
    }

    #[tokio::test]
    async fn test_emit_advances_bar() {
        let sink = ConsoleSink::hidden(false);
        sink.set_total(2);
        sink.emit(&verdict("a", false)).await.unwrap();
        assert_eq!(sink.bar.position(), 1);
    }
}
