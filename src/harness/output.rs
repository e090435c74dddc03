//! Output layer: renders a RunSummary (or the check list) as text or json.

use std::io::{self, Write};

use crate::harness::registry::Check;
use crate::harness::report::{DiagnosticRecord, RunSummary};
use crate::utils::{HarnessError, Outcome, Result};

pub fn display(summary: &RunSummary, format: &str, verbose: bool) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match format {
        "json" => display_json(summary, &mut out),
        "text" => display_text(summary, verbose, &mut out).map_err(HarnessError::from),
        other => Err(HarnessError::Configuration(format!("unknown output format: {}", other))),
    }
}

// ── JSON ────────────────────────────────────────────────────────────────────

fn display_json(summary: &RunSummary, out: &mut dyn Write) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)
        .map_err(|e| HarnessError::Configuration(format!("JSON serialize: {}", e)))?;
    writeln!(out, "{}", json)?;
    Ok(())
}

// ── Text ────────────────────────────────────────────────────────────────────

pub fn display_text(summary: &RunSummary, verbose: bool, out: &mut dyn Write) -> io::Result<()> {
    print_section(out, "DIAGNOSTICS")?;
    writeln!(out, "  Started at   : {}", summary.started_at)?;

    let mut current_category = "";
    for rec in &summary.records {
        if rec.category != current_category {
            current_category = rec.category.as_str();
            writeln!(out, "\n━━━ {} ━━━", current_category.to_uppercase())?;
        }
        display_record(out, rec, verbose)?;
    }

    print_section(out, "SUMMARY")?;
    let c = &summary.counts;
    let tallies: Vec<String> = [Outcome::Passed, Outcome::Failed, Outcome::Errored, Outcome::Skipped]
        .iter()
        .map(|o| format!("{} {}", c.get(*o), o.to_string().to_lowercase()))
        .collect();
    writeln!(
        out,
        "  {}  ({} total, {:.1}s)",
        tallies.join("  "),
        c.total(),
        summary.duration_ms as f64 / 1000.0
    )?;

    if summary.passed() {
        writeln!(out, "\n✓ Deployment looks healthy.")?;
    } else {
        writeln!(out, "\nFailed checks:")?;
        for rec in summary.failures() {
            writeln!(out, "  ✗ {}: {}", rec.check, first_line(&rec.message))?;
            if let Some(fix) = &rec.remediation {
                writeln!(out, "      fix: {}", fix.replace('\n', "\n           "))?;
            }
        }
    }
    Ok(())
}

fn display_record(out: &mut dyn Write, rec: &DiagnosticRecord, verbose: bool) -> io::Result<()> {
    let time = format!("{:.1}s", rec.duration_ms as f64 / 1000.0);
    match rec.outcome {
        Outcome::Passed => {
            writeln!(out, "  ✓ {} ({})", rec.check, time)?;
        }
        Outcome::Skipped => {
            writeln!(out, "  - {} (skipped: {})", rec.check, rec.message)?;
        }
        Outcome::Failed | Outcome::Errored => {
            writeln!(out, "  ✗ {} ({}) - {}", rec.check, time, rec.outcome)?;
            let message = if verbose { rec.message.clone() } else { truncate(&rec.message, 200) };
            writeln!(out, "      error: {}", message)?;
            if let (Some(expected), Some(actual)) = (&rec.expected, &rec.actual) {
                writeln!(out, "      expected: {}", expected)?;
                writeln!(out, "      actual:   {}", actual)?;
            }
            if let Some(fix) = &rec.remediation {
                writeln!(out, "      fix: {}", fix.replace('\n', "\n           "))?;
            }
        }
    }
    Ok(())
}

/// `list` subcommand: checks grouped by category.
pub fn display_checks(checks: &[Check], out: &mut dyn Write) -> io::Result<()> {
    let mut current_category = "";
    for check in checks {
        if check.category() != current_category {
            if !current_category.is_empty() {
                writeln!(out)?;
            }
            current_category = check.category();
            writeln!(out, "{}:", current_category.to_uppercase())?;
        }
        let gate = if check.is_precondition() { "  [precondition]" } else { "" };
        writeln!(out, "  • {}  ({}){}", check.name(), check.scope(), gate)?;
        writeln!(out, "    {}", check.description())?;
    }
    writeln!(out, "\nTotal: {} checks", checks.len())
}

// ── formatting helpers ──────────────────────────────────────────────────────

fn print_section(out: &mut dyn Write, title: &str) -> io::Result<()> {
    writeln!(out, "\n{}", "─".repeat(60))?;
    writeln!(out, "  {}", title)?;
    writeln!(out, "{}", "─".repeat(60))
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or(s)
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::report::Reporter;
    use crate::utils::CheckError;
    use std::time::Duration;

    fn summary() -> RunSummary {
        let mut r = Reporter::new();
        r.push(DiagnosticRecord::passed("all_files", "layout", Duration::from_millis(30)));
        let err = CheckError::assertion("carrier id is undefined").with_remediation("nano /home/agrodroid/app/ids/carrier_id");
        r.push(DiagnosticRecord::from_error("aarch64_carrier_id", "identity", &err, Duration::from_millis(2)));
        r.push(DiagnosticRecord::skipped("aarch64_dbw_box", "hardware", "applies to aarch64 only, running on x86_64"));
        r.summarize()
    }

    fn render(summary: &RunSummary) -> String {
        let mut buf = Vec::new();
        display_text(summary, false, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn text_lists_every_check_with_hints() {
        let text = render(&summary());
        assert!(text.contains("✓ all_files"));
        assert!(text.contains("✗ aarch64_carrier_id"));
        assert!(text.contains("fix: nano /home/agrodroid/app/ids/carrier_id"));
        assert!(text.contains("- aarch64_dbw_box (skipped: applies to aarch64 only"));
        assert!(text.contains("1 passed  1 failed  0 errored  1 skipped"));
        assert!(text.contains("Failed checks:"));
    }

    #[test]
    fn healthy_run_says_so() {
        let mut r = Reporter::new();
        r.push(DiagnosticRecord::passed("all_files", "layout", Duration::ZERO));
        let text = render(&r.summarize());
        assert!(text.contains("Deployment looks healthy"));
        assert!(!text.contains("Failed checks"));
    }

    #[test]
    fn json_is_machine_readable() {
        let mut buf = Vec::new();
        display_json(&summary(), &mut buf).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(v["status"], "fail");
        assert_eq!(v["counts"]["failed"], 1);
        assert_eq!(v["records"][1]["outcome"], "failed");
        assert_eq!(v["records"][1]["remediation"], "nano /home/agrodroid/app/ids/carrier_id");
    }

    #[test]
    fn unknown_format_is_rejected() {
        assert!(matches!(display(&summary(), "xml", false), Err(HarnessError::Configuration(_))));
    }

    #[test]
    fn truncate_counts_chars() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééééééééé", 6), "ééé...");
    }
}
