//! Operator-facing summary of a reconciliation run

use std::fmt::Write;

use colored::Colorize;

use crate::errors::ReconcileError;
use crate::models::result::{FinalStatus, PatchOutcome, ReconciliationResult, ServiceAction};

/// Human readable summary printed to stdout
pub fn render_summary(result: &ReconciliationResult, host: &str) -> String {
    let mut out = String::new();

    let status = match result.final_status {
        FinalStatus::Stable => "STABLE".bold().green(),
        FinalStatus::TimedOut => "TIMED OUT".bold().yellow(),
        FinalStatus::Failed => "FAILED".bold().red(),
    };
    let action = match result.service_action {
        ServiceAction::Created => "created",
        ServiceAction::Updated => "updated",
    };

    let _ = writeln!(out, "{} {}", "Deployment".bold().cyan(), status);
    let _ = writeln!(out, "  {:<16}{}", "service", result.service_name.bold());
    let _ = writeln!(out, "  {:<16}{}", "cluster", result.cluster_name);
    let _ = writeln!(out, "  {:<16}{} ({})", "task definition", result.task_definition, action);
    let _ = writeln!(
        out,
        "  {:<16}{}/{}",
        "tasks running", result.running_count, result.desired_count
    );
    let _ = writeln!(out, "  {:<16}{}", "log ingress", describe_patch(&result.network_patch));
    if let Some(reason) = &result.failure_reason {
        let _ = writeln!(out, "  {:<16}{}", "reason", reason.red());
    }
    let elapsed = result.finished_at - result.started_at;
    let _ = writeln!(
        out,
        "  {:<16}{}s on {}",
        "elapsed",
        elapsed.num_seconds(),
        host
    );
    let _ = writeln!(out, "  {:<16}{}", "run", result.run_id.dimmed());

    let _ = writeln!(out, "{}", "Progress".bold().cyan());
    for (i, entry) in result.trail.iter().enumerate() {
        let _ = writeln!(
            out,
            "  {} {} {}",
            format!("[{}]", i + 1).bold().yellow(),
            entry.at.format("%H:%M:%S"),
            entry.message
        );
    }

    if result.final_status == FinalStatus::TimedOut {
        let _ = writeln!(
            out,
            "{}: the rollout is still in progress and may complete without this run",
            "Note".bold()
        );
    }
    out
}

/// One-line error report printed to stderr
pub fn render_failure(err: &ReconcileError) -> String {
    format!(
        "{} {} (exit {})",
        "Deployment aborted:".bold().red(),
        err,
        err.exit_code()
    )
}

fn describe_patch(outcome: &PatchOutcome) -> String {
    match outcome {
        PatchOutcome::Authorized => "authorized".green().to_string(),
        PatchOutcome::AlreadyPresent => "already present".to_string(),
        PatchOutcome::Skipped(reason) => format!("skipped ({})", reason),
        PatchOutcome::Degraded(reason) => format!("{} ({})", "degraded".yellow(), reason),
    }
}
