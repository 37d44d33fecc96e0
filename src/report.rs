//! Summary tables printed at the end of a run

use std::time::Duration;

use crate::convergence::ConvergenceReport;
use crate::phase::{PhaseReport, PhaseStatus};

/// Format a duration as a short human readable string (e.g., "2m5s", "40s")
pub fn format_elapsed(elapsed: Duration) -> String {
    let total_secs = elapsed.as_secs();
    if total_secs == 0 {
        return format!("{}ms", elapsed.as_millis());
    }

    let minutes = total_secs / 60;
    let seconds = total_secs % 60;
    if minutes > 0 {
        return format!("{}m{}s", minutes, seconds);
    }

    format!("{}s", seconds)
}

/// Render rows as a column-aligned table with headers.
///
/// Trailing padding is trimmed from every line.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let num_cols = headers.len();
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < num_cols {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let line = |cells: Vec<&str>| -> String {
        let padded: Vec<String> = cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let w = widths.get(i).copied().unwrap_or(0);
                format!("{:<width$}", cell, width = w)
            })
            .collect();
        padded.join("  ").trim_end().to_string()
    };

    let mut out = line(headers.to_vec());
    out.push('\n');
    for row in rows {
        out.push_str(&line(row.iter().map(String::as_str).collect()));
        out.push('\n');
    }
    out
}

fn phase_detail(status: &PhaseStatus) -> String {
    match status {
        PhaseStatus::Succeeded(tally) => {
            let mut parts = vec![
                format!("{} applied", tally.applied),
                format!("{} present", tally.already_satisfied),
            ];
            if tally.soft_timeouts > 0 {
                parts.push(format!("{} wait(s) timed out", tally.soft_timeouts));
            }
            parts.join(", ")
        }
        PhaseStatus::Skipped => "precondition satisfied".to_string(),
        PhaseStatus::Warned(reason) | PhaseStatus::Failed(reason) => {
            reason.lines().next().unwrap_or_default().to_string()
        }
    }
}

/// Table of phase outcomes
pub fn phase_table(reports: &[PhaseReport]) -> String {
    let rows: Vec<Vec<String>> = reports
        .iter()
        .map(|r| {
            vec![
                r.name.clone(),
                r.status.label().to_string(),
                format_elapsed(r.elapsed),
                phase_detail(&r.status),
            ]
        })
        .collect();
    render_table(&["PHASE", "STATUS", "ELAPSED", "DETAIL"], &rows)
}

/// Table of per-application convergence
pub fn convergence_table(report: &ConvergenceReport) -> String {
    let rows: Vec<Vec<String>> = report
        .apps
        .iter()
        .map(|app| {
            let (sync, health) = match &app.record {
                Some(r) => (r.sync_status.to_string(), r.health_status.to_string()),
                None => ("-".to_string(), "Missing".to_string()),
            };
            vec![
                app.name.clone(),
                app.namespace.clone(),
                sync,
                health,
                app.iterations.to_string(),
                if app.converged { "yes" } else { "no" }.to_string(),
            ]
        })
        .collect();
    render_table(
        &["APPLICATION", "NAMESPACE", "SYNC", "HEALTH", "CHECKS", "CONVERGED"],
        &rows,
    )
}
