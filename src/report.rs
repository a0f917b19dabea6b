//! Report rendering: self-contained HTML artifact plus a JSON dump of the
//! diagnosis/fix/verification triple.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use tracing::info;

use crate::checker::DiagnosisSnapshot;
use crate::models::{IssueKind, RepairOutcome};
use crate::verify::VerificationResult;

const STYLE: &str = "body { font-family: Arial, sans-serif; margin: 20px; }
h1 { color: #333; }
h2 { color: #666; margin-top: 30px; }
.critical { color: #dc3545; }
.high { color: #fd7e14; }
.medium { color: #ffc107; }
.low { color: #6c757d; }
.success { color: #28a745; }
table { border-collapse: collapse; width: 100%; margin-bottom: 20px; }
th, td { border: 1px solid #ddd; padding: 8px; text-align: left; }
th { background-color: #f2f2f2; }
tr:nth-child(even) { background-color: #f9f9f9; }
.summary { background-color: #e9ecef; padding: 15px; border-radius: 5px; margin-bottom: 20px; }";

/// Render the full repair cycle as a standalone HTML document.
pub fn render_html(
    diagnosis: &DiagnosisSnapshot,
    fixes: &RepairOutcome,
    verification: &VerificationResult,
) -> String {
    let mut html = String::new();
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html>\n<head>\n<title>Trading System Repair Report</title>\n\
         <style>{STYLE}</style>\n</head>\n<body>\n\
         <h1>Trading System Repair Report</h1>\n\
         <p>Generated: {}</p>\n<p>Run: {}</p>\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S"),
        diagnosis.run_id,
    );

    let _ = write!(
        html,
        "<div class=\"summary\">\n<h2>Summary</h2>\n\
         <p>Issues Found: {}</p>\n<p>Fixes Applied: {}</p>\n\
         <p>Issues Remaining: {}</p>\n<p>Successfully Fixed: {}</p>\n</div>\n",
        diagnosis.issues.len(),
        fixes.fixes.len(),
        verification.issues_remaining.len(),
        verification.fixed_successfully.len(),
    );

    html.push_str("<h2>Issues Found</h2>\n<table>\n<tr><th>Severity</th><th>Kind</th><th>Description</th></tr>\n");
    for issue in &diagnosis.issues {
        let _ = write!(
            html,
            "<tr><td class=\"{}\">{}</td><td>{}</td><td>{}</td></tr>\n",
            issue.severity.as_str().to_ascii_lowercase(),
            issue.severity.as_str(),
            issue.kind.as_str(),
            escape(&issue.description),
        );
    }
    html.push_str("</table>\n");

    html.push_str("<h2>Fixes Applied</h2>\n<table>\n<tr><th>Kind</th><th>Rows Updated</th><th>Force Favorable</th></tr>\n");
    for fix in &fixes.fixes {
        let _ = write!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            fix.kind.as_str(),
            fix.rows_updated,
            fix.force_favorable,
        );
    }
    html.push_str("</table>\n");

    let _ = write!(
        html,
        "<h2>Verification Results</h2>\n<table>\n<tr><th>Category</th><th>Kinds</th></tr>\n\
         <tr><td class=\"success\">Fixed Successfully</td><td>{}</td></tr>\n\
         <tr><td class=\"critical\">Issues Remaining</td><td>{}</td></tr>\n\
         <tr><td class=\"high\">Regressions</td><td>{}</td></tr>\n</table>\n",
        kind_list(&verification.fixed_successfully),
        kind_list(&verification.issues_remaining),
        kind_list(&verification.failed_fixes),
    );

    let _ = write!(
        html,
        "<h2>Wallet Status</h2>\n<table>\n<tr><th>Metric</th><th>Value</th></tr>\n\
         <tr><td>Total Users</td><td>{}</td></tr>\n\
         <tr><td>Negative Balances</td><td>{}</td></tr>\n\
         <tr><td>Frozen Exceeds Available</td><td>{}</td></tr>\n</table>\n\
         </body>\n</html>\n",
        diagnosis.wallets.total_users,
        diagnosis.wallets.negative.len(),
        diagnosis.wallets.over_frozen.len(),
    );

    html
}

/// Write the HTML report to a timestamped file in the working directory.
pub fn write_html_report(
    diagnosis: &DiagnosisSnapshot,
    fixes: &RepairOutcome,
    verification: &VerificationResult,
) -> Result<PathBuf> {
    let path = PathBuf::from(format!(
        "trading_repair_report_{}.html",
        Utc::now().format("%Y%m%d_%H%M%S")
    ));
    fs::write(&path, render_html(diagnosis, fixes, verification))
        .with_context(|| format!("write report: {}", path.display()))?;
    info!(report = %path.display(), "html report written");
    Ok(path)
}

/// Dump a diagnosis snapshot as pretty JSON, for `diagnose --report`.
pub fn write_diagnosis_json(diagnosis: &DiagnosisSnapshot) -> Result<PathBuf> {
    let path = PathBuf::from(format!(
        "diagnosis_report_{}.json",
        Utc::now().format("%Y%m%d_%H%M%S")
    ));
    let json = serde_json::to_string_pretty(diagnosis).context("serialize diagnosis")?;
    fs::write(&path, json).with_context(|| format!("write diagnosis json: {}", path.display()))?;
    info!(report = %path.display(), "diagnosis json written");
    Ok(path)
}

fn kind_list(kinds: &[IssueKind]) -> String {
    if kinds.is_empty() {
        return "None".to_string();
    }
    kinds
        .iter()
        .map(|kind| kind.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_list_handles_empty() {
        assert_eq!(kind_list(&[]), "None");
        assert_eq!(
            kind_list(&[IssueKind::StaleOrders, IssueKind::NegativeBalance]),
            "STALE_ORDERS, NEGATIVE_BALANCE"
        );
    }

    #[test]
    fn escape_neutralizes_markup() {
        assert_eq!(escape("a < b & c > d"), "a &lt; b &amp; c &gt; d");
    }
}
