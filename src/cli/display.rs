//! Display formatting for CLI output
//!
//! SBIO pattern: Pure functions that format data for display

use serde_json::Value;

use super::commands::{AwaitOutcome, AwaitReport};
use crate::kinds::{Operation, ResourceKind};
use crate::patch::{ChangeKind, FieldRule, PatchPlan, PlanError};

const MAX_CELL_WIDTH: usize = 48;

// ============================================================================
// Table formatting helpers
// ============================================================================

/// Format rows under upper-cased headers, columns padded to the widest cell
pub fn format_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let render = |cells: Vec<String>| -> String {
        let line = cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:width$}", cell, width = *width))
            .collect::<Vec<_>>()
            .join("   ");
        format!("{}\n", line.trim_end())
    };

    let mut output = render(headers.iter().map(|h| h.to_uppercase()).collect());
    for row in rows {
        output.push_str(&render(row.clone()));
    }
    output
}

/// Compact one-line rendering of a JSON value, shortened to fit a table cell
fn cell(value: Option<&Value>) -> String {
    let text = match value {
        None => "-".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    if text.chars().count() > MAX_CELL_WIDTH {
        let cut: String = text.chars().take(MAX_CELL_WIDTH - 3).collect();
        format!("{}...", cut)
    } else {
        text
    }
}

// ============================================================================
// Plan output
// ============================================================================

pub fn format_plan(plan: &PatchPlan) -> String {
    if plan.is_empty() {
        return "No changes. Observed state matches the desired configuration.\n".to_string();
    }

    let rows: Vec<Vec<String>> = plan
        .changes
        .iter()
        .map(|c| {
            let marker = match c.kind {
                ChangeKind::Modified => "~",
                ChangeKind::Added => "+",
                ChangeKind::Removed => "-",
            };
            vec![
                marker.to_string(),
                c.path.to_string(),
                cell(c.old.as_ref()),
                cell(c.new.as_ref()),
            ]
        })
        .collect();

    let mut output = format_table(&["", "field", "current", "desired"], &rows);
    output.push('\n');
    output.push_str(&format!("Touched fields: {}\n", plan.touched_fields.join(", ")));
    output.push_str(&format!("Update mask:    {}\n", plan.update_mask.join(",")));
    output.push_str(&format!("Fingerprint:    {}\n", plan.fingerprint));
    output.push_str(&format!(
        "Payload:\n{}\n",
        serde_json::to_string_pretty(&plan.payload).unwrap_or_default()
    ));
    output
}

pub fn format_violations(err: &PlanError) -> String {
    let mut output = format!(
        "Update rejected: {} violation(s)\n",
        err.violations.len()
    );
    for (i, violation) in err.violations.iter().enumerate() {
        output.push_str(&format!("  {}. {}\n", i + 1, violation));
    }
    output
}

// ============================================================================
// Await output
// ============================================================================

pub fn format_await_reports(reports: &[AwaitReport]) -> String {
    let rows: Vec<Vec<String>> = reports
        .iter()
        .map(|r| {
            let outcome = match r.outcome {
                AwaitOutcome::Converged => "converged",
                AwaitOutcome::Timeout => "timeout",
                AwaitOutcome::Failed => "failed",
                AwaitOutcome::Cancelled => "cancelled",
            };
            vec![
                r.url.clone(),
                outcome.to_string(),
                r.state.clone().unwrap_or_else(|| "-".to_string()),
                r.polls.map_or_else(|| "-".to_string(), |p| p.to_string()),
                r.elapsed_ms
                    .map_or_else(|| "-".to_string(), |ms| format!("{:.1}s", ms as f64 / 1000.0)),
            ]
        })
        .collect();

    let mut output = format_table(&["url", "outcome", "state", "polls", "elapsed"], &rows);
    for report in reports.iter().filter(|r| r.outcome != AwaitOutcome::Converged) {
        if let Some(ref detail) = report.detail {
            output.push_str(&format!("{}: {}\n", report.url, detail));
        }
    }
    output
}

// ============================================================================
// Catalog output
// ============================================================================

/// States per kind and operation
pub fn format_kinds() -> String {
    let mut rows = Vec::new();
    for kind in ResourceKind::ALL {
        for operation in [Operation::Create, Operation::Update, Operation::Delete] {
            let states = kind.states(operation);
            rows.push(vec![
                kind.to_string(),
                operation.to_string(),
                states.pending.join(","),
                states.target.join(","),
            ]);
        }
    }
    format_table(&["kind", "operation", "pending", "target"], &rows)
}

/// Field rules, collections and defaults for one kind
pub fn format_kind_rules(kind: ResourceKind) -> String {
    let rules = kind.field_rules();
    let mut rows: Vec<Vec<String>> = rules
        .rules()
        .map(|(path, rule)| {
            let rule = match rule {
                FieldRule::Mutable => "mutable".to_string(),
                FieldRule::Immutable => "immutable".to_string(),
                FieldRule::MutuallyExclusive(group) => format!("exclusive ({})", group),
            };
            vec![path.to_string(), rule]
        })
        .collect();
    rows.extend(rules.collections().map(|(path, c)| {
        vec![
            path.to_string(),
            format!("collection by '{}' ({:?})", c.key, c.cardinality).to_lowercase(),
        ]
    }));
    rows.extend(
        rules
            .defaults()
            .map(|(path, value)| vec![path.to_string(), format!("default {}", value)]),
    );
    rows.sort();

    let mut output = format!("Field rules for {} (unlisted fields are mutable)\n\n", kind);
    output.push_str(&format_table(&["field", "rule"], &rows));
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{plan, FieldRuleTable};
    use serde_json::json;

    #[test]
    fn test_format_table_alignment() {
        let rows = vec![
            vec!["cluster".to_string(), "ACTIVE".to_string()],
            vec!["node-group".to_string(), "CREATING".to_string()],
        ];
        let output = format_table(&["kind", "state"], &rows);
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], "KIND         STATE");
        assert_eq!(lines[1], "cluster      ACTIVE");
        assert_eq!(lines[2], "node-group   CREATING");
    }

    #[test]
    fn test_format_empty_plan() {
        let plan = plan(&json!({"a": 1}), &json!({"a": 1}), &FieldRuleTable::new()).unwrap();
        assert!(format_plan(&plan).starts_with("No changes"));
    }

    #[test]
    fn test_format_plan_lists_changes() {
        let plan = plan(
            &json!({"labels": {"env": "prod"}, "size": 3}),
            &json!({"labels": {"env": "dev"}, "size": 3}),
            &FieldRuleTable::new(),
        )
        .unwrap();
        let output = format_plan(&plan);
        assert!(output.contains("labels.env"));
        assert!(output.contains("dev"));
        assert!(output.contains(&plan.fingerprint));
    }

    #[test]
    fn test_format_violations_numbers_each() {
        let rules = FieldRuleTable::new().immutable("region").immutable("name");
        let err = plan(
            &json!({"region": "b", "name": "y"}),
            &json!({"region": "a", "name": "x"}),
            &rules,
        )
        .unwrap_err();
        let output = format_violations(&err);
        assert!(output.starts_with("Update rejected: 2 violation(s)"));
        assert!(output.contains("  1. "));
        assert!(output.contains("  2. "));
    }

    #[test]
    fn test_cell_truncates_long_values() {
        let long = Value::String("x".repeat(100));
        let text = cell(Some(&long));
        assert_eq!(text.chars().count(), MAX_CELL_WIDTH);
        assert!(text.ends_with("..."));
        assert_eq!(cell(None), "-");
    }

    #[test]
    fn test_format_kinds_covers_catalog() {
        let output = format_kinds();
        assert_eq!(output.lines().count(), 1 + ResourceKind::ALL.len() * 3);
        assert!(output.contains("private-endpoint"));
    }

    #[test]
    fn test_format_kind_rules() {
        let output = format_kind_rules(ResourceKind::Cluster);
        assert!(output.contains("region"));
        assert!(output.contains("exclusive (sizing)"));
        assert!(output.contains("collection by 'zone' (fixed)"));
        assert!(output.contains("default false"));
    }
}
