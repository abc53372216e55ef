//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! change sets, run reports, and state to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::engine::{ApplyReport, Outcome};
use crate::graph::DependencyGraph;
use crate::planner::{Action, ChangeEntry, ChangeSet};
use crate::state::{JournalEntry, StateSnapshot};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Change entry row for table display.
#[derive(Tabled)]
struct ChangeRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Changes")]
    changes: String,
}

/// Resource record row for table display.
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Remote ID")]
    remote_id: String,
    #[tabled(rename = "Version")]
    version: u64,
    #[tabled(rename = "Updated")]
    updated: String,
}

/// Journal entry row for table display.
#[derive(Tabled)]
struct JournalRow {
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Operation")]
    operation: String,
    #[tabled(rename = "Version")]
    version: u64,
    #[tabled(rename = "Result")]
    result: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a change set for display.
    #[must_use]
    pub fn format_plan(&self, changeset: &ChangeSet, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(changeset).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(changeset, detailed),
        }
    }

    /// Formats a change set as text.
    fn format_plan_text(changeset: &ChangeSet, detailed: bool) -> String {
        if !changeset.has_changes() {
            return format!(
                "{} No changes required - stack is converged.\n",
                "✓".green()
            );
        }

        let mut output = String::from("\nChange plan\n\n");

        let rows: Vec<ChangeRow> = changeset
            .actionable_entries()
            .iter()
            .enumerate()
            .map(|(i, e)| ChangeRow {
                index: i + 1,
                action: Self::format_action(e.action),
                resource: e.logical_id.clone(),
                kind: e.kind.to_string(),
                changes: Self::summarize_deltas(e),
            })
            .collect();

        if !rows.is_empty() {
            let table = Table::new(rows).to_string();
            output.push_str(&table);
            output.push('\n');
        }

        if detailed {
            output.push_str("\nAttribute changes:\n");
            for entry in changeset.actionable_entries() {
                if entry.diff.deltas.is_empty() {
                    continue;
                }
                let _ = writeln!(output, "  {}:", entry.logical_id);
                for delta in &entry.diff.deltas {
                    let marker = if delta.forces_replace {
                        "!".red().to_string()
                    } else if delta.drift {
                        "~".yellow().to_string()
                    } else {
                        "~".normal().to_string()
                    };
                    let old = delta
                        .old_value
                        .as_ref()
                        .map_or_else(|| String::from("(none)"), ToString::to_string);
                    let new = delta
                        .new_value
                        .as_ref()
                        .map_or_else(|| String::from("(none)"), ToString::to_string);
                    let _ = writeln!(output, "    {marker} {}: {old} -> {new}", delta.name);
                }
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to replace, {} to delete\n",
            changeset.creates.to_string().green(),
            changeset.updates.to_string().yellow(),
            changeset.replaces.to_string().yellow(),
            changeset.deletes.to_string().red()
        );

        output
    }

    /// Formats an apply report for display.
    #[must_use]
    pub fn format_report(&self, report: &ApplyReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => Self::format_report_text(report),
        }
    }

    /// Formats an apply report as text.
    fn format_report_text(report: &ApplyReport) -> String {
        let mut output = String::new();

        for result in &report.results {
            if result.outcome == Outcome::Unchanged {
                continue;
            }
            let marker = match &result.outcome {
                Outcome::Applied => "✓".green().to_string(),
                Outcome::Failed { .. } => "✗".red().to_string(),
                Outcome::Skipped { .. } => "-".yellow().to_string(),
                Outcome::Unchanged => String::new(),
            };
            let _ = writeln!(
                output,
                "{marker} {} {} ({}, {} attempt(s), {}ms)",
                result.action,
                result.logical_id,
                result.outcome,
                result.attempts,
                result.duration_ms
            );
        }

        let status = if report.cancelled {
            "cancelled".yellow().to_string()
        } else if report.is_success() {
            "success".green().to_string()
        } else if report.is_partial() {
            "partial".yellow().to_string()
        } else {
            "failed".red().to_string()
        };

        let _ = write!(
            output,
            "\nApply {status}: {} applied, {} unchanged, {} failed, {} skipped\n",
            report.applied, report.unchanged, report.failed, report.skipped
        );

        output
    }

    /// Formats a state snapshot for display.
    #[must_use]
    pub fn format_state(&self, snapshot: &StateSnapshot) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(snapshot).unwrap_or_default(),
            OutputFormat::Text => Self::format_state_text(snapshot),
        }
    }

    /// Formats a state snapshot as text.
    fn format_state_text(snapshot: &StateSnapshot) -> String {
        let mut output = String::new();
        let _ = write!(
            output,
            "\nState: {}/{}\n\n",
            snapshot.project, snapshot.environment
        );

        if snapshot.resources.is_empty() {
            output.push_str("   No resources tracked.\n");
            return output;
        }

        let mut records: Vec<_> = snapshot.resources.values().collect();
        records.sort_by(|a, b| a.logical_id.cmp(&b.logical_id));

        let rows: Vec<RecordRow> = records
            .iter()
            .map(|r| RecordRow {
                resource: r.logical_id.clone(),
                kind: r.kind.to_string(),
                status: r.status.to_string(),
                remote_id: r
                    .remote_id
                    .clone()
                    .unwrap_or_else(|| String::from("-")),
                version: r.version,
                updated: r.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            })
            .collect();

        let table = Table::new(rows).to_string();
        output.push_str(&table);
        output.push('\n');
        output
    }

    /// Formats journal entries for display.
    #[must_use]
    pub fn format_journal(&self, entries: &[JournalEntry]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(entries).unwrap_or_default(),
            OutputFormat::Text => {
                if entries.is_empty() {
                    return String::from("No journal entries.\n");
                }

                let rows: Vec<JournalRow> = entries
                    .iter()
                    .map(|e| JournalRow {
                        timestamp: e.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                        resource: e.logical_id.clone(),
                        operation: e.operation.to_string(),
                        version: e.version,
                        result: if e.success {
                            "ok".green().to_string()
                        } else {
                            Self::truncate(e.error.as_deref().unwrap_or("failed"), 40)
                                .red()
                                .to_string()
                        },
                    })
                    .collect();

                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats the dependency graph in execution order.
    #[must_use]
    pub fn format_graph(&self, graph: &DependencyGraph) -> String {
        match self.format {
            OutputFormat::Json => {
                let nodes: Vec<GraphNodeJson> = graph
                    .topological_order()
                    .into_iter()
                    .map(|node| GraphNodeJson {
                        id: graph.id_of(node).to_string(),
                        depends_on: graph
                            .dependencies_of(node)
                            .iter()
                            .map(|&d| graph.id_of(d).to_string())
                            .collect(),
                    })
                    .collect();
                serde_json::to_string_pretty(&nodes).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = String::from("Execution order:\n");
                for node in graph.topological_order() {
                    let deps: Vec<&str> = graph
                        .dependencies_of(node)
                        .iter()
                        .map(|&d| graph.id_of(d))
                        .collect();
                    if deps.is_empty() {
                        let _ = writeln!(output, "  {}", graph.id_of(node));
                    } else {
                        let _ = writeln!(
                            output,
                            "  {} <- {}",
                            graph.id_of(node),
                            deps.join(", ")
                        );
                    }
                }
                output
            }
        }
    }

    /// Formats an action with color.
    fn format_action(action: Action) -> String {
        match action {
            Action::Create => "+create".green().to_string(),
            Action::Update => "~update".yellow().to_string(),
            Action::Replace => "-/+replace".red().to_string(),
            Action::Delete => "-delete".red().to_string(),
            Action::NoOp => "noop".dimmed().to_string(),
        }
    }

    /// One-line summary of an entry's attribute deltas.
    fn summarize_deltas(entry: &ChangeEntry) -> String {
        if entry.diff.deltas.is_empty() {
            return match entry.action {
                Action::Create => String::from("(new resource)"),
                Action::Delete => String::from("(removed from stack)"),
                _ => String::new(),
            };
        }
        let names: Vec<&str> = entry
            .diff
            .deltas
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        Self::truncate(&names.join(", "), 40)
    }

    /// Truncates a string to a maximum length.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.len() <= max_len {
            s.to_string()
        } else {
            format!("{}...", &s[..max_len - 3])
        }
    }

    /// Prints a success message to stderr.
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": "success", "message": message });
                eprintln!("{}", serde_json::to_string(&json).unwrap_or_default());
            }
            OutputFormat::Text => eprintln!("{} {message}", "✓".green()),
        }
    }

    /// Prints an error message to stderr.
    pub fn error(&self, message: &str) {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": "error", "message": message });
                eprintln!("{}", serde_json::to_string(&json).unwrap_or_default());
            }
            OutputFormat::Text => eprintln!("{} {message}", "✗".red()),
        }
    }

    /// Prints a warning message to stderr.
    pub fn warning(&self, message: &str) {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": "warning", "message": message });
                eprintln!("{}", serde_json::to_string(&json).unwrap_or_default());
            }
            OutputFormat::Text => eprintln!("{} {message}", "⚠".yellow()),
        }
    }
}

/// Graph node shape for JSON output.
#[derive(serde::Serialize)]
struct GraphNodeJson {
    id: String,
    depends_on: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ProjectConfig, ProviderConfig, ResourceKind, ResourceSpec, RunConfig, StackConfig,
        StateConfig,
    };
    use crate::planner::Planner;
    use serde_json::json;
    use std::collections::HashMap;

    fn sample_changeset() -> ChangeSet {
        let config = StackConfig {
            project: ProjectConfig {
                name: String::from("demo"),
                environment: String::from("dev"),
                region: None,
            },
            state: StateConfig::default(),
            provider: ProviderConfig::default(),
            run: RunConfig::default(),
            resources: vec![ResourceSpec {
                kind: ResourceKind::Network,
                id: String::from("n1"),
                attributes: [(String::from("cidr"), json!("10.0.0.0/16"))]
                    .into_iter()
                    .collect(),
                depends_on: vec![],
            }],
        };
        let graph = DependencyGraph::build(&config).expect("acyclic");
        let snapshot = StateSnapshot::new("demo", "dev");
        Planner::new()
            .plan(&config, &graph, &snapshot, &HashMap::new())
            .expect("plan")
    }

    #[test]
    fn test_plan_text_lists_creates() {
        let formatter = OutputFormatter::new(OutputFormat::Text);
        let output = formatter.format_plan(&sample_changeset(), false);

        assert!(output.contains("n1"));
        assert!(output.contains("create"));
        assert!(output.contains("1"));
    }

    #[test]
    fn test_plan_json_is_valid() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let output = formatter.format_plan(&sample_changeset(), false);

        let parsed: serde_json::Value = serde_json::from_str(&output).expect("valid json");
        assert_eq!(parsed["creates"], json!(1));
    }

    #[test]
    fn test_empty_plan_reports_converged() {
        let formatter = OutputFormatter::new(OutputFormat::Text);
        let output = formatter.format_plan(&ChangeSet::default(), false);

        assert!(output.contains("converged"));
    }

    #[test]
    fn test_truncate_preserves_short_strings() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("a-rather-long-name", 10), "a-rathe...");
    }
}
