//! Display formatting for CLI output
//!
//! SBIO pattern: Pure functions that format data for display

use super::commands::{ContextInfo, StepReport};
use crate::platform::{RemoteObject, ResourceKind};
use crate::poll::WaitOutcome;
use crate::reconcile::{CompositeKey, LedgerEntry};

// ============================================================================
// Table formatting helpers
// ============================================================================

/// Format a simple table with headers and rows
pub fn format_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "No resources found.\n".to_string();
    }

    // Calculate column widths
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut output = String::new();

    for (i, header) in headers.iter().enumerate() {
        if i > 0 {
            output.push_str("   ");
        }
        output.push_str(&format!(
            "{:width$}",
            header.to_uppercase(),
            width = widths[i]
        ));
    }
    output.push('\n');

    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                output.push_str("   ");
            }
            if i < widths.len() {
                output.push_str(&format!("{:width$}", cell, width = widths[i]));
            } else {
                output.push_str(cell);
            }
        }
        output.push('\n');
    }

    output
}

fn or_dash(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}

// ============================================================================
// Context display
// ============================================================================

/// Format context list for display
pub fn format_context_list(contexts: &[ContextInfo]) -> String {
    let headers = &["", "NAME", "PLATFORM", "URL"];
    let rows: Vec<Vec<String>> = contexts
        .iter()
        .map(|ctx| {
            vec![
                if ctx.is_current { "*" } else { " " }.to_string(),
                ctx.name.clone(),
                ctx.platform.to_string(),
                ctx.url.clone(),
            ]
        })
        .collect();

    format_table(headers, rows)
}

/// Format current context for display
pub fn format_current_context(name: &str, url: &str) -> String {
    format!("Current context: {} ({})\n", name, url)
}

// ============================================================================
// Object display
// ============================================================================

/// Format remote objects of one kind
pub fn format_object_list(kind: ResourceKind, objects: &[RemoteObject]) -> String {
    let headers = &["KIND", "NAME", "ID", "STATUS", "VERSION"];
    let rows: Vec<Vec<String>> = objects
        .iter()
        .map(|o| {
            vec![
                kind.to_string(),
                or_dash(o.name.as_deref()),
                o.id.clone(),
                or_dash(o.status.as_deref()),
                or_dash(o.version_token.as_deref()),
            ]
        })
        .collect();

    format_table(headers, rows)
}

/// Format the result of a resolve
pub fn format_resolved(kind: ResourceKind, name: &str, object: Option<&RemoteObject>) -> String {
    match object {
        Some(object) => format_object_list(kind, std::slice::from_ref(object)),
        None => format!("{} '{}' does not exist\n", kind, name),
    }
}

pub fn format_wait_outcome(kind: ResourceKind, name: &str, outcome: &WaitOutcome) -> String {
    match outcome {
        WaitOutcome::Ready(object) => format!(
            "{} '{}' ready (id {}, status {})\n",
            kind,
            name,
            object.id,
            object.status.as_deref().unwrap_or("-")
        ),
        WaitOutcome::Absent => format!("{} '{}' is gone\n", kind, name),
    }
}

pub fn format_deleted(kind: ResourceKind, name: &str, deleted: bool) -> String {
    if deleted {
        format!("{} '{}' deleted\n", kind, name)
    } else {
        format!("{} '{}' already absent\n", kind, name)
    }
}

// ============================================================================
// Apply display
// ============================================================================

/// Format the per-step outcome of an apply run
pub fn format_step_reports(reports: &[StepReport]) -> String {
    let headers = &["#", "CONTEXT", "KIND", "NAME", "ACTION", "ID", "STATUS"];
    let rows: Vec<Vec<String>> = reports
        .iter()
        .map(|r| {
            vec![
                r.index.to_string(),
                r.context.clone(),
                r.kind.to_string(),
                r.name.clone(),
                r.action.clone(),
                or_dash(r.id.as_deref()),
                or_dash(r.status.as_deref()),
            ]
        })
        .collect();

    format_table(headers, rows)
}

/// Format the composite progress recorded during a run
pub fn format_ledger(entries: &[(CompositeKey, LedgerEntry)]) -> String {
    if entries.is_empty() {
        return String::new();
    }

    let headers = &["COMPOSITE", "STATE", "UPDATED"];
    let rows: Vec<Vec<String>> = entries
        .iter()
        .map(|(key, entry)| {
            vec![
                key.to_string(),
                entry.state.to_string(),
                entry.updated_at.format("%H:%M:%S").to_string(),
            ]
        })
        .collect();

    let mut output = String::from("\nComposites:\n");
    output.push_str(&format_table(headers, rows));
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{FieldMap, PlatformFamily};
    use crate::reconcile::CompositeState;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_format_table() {
        let headers = &["NAME", "AGE"];
        let rows = vec![
            vec!["Alice".to_string(), "30".to_string()],
            vec!["Bob".to_string(), "25".to_string()],
        ];

        let output = format_table(headers, rows);
        assert!(output.contains("NAME"));
        assert!(output.contains("Alice"));
        assert!(output.contains("Bob"));
    }

    #[test]
    fn test_format_table_empty() {
        let output = format_table(&["NAME"], vec![]);
        assert!(output.contains("No resources found"));
    }

    #[test]
    fn test_format_context_list() {
        let contexts = vec![
            ContextInfo {
                name: "lab".to_string(),
                url: "https://cloud.lab:9696".to_string(),
                platform: PlatformFamily::OpenStack,
                is_current: true,
            },
            ContextInfo {
                name: "rke".to_string(),
                url: "https://rancher.lab".to_string(),
                platform: PlatformFamily::Rancher,
                is_current: false,
            },
        ];

        let output = format_context_list(&contexts);
        assert!(output.contains("lab"));
        assert!(output.contains("rancher"));
        assert!(output.contains('*'));
    }

    #[test]
    fn test_format_resolved() {
        let object = RemoteObject::from_raw(
            ResourceKind::Network,
            json!({"id": "f1", "name": "net-a", "status": "ACTIVE"}),
            &FieldMap::openstack(),
        )
        .unwrap();
        let output = format_resolved(ResourceKind::Network, "net-a", Some(&object));
        assert!(output.contains("f1"));
        assert!(output.contains("ACTIVE"));

        let output = format_resolved(ResourceKind::Network, "net-b", None);
        assert!(output.contains("does not exist"));
    }

    #[test]
    fn test_format_step_reports() {
        let reports = vec![StepReport {
            index: 1,
            context: "lab".into(),
            kind: ResourceKind::SecurityGroup,
            name: "web".into(),
            action: "ensured (+2 children)".into(),
            id: Some("sg-1".into()),
            status: None,
        }];
        let output = format_step_reports(&reports);
        assert!(output.contains("security-group"));
        assert!(output.contains("+2 children"));
    }

    #[test]
    fn test_format_ledger() {
        assert!(format_ledger(&[]).is_empty());

        let entries = vec![(
            CompositeKey::new(ResourceKind::SecurityGroup, None, "web"),
            LedgerEntry {
                state: CompositeState::PartiallyCreated { completed: 2 },
                updated_at: Utc::now(),
            },
        )];
        let output = format_ledger(&entries);
        assert!(output.contains("partially-created (2 children)"));
    }
}
