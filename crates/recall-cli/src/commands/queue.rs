use recall_core::models::{ChangeOperation, EntityKind, PendingChange, SessionQueueEntry};
use serde::Serialize;
use serde_json::Value;

use crate::commands::common::{format_relative_time, Context};
use crate::error::CliError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueReport {
    pub sessions: Vec<SessionQueueEntry>,
    pub changes: Vec<PendingChange>,
}

impl QueueReport {
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty() && self.changes.is_empty()
    }
}

pub async fn load_queue(context: &Context) -> Result<QueueReport, CliError> {
    let store = context.open_store().await?;
    Ok(QueueReport {
        sessions: store.queued_sessions().await,
        changes: store.pending_changes().await,
    })
}

pub fn format_queue_lines(report: &QueueReport, now_ms: i64) -> Vec<String> {
    let mut lines = Vec::new();
    if !report.sessions.is_empty() {
        lines.push(format!("Sessions ({})", report.sessions.len()));
        for entry in &report.sessions {
            let mut line = format!(
                "  {}  set {}  {}",
                entry.session_id,
                entry.set_id,
                format_relative_time(entry.enqueued_at, now_ms)
            );
            if entry.attempts > 0 {
                line.push_str(&format!("  attempts {}", entry.attempts));
            }
            if let Some(error) = entry.last_error.as_deref() {
                line.push_str(&format!("  last error: {error}"));
            }
            lines.push(line);
        }
    }
    if !report.changes.is_empty() {
        lines.push(format!("Changes ({})", report.changes.len()));
        for change in &report.changes {
            let mut line = format!(
                "  {} {} {}  {}",
                change.operation.as_str(),
                change.entity.as_str(),
                change.entity_id,
                format_relative_time(change.created_at, now_ms)
            );
            if change.retry_count > 0 {
                line.push_str(&format!("  retries {}", change.retry_count));
            }
            lines.push(line);
        }
    }
    lines
}

pub async fn run_queue(context: &Context, as_json: bool) -> Result<(), CliError> {
    let report = load_queue(context).await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.is_empty() {
        println!("Nothing waiting to sync.");
        return Ok(());
    }
    for line in format_queue_lines(&report, chrono::Utc::now().timestamp_millis()) {
        println!("{line}");
    }
    Ok(())
}

/// Parse a change payload. Create and update need a JSON object; delete sends none.
pub fn parse_payload(operation: ChangeOperation, raw: Option<&str>) -> Result<Value, CliError> {
    if operation == ChangeOperation::Delete {
        return Ok(Value::Null);
    }
    let value: Value = serde_json::from_str(raw.unwrap_or("{}"))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(CliError::InvalidPayload)
    }
}

pub async fn queue_change(
    context: &Context,
    operation: ChangeOperation,
    entity: EntityKind,
    entity_id: &str,
    payload: Option<&str>,
) -> Result<PendingChange, CliError> {
    let payload = parse_payload(operation, payload)?;
    let (recorder, _store) = context.recorder().await?;
    Ok(recorder
        .queue_change(operation, entity, entity_id, payload)
        .await?)
}

pub async fn run_change(
    context: &Context,
    operation: ChangeOperation,
    entity: EntityKind,
    entity_id: &str,
    payload: Option<&str>,
) -> Result<(), CliError> {
    let change = queue_change(context, operation, entity, entity_id, payload).await?;
    println!(
        "Queued {} {} {}",
        change.operation.as_str(),
        change.entity.as_str(),
        change.entity_id
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use recall_core::models::SessionId;
    use recall_core::ClientConfig;
    use serde_json::json;

    fn context(dir: &tempfile::TempDir) -> Context {
        Context {
            config: ClientConfig::default(),
            db_path: dir.path().join("recall.db"),
            offline: true,
        }
    }

    #[test]
    fn payload_rules_follow_operation() {
        assert_eq!(parse_payload(ChangeOperation::Delete, Some("[1]")).unwrap(), Value::Null);
        assert_eq!(
            parse_payload(ChangeOperation::Create, Some(r#"{"name": "Spanish"}"#)).unwrap(),
            json!({"name": "Spanish"})
        );
        assert_eq!(parse_payload(ChangeOperation::Update, None).unwrap(), json!({}));
        assert!(matches!(
            parse_payload(ChangeOperation::Update, Some("[1, 2]")),
            Err(CliError::InvalidPayload)
        ));
        assert!(matches!(
            parse_payload(ChangeOperation::Create, Some("{oops")),
            Err(CliError::Serialization(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn queued_changes_show_up_in_report() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(&dir);
        assert!(load_queue(&context).await.unwrap().is_empty());

        queue_change(
            &context,
            ChangeOperation::Create,
            EntityKind::StudySet,
            "set-1",
            Some(r#"{"name": "Spanish"}"#),
        )
        .await
        .unwrap();

        let report = load_queue(&context).await.unwrap();
        assert_eq!(report.changes.len(), 1);
        assert_eq!(report.changes[0].payload, json!({"name": "Spanish"}));

        let lines = format_queue_lines(&report, report.changes[0].created_at);
        assert_eq!(lines, vec!["Changes (1)", "  create study_set set-1  just now"]);
    }

    #[test]
    fn queue_lines_include_retry_details() {
        let session_id = SessionId::new();
        let report = QueueReport {
            sessions: vec![SessionQueueEntry {
                session_id,
                set_id: "set-1".to_string(),
                enqueued_at: 0,
                attempts: 2,
                last_error: Some("timeout".to_string()),
            }],
            changes: Vec::new(),
        };

        let lines = format_queue_lines(&report, 2 * 3_600_000);
        assert_eq!(lines[0], "Sessions (1)");
        assert_eq!(
            lines[1],
            format!("  {session_id}  set set-1  2h ago  attempts 2  last error: timeout")
        );
    }
}
