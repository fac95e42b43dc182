/// Audit logging for firewall mutations
///
/// Every repair (teardown + reapply) and every shutdown teardown is recorded
/// as one JSON object per line, so operators can see when and how often
/// something else interfered with the overlay rules.
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

/// Types of auditable events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RulesRepaired,
    RulesRemoved,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    pub event_type: EventType,

    /// Rule set the event concerns (`masquerade`, `forward`, `input`)
    pub rule_set: String,

    /// Whether the operation succeeded
    pub success: bool,

    /// Additional structured data about the event
    pub details: serde_json::Value,

    /// Error message if operation failed
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(
        event_type: EventType,
        rule_set: &str,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            event_type,
            rule_set: rule_set.to_string(),
            success: error.is_none(),
            details,
            error,
        }
    }
}

/// Audit log writer
#[derive(Debug, Clone)]
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    /// Creates an audit log in the state directory
    ///
    /// # Errors
    ///
    /// Returns `Err` if state directory cannot be determined
    pub fn new() -> std::io::Result<Self> {
        let mut log_path = crate::utils::get_state_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "State directory not found")
        })?;
        log_path.push("audit.log");

        Ok(Self { log_path })
    }

    /// Creates an audit log writing to `path`
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: path.into(),
        }
    }

    /// Appends an event to the audit log
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be opened or written
    pub async fn log(&self, event: AuditEvent) -> std::io::Result<()> {
        let json = serde_json::to_string(&event)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;

        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.sync_all().await?;

        Ok(())
    }

    /// Reads the most recent events from the log, newest first
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be read
    pub async fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = tokio::fs::read_to_string(&self.log_path).await?;

        let events: Vec<AuditEvent> = content
            .lines()
            .rev()
            .take(count)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        Ok(events)
    }
}

/// Logs a repair attempt of `rule_set`
pub async fn log_repair(audit: &AuditLog, rule_set: &str, rule_count: usize, error: Option<String>) {
    let event = AuditEvent::new(
        EventType::RulesRepaired,
        rule_set,
        serde_json::json!({ "rule_count": rule_count }),
        error,
    );

    if let Err(e) = audit.log(event).await {
        tracing::warn!("Failed to write audit log: {}", e);
    }
}

/// Logs the removal of `rule_set` at shutdown
pub async fn log_teardown(audit: &AuditLog, rule_set: &str, rule_count: usize) {
    let event = AuditEvent::new(
        EventType::RulesRemoved,
        rule_set,
        serde_json::json!({ "rule_count": rule_count }),
        None,
    );

    if let Err(e) = audit.log(event).await {
        tracing::warn!("Failed to write audit log: {}", e);
    }
}
