use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use super::todo::TodoState;

/// Why the server wants a reminder for an item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationKind {
    Scheduled,
    Deadline,
    Custom,
    Other(String),
}

impl NotificationKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Deadline => "deadline",
            Self::Custom => "custom",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for NotificationKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "scheduled" => Self::Scheduled,
            "deadline" => Self::Deadline,
            "custom" | "notify" => Self::Custom,
            _ => Self::Other(s),
        }
    }
}

impl From<NotificationKind> for String {
    fn from(kind: NotificationKind) -> Self {
        kind.as_str().to_string()
    }
}

/// One upcoming reminder as computed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerNotification {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub pos: Option<u64>,
    pub notify_at: DateTime<Utc>,
    #[serde(default)]
    pub event_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub minutes_before: Option<i64>,
    pub notify_type: NotificationKind,
    #[serde(default)]
    pub todo_state: Option<TodoState>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct NotificationListWire {
    #[serde(default)]
    pub notifications: Vec<ServerNotification>,
}

impl ServerNotification {
    fn item_key(&self) -> String {
        if let Some(id) = self.id.as_deref().filter(|id| !id.is_empty()) {
            return id.to_string();
        }
        match (&self.file, self.pos) {
            (Some(file), Some(pos)) => format!("{}:{}", file, pos),
            _ => self.title.clone(),
        }
    }

    /// Stable local identifier. Moving the fire time yields a new identifier.
    pub fn identifier(&self) -> String {
        format!(
            "{}|{}|{}",
            self.item_key(),
            self.notify_type.as_str(),
            self.notify_at.timestamp()
        )
    }

    fn body(&self) -> String {
        let event_clock = self
            .event_time
            .map(|t| t.with_timezone(&Local).format("%H:%M").to_string());

        match (&self.notify_type, self.minutes_before, event_clock) {
            (NotificationKind::Custom, _, _) => self
                .todo_state
                .as_ref()
                .map(|s| format!("Reminder ({})", s.as_keyword()))
                .unwrap_or_else(|| "Reminder".to_string()),
            (_, Some(0), Some(clock)) => format!("Now ({})", clock),
            (_, Some(minutes), _) if minutes > 0 => format!("In {} minutes", minutes),
            (NotificationKind::Deadline, _, Some(clock)) => format!("Deadline at {}", clock),
            (NotificationKind::Deadline, _, None) => "Deadline".to_string(),
            (_, _, Some(clock)) => format!("Scheduled at {}", clock),
            _ => "Scheduled".to_string(),
        }
    }

    pub fn to_scheduled(&self) -> ScheduledNotificationInfo {
        ScheduledNotificationInfo {
            identifier: self.identifier(),
            title: self.title.clone(),
            body: self.body(),
            scheduled_time: self.notify_at,
            event_time: self.event_time,
            offset_minutes: self.minutes_before,
            is_custom: Some(self.notify_type == NotificationKind::Custom),
        }
    }
}

/// A reminder handed to the local scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledNotificationInfo {
    pub identifier: String,
    pub title: String,
    pub body: String,
    pub scheduled_time: DateTime<Utc>,
    #[serde(default)]
    pub event_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub offset_minutes: Option<i64>,
    #[serde(default)]
    pub is_custom: Option<bool>,
}

impl ScheduledNotificationInfo {
    /// Whether rescheduling is needed to turn `self` into `other`.
    pub fn same_content(&self, other: &Self) -> bool {
        self.title == other.title
            && self.body == other.body
            && self.scheduled_time == other.scheduled_time
    }
}
