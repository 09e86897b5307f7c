use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TodoState {
    Todo,
    Next,
    Waiting,
    Someday,
    Done,
    Cancelled,
    /// Any custom keyword configured on the server.
    Other(String),
}

impl TodoState {
    pub fn as_keyword(&self) -> &str {
        match self {
            Self::Todo => "TODO",
            Self::Next => "NEXT",
            Self::Waiting => "WAITING",
            Self::Someday => "SOMEDAY",
            Self::Done => "DONE",
            Self::Cancelled => "CANCELLED",
            Self::Other(keyword) => keyword,
        }
    }

    pub fn from_keyword(s: &str) -> Self {
        match s.trim() {
            "TODO" => Self::Todo,
            "NEXT" => Self::Next,
            "WAITING" => Self::Waiting,
            "SOMEDAY" => Self::Someday,
            "DONE" => Self::Done,
            "CANCELLED" | "CANCELED" => Self::Cancelled,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for TodoState {
    fn from(s: String) -> Self {
        Self::from_keyword(&s)
    }
}

impl From<TodoState> for String {
    fn from(state: TodoState) -> Self {
        state.as_keyword().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    A,
    B,
    C,
}

impl Priority {
    pub fn as_org(&self) -> &'static str {
        match self {
            Self::A => "[#A]",
            Self::B => "[#B]",
            Self::C => "[#C]",
        }
    }

    pub fn from_org(s: &str) -> Option<Self> {
        match s {
            "A" | "#A" | "[#A]" => Some(Self::A),
            "B" | "#B" | "[#B]" => Some(Self::B),
            "C" | "#C" | "[#C]" => Some(Self::C),
            _ => None,
        }
    }
}

fn deserialize_priority<'de, D>(deserializer: D) -> Result<Option<Priority>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(Priority::from_org))
}

/// A todo as returned by the task server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(rename = "todo")]
    pub state: TodoState,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_priority")]
    pub priority: Option<Priority>,
    /// Org timestamp text, e.g. `2026-10-16` or `2026-10-16T09:30:00`.
    #[serde(default)]
    pub scheduled: Option<String>,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub file: String,
    pub pos: u64,
}

impl Todo {
    pub fn new(title: impl Into<String>, file: impl Into<String>, pos: u64) -> Self {
        Self {
            id: None,
            title: title.into(),
            state: TodoState::Todo,
            tags: Vec::new(),
            priority: None,
            scheduled: None,
            deadline: None,
            category: None,
            file: file.into(),
            pos,
        }
    }

    /// Stable identity: the server id when present, else file and position.
    pub fn identity(&self) -> String {
        match &self.id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => format!("{}:{}", self.file, self.pos),
        }
    }

    pub fn scheduled_date(&self) -> Option<NaiveDate> {
        self.scheduled.as_deref().and_then(parse_date)
    }

    pub fn deadline_date(&self) -> Option<NaiveDate> {
        self.deadline.as_deref().and_then(parse_date)
    }

    pub fn scheduled_at(&self) -> Option<NaiveDateTime> {
        self.scheduled.as_deref().and_then(parse_date_time)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// Parse the date part of an org or ISO timestamp.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim().trim_start_matches(['<', '[']);
    let date_part = s.get(..10)?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// Parse a timestamp with a time of day; date-only values yield `None`.
pub fn parse_date_time(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim().trim_start_matches(['<', '[']).trim_end_matches(['>', ']']);
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    // Org style: `2026-10-16 Fri 09:30`
    let mut parts = s.split_whitespace();
    let date = parts.next().and_then(parse_date)?;
    let time = parts
        .find_map(|p| chrono::NaiveTime::parse_from_str(p, "%H:%M").ok())?;
    Some(date.and_time(time))
}
