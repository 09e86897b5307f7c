use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::core::notification::{NotificationListWire, ServerNotification};
use crate::core::todo::Todo;
use crate::error::{Error, Result, truncate_body};
use crate::notify::sync::NotificationSource;

const REQUEST_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgendaSpan {
    Day,
    Week,
}

impl AgendaSpan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgendaResponse {
    pub span: AgendaSpan,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub todos: Vec<Todo>,
}

/// One field a capture template asks for.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TemplatePrompt {
    pub name: String,
    #[serde(rename = "type", default = "default_prompt_type")]
    pub kind: String,
    #[serde(default)]
    pub required: bool,
}

fn default_prompt_type() -> String {
    "string".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureTemplate {
    pub name: String,
    #[serde(default)]
    pub prompts: Vec<TemplatePrompt>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitStatus {
    pub title: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub pos: Option<u64>,
    #[serde(default)]
    pub current_streak: u32,
    #[serde(default)]
    pub completed_today: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Identifies a todo in request bodies.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct TodoRef<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    title: &'a str,
    file: &'a str,
    pos: u64,
}

impl<'a> From<&'a Todo> for TodoRef<'a> {
    fn from(todo: &'a Todo) -> Self {
        Self {
            id: todo.id.as_deref(),
            title: &todo.title,
            file: &todo.file,
            pos: todo.pos,
        }
    }
}

/// Basic-auth JSON client for the task server.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    username: String,
    password: String,
    http: Client,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(base_url: &str, username: &str, password: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T> {
        let resp = req.send().await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::Unauthorized);
        }
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<unable to read response body>".to_string());
            return Err(Error::Status {
                status: status.as_u16(),
                body: truncate_body(&body, 200),
            });
        }
        Ok(resp.json::<T>().await?)
    }

    /// Verify the URL and credentials by issuing a cheap authenticated request.
    pub async fn check_connection(&self) -> Result<()> {
        let resp = self.request(Method::GET, "/get-all-todos").send().await?;
        match resp.status() {
            s if s.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED => Err(Error::Unauthorized),
            s => Err(Error::Status {
                status: s.as_u16(),
                body: truncate_body(&resp.text().await.unwrap_or_default(), 200),
            }),
        }
    }

    pub async fn get_all_todos(&self) -> Result<Vec<Todo>> {
        self.send_json(self.request(Method::GET, "/get-all-todos")).await
    }

    pub async fn get_agenda(&self, span: AgendaSpan, date: Option<NaiveDate>) -> Result<AgendaResponse> {
        let mut query = vec![("span", span.as_str().to_string())];
        if let Some(date) = date {
            query.push(("date", date.format("%Y-%m-%d").to_string()));
        }
        self.send_json(self.request(Method::GET, "/agenda").query(&query))
            .await
    }

    /// Upcoming reminders within `within_days` from now.
    pub async fn get_notifications(&self, within_days: u32) -> Result<Vec<ServerNotification>> {
        let wire: NotificationListWire = self
            .send_json(
                self.request(Method::GET, "/notifications")
                    .query(&[("within", within_days)]),
            )
            .await?;
        Ok(wire.notifications)
    }

    pub async fn get_templates(&self) -> Result<Vec<CaptureTemplate>> {
        let templates: BTreeMap<String, CaptureTemplateBody> = self
            .send_json(self.request(Method::GET, "/capture-templates"))
            .await?;
        Ok(templates
            .into_iter()
            .map(|(name, body)| CaptureTemplate {
                name,
                prompts: body.prompts,
            })
            .collect())
    }

    pub async fn get_habits(&self) -> Result<Vec<HabitStatus>> {
        self.send_json(self.request(Method::GET, "/habit-status")).await
    }

    /// Create a todo through a named capture template.
    pub async fn capture(
        &self,
        template: &str,
        values: &BTreeMap<String, serde_json::Value>,
    ) -> Result<ActionResponse> {
        let body = serde_json::json!({
            "template": template,
            "values": values,
        });
        self.send_json(self.request(Method::POST, "/capture").json(&body))
            .await
    }

    pub async fn complete(&self, todo: &Todo) -> Result<ActionResponse> {
        self.send_json(self.request(Method::POST, "/complete").json(&TodoRef::from(todo)))
            .await
    }

    /// Apply field changes (state, scheduled, deadline, priority, tags...).
    pub async fn update(
        &self,
        todo: &Todo,
        changes: &BTreeMap<String, serde_json::Value>,
    ) -> Result<ActionResponse> {
        let body = serde_json::json!({
            "todo": TodoRef::from(todo),
            "changes": changes,
        });
        self.send_json(self.request(Method::POST, "/update").json(&body))
            .await
    }
}

#[derive(Debug, Deserialize)]
struct CaptureTemplateBody {
    #[serde(default)]
    prompts: Vec<TemplatePrompt>,
}

#[async_trait]
impl NotificationSource for ApiClient {
    async fn fetch_notifications(&self, within_days: u32) -> Result<Vec<ServerNotification>> {
        self.get_notifications(within_days).await
    }
}
