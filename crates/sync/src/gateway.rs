//! Remote Gateway: request/response calls against the FamilyFlow REST API.
//!
//! No caching and no retries happen here. Every call reports one of three
//! outcomes through [`GatewayResult`] and the coordinator decides what to do.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use familyflow_auth::Session;
use familyflow_core::{
    Days, Household, HouseholdCode, NewHousehold, RoomType, Task, TaskId, UserId, Weekday, decode_days,
};
use reqwest::{Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

/// Outcome of a single remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayResult<T> {
    /// 2xx with a parseable (or intentionally empty) body.
    Ok(T),
    /// The server answered with a non-2xx status.
    Failed { status: u16, message: String },
    /// Transport failure: timeout, DNS, connection refused.
    NetworkError(String),
}

impl<T> GatewayResult<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> GatewayResult<U> {
        match self {
            GatewayResult::Ok(v) => GatewayResult::Ok(f(v)),
            GatewayResult::Failed { status, message } => GatewayResult::Failed { status, message },
            GatewayResult::NetworkError(cause) => GatewayResult::NetworkError(cause),
        }
    }

    pub fn is_network_error(&self) -> bool {
        matches!(self, GatewayResult::NetworkError(_))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username_or_email: String,
    pub password: String,
}

/// A user as the remote service reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUser {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub token: Option<String>,
}

impl RemoteUser {
    pub fn user_id(&self) -> UserId {
        UserId::new(self.id)
    }
}

#[derive(Debug, Deserialize)]
struct ExistsResponse {
    exists: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskRequest<'a> {
    name: &'a str,
    days: Vec<Weekday>,
    assigned_to: Option<&'a str>,
    is_done: bool,
    room_type: &'a str,
}

impl<'a> From<&'a Task> for TaskRequest<'a> {
    fn from(task: &'a Task) -> Self {
        Self {
            name: &task.name,
            days: task.days.iter().copied().collect(),
            assigned_to: task.assigned_to.as_deref(),
            is_done: task.is_done,
            room_type: task.room_type.as_str(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskResponse {
    id: i64,
    name: String,
    #[serde(deserialize_with = "days_from_wire")]
    days: Days,
    #[serde(default)]
    assigned_to: Option<String>,
    #[serde(default)]
    is_done: bool,
    room_type: RoomType,
}

impl From<TaskResponse> for Task {
    fn from(wire: TaskResponse) -> Self {
        Task {
            id: TaskId::new(wire.id),
            name: wire.name,
            days: wire.days,
            assigned_to: wire.assigned_to,
            is_done: wire.is_done,
            room_type: wire.room_type,
        }
    }
}

/// Days arrive as a JSON array, but some server builds send the stored
/// comma-joined column instead.
fn days_from_wire<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Days, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wire {
        List(Vec<Weekday>),
        Joined(String),
    }

    match Wire::deserialize(deserializer)? {
        Wire::List(days) => Ok(days.into_iter().collect()),
        Wire::Joined(raw) => decode_days(&raw).map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HouseholdWire {
    #[serde(default, skip_serializing)]
    id: i64,
    name: String,
    admin_role: String,
    #[serde(default)]
    members: Vec<String>,
    code: HouseholdCode,
}

impl From<HouseholdWire> for Household {
    fn from(wire: HouseholdWire) -> Self {
        Household {
            id: wire.id,
            name: wire.name,
            admin_role: wire.admin_role,
            members: wire.members,
            code: wire.code,
        }
    }
}

#[derive(Debug, Serialize)]
struct CodeRequest<'a> {
    code: &'a str,
}

// ─────────────────────────────────────────────────────────────────────────────
// Gateway trait
// ─────────────────────────────────────────────────────────────────────────────

/// One method per remote endpoint.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn register(&self, request: &RegisterRequest) -> GatewayResult<RemoteUser>;
    async fn login(&self, request: &LoginRequest) -> GatewayResult<RemoteUser>;
    async fn get_user(&self, id: UserId) -> GatewayResult<RemoteUser>;
    /// `true` when the username is already taken.
    async fn check_username(&self, username: &str) -> GatewayResult<bool>;
    /// `true` when the email is already taken.
    async fn check_email(&self, email: &str) -> GatewayResult<bool>;

    async fn list_room_tasks(&self, room: &RoomType) -> GatewayResult<Vec<Task>>;
    async fn create_task(&self, task: &Task) -> GatewayResult<Task>;
    async fn update_task(&self, task: &Task) -> GatewayResult<Task>;
    async fn delete_task(&self, id: TaskId) -> GatewayResult<()>;
    async fn delete_room_tasks(&self, room: &RoomType) -> GatewayResult<()>;

    async fn create_household(&self, household: &NewHousehold) -> GatewayResult<Household>;
    async fn verify_household(&self, code: &HouseholdCode) -> GatewayResult<Household>;
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP implementation
// ─────────────────────────────────────────────────────────────────────────────

/// reqwest-backed gateway. Attaches `Authorization: Bearer` from the shared
/// [`Session`] on every call when a token is present.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base: Url,
    session: Arc<Session>,
}

impl HttpGateway {
    pub fn new(api_url: &str, timeout: Duration, session: Arc<Session>) -> anyhow::Result<Self> {
        let base = Url::parse(&crate::config::normalize_base_url(api_url))
            .with_context(|| format!("invalid API base URL '{api_url}'"))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("API base URL '{api_url}' cannot carry paths");
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, base, session })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Build `{base}/{segments...}` with each segment percent-encoded.
    fn endpoint(&self, segments: &[&str], trailing_slash: bool) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
            if trailing_slash {
                path.push("");
            }
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        tracing::debug!(%method, %url, "remote call");
        let req = self.client.request(method, url);
        match self.session.auth_token() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> GatewayResult<T> {
        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => return GatewayResult::NetworkError(e.to_string()),
        };
        let status = resp.status();
        let body = match resp.bytes().await {
            Ok(body) => body,
            Err(e) => return GatewayResult::NetworkError(e.to_string()),
        };

        if !status.is_success() {
            return GatewayResult::Failed {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&body).into_owned(),
            };
        }

        match serde_json::from_slice(&body) {
            Ok(value) => GatewayResult::Ok(value),
            Err(e) => {
                tracing::warn!(status = status.as_u16(), "unparseable success body: {e}");
                GatewayResult::Failed {
                    status: status.as_u16(),
                    message: format!("unparseable response body: {e}"),
                }
            }
        }
    }

    /// For endpoints whose success body carries nothing we need.
    async fn send_empty(&self, req: RequestBuilder) -> GatewayResult<()> {
        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => return GatewayResult::NetworkError(e.to_string()),
        };
        let status = resp.status();
        if status.is_success() {
            return GatewayResult::Ok(());
        }
        GatewayResult::Failed {
            status: status.as_u16(),
            message: resp.text().await.unwrap_or_default(),
        }
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn register(&self, request: &RegisterRequest) -> GatewayResult<RemoteUser> {
        let url = self.endpoint(&["users", "register"], false);
        self.send_json(self.request(Method::POST, url).json(request)).await
    }

    async fn login(&self, request: &LoginRequest) -> GatewayResult<RemoteUser> {
        let url = self.endpoint(&["users", "login"], false);
        self.send_json(self.request(Method::POST, url).json(request)).await
    }

    async fn get_user(&self, id: UserId) -> GatewayResult<RemoteUser> {
        let id = id.to_string();
        let url = self.endpoint(&["users", &id], false);
        self.send_json(self.request(Method::GET, url)).await
    }

    async fn check_username(&self, username: &str) -> GatewayResult<bool> {
        let url = self.endpoint(&["users", "check-username", username], false);
        self.send_json::<ExistsResponse>(self.request(Method::GET, url))
            .await
            .map(|r| r.exists)
    }

    async fn check_email(&self, email: &str) -> GatewayResult<bool> {
        let url = self.endpoint(&["users", "check-email", email], false);
        self.send_json::<ExistsResponse>(self.request(Method::GET, url))
            .await
            .map(|r| r.exists)
    }

    async fn list_room_tasks(&self, room: &RoomType) -> GatewayResult<Vec<Task>> {
        let url = self.endpoint(&["tasks", "room", room.as_str()], true);
        self.send_json::<Vec<TaskResponse>>(self.request(Method::GET, url))
            .await
            .map(|tasks| tasks.into_iter().map(Task::from).collect())
    }

    async fn create_task(&self, task: &Task) -> GatewayResult<Task> {
        let url = self.endpoint(&["tasks"], true);
        self.send_json::<TaskResponse>(self.request(Method::POST, url).json(&TaskRequest::from(task)))
            .await
            .map(Task::from)
    }

    async fn update_task(&self, task: &Task) -> GatewayResult<Task> {
        let id = task.id.to_string();
        let url = self.endpoint(&["tasks", &id], true);
        self.send_json::<TaskResponse>(self.request(Method::PUT, url).json(&TaskRequest::from(task)))
            .await
            .map(Task::from)
    }

    async fn delete_task(&self, id: TaskId) -> GatewayResult<()> {
        let id = id.to_string();
        let url = self.endpoint(&["tasks", &id], true);
        self.send_empty(self.request(Method::DELETE, url)).await
    }

    async fn delete_room_tasks(&self, room: &RoomType) -> GatewayResult<()> {
        let url = self.endpoint(&["tasks", "room", room.as_str(), "delete"], true);
        self.send_empty(self.request(Method::DELETE, url)).await
    }

    async fn create_household(&self, household: &NewHousehold) -> GatewayResult<Household> {
        let url = self.endpoint(&["households"], true);
        let body = HouseholdWire {
            id: 0,
            name: household.name.clone(),
            admin_role: household.admin_role.clone(),
            members: household.members.clone(),
            code: household.code.clone(),
        };
        self.send_json::<HouseholdWire>(self.request(Method::POST, url).json(&body))
            .await
            .map(Household::from)
    }

    async fn verify_household(&self, code: &HouseholdCode) -> GatewayResult<Household> {
        let url = self.endpoint(&["households", "verify"], true);
        let body = CodeRequest { code: code.as_str() };
        self.send_json::<HouseholdWire>(self.request(Method::POST, url).json(&body))
            .await
            .map(Household::from)
    }
}
