//! In-memory `RemoteGateway` for coordinator tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use familyflow_core::{Household, HouseholdCode, NewHousehold, RoomType, Task, TaskId, UserId};

use crate::gateway::{GatewayResult, LoginRequest, RegisterRequest, RemoteGateway, RemoteUser};

/// How the fake answers every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FakeMode {
    Online,
    Offline,
    /// Every call fails with this status.
    Status(u16),
}

#[derive(Debug)]
struct FakeState {
    mode: FakeMode,
    latency: Option<Duration>,
    listing_delay: Option<Duration>,
    next_task_id: i64,
    next_user_id: i64,
    tasks: BTreeMap<i64, Task>,
    users: Vec<(RemoteUser, String)>,
    households: Vec<Household>,
    reject_names: HashSet<String>,
    calls: HashMap<&'static str, usize>,
}

#[derive(Debug)]
pub(crate) struct FakeGateway {
    state: Mutex<FakeState>,
}

impl FakeGateway {
    /// Online; the first created task gets id 42, the first user id 7.
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                mode: FakeMode::Online,
                latency: None,
                listing_delay: None,
                next_task_id: 42,
                next_user_id: 7,
                tasks: BTreeMap::new(),
                users: Vec::new(),
                households: Vec::new(),
                reject_names: HashSet::new(),
                calls: HashMap::new(),
            }),
        }
    }

    pub(crate) fn offline() -> Self {
        let fake = Self::new();
        fake.set_mode(FakeMode::Offline);
        fake
    }

    pub(crate) fn set_mode(&self, mode: FakeMode) {
        self.state.lock().unwrap().mode = mode;
    }

    pub(crate) fn set_latency(&self, latency: Duration) {
        self.state.lock().unwrap().latency = Some(latency);
    }

    /// Room listings are taken immediately but only returned after `delay`.
    pub(crate) fn set_listing_delay(&self, delay: Duration) {
        self.state.lock().unwrap().listing_delay = Some(delay);
    }

    /// Task writes carrying this name fail with 422.
    pub(crate) fn reject_task_named(&self, name: &str) {
        self.state.lock().unwrap().reject_names.insert(name.to_string());
    }

    pub(crate) fn seed_task(&self, task: Task) {
        self.state.lock().unwrap().tasks.insert(task.id.get(), task);
    }

    pub(crate) fn seed_user(&self, id: i64, username: &str, email: &str, password: &str) {
        self.state.lock().unwrap().users.push((
            RemoteUser {
                id,
                username: username.into(),
                email: email.into(),
                token: Some(format!("tok-{username}")),
            },
            password.into(),
        ));
    }

    pub(crate) fn remote_task(&self, id: i64) -> Option<Task> {
        self.state.lock().unwrap().tasks.get(&id).cloned()
    }

    pub(crate) fn remote_task_count(&self) -> usize {
        self.state.lock().unwrap().tasks.len()
    }

    pub(crate) fn calls(&self, name: &str) -> usize {
        self.state.lock().unwrap().calls.get(name).copied().unwrap_or(0)
    }

    /// Record the call, honour latency and mode, then run `f` on the state.
    async fn call<T>(&self, name: &'static str, f: impl FnOnce(&mut FakeState) -> GatewayResult<T>) -> GatewayResult<T> {
        let latency = self.state.lock().unwrap().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().unwrap();
        *state.calls.entry(name).or_default() += 1;
        match state.mode {
            FakeMode::Offline => GatewayResult::NetworkError("connection refused".into()),
            FakeMode::Status(status) => GatewayResult::Failed {
                status,
                message: "rejected".into(),
            },
            FakeMode::Online => f(&mut state),
        }
    }
}

fn not_found<T>() -> GatewayResult<T> {
    GatewayResult::Failed {
        status: 404,
        message: "not found".into(),
    }
}

fn invalid<T>(message: &str) -> GatewayResult<T> {
    GatewayResult::Failed {
        status: 422,
        message: message.into(),
    }
}

#[async_trait]
impl RemoteGateway for FakeGateway {
    async fn register(&self, request: &RegisterRequest) -> GatewayResult<RemoteUser> {
        self.call("register", |s| {
            if s.users.iter().any(|(u, _)| u.username == request.username || u.email == request.email) {
                return GatewayResult::Failed {
                    status: 409,
                    message: "username or email taken".into(),
                };
            }
            let user = RemoteUser {
                id: s.next_user_id,
                username: request.username.clone(),
                email: request.email.clone(),
                token: Some(format!("tok-{}", request.username)),
            };
            s.next_user_id += 1;
            s.users.push((user.clone(), request.password.clone()));
            GatewayResult::Ok(user)
        })
        .await
    }

    async fn login(&self, request: &LoginRequest) -> GatewayResult<RemoteUser> {
        self.call("login", |s| {
            s.users
                .iter()
                .find(|(u, pw)| {
                    (u.username == request.username_or_email || u.email == request.username_or_email)
                        && *pw == request.password
                })
                .map(|(u, _)| GatewayResult::Ok(u.clone()))
                .unwrap_or(GatewayResult::Failed {
                    status: 401,
                    message: "invalid credentials".into(),
                })
        })
        .await
    }

    async fn get_user(&self, id: UserId) -> GatewayResult<RemoteUser> {
        self.call("get_user", |s| {
            s.users
                .iter()
                .find(|(u, _)| u.id == id.get())
                .map(|(u, _)| GatewayResult::Ok(RemoteUser { token: None, ..u.clone() }))
                .unwrap_or_else(not_found)
        })
        .await
    }

    async fn check_username(&self, username: &str) -> GatewayResult<bool> {
        self.call("check_username", |s| {
            GatewayResult::Ok(s.users.iter().any(|(u, _)| u.username == username))
        })
        .await
    }

    async fn check_email(&self, email: &str) -> GatewayResult<bool> {
        self.call("check_email", |s| GatewayResult::Ok(s.users.iter().any(|(u, _)| u.email == email)))
            .await
    }

    async fn list_room_tasks(&self, room: &RoomType) -> GatewayResult<Vec<Task>> {
        let listed = self
            .call("list_room_tasks", |s| {
                GatewayResult::Ok(s.tasks.values().filter(|t| &t.room_type == room).cloned().collect())
            })
            .await;

        let delay = self.state.lock().unwrap().listing_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        listed
    }

    async fn create_task(&self, task: &Task) -> GatewayResult<Task> {
        self.call("create_task", |s| {
            if s.reject_names.contains(&task.name) {
                return invalid("task rejected");
            }
            let created = task.clone().with_id(TaskId::new(s.next_task_id));
            s.next_task_id += 1;
            s.tasks.insert(created.id.get(), created.clone());
            GatewayResult::Ok(created)
        })
        .await
    }

    async fn update_task(&self, task: &Task) -> GatewayResult<Task> {
        self.call("update_task", |s| {
            if s.reject_names.contains(&task.name) {
                return invalid("task rejected");
            }
            match s.tasks.get_mut(&task.id.get()) {
                Some(slot) => {
                    *slot = task.clone();
                    GatewayResult::Ok(task.clone())
                }
                None => not_found(),
            }
        })
        .await
    }

    async fn delete_task(&self, id: TaskId) -> GatewayResult<()> {
        self.call("delete_task", |s| match s.tasks.remove(&id.get()) {
            Some(_) => GatewayResult::Ok(()),
            None => not_found(),
        })
        .await
    }

    async fn delete_room_tasks(&self, room: &RoomType) -> GatewayResult<()> {
        self.call("delete_room_tasks", |s| {
            s.tasks.retain(|_, t| &t.room_type != room);
            GatewayResult::Ok(())
        })
        .await
    }

    async fn create_household(&self, household: &NewHousehold) -> GatewayResult<Household> {
        self.call("create_household", |s| {
            let created = Household {
                id: s.households.len() as i64 + 1,
                name: household.name.clone(),
                admin_role: household.admin_role.clone(),
                members: household.members.clone(),
                code: household.code.clone(),
            };
            s.households.push(created.clone());
            GatewayResult::Ok(created)
        })
        .await
    }

    async fn verify_household(&self, code: &HouseholdCode) -> GatewayResult<Household> {
        self.call("verify_household", |s| {
            s.households
                .iter()
                .find(|h| &h.code == code)
                .cloned()
                .map(GatewayResult::Ok)
                .unwrap_or_else(not_found)
        })
        .await
    }
}
