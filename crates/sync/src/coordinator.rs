//! Sync Coordinator: remote-first mutations with local fallback, and the
//! reconciliation pass that pushes pending rows once the network is back.
//!
//! Every task mutation follows the same shape:
//! - `Ok` from the gateway: write the confirmed row as `Clean`.
//! - `NetworkError`: apply locally, mark the row pending, report success.
//! - `Failed`: surface the error and leave the store untouched.
//!
//! Mutations and reconciliation on the same task id are serialized by
//! [`TaskLocks`]. At most one reconciliation pass runs at a time.

use std::sync::Arc;

use familyflow_auth::Session;
use familyflow_core::{
    Household, HouseholdCode, NewHousehold, NewTask, Registration, RoomType, Task, TaskId, User, UserId,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{SyncError, SyncResult};
use crate::gateway::{GatewayResult, LoginRequest, RegisterRequest, RemoteGateway, RemoteUser};
use crate::locks::TaskLocks;
use crate::status::StatusQueue;
use crate::store::{LocalStore, UserConflict};
use crate::types::{ReconcileOutcome, SyncEvent, SyncReport, SyncState, TrackedTask};

pub struct SyncCoordinator {
    store: LocalStore,
    gateway: Arc<dyn RemoteGateway>,
    session: Arc<Session>,
    status: StatusQueue,
    locks: TaskLocks,
    pass: Mutex<()>,
}

impl core::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("store", &self.store)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl SyncCoordinator {
    pub fn new(
        store: LocalStore,
        gateway: Arc<dyn RemoteGateway>,
        session: Arc<Session>,
        status: StatusQueue,
    ) -> Self {
        Self {
            store,
            gateway,
            session,
            status,
            locks: TaskLocks::new(),
            pass: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    // ─────────────────────────────────────────────────────────────────────
    // Tasks
    // ─────────────────────────────────────────────────────────────────────

    /// Create a task. Offline, the task is stored under a placeholder id and
    /// returned with it.
    pub async fn create_task(&self, new: NewTask) -> SyncResult<Task> {
        let task = new.into_task()?;

        match self.gateway.create_task(&task).await {
            GatewayResult::Ok(confirmed) => {
                self.store.insert_or_replace_task(&confirmed, SyncState::Clean).await?;
                tracing::info!(task_id = %confirmed.id, room = %confirmed.room_type, "task created");
                Ok(confirmed)
            }
            GatewayResult::NetworkError(cause) => {
                let id = self
                    .store
                    .insert_or_replace_task(&task, SyncState::PendingCreate)
                    .await?;
                tracing::warn!(task_id = %id, "remote unreachable, task queued for creation: {cause}");
                self.queued(id, SyncState::PendingCreate);
                Ok(task.with_id(id))
            }
            GatewayResult::Failed { status, message } => Err(self.rejected(status, message)),
        }
    }

    /// Replace the editable fields of an existing task.
    pub async fn update_task(&self, task: Task) -> SyncResult<Task> {
        task.validate()?;
        let (id, _guard) = self.lock_task(task.id).await?;
        let current = self.live_row(id).await?;
        self.push_edit(current.state, task.with_id(id)).await
    }

    pub async fn set_task_done(&self, id: TaskId, done: bool) -> SyncResult<Task> {
        let (id, _guard) = self.lock_task(id).await?;
        let current = self.live_row(id).await?;
        let mut task = current.task;
        task.is_done = done;
        self.push_edit(current.state, task).await
    }

    /// Must be called with the row's lock held.
    async fn push_edit(&self, state: SyncState, task: Task) -> SyncResult<Task> {
        let id = task.id;

        // Never created remotely: the edit folds into the pending create.
        if state == SyncState::PendingCreate {
            return match self.gateway.create_task(&task).await {
                GatewayResult::Ok(confirmed) => {
                    self.store.replace_placeholder_id(id, &confirmed).await?;
                    tracing::info!(placeholder = %id, task_id = %confirmed.id, "pending task created on edit");
                    Ok(confirmed)
                }
                GatewayResult::NetworkError(cause) => {
                    self.store.update_task(&task, SyncState::PendingCreate).await?;
                    tracing::warn!(task_id = %id, "remote unreachable, edit kept with pending create: {cause}");
                    self.queued(id, SyncState::PendingCreate);
                    Ok(task)
                }
                GatewayResult::Failed { status, message } => Err(self.rejected(status, message)),
            };
        }

        match self.gateway.update_task(&task).await {
            GatewayResult::Ok(confirmed) => {
                let confirmed = confirmed.with_id(id);
                self.store.update_task(&confirmed, SyncState::Clean).await?;
                tracing::info!(task_id = %id, "task updated");
                Ok(confirmed)
            }
            GatewayResult::NetworkError(cause) => {
                self.store.update_task(&task, SyncState::PendingUpdate).await?;
                tracing::warn!(task_id = %id, "remote unreachable, task update queued: {cause}");
                self.queued(id, SyncState::PendingUpdate);
                Ok(task)
            }
            GatewayResult::Failed { status, message } => Err(self.rejected(status, message)),
        }
    }

    /// Delete a task. Deleting an unknown id succeeds.
    pub async fn delete_task(&self, id: TaskId) -> SyncResult<()> {
        let (id, _guard) = match self.lock_task(id).await {
            Ok(locked) => locked,
            Err(SyncError::NotFound) => return Ok(()),
            Err(e) => return Err(e),
        };
        let Some(current) = self.store.get_task(id).await? else {
            return Ok(());
        };

        match current.state {
            SyncState::Tombstoned => return Ok(()),
            SyncState::PendingCreate => {
                self.store.delete_task(id).await?;
                tracing::info!(task_id = %id, "unsynced task deleted locally");
                return Ok(());
            }
            SyncState::Clean | SyncState::PendingUpdate => {}
        }

        match self.gateway.delete_task(id).await {
            GatewayResult::Ok(()) | GatewayResult::Failed { status: 404, .. } => {
                self.store.delete_task(id).await?;
                tracing::info!(task_id = %id, "task deleted");
                Ok(())
            }
            GatewayResult::NetworkError(cause) => {
                self.store.mark_task_state(id, SyncState::Tombstoned).await?;
                tracing::warn!(task_id = %id, "remote unreachable, task tombstoned: {cause}");
                self.queued(id, SyncState::Tombstoned);
                Ok(())
            }
            GatewayResult::Failed { status, message } => Err(self.rejected(status, message)),
        }
    }

    /// Delete every task of a room. Offline, rows the remote never saw are
    /// dropped and the rest are tombstoned.
    pub async fn delete_all_by_room(&self, room: &RoomType) -> SyncResult<()> {
        let mut ids: Vec<TaskId> = self
            .store
            .get_tracked_tasks_by_room(room)
            .await?
            .iter()
            .map(TrackedTask::id)
            .collect();
        ids.sort();
        let mut guards: Vec<OwnedMutexGuard<()>> = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.locks.lock(id).await);
        }

        match self.gateway.delete_room_tasks(room).await {
            GatewayResult::Ok(()) => {
                let removed = self.store.delete_all_by_room(room).await?;
                tracing::info!(%room, removed, "room cleared");
                Ok(())
            }
            GatewayResult::NetworkError(cause) => {
                let tombstoned = self.store.tombstone_room(room).await?;
                tracing::warn!(%room, tombstoned = tombstoned.len(), "remote unreachable, room delete queued: {cause}");
                for id in tombstoned {
                    self.queued(id, SyncState::Tombstoned);
                }
                Ok(())
            }
            GatewayResult::Failed { status, message } => Err(self.rejected(status, message)),
        }
    }

    /// Refresh a room from the remote when reachable, then return the local
    /// view. Unsynced local rows always win over the server copy.
    pub async fn fetch_tasks_by_room(&self, room: &RoomType) -> SyncResult<Vec<Task>> {
        // Local writes that land while the listing is in flight are newer
        // than it and must survive the merge.
        let listed_at = self.store.write_mark().await?;
        match self.gateway.list_room_tasks(room).await {
            GatewayResult::Ok(remote) => {
                tracing::debug!(%room, count = remote.len(), "merging remote tasks");
                self.store.merge_remote_room(room, &remote, listed_at).await?;
            }
            GatewayResult::NetworkError(cause) => {
                tracing::debug!(%room, "remote unreachable, serving local tasks: {cause}");
            }
            GatewayResult::Failed { status, message } => return Err(self.rejected(status, message)),
        }
        Ok(self.store.get_tasks_by_room(room).await?)
    }

    /// Local rows of a room with their sync state, for unsynced badges.
    pub async fn tracked_tasks_by_room(&self, room: &RoomType) -> SyncResult<Vec<TrackedTask>> {
        Ok(self.store.get_tracked_tasks_by_room(room).await?)
    }

    /// Sync state of a task, following placeholder ids that were since
    /// replaced. `None` when the row is gone.
    pub async fn task_sync_state(&self, id: TaskId) -> SyncResult<Option<SyncState>> {
        let Some(id) = self.store.resolve_task_id(id).await? else {
            return Ok(None);
        };
        Ok(self.store.get_task(id).await?.map(|row| row.state))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Users and session
    // ─────────────────────────────────────────────────────────────────────

    /// Register a user. Offline, the account is created locally only and
    /// the session carries no token.
    pub async fn register(&self, registration: Registration) -> SyncResult<User> {
        registration.validate()?;

        // Fail fast before the round trip; the insert below re-checks.
        if self.store.username_exists(&registration.username).await? {
            return Err(taken(UserConflict::Username, &registration));
        }
        if self.store.email_exists(&registration.email).await? {
            return Err(taken(UserConflict::Email, &registration));
        }

        let request = RegisterRequest {
            username: registration.username.clone(),
            email: registration.email.clone(),
            password: registration.password.clone(),
        };

        match self.gateway.register(&request).await {
            GatewayResult::Ok(remote) => {
                let user = self.cache_remote_user(remote.clone(), registration.password).await?;
                self.session.save(remote.token, user.id)?;
                tracing::info!(user_id = %user.id, "user registered");
                Ok(user)
            }
            GatewayResult::NetworkError(cause) => {
                let password_hash = hash_off_thread(registration.password.clone()).await?;
                let mut user = User {
                    id: UserId::UNASSIGNED,
                    username: registration.username.clone(),
                    email: registration.email.clone(),
                    password_hash,
                };
                user.id = self
                    .store
                    .insert_user(&user)
                    .await?
                    .map_err(|conflict| taken(conflict, &registration))?;
                self.session.save(None, user.id)?;
                tracing::warn!(user_id = %user.id, "remote unreachable, user registered locally: {cause}");
                Ok(user)
            }
            GatewayResult::Failed { status, message } => Err(self.rejected_auth(status, message)),
        }
    }

    /// Log in by username or email, falling back to the local credential
    /// cache when the remote is unreachable.
    pub async fn login(&self, username_or_email: &str, password: &str) -> SyncResult<User> {
        let login = username_or_email.trim();
        if login.is_empty() || password.is_empty() {
            return Err(SyncError::ValidationRejected(
                "username or email and password are required".into(),
            ));
        }

        let request = LoginRequest {
            username_or_email: login.to_string(),
            password: password.to_string(),
        };

        match self.gateway.login(&request).await {
            GatewayResult::Ok(remote) => {
                let user = self.cache_remote_user(remote.clone(), password.to_string()).await?;
                self.session.save(remote.token, user.id)?;
                tracing::info!(user_id = %user.id, "logged in");
                Ok(user)
            }
            GatewayResult::NetworkError(cause) => {
                tracing::warn!("remote unreachable, trying local login: {cause}");
                let Some(user) = self.store.authenticate(login, password).await? else {
                    return Err(SyncError::InvalidCredentials);
                };
                let token = self
                    .session
                    .get()
                    .auth_token
                    .filter(|_| self.session.user_id() == Some(user.id));
                self.session.save(token, user.id)?;
                tracing::info!(user_id = %user.id, "logged in locally");
                Ok(user)
            }
            GatewayResult::Failed { status: 400 | 401 | 403 | 404, .. } => Err(SyncError::InvalidCredentials),
            GatewayResult::Failed { status, message } => Err(self.rejected_auth(status, message)),
        }
    }

    pub fn logout(&self) -> SyncResult<()> {
        self.session.clear()?;
        tracing::info!("logged out");
        Ok(())
    }

    /// Fetch a user profile, caching it locally. Served from the cache when
    /// the remote is unreachable.
    pub async fn fetch_user(&self, id: UserId) -> SyncResult<User> {
        match self.gateway.get_user(id).await {
            GatewayResult::Ok(remote) => {
                let user = User {
                    id: remote.user_id(),
                    username: remote.username,
                    email: remote.email,
                    password_hash: String::new(),
                };
                Ok(self.store.cache_user(&user).await?)
            }
            GatewayResult::NetworkError(cause) => match self.store.get_user(id).await? {
                Some(user) => Ok(user),
                None => Err(SyncError::NetworkUnavailable(cause)),
            },
            GatewayResult::Failed { status, message } => Err(self.rejected(status, message)),
        }
    }

    pub async fn username_available(&self, username: &str) -> SyncResult<bool> {
        match self.gateway.check_username(username).await {
            GatewayResult::Ok(exists) => Ok(!exists),
            GatewayResult::NetworkError(_) => Ok(!self.store.username_exists(username).await?),
            GatewayResult::Failed { status, message } => Err(self.rejected(status, message)),
        }
    }

    pub async fn email_available(&self, email: &str) -> SyncResult<bool> {
        match self.gateway.check_email(email).await {
            GatewayResult::Ok(exists) => Ok(!exists),
            GatewayResult::NetworkError(_) => Ok(!self.store.email_exists(email).await?),
            GatewayResult::Failed { status, message } => Err(self.rejected(status, message)),
        }
    }

    async fn cache_remote_user(&self, remote: RemoteUser, password: String) -> SyncResult<User> {
        let user = User {
            id: remote.user_id(),
            username: remote.username,
            email: remote.email,
            password_hash: hash_off_thread(password).await?,
        };
        Ok(self.store.cache_user(&user).await?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Households (remote only)
    // ─────────────────────────────────────────────────────────────────────

    pub async fn create_household(&self, household: NewHousehold) -> SyncResult<Household> {
        household.validate()?;
        match self.gateway.create_household(&household).await {
            GatewayResult::Ok(created) => {
                tracing::info!(household_id = created.id, "household created");
                Ok(created)
            }
            GatewayResult::NetworkError(cause) => Err(SyncError::NetworkUnavailable(cause)),
            GatewayResult::Failed { status, message } => Err(self.rejected(status, message)),
        }
    }

    pub async fn verify_household_code(&self, code: &str) -> SyncResult<Household> {
        let code = HouseholdCode::new(code)?;
        match self.gateway.verify_household(&code).await {
            GatewayResult::Ok(household) => Ok(household),
            GatewayResult::NetworkError(cause) => Err(SyncError::NetworkUnavailable(cause)),
            GatewayResult::Failed { status, message } => Err(self.rejected(status, message)),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reconciliation
    // ─────────────────────────────────────────────────────────────────────

    /// Push every pending and tombstoned row. A request arriving while a
    /// pass is running is coalesced into it.
    pub async fn reconcile(&self) -> SyncResult<ReconcileOutcome> {
        let Ok(_pass) = self.pass.try_lock() else {
            tracing::debug!("reconciliation already running, request coalesced");
            return Ok(ReconcileOutcome::Coalesced);
        };

        let pending = match self.store.pending_tasks().await {
            Ok(pending) => pending,
            Err(e) => {
                let err = SyncError::from(e);
                self.status.publish(SyncEvent::ReconcileFailed { error: err.to_string() });
                return Err(err);
            }
        };

        if pending.is_empty() {
            tracing::debug!("reconciliation found nothing pending");
            return Ok(ReconcileOutcome::Completed(SyncReport::default()));
        }

        tracing::info!(pending = pending.len(), "reconciliation started");
        let mut report = SyncReport::default();
        for row in pending {
            let id = row.id();
            if let Err(e) = self.reconcile_row(id, &mut report).await {
                tracing::error!(task_id = %id, "reconciliation of task failed: {e}");
                report.failed.push((id, e.to_string()));
            }
        }

        tracing::info!(
            created = report.created.len(),
            updated = report.updated.len(),
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "reconciliation finished"
        );
        self.status.publish(SyncEvent::ReconcileCompleted {
            pushed: report.pushed(),
            failed: report.failed.len(),
        });
        Ok(ReconcileOutcome::Completed(report))
    }

    /// Push one row. Remote failures are recorded on the row and in the
    /// report; only local storage errors are returned.
    async fn reconcile_row(&self, id: TaskId, report: &mut SyncReport) -> SyncResult<()> {
        let (id, _guard) = match self.lock_task(id).await {
            Ok(locked) => locked,
            Err(SyncError::NotFound) => return Ok(()),
            Err(e) => return Err(e),
        };
        // Re-read under the lock: a live mutation may have settled the row.
        let Some(row) = self.store.get_task(id).await? else {
            return Ok(());
        };

        match row.state {
            SyncState::Clean => Ok(()),
            SyncState::PendingCreate => match self.gateway.create_task(&row.task).await {
                GatewayResult::Ok(confirmed) => {
                    self.store.replace_placeholder_id(id, &confirmed).await?;
                    tracing::debug!(placeholder = %id, task_id = %confirmed.id, "pending task created");
                    report.created.push((id, confirmed.id));
                    Ok(())
                }
                other => self.record_failure(id, other, report).await,
            },
            SyncState::PendingUpdate => match self.gateway.update_task(&row.task).await {
                GatewayResult::Ok(confirmed) => {
                    self.store.update_task(&confirmed.with_id(id), SyncState::Clean).await?;
                    tracing::debug!(task_id = %id, "pending update pushed");
                    report.updated.push(id);
                    Ok(())
                }
                other => self.record_failure(id, other, report).await,
            },
            SyncState::Tombstoned => match self.gateway.delete_task(id).await {
                GatewayResult::Ok(()) | GatewayResult::Failed { status: 404, .. } => {
                    self.store.delete_task(id).await?;
                    tracing::debug!(task_id = %id, "tombstone pushed");
                    report.deleted.push(id);
                    Ok(())
                }
                other => self.record_failure(id, other, report).await,
            },
        }
    }

    async fn record_failure<T>(&self, id: TaskId, result: GatewayResult<T>, report: &mut SyncReport) -> SyncResult<()> {
        let reason = match result {
            GatewayResult::Ok(_) => return Ok(()),
            GatewayResult::NetworkError(cause) => SyncError::NetworkUnavailable(cause).to_string(),
            GatewayResult::Failed { status, message } => self.rejected(status, message).to_string(),
        };
        tracing::warn!(task_id = %id, "task stays pending: {reason}");
        self.store.record_sync_failure(id, &reason).await?;
        report.failed.push((id, reason));
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────

    /// Lock the row `id` currently refers to. Loops if reconciliation swaps
    /// the id while we wait.
    async fn lock_task(&self, id: TaskId) -> SyncResult<(TaskId, OwnedMutexGuard<()>)> {
        loop {
            let resolved = self.store.resolve_task_id(id).await?.ok_or(SyncError::NotFound)?;
            let guard = self.locks.lock(resolved).await;
            if self.store.resolve_task_id(id).await? == Some(resolved) {
                return Ok((resolved, guard));
            }
        }
    }

    /// A row that callers may still edit.
    async fn live_row(&self, id: TaskId) -> SyncResult<TrackedTask> {
        match self.store.get_task(id).await? {
            Some(row) if row.state != SyncState::Tombstoned => Ok(row),
            _ => Err(SyncError::NotFound),
        }
    }

    fn queued(&self, task_id: TaskId, state: SyncState) {
        self.status.publish(SyncEvent::MutationQueued { task_id, state });
    }

    fn rejected(&self, status: u16, message: String) -> SyncError {
        self.expire_if_unauthorized(SyncError::from_status(status, message, false))
    }

    fn rejected_auth(&self, status: u16, message: String) -> SyncError {
        self.expire_if_unauthorized(SyncError::from_status(status, message, true))
    }

    fn expire_if_unauthorized(&self, err: SyncError) -> SyncError {
        if err == SyncError::Unauthorized {
            tracing::warn!("remote rejected the session, signing out");
            if let Err(e) = self.session.clear() {
                tracing::error!("failed to clear expired session: {e}");
            }
            self.status.publish(SyncEvent::SessionExpired);
        }
        err
    }
}

fn taken(conflict: UserConflict, registration: &Registration) -> SyncError {
    SyncError::ConflictDuringAuth(match conflict {
        UserConflict::Username => format!("username '{}' is already taken", registration.username),
        UserConflict::Email => format!("email '{}' is already registered", registration.email),
    })
}

/// Argon2 is deliberately slow; keep it off the async workers.
async fn hash_off_thread(password: String) -> SyncResult<String> {
    tokio::task::spawn_blocking(move || familyflow_auth::hash_password(&password))
        .await
        .map_err(SyncError::storage)?
        .map_err(SyncError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusReceiver;
    use crate::testing::{FakeGateway, FakeMode};
    use familyflow_core::Weekday;
    use std::time::Duration;

    struct Harness {
        coordinator: Arc<SyncCoordinator>,
        gateway: Arc<FakeGateway>,
        events: StatusReceiver,
    }

    async fn harness(gateway: FakeGateway) -> Harness {
        let gateway = Arc::new(gateway);
        let (status, events) = StatusQueue::new();
        let coordinator = SyncCoordinator::new(
            LocalStore::in_memory().await.unwrap(),
            gateway.clone(),
            Arc::new(Session::in_memory()),
            status,
        );
        Harness {
            coordinator: Arc::new(coordinator),
            gateway,
            events,
        }
    }

    fn dishes() -> NewTask {
        NewTask::new("Dishes", [Weekday::Mon, Weekday::Wed], RoomType::kitchen())
    }

    async fn kitchen(h: &Harness) -> Vec<TrackedTask> {
        h.coordinator.tracked_tasks_by_room(&RoomType::kitchen()).await.unwrap()
    }

    fn completed(outcome: ReconcileOutcome) -> SyncReport {
        match outcome {
            ReconcileOutcome::Completed(report) => report,
            ReconcileOutcome::Coalesced => panic!("expected a completed pass"),
        }
    }

    #[tokio::test]
    async fn online_create_stores_server_id_clean() {
        let h = harness(FakeGateway::new()).await;
        let task = h.coordinator.create_task(dishes()).await.unwrap();
        assert_eq!(task.id, TaskId::new(42));

        let rows = kitchen(&h).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id(), TaskId::new(42));
        assert_eq!(rows[0].state, SyncState::Clean);
    }

    #[tokio::test]
    async fn offline_create_is_visible_then_reconciled_to_server_id() {
        let mut h = harness(FakeGateway::offline()).await;

        let task = h.coordinator.create_task(dishes()).await.unwrap();
        assert!(task.id.is_placeholder());
        assert!(!task.is_done);

        let visible = h.coordinator.fetch_tasks_by_room(&RoomType::kitchen()).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].name, "Dishes");
        assert!(!visible[0].is_done);
        assert_eq!(kitchen(&h).await[0].state, SyncState::PendingCreate);
        assert_eq!(
            h.events.try_recv(),
            Some(SyncEvent::MutationQueued {
                task_id: task.id,
                state: SyncState::PendingCreate
            })
        );

        h.gateway.set_mode(FakeMode::Online);
        let report = completed(h.coordinator.reconcile().await.unwrap());
        assert_eq!(report.created, vec![(task.id, TaskId::new(42))]);

        let rows = kitchen(&h).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id(), TaskId::new(42));
        assert_eq!(rows[0].state, SyncState::Clean);
        assert_eq!(
            h.coordinator.task_sync_state(task.id).await.unwrap(),
            Some(SyncState::Clean)
        );
    }

    #[tokio::test]
    async fn second_pass_pushes_nothing() {
        let h = harness(FakeGateway::offline()).await;
        h.coordinator.create_task(dishes()).await.unwrap();
        h.gateway.set_mode(FakeMode::Online);

        assert_eq!(completed(h.coordinator.reconcile().await.unwrap()).pushed(), 1);
        assert!(completed(h.coordinator.reconcile().await.unwrap()).is_empty());
        assert_eq!(h.gateway.calls("create_task"), 2);
        assert_eq!(h.gateway.remote_task_count(), 1);
    }

    #[tokio::test]
    async fn locally_invalid_task_never_reaches_store_or_remote() {
        let h = harness(FakeGateway::offline()).await;
        let err = h
            .coordinator
            .create_task(NewTask::new("Dishes", [], RoomType::kitchen()))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ValidationRejected(_)));
        assert!(kitchen(&h).await.is_empty());
        assert_eq!(h.gateway.calls("create_task"), 0);

        h.gateway.set_mode(FakeMode::Online);
        assert!(completed(h.coordinator.reconcile().await.unwrap()).is_empty());
    }

    #[tokio::test]
    async fn remote_rejection_is_surfaced_and_not_queued() {
        let h = harness(FakeGateway::new()).await;
        h.gateway.set_mode(FakeMode::Status(422));
        let err = h.coordinator.create_task(dishes()).await.unwrap_err();
        assert!(matches!(err, SyncError::ValidationRejected(_)));
        assert!(kitchen(&h).await.is_empty());
        assert!(h.coordinator.store().pending_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn offline_edit_then_reconcile_pushes_update() {
        let h = harness(FakeGateway::new()).await;
        let task = h.coordinator.create_task(dishes()).await.unwrap();

        h.gateway.set_mode(FakeMode::Offline);
        let done = h.coordinator.set_task_done(task.id, true).await.unwrap();
        assert!(done.is_done);
        assert_eq!(kitchen(&h).await[0].state, SyncState::PendingUpdate);
        assert!(!h.gateway.remote_task(42).unwrap().is_done);

        h.gateway.set_mode(FakeMode::Online);
        let report = completed(h.coordinator.reconcile().await.unwrap());
        assert_eq!(report.updated, vec![TaskId::new(42)]);
        assert!(h.gateway.remote_task(42).unwrap().is_done);
        assert_eq!(kitchen(&h).await[0].state, SyncState::Clean);
    }

    #[tokio::test]
    async fn editing_an_unsynced_task_keeps_it_pending_create() {
        let h = harness(FakeGateway::offline()).await;
        let task = h.coordinator.create_task(dishes()).await.unwrap();

        let mut edited = task.clone();
        edited.name = "Dishes and pans".into();
        h.coordinator.update_task(edited).await.unwrap();

        let rows = kitchen(&h).await;
        assert_eq!(rows[0].state, SyncState::PendingCreate);
        assert_eq!(rows[0].task.name, "Dishes and pans");

        h.gateway.set_mode(FakeMode::Online);
        h.coordinator.set_task_done(task.id, true).await.unwrap();
        let row = &kitchen(&h).await[0];
        assert_eq!(row.id(), TaskId::new(42));
        assert_eq!(row.state, SyncState::Clean);
        assert_eq!(h.gateway.remote_task(42).unwrap().name, "Dishes and pans");
    }

    #[tokio::test]
    async fn offline_delete_tombstones_until_reconciled() {
        let h = harness(FakeGateway::new()).await;
        let task = h.coordinator.create_task(dishes()).await.unwrap();

        h.gateway.set_mode(FakeMode::Offline);
        h.coordinator.delete_task(task.id).await.unwrap();
        assert!(kitchen(&h).await.is_empty());
        assert_eq!(
            h.coordinator.task_sync_state(task.id).await.unwrap(),
            Some(SyncState::Tombstoned)
        );

        h.gateway.set_mode(FakeMode::Online);
        let report = completed(h.coordinator.reconcile().await.unwrap());
        assert_eq!(report.deleted, vec![task.id]);
        assert!(h.gateway.remote_task(42).is_none());
        assert_eq!(h.coordinator.task_sync_state(task.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn deleting_unsynced_task_never_calls_remote() {
        let h = harness(FakeGateway::offline()).await;
        let task = h.coordinator.create_task(dishes()).await.unwrap();
        h.gateway.set_mode(FakeMode::Online);

        h.coordinator.delete_task(task.id).await.unwrap();
        assert_eq!(h.gateway.calls("delete_task"), 0);
        assert!(h.coordinator.store().pending_tasks().await.unwrap().is_empty());

        // Unknown ids are a no-op.
        h.coordinator.delete_task(TaskId::new(999)).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_delete_and_update_do_not_tear() {
        let h = harness(FakeGateway::new()).await;
        let task = h.coordinator.create_task(dishes()).await.unwrap();
        h.gateway.set_latency(Duration::from_millis(10));

        let mut edited = task.clone();
        edited.name = "Dishes and pans".into();
        edited.is_done = true;

        let (deleted, updated) = tokio::join!(
            h.coordinator.delete_task(task.id),
            h.coordinator.update_task(edited.clone()),
        );
        deleted.unwrap();

        match h.coordinator.store().get_task(task.id).await.unwrap() {
            None => assert!(matches!(updated, Err(SyncError::NotFound)) || updated.is_ok()),
            Some(row) => {
                assert_eq!(row.task, edited);
                assert_eq!(row.state, SyncState::Clean);
            }
        }
    }

    #[tokio::test]
    async fn reconcile_continues_past_rejected_rows() {
        let h = harness(FakeGateway::offline()).await;
        h.coordinator
            .create_task(NewTask::new("Bad", [Weekday::Tue], RoomType::kitchen()))
            .await
            .unwrap();
        h.coordinator
            .create_task(NewTask::new("Mop", [Weekday::Fri], RoomType::bathroom()))
            .await
            .unwrap();

        h.gateway.set_mode(FakeMode::Online);
        h.gateway.reject_task_named("Bad");
        let report = completed(h.coordinator.reconcile().await.unwrap());
        assert_eq!(report.created.len(), 1);
        assert_eq!(report.failed.len(), 1);

        let pending = h.coordinator.store().pending_tasks().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].task.name, "Bad");
        assert_eq!(pending[0].attempts, 1);
        assert!(pending[0].last_error.is_some());
    }

    #[tokio::test]
    async fn reconcile_visits_rooms_in_order() {
        let h = harness(FakeGateway::offline()).await;
        for (name, room) in [
            ("Dust", RoomType::livingroom()),
            ("Mop", RoomType::bathroom()),
            ("Dishes", RoomType::kitchen()),
        ] {
            h.coordinator
                .create_task(NewTask::new(name, [Weekday::Sat], room))
                .await
                .unwrap();
        }
        h.gateway.set_mode(FakeMode::Online);
        completed(h.coordinator.reconcile().await.unwrap());

        assert_eq!(h.gateway.remote_task(42).unwrap().name, "Dishes");
        assert_eq!(h.gateway.remote_task(43).unwrap().name, "Mop");
        assert_eq!(h.gateway.remote_task(44).unwrap().name, "Dust");
    }

    #[tokio::test]
    async fn overlapping_reconcile_is_coalesced() {
        let h = harness(FakeGateway::new()).await;
        let _running = h.coordinator.pass.try_lock().unwrap();
        assert_eq!(h.coordinator.reconcile().await.unwrap(), ReconcileOutcome::Coalesced);
    }

    #[tokio::test]
    async fn room_delete_offline_drops_unsynced_and_tombstones_known() {
        let h = harness(FakeGateway::new()).await;
        h.coordinator.create_task(dishes()).await.unwrap();
        h.gateway.set_mode(FakeMode::Offline);
        h.coordinator
            .create_task(NewTask::new("Oven", [Weekday::Sun], RoomType::kitchen()))
            .await
            .unwrap();

        h.coordinator.delete_all_by_room(&RoomType::kitchen()).await.unwrap();
        assert!(kitchen(&h).await.is_empty());
        let pending = h.coordinator.store().pending_tasks().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id(), TaskId::new(42));
        assert_eq!(pending[0].state, SyncState::Tombstoned);

        h.gateway.set_mode(FakeMode::Online);
        completed(h.coordinator.reconcile().await.unwrap());
        assert_eq!(h.gateway.remote_task_count(), 0);
        assert!(h.coordinator.store().pending_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetch_merges_remote_and_keeps_local_pending() {
        let h = harness(FakeGateway::new()).await;
        let other_device = NewTask::new("Fridge", [Weekday::Thu], RoomType::kitchen())
            .into_task()
            .unwrap()
            .with_id(TaskId::new(7));
        h.gateway.seed_task(other_device);

        h.gateway.set_mode(FakeMode::Offline);
        h.coordinator.create_task(dishes()).await.unwrap();
        let offline_view = h.coordinator.fetch_tasks_by_room(&RoomType::kitchen()).await.unwrap();
        assert_eq!(offline_view.len(), 1);

        h.gateway.set_mode(FakeMode::Online);
        let names: Vec<_> = h
            .coordinator
            .fetch_tasks_by_room(&RoomType::kitchen())
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, ["Dishes", "Fridge"]);
    }

    fn spawn_kitchen_fetch(h: &Harness) -> tokio::task::JoinHandle<SyncResult<Vec<Task>>> {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move { coordinator.fetch_tasks_by_room(&RoomType::kitchen()).await })
    }

    #[tokio::test]
    async fn refresh_keeps_task_created_while_listing_was_in_flight() {
        let h = harness(FakeGateway::new()).await;
        h.gateway.set_listing_delay(Duration::from_millis(100));

        let fetch = spawn_kitchen_fetch(&h);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let created = h.coordinator.create_task(dishes()).await.unwrap();
        assert_eq!(created.id, TaskId::new(42));

        let view = fetch.await.unwrap().unwrap();
        assert_eq!(view.iter().map(|t| t.id).collect::<Vec<_>>(), [TaskId::new(42)]);
        assert_eq!(
            h.coordinator.task_sync_state(created.id).await.unwrap(),
            Some(SyncState::Clean)
        );
    }

    #[tokio::test]
    async fn refresh_keeps_task_reconciled_while_listing_was_in_flight() {
        let h = harness(FakeGateway::offline()).await;
        let placeholder = h.coordinator.create_task(dishes()).await.unwrap().id;
        h.gateway.set_mode(FakeMode::Online);
        h.gateway.set_listing_delay(Duration::from_millis(100));

        let fetch = spawn_kitchen_fetch(&h);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(completed(h.coordinator.reconcile().await.unwrap()).pushed(), 1);

        fetch.await.unwrap().unwrap();
        let rows = kitchen(&h).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id(), TaskId::new(42));
        assert_eq!(rows[0].state, SyncState::Clean);
        assert_eq!(
            h.coordinator.store().resolve_task_id(placeholder).await.unwrap(),
            Some(TaskId::new(42))
        );
    }

    #[tokio::test]
    async fn refresh_does_not_resurrect_task_deleted_while_listing_was_in_flight() {
        let h = harness(FakeGateway::new()).await;
        let task = h.coordinator.create_task(dishes()).await.unwrap();
        h.gateway.set_listing_delay(Duration::from_millis(100));

        let fetch = spawn_kitchen_fetch(&h);
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.coordinator.delete_task(task.id).await.unwrap();

        assert!(fetch.await.unwrap().unwrap().is_empty());
        assert_eq!(h.coordinator.task_sync_state(task.id).await.unwrap(), None);

        // A listing requested after the delete is authoritative again.
        h.gateway.seed_task(task.clone());
        let view = h.coordinator.fetch_tasks_by_room(&RoomType::kitchen()).await.unwrap();
        assert_eq!(view.len(), 1);
    }

    #[tokio::test]
    async fn unauthorized_clears_session_and_notifies() {
        let mut h = harness(FakeGateway::new()).await;
        h.coordinator
            .session()
            .save(Some("stale".into()), UserId::new(7))
            .unwrap();
        h.gateway.set_mode(FakeMode::Status(401));

        let err = h.coordinator.create_task(dishes()).await.unwrap_err();
        assert_eq!(err, SyncError::Unauthorized);
        assert!(!h.coordinator.session().get().is_authenticated());
        assert_eq!(h.events.try_recv(), Some(SyncEvent::SessionExpired));
        assert!(kitchen(&h).await.is_empty());
    }

    #[tokio::test]
    async fn register_online_caches_hashed_user_and_session() {
        let h = harness(FakeGateway::new()).await;
        let user = h
            .coordinator
            .register(Registration::new("alice", "alice@x.com", "secret1"))
            .await
            .unwrap();
        assert_eq!(user.id, UserId::new(7));

        let stored = h.coordinator.store().get_user_by_username("alice").await.unwrap().unwrap();
        assert_eq!(stored.email, "alice@x.com");
        assert_ne!(stored.password_hash, "secret1");
        assert!(stored.password_hash.starts_with("$argon2"));
        assert!(h.coordinator.store().get_user_by_email("alice@x.com").await.unwrap().is_some());

        let session = h.coordinator.session().get();
        assert_eq!(session.auth_token.as_deref(), Some("tok-alice"));
        assert_eq!(session.user_id, Some(UserId::new(7)));
    }

    #[tokio::test]
    async fn register_rejects_invalid_input_and_local_duplicates() {
        let h = harness(FakeGateway::new()).await;
        let err = h
            .coordinator
            .register(Registration::new("al", "alice@x.com", "secret1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ValidationRejected(_)));

        h.coordinator
            .register(Registration::new("alice", "alice@x.com", "secret1"))
            .await
            .unwrap();
        let err = h
            .coordinator
            .register(Registration::new("alice", "other@x.com", "secret1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ConflictDuringAuth(_)));
        let err = h
            .coordinator
            .register(Registration::new("alicia", "alice@x.com", "secret1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ConflictDuringAuth(_)));
        assert_eq!(h.gateway.calls("register"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_offline_registrations_of_one_username_admit_one() {
        let h = harness(FakeGateway::offline()).await;

        let (a, b) = tokio::join!(
            h.coordinator.register(Registration::new("alice", "alice@x.com", "secret1")),
            h.coordinator.register(Registration::new("alice", "alice2@x.com", "secret2")),
        );

        let (winner, loser) = match (a, b) {
            (Ok(user), Err(err)) | (Err(err), Ok(user)) => (user, err),
            (a, b) => panic!("expected exactly one registration to succeed: {a:?} / {b:?}"),
        };
        assert!(matches!(loser, SyncError::ConflictDuringAuth(_)));

        let stored = h.coordinator.store().get_user_by_username("alice").await.unwrap().unwrap();
        assert_eq!(stored.id, winner.id);
        assert_eq!(stored.email, winner.email);
        assert_eq!(h.coordinator.session().user_id(), Some(winner.id));
    }

    #[tokio::test]
    async fn offline_register_rejects_email_differing_only_in_case() {
        let h = harness(FakeGateway::offline()).await;
        h.coordinator
            .register(Registration::new("alice", "alice@x.com", "secret1"))
            .await
            .unwrap();

        let err = h
            .coordinator
            .register(Registration::new("alicia", "ALICE@x.com", "secret1"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SyncError::ConflictDuringAuth("email 'ALICE@x.com' is already registered".into())
        );
    }

    #[tokio::test]
    async fn offline_register_then_local_login() {
        let h = harness(FakeGateway::offline()).await;
        let user = h
            .coordinator
            .register(Registration::new("alice", "alice@x.com", "secret1"))
            .await
            .unwrap();
        assert!(user.id.is_placeholder());
        assert_eq!(h.coordinator.session().auth_token(), None);
        assert_eq!(h.coordinator.session().user_id(), Some(user.id));

        h.coordinator.logout().unwrap();
        assert!(!h.coordinator.session().get().is_authenticated());

        let by_email = h.coordinator.login("alice@x.com", "secret1").await.unwrap();
        assert_eq!(by_email.id, user.id);
        assert_eq!(
            h.coordinator.login("alice", "wrong!!").await.unwrap_err(),
            SyncError::InvalidCredentials
        );
    }

    #[tokio::test]
    async fn online_login_refreshes_local_user() {
        let h = harness(FakeGateway::new()).await;
        h.gateway.seed_user(5, "bob", "bob@x.com", "hunter22");

        let user = h.coordinator.login("bob", "hunter22").await.unwrap();
        assert_eq!(user.id, UserId::new(5));
        assert_eq!(h.coordinator.session().auth_token().as_deref(), Some("tok-bob"));
        assert_eq!(
            h.coordinator.login("bob", "nope").await.unwrap_err(),
            SyncError::InvalidCredentials
        );

        // The refreshed row now backs offline logins.
        h.gateway.set_mode(FakeMode::Offline);
        h.coordinator.logout().unwrap();
        assert_eq!(h.coordinator.login("bob@x.com", "hunter22").await.unwrap().id, UserId::new(5));
    }

    #[tokio::test]
    async fn availability_falls_back_to_local() {
        let h = harness(FakeGateway::new()).await;
        h.gateway.seed_user(5, "bob", "bob@x.com", "hunter22");
        assert!(!h.coordinator.username_available("bob").await.unwrap());
        assert!(h.coordinator.email_available("new@x.com").await.unwrap());

        h.gateway.set_mode(FakeMode::Offline);
        assert!(h.coordinator.username_available("bob").await.unwrap());
    }

    #[tokio::test]
    async fn fetch_user_caches_profile_without_enabling_login() {
        let h = harness(FakeGateway::new()).await;
        h.gateway.seed_user(5, "bob", "bob@x.com", "hunter22");

        let user = h.coordinator.fetch_user(UserId::new(5)).await.unwrap();
        assert_eq!(user.username, "bob");

        h.gateway.set_mode(FakeMode::Offline);
        assert_eq!(h.coordinator.fetch_user(UserId::new(5)).await.unwrap().email, "bob@x.com");
        assert!(matches!(
            h.coordinator.fetch_user(UserId::new(6)).await.unwrap_err(),
            SyncError::NetworkUnavailable(_)
        ));
        assert_eq!(
            h.coordinator.login("bob", "").await.unwrap_err(),
            SyncError::ValidationRejected("username or email and password are required".into())
        );
        assert_eq!(
            h.coordinator.login("bob", "anything").await.unwrap_err(),
            SyncError::InvalidCredentials
        );
    }

    #[tokio::test]
    async fn fetching_server_profile_keeps_offline_credential() {
        let h = harness(FakeGateway::offline()).await;
        let local = h
            .coordinator
            .register(Registration::new("alice", "alice@x.com", "secret1"))
            .await
            .unwrap();
        assert!(local.id.is_placeholder());

        // The account later shows up on the server under its real id.
        h.gateway.seed_user(9, "alice", "alice@x.com", "secret1");
        h.gateway.set_mode(FakeMode::Online);
        let fetched = h.coordinator.fetch_user(UserId::new(9)).await.unwrap();
        assert!(fetched.password_hash.starts_with("$argon2"));

        h.gateway.set_mode(FakeMode::Offline);
        h.coordinator.logout().unwrap();
        assert_eq!(h.coordinator.login("alice", "secret1").await.unwrap().id, UserId::new(9));
    }

    #[tokio::test]
    async fn households_are_remote_only() {
        let h = harness(FakeGateway::new()).await;
        let created = h
            .coordinator
            .create_household(NewHousehold {
                name: "Smiths".into(),
                admin_role: "parent".into(),
                members: vec!["Sam".into()],
                code: HouseholdCode::new("0420").unwrap(),
            })
            .await
            .unwrap();
        assert_eq!(h.coordinator.verify_household_code("0420").await.unwrap(), created);
        assert_eq!(
            h.coordinator.verify_household_code("9999").await.unwrap_err(),
            SyncError::NotFound
        );
        assert!(matches!(
            h.coordinator.verify_household_code("42").await.unwrap_err(),
            SyncError::ValidationRejected(_)
        ));

        h.gateway.set_mode(FakeMode::Offline);
        assert!(matches!(
            h.coordinator.verify_household_code("0420").await.unwrap_err(),
            SyncError::NetworkUnavailable(_)
        ));
    }
}
