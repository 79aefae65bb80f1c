//! In-memory collaborators for service and handler tests

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue};
use chrono::{DateTime, Utc};
use kiln_blob::MemoryBlobStore;
use kiln_core::domain::log::PipelineLog;
use kiln_core::domain::pipeline::{Pipeline, PipelineStatus};
use kiln_core::domain::work::OAuthToken;
use kiln_queue::MemoryWorkQueue;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::provider::{
    CommitStatus, Provider, ProviderError, ProviderRegistry, PushEvent, WebhookEvent,
};
use crate::state::AppState;
use crate::storage::{CreationInfo, NewPipeline, StateChangeInfo, Storage, StorageError};

pub const SECRET: &str = "s3cret";

pub struct TestHarness {
    pub state: AppState,
    pub storage: Arc<MemoryStorage>,
    pub queue: Arc<MemoryWorkQueue>,
    pub blobs: Arc<MemoryBlobStore>,
    pub provider: FakeProvider,
}

impl TestHarness {
    pub fn new() -> Self {
        let storage = Arc::new(MemoryStorage::default());
        let queue = Arc::new(MemoryWorkQueue::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let provider = FakeProvider::default();

        let config = Config {
            external_url: "https://ci.example.com".to_string(),
            webhook_secret: SECRET.to_string(),
            ..Config::default()
        };

        let state = AppState {
            storage: storage.clone(),
            queue: queue.clone(),
            blobs: blobs.clone(),
            providers: Arc::new(ProviderRegistry::new().with_provider(provider.clone())),
            config: Arc::new(config),
        };

        Self {
            state,
            storage,
            queue,
            blobs,
            provider,
        }
    }

    /// A pending pipeline on the default `acme/widget` repo
    pub fn create_pipeline(&self, commit: &str) -> i64 {
        let repo_id = self.storage.add_repo("fake", 101, "acme", "widget", false);
        self.storage.insert_pipeline(repo_id, commit)
    }
}

/// Headers of a delivery the fake provider accepts
pub fn push_headers(event: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-fake-event", HeaderValue::from_str(event).unwrap());
    headers.insert("x-fake-secret", HeaderValue::from_static(SECRET));
    headers
}

pub fn push_payload(repo_id: i64, commit: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({ "repo_id": repo_id, "commit": commit })).unwrap()
}

// =============================================================================
// Storage
// =============================================================================

#[derive(Debug, Clone)]
struct RepoRow {
    id: i64,
    provider: String,
    provider_repo_id: i64,
    owner: String,
    name: String,
    archived: bool,
}

#[derive(Default)]
struct StorageState {
    next_id: i64,
    repos: Vec<RepoRow>,
    pipelines: BTreeMap<i64, Pipeline>,
    logs: BTreeMap<(i64, i32), PipelineLog>,
    failing: bool,
}

#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<StorageState>,
}

impl MemoryStorage {
    /// Registers a repo, returning the ID of an existing one if already known
    pub fn add_repo(
        &self,
        provider: &str,
        provider_repo_id: i64,
        owner: &str,
        name: &str,
        archived: bool,
    ) -> i64 {
        let mut state = self.state.lock().unwrap();

        if let Some(repo) = state
            .repos
            .iter()
            .find(|r| r.provider == provider && r.provider_repo_id == provider_repo_id)
        {
            return repo.id;
        }

        let id = state.repos.len() as i64 + 1;
        state.repos.push(RepoRow {
            id,
            provider: provider.to_string(),
            provider_repo_id,
            owner: owner.to_string(),
            name: name.to_string(),
            archived,
        });
        id
    }

    pub fn insert_pipeline(&self, repo_id: i64, commit: &str) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;

        state.pipelines.insert(
            id,
            Pipeline {
                id,
                status: PipelineStatus::Pending,
                commit: commit.to_string(),
                clone_url: "https://git.example.com/acme/widget.git".to_string(),
                url: format!("https://ci.example.com/pipelines/{}", id),
                started_at: None,
                finished_at: None,
                repo_id,
            },
        );
        id
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().failing = failing;
    }

    pub fn pipeline(&self, id: i64) -> Option<Pipeline> {
        self.state.lock().unwrap().pipelines.get(&id).cloned()
    }

    pub fn pipeline_count(&self) -> usize {
        self.state.lock().unwrap().pipelines.len()
    }

    pub fn logs(&self, pipeline_id: i64) -> Vec<PipelineLog> {
        self.state
            .lock()
            .unwrap()
            .logs
            .range((pipeline_id, i32::MIN)..=(pipeline_id, i32::MAX))
            .map(|(_, log)| log.clone())
            .collect()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StorageState>, StorageError> {
        let state = self.state.lock().unwrap();
        if state.failing {
            return Err(StorageError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(state)
    }

    fn transition(
        &self,
        id: i64,
        next: PipelineStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let mut state = self.lock()?;

        let Some(pipeline) = state.pipelines.get_mut(&id) else {
            return Ok(false);
        };
        if !pipeline.status.can_advance_to(next) {
            return Ok(false);
        }

        pipeline.status = next;
        if next == PipelineStatus::Running {
            pipeline.started_at = Some(at);
        } else {
            pipeline.finished_at = Some(at);
        }
        Ok(true)
    }
}

fn token_for(owner: &str) -> OAuthToken {
    OAuthToken::bearer(format!("token-{}", owner))
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create_pipeline(&self, new: NewPipeline) -> Result<Pipeline, StorageError> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let id = state.next_id;

        let pipeline = Pipeline {
            id,
            status: PipelineStatus::Pending,
            commit: new.commit,
            clone_url: new.clone_url,
            url: format!("{}{}", new.url_base, id),
            started_at: None,
            finished_at: None,
            repo_id: new.repo_id,
        };
        state.pipelines.insert(id, pipeline.clone());
        Ok(pipeline)
    }

    async fn delete_pipeline(&self, id: i64) -> Result<bool, StorageError> {
        Ok(self.lock()?.pipelines.remove(&id).is_some())
    }

    async fn get_pipeline(&self, id: i64) -> Result<Option<Pipeline>, StorageError> {
        Ok(self.lock()?.pipelines.get(&id).cloned())
    }

    async fn get_pipeline_creation_info(
        &self,
        provider: &str,
        provider_repo_id: i64,
    ) -> Result<Option<CreationInfo>, StorageError> {
        let state = self.lock()?;

        Ok(state
            .repos
            .iter()
            .find(|r| r.provider == provider && r.provider_repo_id == provider_repo_id)
            .map(|r| CreationInfo {
                repo_id: r.id,
                owner: r.owner.clone(),
                repo_name: r.name.clone(),
                archived: r.archived,
                token: token_for(&r.owner),
            }))
    }

    async fn pipeline_started(&self, id: i64, started_at: DateTime<Utc>) -> Result<bool, StorageError> {
        self.transition(id, PipelineStatus::Running, started_at)
    }

    async fn pipeline_finished(
        &self,
        id: i64,
        status: PipelineStatus,
        finished_at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        self.transition(id, status, finished_at)
    }

    async fn get_pipeline_state_change_info(
        &self,
        id: i64,
    ) -> Result<Option<StateChangeInfo>, StorageError> {
        let state = self.lock()?;

        let Some(pipeline) = state.pipelines.get(&id) else {
            return Ok(None);
        };

        Ok(state
            .repos
            .iter()
            .find(|r| r.id == pipeline.repo_id)
            .map(|r| StateChangeInfo {
                commit: pipeline.commit.clone(),
                url: pipeline.url.clone(),
                provider: r.provider.clone(),
                owner: r.owner.clone(),
                repo_name: r.name.clone(),
                token: token_for(&r.owner),
            }))
    }

    async fn create_pipeline_log(&self, entry: &PipelineLog) -> Result<bool, StorageError> {
        let mut state = self.lock()?;
        let key = (entry.pipeline_id, entry.order);

        // Same constraint as a Postgres text column
        if entry.cmd.contains('\0') || entry.output.contains('\0') {
            return Err(StorageError::Corrupt(
                "invalid byte sequence for encoding \"UTF8\": 0x00".to_string(),
            ));
        }

        if state.logs.contains_key(&key) {
            return Ok(false);
        }
        state.logs.insert(key, entry.clone());
        Ok(true)
    }

    async fn list_pipeline_logs(&self, pipeline_id: i64) -> Result<Vec<PipelineLog>, StorageError> {
        self.lock()?;
        Ok(self.logs(pipeline_id))
    }
}

// =============================================================================
// Provider
// =============================================================================

#[derive(Default)]
struct ProviderState {
    statuses: Vec<CommitStatus>,
    fail_statuses: bool,
}

/// Provider named `fake`: plain-text secret header, JSON push bodies
#[derive(Default, Clone)]
pub struct FakeProvider {
    state: Arc<Mutex<ProviderState>>,
}

impl FakeProvider {
    pub fn statuses(&self) -> Vec<CommitStatus> {
        self.state.lock().unwrap().statuses.clone()
    }

    pub fn fail_statuses(&self, fail: bool) {
        self.state.lock().unwrap().fail_statuses = fail;
    }
}

#[derive(serde::Deserialize)]
struct FakePush {
    repo_id: i64,
    commit: String,
}

#[async_trait]
impl Provider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn status_state(&self, status: PipelineStatus) -> &'static str {
        status.as_str()
    }

    fn verify_signature(&self, headers: &HeaderMap, _body: &[u8], secret: &str) -> bool {
        headers
            .get("x-fake-secret")
            .is_some_and(|v| v.as_bytes() == secret.as_bytes())
    }

    fn parse_event(&self, headers: &HeaderMap, body: &[u8]) -> Result<WebhookEvent, ProviderError> {
        let event = headers
            .get("x-fake-event")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ProviderError::InvalidPayload("missing event".to_string()))?;

        match event {
            "ping" => Ok(WebhookEvent::Ping),
            "push" => {
                let push: FakePush = serde_json::from_slice(body)
                    .map_err(|e| ProviderError::InvalidPayload(e.to_string()))?;

                if push.commit.is_empty() {
                    return Ok(WebhookEvent::Ignored("branch deleted".to_string()));
                }

                Ok(WebhookEvent::Push(PushEvent {
                    provider_repo_id: push.repo_id,
                    commit: push.commit,
                    clone_url: "https://git.example.com/acme/widget.git".to_string(),
                    git_ref: "refs/heads/main".to_string(),
                }))
            }
            other => Ok(WebhookEvent::Unsupported(other.to_string())),
        }
    }

    async fn create_commit_status(
        &self,
        _token: &OAuthToken,
        status: &CommitStatus,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_statuses {
            return Err(ProviderError::Api {
                status: 502,
                message: "bad gateway".to_string(),
            });
        }
        state.statuses.push(status.clone());
        Ok(())
    }

    async fn create_webhook(
        &self,
        _token: &OAuthToken,
        _owner: &str,
        _repo: &str,
        _hook_url: &str,
        _secret: &str,
    ) -> Result<i64, ProviderError> {
        Ok(1)
    }

    async fn delete_webhook(
        &self,
        _token: &OAuthToken,
        _owner: &str,
        _repo: &str,
        _hook_id: i64,
    ) -> Result<(), ProviderError> {
        Ok(())
    }
}
