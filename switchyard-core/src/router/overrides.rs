//! Router configuration sources beyond the global config

use crate::config::RouterConfig;
use crate::error::GatewayResult;
use crate::protocol::MessagesRequest;
use async_trait::async_trait;
use lru::LruCache;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

const PROJECT_CACHE_CAPACITY: usize = 1000;

/// Replacement router configuration for a session
#[async_trait]
pub trait RouterOverrides: Send + Sync {
    async fn router_for(&self, session_id: &str) -> Option<RouterConfig>;
}

/// External routing hook consulted before the built-in rules
///
/// Returning `Ok(None)` hands the decision back to the built-in rules.
#[async_trait]
pub trait CustomRouter: Send + Sync {
    async fn route(
        &self,
        request: &MessagesRequest,
        token_count: usize,
        config: &Value,
    ) -> GatewayResult<Option<String>>;
}

/// Overrides stored per project on disk
///
/// A session belongs to the project directory under `projects_dir` holding
/// `<session>.jsonl`. The override lives in `config_dir/<project>/<session>.json`,
/// or `config_dir/<project>/config.json` for the whole project.
pub struct ProjectRouterOverrides {
    projects_dir: PathBuf,
    config_dir: PathBuf,
    /// Session to project; `None` records a miss
    projects: Mutex<LruCache<String, Option<String>>>,
}

impl ProjectRouterOverrides {
    pub fn new(projects_dir: impl Into<PathBuf>, config_dir: impl Into<PathBuf>) -> Self {
        let capacity = NonZeroUsize::new(PROJECT_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            projects_dir: projects_dir.into(),
            config_dir: config_dir.into(),
            projects: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Project directory name holding the session log
    pub async fn find_project(&self, session_id: &str) -> Option<String> {
        if let Some(cached) = self
            .projects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
        {
            return cached.clone();
        }

        let found = self.scan_projects(session_id).await;
        self.projects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(session_id.to_string(), found.clone());
        found
    }

    async fn scan_projects(&self, session_id: &str) -> Option<String> {
        let mut entries = match tokio::fs::read_dir(&self.projects_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!(
                    "Cannot read projects dir {}: {}",
                    self.projects_dir.display(),
                    e
                );
                return None;
            }
        };

        let mut folders = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                folders.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        folders.sort();

        let file_name = format!("{}.jsonl", session_id);
        let checks = folders.iter().map(|folder| {
            let path = self.projects_dir.join(folder).join(&file_name);
            async move { tokio::fs::metadata(path).await.is_ok_and(|m| m.is_file()) }
        });
        let found = futures::future::join_all(checks).await;
        folders
            .into_iter()
            .zip(found)
            .find_map(|(folder, hit)| hit.then_some(folder))
    }

    async fn read_router(path: &Path) -> Option<RouterConfig> {
        let content = tokio::fs::read_to_string(path).await.ok()?;
        let value: Value = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                debug!("Ignoring unparseable override {}: {}", path.display(), e);
                return None;
            }
        };
        let router = value.get("Router").or_else(|| value.get("router"))?;
        match serde_json::from_value(router.clone()) {
            Ok(router) => Some(router),
            Err(e) => {
                debug!("Ignoring invalid router in {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Session ids become file names; anything path-like is refused
fn is_safe_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && !session_id.contains(['/', '\\'])
        && !session_id.contains("..")
}

#[async_trait]
impl RouterOverrides for ProjectRouterOverrides {
    async fn router_for(&self, session_id: &str) -> Option<RouterConfig> {
        if !is_safe_session_id(session_id) {
            return None;
        }
        let project = self.find_project(session_id).await?;
        let dir = self.config_dir.join(&project);

        if let Some(router) = Self::read_router(&dir.join(format!("{}.json", session_id))).await {
            debug!("Using session router override for {}", session_id);
            return Some(router);
        }
        let router = Self::read_router(&dir.join("config.json")).await;
        if router.is_some() {
            debug!("Using project router override '{}'", project);
        }
        router
    }
}
