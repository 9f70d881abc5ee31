//! Policy Store: persists validated policies to a content directory and
//! owns a read-through name→document cache (spec §4.2).

use crate::model::Policy;
use crate::policy::validator::{self, ValidationReport};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("policy '{0}' not found")]
    PolicyNotFound(String),
    #[error("policy '{0}' already exists")]
    PolicyAlreadyExists(String),
    #[error("policy failed validation: {0:?}")]
    ValidationFailed(Vec<String>),
    #[error("invalid policy file: {0}")]
    InvalidPolicyFile(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

struct Inner {
    cache: BTreeMap<String, Policy>,
    loaded: bool,
}

/// Content-directory-backed store. All access is serialised through one
/// async mutex, matching the single-critical-section model the other
/// components use for their owned state.
pub struct PolicyStore {
    dir: PathBuf,
    inner: Mutex<Inner>,
}

impl PolicyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(PolicyStore {
            dir: dir.into(),
            inner: Mutex::new(Inner {
                cache: BTreeMap::new(),
                loaded: false,
            }),
        })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    async fn ensure_loaded(&self, inner: &mut Inner) -> Result<(), StoreError> {
        if inner.loaded {
            return Ok(());
        }
        inner.cache.clear();
        if tokio::fs::metadata(&self.dir).await.is_ok() {
            let mut entries = tokio::fs::read_dir(&self.dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let bytes = tokio::fs::read(&path).await?;
                let policy: Policy = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::InvalidPolicyFile(e.to_string()))?;
                inner.cache.insert(policy.name.clone(), policy);
            }
        }
        inner.loaded = true;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Policy>, StoreError> {
        let mut inner = self.inner.lock().await;
        self.ensure_loaded(&mut inner).await?;
        let mut policies: Vec<Policy> = inner.cache.values().cloned().collect();
        policies.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(policies)
    }

    pub async fn get(&self, name: &str) -> Result<Policy, StoreError> {
        let mut inner = self.inner.lock().await;
        self.ensure_loaded(&mut inner).await?;
        inner
            .cache
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::PolicyNotFound(name.to_string()))
    }

    pub async fn exists(&self, name: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        self.ensure_loaded(&mut inner).await?;
        Ok(inner.cache.contains_key(name))
    }

    pub async fn save(&self, mut policy: Policy, overwrite: bool) -> Result<Policy, StoreError> {
        let report: ValidationReport = validator::validate(&policy);
        if !report.valid {
            return Err(StoreError::ValidationFailed(report.errors));
        }

        let mut inner = self.inner.lock().await;
        self.ensure_loaded(&mut inner).await?;

        if !overwrite && inner.cache.contains_key(&policy.name) {
            return Err(StoreError::PolicyAlreadyExists(policy.name.clone()));
        }

        policy.updated_at = Utc::now();

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&policy.name);
        let tmp_path = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(&policy)
            .map_err(|e| StoreError::InvalidPolicyFile(e.to_string()))?;
        tokio::fs::write(&tmp_path, bytes).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        inner.cache.insert(policy.name.clone(), policy.clone());
        Ok(policy)
    }

    pub async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        self.ensure_loaded(&mut inner).await?;
        if inner.cache.remove(name).is_none() {
            return Err(StoreError::PolicyNotFound(name.to_string()));
        }
        let path = self.path_for(name);
        if tokio::fs::metadata(&path).await.is_ok() {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    pub async fn import(&self, blob: &str) -> Result<Policy, StoreError> {
        let policy: Policy =
            serde_json::from_str(blob).map_err(|e| StoreError::InvalidPolicyFile(e.to_string()))?;
        self.save(policy, true).await
    }

    pub async fn export(&self, name: &str) -> Result<String, StoreError> {
        let policy = self.get(name).await?;
        serde_json::to_string_pretty(&policy).map_err(|e| StoreError::InvalidPolicyFile(e.to_string()))
    }

    pub async fn policies_with_tag(&self, tag: &str) -> Result<Vec<Policy>, StoreError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|p| p.tags.contains(tag))
            .collect())
    }

    pub async fn policies_for_schedule(
        &self,
        schedule: crate::model::Schedule,
    ) -> Result<Vec<Policy>, StoreError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|p| p.rules.iter().any(|r| r.schedule == schedule))
            .collect())
    }

    pub async fn enabled_policies(&self) -> Result<Vec<Policy>, StoreError> {
        Ok(self.list().await?.into_iter().filter(|p| p.enabled).collect())
    }

    /// Order-preserving union merge by rule id; first writer wins on collision.
    /// Inputs sorted by descending priority before merge.
    pub async fn merge(&self, names: &[String], new_name: &str) -> Result<Policy, StoreError> {
        let mut sources = Vec::with_capacity(names.len());
        for name in names {
            sources.push(self.get(name).await?);
        }
        sources.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut rules = Vec::new();
        let mut seen_rule_ids = std::collections::HashSet::new();
        let mut exclusions = std::collections::BTreeSet::new();
        let mut tags = std::collections::BTreeSet::new();

        for source in &sources {
            for rule in &source.rules {
                if seen_rule_ids.insert(rule.id.clone()) {
                    rules.push(rule.clone());
                }
            }
            exclusions.extend(source.exclusions.iter().cloned());
            tags.extend(source.tags.iter().cloned());
        }

        let highest = sources
            .first()
            .ok_or_else(|| StoreError::InvalidPolicyFile("merge requires at least one input".to_string()))?;

        let display_name = format!(
            "Merged: {}",
            sources
                .iter()
                .map(|p| p.display_name.clone())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let now = Utc::now();
        Ok(Policy {
            schema_version: highest.schema_version.clone(),
            name: new_name.to_string(),
            display_name,
            description: String::new(),
            rules,
            exclusions: exclusions.into_iter().collect(),
            notifications: highest.notifications,
            priority: highest.priority,
            enabled: true,
            tags,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn invalidate_cache(&self) {
        let mut inner = self.inner.lock().await;
        inner.loaded = false;
        inner.cache.clear();
    }

    pub async fn reload(&self) -> Result<(), StoreError> {
        self.invalidate_cache().await;
        let mut inner = self.inner.lock().await;
        self.ensure_loaded(&mut inner).await
    }

    #[cfg(test)]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
