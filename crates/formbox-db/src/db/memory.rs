//! In-process registry used by tests and local tooling.

use async_trait::async_trait;
use formbox_core::{AppError, FileRecord};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::FileRegistry;

#[derive(Default)]
struct State {
    records: HashMap<String, FileRecord>,
    /// Serialized form settings, form fields and submission data
    documents: Vec<String>,
    failing_needles: HashSet<String>,
}

/// Registry held in memory; clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryFileRegistry {
    state: Arc<Mutex<State>>,
}

impl MemoryFileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every mutation is a single map or vec operation, so a guard left by a
    /// panicking holder is still consistent.
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, record: FileRecord) {
        self.state().records.insert(record.id.clone(), record);
    }

    pub fn add_form(&self, settings: JsonValue, fields: JsonValue) {
        let mut state = self.state();
        state.documents.push(settings.to_string());
        state.documents.push(fields.to_string());
    }

    pub fn add_submission(&self, data: JsonValue) {
        self.state().documents.push(data.to_string());
    }

    /// Make reference checks for `needle` fail with a database error.
    pub fn fail_lookups_for(&self, needle: impl Into<String>) {
        self.state().failing_needles.insert(needle.into());
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state().records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FileRegistry for MemoryFileRegistry {
    async fn list_all(&self) -> Result<Vec<FileRecord>, AppError> {
        let mut records: Vec<FileRecord> = self.state().records.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn delete(&self, id: &str) -> Result<bool, AppError> {
        Ok(self.state().records.remove(id).is_some())
    }

    async fn is_referenced(&self, needle: &str) -> Result<bool, AppError> {
        if needle.is_empty() {
            return Ok(false);
        }
        let state = self.state();
        if state.failing_needles.contains(needle) {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(state.documents.iter().any(|doc| doc.contains(needle)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn record(id: &str, age_days: i64) -> FileRecord {
        FileRecord {
            id: id.to_string(),
            owner_id: "owner".to_string(),
            filename: format!("{}.png", id),
            mime_type: "image/png".to_string(),
            size: 3,
            path: format!("images/2025/01/{}.png", id),
            url: String::new(),
            created_at: Utc::now() - Duration::days(age_days),
        }
    }

    #[tokio::test]
    async fn test_list_all_oldest_first() {
        let registry = MemoryFileRegistry::new();
        registry.insert(record("young", 1));
        registry.insert(record("old", 30));

        let ids: Vec<String> = registry
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["old", "young"]);
    }

    #[tokio::test]
    async fn test_reference_lookup_across_documents() {
        let registry = MemoryFileRegistry::new();
        registry.add_form(json!({"logo": "abc123"}), json!([{"image": "def456"}]));
        registry.add_submission(json!({"upload": {"id": "fff999"}}));

        assert!(registry.is_referenced("abc123").await.unwrap());
        assert!(registry.is_referenced("def456").await.unwrap());
        assert!(registry.is_referenced("fff999").await.unwrap());
        assert!(!registry.is_referenced("000000").await.unwrap());
        assert!(!registry.is_referenced("").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_and_failing_lookup() {
        let registry = MemoryFileRegistry::new();
        registry.insert(record("a", 10));

        assert!(registry.delete("a").await.unwrap());
        assert!(!registry.delete("a").await.unwrap());
        assert!(registry.is_empty());

        registry.fail_lookups_for("boom");
        assert!(matches!(
            registry.is_referenced("boom").await,
            Err(AppError::Database(_))
        ));
    }

    #[tokio::test]
    async fn test_writes_survive_poisoned_lock() {
        let registry = MemoryFileRegistry::new();
        let shared = registry.clone();
        let _ = std::thread::spawn(move || {
            let _guard = shared.state.lock().unwrap();
            panic!("holder panicked");
        })
        .join();
        assert!(registry.state.is_poisoned());

        registry.insert(record("after", 1));
        registry.add_submission(json!({"file": "after"}));
        assert!(registry.contains("after"));
        assert_eq!(registry.list_all().await.unwrap().len(), 1);
        assert!(registry.is_referenced("after").await.unwrap());
    }
}
