use chrono::{Duration as ChronoDuration, Utc};
use formbox_core::{CleanupConfig, FileRecord, UploadResult};
use formbox_services::{
    CleanupScheduler, CleanupService, LocalStorage, MemoryFileRegistry, SchedulerState, Storage,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Fixture {
    _temp_dir: TempDir,
    storage: Arc<LocalStorage>,
    registry: MemoryFileRegistry,
}

impl Fixture {
    async fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let storage = LocalStorage::new(temp_dir.path(), "/uploads".to_string())
            .await
            .expect("Failed to create local storage");
        Self {
            _temp_dir: temp_dir,
            storage: Arc::new(storage),
            registry: MemoryFileRegistry::new(),
        }
    }

    /// Upload a file without registering it.
    async fn store(&self, name: &str, data: &[u8]) -> UploadResult {
        self.storage
            .upload(
                name,
                "",
                data.len() as u64,
                Box::pin(std::io::Cursor::new(data.to_vec())),
            )
            .await
            .unwrap()
    }

    /// Upload a file and register it as created `age_days` ago.
    async fn upload(&self, name: &str, data: &[u8], age_days: i64) -> FileRecord {
        let uploaded = self.store(name, data).await;
        let mut record = uploaded.into_record("owner-1");
        record.created_at = Utc::now() - ChronoDuration::days(age_days);
        self.registry.insert(record.clone());
        record
    }

    fn service(&self, dry_run: bool) -> CleanupService {
        CleanupService::new(
            Arc::new(self.registry.clone()),
            self.storage.clone(),
            CleanupConfig {
                enabled: true,
                dry_run,
                ..Default::default()
            },
        )
    }
}

#[tokio::test]
async fn test_cleanup_deletes_only_old_orphans() {
    let fixture = Fixture::new().await;
    let orphan = fixture.upload("orphan.png", b"orphan", 30).await;
    let in_form = fixture.upload("logo.png", b"logo", 30).await;
    let in_submission = fixture.upload("cv.pdf", b"resume", 30).await;
    let fresh = fixture.upload("fresh.png", b"fresh", 1).await;

    fixture
        .registry
        .add_form(json!({"theme": {"logo": in_form.id}}), json!([]));
    fixture
        .registry
        .add_submission(json!({"attachment": {"id": in_submission.id}}));

    let result = fixture.service(false).run_cleanup().await.unwrap();
    assert_eq!(result.scanned, 4);
    assert_eq!(result.deleted, 1);
    assert_eq!(result.skipped, 3);
    assert_eq!(result.failed, 0);
    assert_eq!(result.bytes_freed, 6);

    assert!(!fixture.registry.contains(&orphan.id));
    assert!(fixture.storage.get_url_by_path(&orphan.path).await.is_err());
    for kept in [&in_form, &in_submission, &fresh] {
        assert!(fixture.registry.contains(&kept.id));
        assert!(fixture.storage.get_url_by_path(&kept.path).await.is_ok());
    }
}

#[tokio::test]
async fn test_cleanup_is_idempotent() {
    let fixture = Fixture::new().await;
    fixture.upload("a.png", b"aaa", 10).await;
    fixture.upload("b.txt", b"bbbb", 10).await;

    let service = fixture.service(false);
    let first = service.run_cleanup().await.unwrap();
    assert_eq!(first.deleted, 2);

    let second = service.run_cleanup().await.unwrap();
    assert!(second.scanned <= first.scanned);
    assert_eq!(second.deleted, 0);
    assert!(!second.has_activity());
}

#[tokio::test]
async fn test_dry_run_reports_without_deleting() {
    let fixture = Fixture::new().await;
    let record = fixture.upload("orphan.gif", b"GIF89a", 10).await;

    let dry = fixture.service(true).run_cleanup().await.unwrap();
    assert!(dry.dry_run);
    assert_eq!(dry.deleted, 1);
    assert_eq!(dry.bytes_freed, 6);
    assert!(fixture.storage.get_url_by_path(&record.path).await.is_ok());
    assert!(fixture.registry.contains(&record.id));

    let live = fixture.service(false).run_cleanup().await.unwrap();
    assert_eq!(live.deleted, dry.deleted);
    assert_eq!(live.bytes_freed, dry.bytes_freed);
}

#[tokio::test]
async fn test_legacy_url_reference_keeps_file() {
    let fixture = Fixture::new().await;
    let uploaded = fixture.store("legacy.png", b"png").await;

    // row from before ids were embedded in forms: only the direct URL is referenced
    let mut record = uploaded.clone().into_record("owner-1");
    record.id = "legacy-row-id".to_string();
    record.url = format!("https://cdn.example.com/{}", uploaded.path);
    record.created_at = Utc::now() - ChronoDuration::days(90);
    fixture.registry.insert(record.clone());
    fixture
        .registry
        .add_form(json!({}), json!([{"type": "image", "src": record.url}]));

    let result = fixture.service(false).run_cleanup().await.unwrap();
    assert_eq!(result.deleted, 0);
    assert_eq!(result.skipped, 1);
    assert!(fixture.registry.contains("legacy-row-id"));
    assert!(fixture.storage.get_url_by_path(&uploaded.path).await.is_ok());
}

#[tokio::test]
async fn test_missing_file_and_lookup_failures() {
    let fixture = Fixture::new().await;

    let gone = fixture.upload("gone.png", b"gone", 10).await;
    fixture.storage.delete_by_path(&gone.path).await.unwrap();

    let by_id = fixture.upload("legacy.txt", b"legacy", 10).await;
    let mut legacy = by_id.clone();
    legacy.path = String::new();
    fixture.registry.insert(legacy);

    let unreachable = fixture.upload("keep.png", b"keep", 10).await;
    fixture.registry.fail_lookups_for(unreachable.id.clone());

    let result = fixture.service(false).run_cleanup().await.unwrap();
    assert_eq!(result.deleted, 2);
    assert_eq!(result.failed, 1);
    assert_eq!(result.errors.len(), 1);

    assert!(!fixture.registry.contains(&gone.id));
    assert!(!fixture.registry.contains(&by_id.id));
    assert!(fixture.storage.get_url_by_path(&by_id.path).await.is_err());
    assert!(fixture.registry.contains(&unreachable.id));
    assert!(fixture
        .storage
        .get_url_by_path(&unreachable.path)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_scheduler_start_stop_idempotent() {
    let fixture = Fixture::new().await;
    fixture.upload("orphan.png", b"x", 10).await;

    let scheduler = CleanupScheduler::new(Arc::new(fixture.service(false)));
    assert_eq!(scheduler.state().await, SchedulerState::Stopped);

    scheduler.stop().await;
    scheduler.start().await;
    scheduler.start().await;
    assert_eq!(scheduler.state().await, SchedulerState::Running);

    // first sweep runs immediately
    for _ in 0..50 {
        if fixture.registry.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(fixture.registry.is_empty());

    scheduler.stop().await;
    assert_eq!(scheduler.state().await, SchedulerState::Stopped);
    scheduler.stop().await;
    assert_eq!(scheduler.state().await, SchedulerState::Stopped);
}

#[tokio::test]
async fn test_scheduler_disabled_stays_stopped() {
    let fixture = Fixture::new().await;
    let service = CleanupService::new(
        Arc::new(fixture.registry.clone()),
        fixture.storage.clone(),
        CleanupConfig::default(),
    );
    let scheduler = CleanupScheduler::new(Arc::new(service));

    scheduler.start().await;
    assert_eq!(scheduler.state().await, SchedulerState::Stopped);
}
