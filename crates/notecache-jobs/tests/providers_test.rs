//! End-to-end content generation against the in-memory host and an
//! in-memory record store.

use std::sync::Arc;

use serde_json::json;

use notecache_core::{
    CacheSettings, CachedMetadata, ContentKind, ContentProviderType, ContentStatus,
    FrontmatterDate, InMemoryVault, VaultFile, WaitMask,
};
use notecache_db::{compute_content_hash, CacheDatabase};
use notecache_jobs::{
    default_registry, CacheSession, ContentProviderRegistry, ProviderConfig, ProviderContext,
    QueueFilter,
};

struct Harness {
    db: CacheDatabase,
    host: Arc<InMemoryVault>,
    registry: ContentProviderRegistry,
    session: CacheSession,
}

async fn setup() -> Harness {
    let db = CacheDatabase::in_memory()
        .await
        .expect("Failed to open in-memory database");
    let host = Arc::new(InMemoryVault::new());
    let session = CacheSession::new();
    let ctx = ProviderContext::new(db.records.clone(), host.clone(), host.clone(), session.clone());
    let registry = default_registry(ctx, ProviderConfig::default().with_batch_size(2)).await;
    Harness {
        db,
        host,
        registry,
        session,
    }
}

fn frontmatter(value: serde_json::Value, tags: &[&str], embeds: &[&str]) -> CachedMetadata {
    CachedMetadata {
        tags: tags.iter().map(|t| t.to_string()).collect(),
        frontmatter: value.as_object().cloned(),
        embeds: embeds.iter().map(|e| e.to_string()).collect(),
    }
}

async fn seed(h: &Harness, files: &[VaultFile]) {
    h.db.records.record_file_changes(files).await.unwrap();
}

#[tokio::test]
async fn test_all_providers_fill_markdown_record() {
    let h = setup().await;
    let note = h.host.insert_silently(
        "notes/a.md",
        100,
        "---\ncreated: 2024-03-01\n---\n# Title\nHello world\n- [ ] todo\n- [x] done\n![[cover.png]]",
    );
    let image = h.host.insert_silently("notes/cover.png", 100, vec![9u8, 9, 9]);
    h.host.set_metadata_silently(
        "notes/a.md",
        frontmatter(json!({"created": "2024-03-01", "status": "draft"}), &["#work"], &["cover.png"]),
    );
    seed(&h, &[note.clone(), image]).await;

    let settings = CacheSettings {
        show_metadata: true,
        property_fields: vec!["status".into()],
        ..Default::default()
    };
    let dispatched = h
        .registry
        .queue_files_for_all_providers(&[note], &settings, QueueFilter::all())
        .await;
    assert_eq!(dispatched.len(), 4);
    h.registry.wait_idle().await;

    let record = h.db.records.get_file("notes/a.md").unwrap();
    for kind in settings.enabled_content_kinds() {
        assert!(record.has_content(kind), "{kind} missing");
    }
    assert_eq!(record.preview_status, ContentStatus::Has);
    assert_eq!(record.task_total, Some(2));
    assert_eq!(record.task_unfinished, Some(1));
    assert_eq!(record.tags, Some(vec!["work".to_string()]));
    assert!(matches!(
        record.metadata.as_ref().and_then(|m| m.created),
        Some(FrontmatterDate::Parsed(_))
    ));
    assert_eq!(record.feature_image_status, ContentStatus::Has);
    assert_eq!(record.feature_image_key, Some(compute_content_hash(&[9, 9, 9])));

    let preview = h.db.records.get_preview_text("notes/a.md").await.unwrap();
    assert_eq!(preview.as_deref(), Some("Hello world todo done"));
    let blob = h.db.records.get_feature_image("notes/a.md").await.unwrap().unwrap();
    assert_eq!(blob.bytes, vec![9, 9, 9]);
}

#[tokio::test]
async fn test_pdf_gets_only_a_thumbnail() {
    let h = setup().await;
    let pdf = h.host.insert_silently("doc.pdf", 5, vec![0u8; 4]);
    h.host.set_pdf_thumbnail("doc.pdf", vec![1, 2]);
    seed(&h, &[pdf.clone()]).await;

    let dispatched = h
        .registry
        .queue_files_for_all_providers(&[pdf], &CacheSettings::default(), QueueFilter::all())
        .await;
    assert_eq!(dispatched, vec![ContentProviderType::FeatureImage]);
    h.registry.wait_idle().await;

    let record = h.db.records.get_file("doc.pdf").unwrap();
    assert_eq!(record.feature_image_status, ContentStatus::Has);
    assert!(record.tags.is_none());
    assert!(!record.needs_any_content(&ContentKind::ALL));
}

#[tokio::test]
async fn test_unindexed_file_is_left_pending() {
    let h = setup().await;
    let note = h.host.insert_silently("raw.md", 7, "body");
    seed(&h, &[note.clone()]).await;

    h.registry
        .queue_files_for_all_providers(
            &[note],
            &CacheSettings::default(),
            QueueFilter::only(WaitMask::of(ContentProviderType::Tags)),
        )
        .await;
    h.registry.wait_idle().await;

    let record = h.db.records.get_file("raw.md").unwrap();
    assert!(record.needs_content(ContentKind::Tags));
    assert!(record.word_count.is_none(), "markdown provider was not included");
}

#[tokio::test]
async fn test_settings_change_clears_and_regenerates_markdown() {
    let h = setup().await;
    let note = h.host.insert_silently("a.md", 3, "alpha beta gamma delta");
    h.host.set_metadata_silently("a.md", CachedMetadata::default());
    seed(&h, &[note.clone()]).await;

    let old = CacheSettings::default();
    h.registry
        .queue_files_for_all_providers(&[note.clone()], &old, QueueFilter::all())
        .await;
    h.registry.wait_idle().await;
    assert!(h.db.records.get_file("a.md").unwrap().has_content(ContentKind::Preview));

    let new = CacheSettings {
        preview_length: 5,
        ..Default::default()
    };
    let cleared = h.registry.handle_settings_change(&old, &new).await;
    assert_eq!(cleared, vec![ContentProviderType::Markdown]);
    let record = h.db.records.get_file("a.md").unwrap();
    assert_eq!(record.preview_status, ContentStatus::Unprocessed);
    assert!(record.tags.is_some(), "tags are untouched by a preview change");

    let mask: WaitMask = cleared.into_iter().collect();
    h.registry
        .queue_files_for_all_providers(&[note], &new, QueueFilter::only(mask))
        .await;
    h.registry.wait_idle().await;
    let preview = h.db.records.get_preview_text("a.md").await.unwrap();
    assert_eq!(preview.as_deref(), Some("alpha"));
}

#[tokio::test]
async fn test_stopped_session_suppresses_writes() {
    let h = setup().await;
    let note = h.host.insert_silently("a.md", 3, "text");
    h.host.set_metadata_silently("a.md", CachedMetadata::default());
    seed(&h, &[note.clone()]).await;

    h.session.set_stopped(true);
    h.registry
        .queue_files_for_all_providers(&[note.clone()], &CacheSettings::default(), QueueFilter::all())
        .await;
    tokio::task::yield_now().await;
    assert!(h.db.records.get_file("a.md").unwrap().tags.is_none());

    h.session.set_stopped(false);
    h.registry
        .queue_files_for_all_providers(&[note], &CacheSettings::default(), QueueFilter::all())
        .await;
    h.registry.wait_idle().await;
    assert!(h.db.records.get_file("a.md").unwrap().tags.is_some());
}
