//! End-to-end tests for three-way note-tree synchronization.
//!
//! These tests exercise the real `SyncEngine` with:
//! - In-memory entry storage as the local tree
//! - An in-memory sync target with real optimistic-concurrency checks
//! - In-memory (and, where durability matters, SQLite) metadata stores
//!
//! No network I/O and no timers: every scenario drives the engine through
//! its public surface only.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use notesync_core::config::SyncSettings;
use notesync_core::errors::{ResolveError, SyncError, TargetError};
use notesync_core::identity::ContentIdentity;
use notesync_core::metadata::{MemoryMetadataStore, SyncMetadataStore};
use notesync_core::models::{AcceptedIdentity, DiffType, EntrySyncMetadata, ResolutionAction};
use notesync_core::rules::{DiffRule, OneOrMany};
use notesync_core::storage::{EntryStorage, FsEntryStorage, MemoryEntryStorage};
use notesync_core::sync_engine::{JobOutcome, SyncEngine};
use notesync_core::target::{MemorySyncTarget, RemoteOutline, SyncTarget};

// ===========================================================================
// Helpers
// ===========================================================================

struct Fixture {
    storage: Arc<MemoryEntryStorage>,
    target: Arc<MemorySyncTarget>,
    metadata: Arc<MemoryMetadataStore>,
    engine: Arc<SyncEngine>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fixture() -> Fixture {
    fixture_with_settings(SyncSettings::default())
}

fn fixture_with_settings(settings: SyncSettings) -> Fixture {
    init_tracing();
    let storage = Arc::new(MemoryEntryStorage::new());
    let target = Arc::new(MemorySyncTarget::new("remote-test"));
    let metadata = Arc::new(MemoryMetadataStore::new());
    let engine = Arc::new(SyncEngine::new(
        storage.clone(),
        target.clone(),
        metadata.clone(),
        &settings,
    ));
    Fixture {
        storage,
        target,
        metadata,
        engine,
    }
}

fn rule(files: &str, diffs: Vec<DiffType>, action: ResolutionAction) -> DiffRule {
    DiffRule {
        files: Some(OneOrMany::One(files.to_string())),
        diff: Some(OneOrMany::Many(diffs)),
        action,
    }
}

/// Settings that auto-accept every clean diff, conflicts left to the user.
fn auto_accept_clean() -> SyncSettings {
    SyncSettings {
        ignore_patterns: vec![],
        rules: vec![rule(
            "**",
            vec![
                DiffType::LocalUpdate,
                DiffType::RemoteUpdate,
                DiffType::LocalCreate,
                DiffType::RemoteCreate,
                DiffType::LocalRemove,
                DiffType::RemoteRemove,
            ],
            ResolutionAction::AcceptAuto,
        )],
    }
}

/// Run accepted jobs until none remain.
async fn run_all_jobs(engine: &SyncEngine) {
    loop {
        let jobs = engine.get_jobs(16, None).await;
        if jobs.is_empty() {
            break;
        }
        for job in jobs {
            engine.do_job(&job).await.expect("job failed");
        }
    }
}

// ===========================================================================
// First sync and convergence
// ===========================================================================

#[tokio::test]
async fn local_create_converges_to_remote() {
    let f = fixture();
    f.storage.write("/note.md", b"hello").unwrap();

    // Diagnosis: one LocalCreate.
    let count = f.engine.update_diff("/").await.unwrap();
    assert_eq!(count, 1);
    let diffs = f.engine.diffs().await;
    assert_eq!(diffs[0].path, "/note.md");
    assert_eq!(diffs[0].diff_type, DiffType::LocalCreate);

    // Resolution fixes accepted to the local hash.
    let meta = f
        .engine
        .accept("/note.md", ResolutionAction::AcceptAuto)
        .await
        .unwrap();
    assert_eq!(
        meta.accepted,
        Some(AcceptedIdentity::Content(ContentIdentity::of_bytes(b"hello")))
    );

    // Execution pushes the bytes and advances the baseline.
    let jobs = f.engine.get_jobs(10, None).await;
    assert_eq!(jobs.len(), 1);
    let outcome = f.engine.do_job(&jobs[0]).await.unwrap();
    assert_eq!(outcome, JobOutcome::Committed);
    assert_eq!(f.target.file_bytes("/note.md").unwrap(), b"hello");

    let meta = f.metadata.get("/note.md").unwrap().unwrap();
    assert_eq!(meta.synced, Some(ContentIdentity::of_bytes(b"hello")));

    // A fresh pass finds nothing to do.
    let count = f.engine.update_diff("/").await.unwrap();
    assert_eq!(count, 0);
    assert!(f.engine.diffs().await.is_empty());
}

#[tokio::test]
async fn local_update_round_trip() {
    let f = fixture();
    f.storage.write("/note.md", b"v1").unwrap();
    f.target.put_file("/note.md", b"v1");

    // Seed the baseline, then edit locally.
    f.engine.update_diff("/").await.unwrap();
    f.storage.write("/note.md", b"v2").unwrap();

    f.engine.update_diff("/").await.unwrap();
    let diffs = f.engine.diffs().await;
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].diff_type, DiffType::LocalUpdate);

    f.engine
        .accept("/note.md", ResolutionAction::AcceptAuto)
        .await
        .unwrap();
    run_all_jobs(&f.engine).await;

    assert_eq!(f.target.file_bytes("/note.md").unwrap(), b"v2");
    let meta = f.metadata.get("/note.md").unwrap().unwrap();
    assert_eq!(meta.synced, Some(ContentIdentity::of_bytes(b"v2")));

    assert_eq!(f.engine.update_diff("/").await.unwrap(), 0);
}

#[tokio::test]
async fn remote_update_pulls_and_notifies() {
    let f = fixture();
    f.storage.write("/note.md", b"v1").unwrap();
    f.target.put_file("/note.md", b"v1");
    f.engine.update_diff("/").await.unwrap();

    f.target.put_file("/note.md", b"v2");

    let seen: Arc<Mutex<Vec<(String, Option<Vec<u8>>)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    f.engine.register_update_callback(Box::new(move |path, _identity, bytes| {
        sink.lock()
            .unwrap()
            .push((path.to_string(), bytes.map(|b| b.to_vec())));
    }));

    f.engine.update_diff("/").await.unwrap();
    let diffs = f.engine.diffs().await;
    assert_eq!(diffs[0].diff_type, DiffType::RemoteUpdate);

    f.engine
        .accept("/note.md", ResolutionAction::AcceptAuto)
        .await
        .unwrap();
    run_all_jobs(&f.engine).await;

    assert_eq!(f.storage.read("/note.md").unwrap(), b"v2");
    let events = seen.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "/note.md");
    assert_eq!(events[0].1.as_deref(), Some(b"v2".as_slice()));
}

#[tokio::test]
async fn baseline_seeded_for_identical_sides() {
    let f = fixture();
    f.storage.write("/same.md", b"agree").unwrap();
    f.target.put_file("/same.md", b"agree");

    let count = f.engine.update_diff("/").await.unwrap();
    assert_eq!(count, 0);

    let meta = f.metadata.get("/same.md").unwrap().unwrap();
    let id = ContentIdentity::of_bytes(b"agree");
    assert_eq!(meta.synced, Some(id.clone()));
    assert_eq!(meta.accepted, Some(AcceptedIdentity::Content(id)));
    assert!(meta.diff.is_none());

    // Seeded records are inert: no jobs appear.
    assert!(f.engine.get_jobs(10, None).await.is_empty());
}

#[tokio::test]
async fn update_diff_is_idempotent() {
    let f = fixture();
    f.storage.write("/a/one.md", b"1").unwrap();
    f.target.put_file("/b/two.md", b"2");
    f.storage.write("/both.md", b"local").unwrap();
    f.target.put_file("/both.md", b"remote");

    f.engine.update_diff("/").await.unwrap();
    let first: Vec<(String, DiffType)> = f
        .engine
        .diffs()
        .await
        .into_iter()
        .map(|e| (e.path, e.diff_type))
        .collect();

    f.engine.update_diff("/").await.unwrap();
    let second: Vec<(String, DiffType)> = f
        .engine
        .diffs()
        .await
        .into_iter()
        .map(|e| (e.path, e.diff_type))
        .collect();

    assert_eq!(first, second);
}

// ===========================================================================
// Conflicts and resolution gating
// ===========================================================================

#[tokio::test]
async fn conflicting_create_requires_explicit_resolution() {
    let f = fixture();
    f.storage.write("/x.md", b"local version").unwrap();
    f.target.put_file("/x.md", b"remote version");

    f.engine.update_diff("/").await.unwrap();
    let diffs = f.engine.diffs().await;
    assert_eq!(diffs[0].diff_type, DiffType::ConflictingCreate);
    assert_eq!(f.engine.conflict_count().await, 1);

    // accept-auto must fail with no metadata mutation.
    let err = f
        .engine
        .accept("/x.md", ResolutionAction::AcceptAuto)
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::AutoOnConflict { .. }));
    assert!(f.metadata.get("/x.md").unwrap().is_none());

    // accept-local succeeds and fixes accepted to the local identity.
    let meta = f
        .engine
        .accept("/x.md", ResolutionAction::AcceptLocal)
        .await
        .unwrap();
    assert_eq!(
        meta.accepted,
        Some(AcceptedIdentity::Content(ContentIdentity::of_bytes(
            b"local version"
        )))
    );

    run_all_jobs(&f.engine).await;
    assert_eq!(f.target.file_bytes("/x.md").unwrap(), b"local version");
    assert_eq!(f.engine.update_diff("/").await.unwrap(), 0);
}

#[tokio::test]
async fn explicit_action_rejected_on_clean_diff() {
    let f = fixture();
    f.storage.write("/clean.md", b"content").unwrap();
    f.engine.update_diff("/").await.unwrap();

    let err = f
        .engine
        .accept("/clean.md", ResolutionAction::AcceptLocal)
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::ExplicitOnClean { .. }));
    assert!(f.metadata.get("/clean.md").unwrap().is_none());
}

#[tokio::test]
async fn conflicting_update_accept_remote_overwrites_local() {
    let f = fixture();
    f.storage.write("/doc.md", b"base").unwrap();
    f.target.put_file("/doc.md", b"base");
    f.engine.update_diff("/").await.unwrap();

    f.storage.write("/doc.md", b"ours").unwrap();
    f.target.put_file("/doc.md", b"theirs");

    f.engine.update_diff("/").await.unwrap();
    assert_eq!(
        f.engine.diffs().await[0].diff_type,
        DiffType::ConflictingUpdate
    );

    f.engine
        .accept("/doc.md", ResolutionAction::AcceptRemote)
        .await
        .unwrap();
    run_all_jobs(&f.engine).await;

    assert_eq!(f.storage.read("/doc.md").unwrap(), b"theirs");
    assert_eq!(f.engine.update_diff("/").await.unwrap(), 0);
}

// ===========================================================================
// Rules
// ===========================================================================

#[tokio::test]
async fn auto_rule_removes_local_copy_on_remote_remove() {
    let f = fixture_with_settings(auto_accept_clean());
    f.storage.write("/gone.md", b"bytes").unwrap();
    f.target.put_file("/gone.md", b"bytes");
    f.engine.update_diff("/").await.unwrap();

    // Removed remotely only.
    f.target.delete("/gone.md");

    f.engine.update_diff("/").await.unwrap();
    let diffs = f.engine.diffs().await;
    assert_eq!(diffs[0].diff_type, DiffType::RemoteRemove);
    // The rule already accepted it.
    assert_eq!(diffs[0].metadata.accepted, Some(AcceptedIdentity::Removal));

    run_all_jobs(&f.engine).await;

    assert!(!f.storage.exists("/gone.md").unwrap());
    // Metadata cleared entirely for the removed path.
    assert!(f.metadata.get("/gone.md").unwrap().is_none());
}

#[tokio::test]
async fn rules_never_auto_accept_conflicts() {
    // A rule that names a conflicting diff with accept-auto is rejected at
    // evaluation time and the diff is surfaced instead.
    let settings = SyncSettings {
        ignore_patterns: vec![],
        rules: vec![rule(
            "**",
            vec![DiffType::ConflictingCreate],
            ResolutionAction::AcceptAuto,
        )],
    };
    let f = fixture_with_settings(settings);
    f.storage.write("/x.md", b"a").unwrap();
    f.target.put_file("/x.md", b"b");

    f.engine.update_diff("/").await.unwrap();
    let diffs = f.engine.diffs().await;
    assert_eq!(diffs[0].diff_type, DiffType::ConflictingCreate);
    assert!(diffs[0].metadata.accepted.is_none());
    assert_eq!(f.engine.unresolved_diff_count().await, 1);
}

#[tokio::test]
async fn ignored_paths_never_sync() {
    let settings = SyncSettings {
        ignore_patterns: vec!["*.tmp".into()],
        rules: vec![],
    };
    let f = fixture_with_settings(settings);
    f.storage.write("/.trash/old.md", b"hidden").unwrap();
    f.storage.write("/scratch.tmp", b"temp").unwrap();
    f.storage.write("/kept.md", b"kept").unwrap();

    f.engine.update_diff("/").await.unwrap();
    let paths: Vec<String> = f.engine.diffs().await.into_iter().map(|e| e.path).collect();
    assert_eq!(paths, vec!["/kept.md"]);
}

// ===========================================================================
// Batch acceptance
// ===========================================================================

#[tokio::test]
async fn accept_multi_matches_sequential_accepts() {
    async fn seed(f: &Fixture) {
        f.storage.write("/a.md", b"a-local").unwrap();
        f.storage.write("/b.md", b"b-local").unwrap();
        f.storage.write("/c.md", b"c-local").unwrap();
        f.target.put_file("/c.md", b"c-remote");
        f.engine.update_diff("/").await.unwrap();
    }

    // Sequential accepts.
    let sequential = fixture();
    seed(&sequential).await;
    sequential
        .engine
        .accept("/a.md", ResolutionAction::AcceptAuto)
        .await
        .unwrap();
    sequential
        .engine
        .accept("/b.md", ResolutionAction::AcceptAuto)
        .await
        .unwrap();
    sequential
        .engine
        .accept("/c.md", ResolutionAction::AcceptLocal)
        .await
        .unwrap();

    // One batch.
    let batched = fixture();
    seed(&batched).await;
    batched
        .engine
        .accept_multi(&[
            ("/a.md".to_string(), ResolutionAction::AcceptAuto),
            ("/b.md".to_string(), ResolutionAction::AcceptAuto),
            ("/c.md".to_string(), ResolutionAction::AcceptLocal),
        ])
        .await
        .unwrap();

    let left: BTreeMap<String, EntrySyncMetadata> = sequential.metadata.get_all().unwrap();
    let right: BTreeMap<String, EntrySyncMetadata> = batched.metadata.get_all().unwrap();
    assert_eq!(left, right);

    // Both see the same live metadata on the diff entries too.
    let mut left_entries = sequential.engine.diffs().await;
    let mut right_entries = batched.engine.diffs().await;
    left_entries.sort_by(|a, b| a.path.cmp(&b.path));
    right_entries.sort_by(|a, b| a.path.cmp(&b.path));
    assert_eq!(left_entries, right_entries);
}

#[tokio::test]
async fn accept_multi_invalid_entry_keeps_valid_prefix() {
    let f = fixture();
    f.storage.write("/a.md", b"a").unwrap();
    f.storage.write("/x.md", b"local").unwrap();
    f.target.put_file("/x.md", b"remote");
    f.engine.update_diff("/").await.unwrap();

    // Second request is invalid (auto on a conflict); the first still lands,
    // exactly as sequential calls would have behaved.
    let err = f
        .engine
        .accept_multi(&[
            ("/a.md".to_string(), ResolutionAction::AcceptAuto),
            ("/x.md".to_string(), ResolutionAction::AcceptAuto),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::AutoOnConflict { .. }));

    assert!(f.metadata.get("/a.md").unwrap().unwrap().accepted.is_some());
    assert!(f.metadata.get("/x.md").unwrap().is_none());
}

// ===========================================================================
// Race safety
// ===========================================================================

#[tokio::test]
async fn local_drift_between_diagnosis_and_job_aborts_write() {
    let f = fixture();
    f.storage.write("/r.md", b"v1").unwrap();
    f.engine.update_diff("/").await.unwrap();
    f.engine
        .accept("/r.md", ResolutionAction::AcceptAuto)
        .await
        .unwrap();
    let jobs = f.engine.get_jobs(10, None).await;
    assert_eq!(jobs.len(), 1);

    // The note keeps being edited while the job is queued.
    f.storage.write("/r.md", b"v2").unwrap();

    let outcome = f.engine.do_job(&jobs[0]).await.unwrap();
    assert_eq!(outcome, JobOutcome::Recomputed);

    // No stale write reached the remote, the baseline did not move, and the
    // diff was reclassified in place awaiting a fresh decision.
    assert!(f.target.file_bytes("/r.md").is_none());
    let diffs = f.engine.diffs().await;
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].diff_type, DiffType::LocalCreate);
    assert_eq!(diffs[0].actual, Some(ContentIdentity::of_bytes(b"v2")));
    assert!(diffs[0].metadata.accepted.is_none());
    assert!(diffs[0].metadata.synced.is_none());

    // Accepting the fresh state converges normally.
    f.engine
        .accept("/r.md", ResolutionAction::AcceptAuto)
        .await
        .unwrap();
    run_all_jobs(&f.engine).await;
    assert_eq!(f.target.file_bytes("/r.md").unwrap(), b"v2");
}

#[tokio::test]
async fn source_vanishing_mid_job_reconciles_instead_of_crashing() {
    let f = fixture();
    f.storage.write("/v.md", b"bytes").unwrap();
    f.engine.update_diff("/").await.unwrap();
    f.engine
        .accept("/v.md", ResolutionAction::AcceptAuto)
        .await
        .unwrap();
    let jobs = f.engine.get_jobs(10, None).await;

    // The file disappears before the job reads it.
    f.storage.remove("/v.md").unwrap();

    let outcome = f.engine.do_job(&jobs[0]).await.unwrap();
    assert_eq!(outcome, JobOutcome::Recomputed);

    // Gone from both sides: entry dropped and metadata cleared.
    assert!(f.engine.diffs().await.is_empty());
    assert!(f.metadata.get("/v.md").unwrap().is_none());
    assert!(!f.target.contains("/v.md"));
}

/// Target whose `update` blocks until released, to hold a job in its
/// transfer phase.
struct GatedTarget {
    inner: MemorySyncTarget,
    release: tokio::sync::Notify,
}

#[async_trait]
impl SyncTarget for GatedTarget {
    async fn id(&self) -> Result<String, TargetError> {
        self.inner.id().await
    }
    async fn outline(&self, path: &str) -> Result<Option<RemoteOutline>, TargetError> {
        self.inner.outline(path).await
    }
    async fn read(&self, path: &str) -> Result<Vec<u8>, TargetError> {
        self.inner.read(path).await
    }
    async fn update(
        &self,
        path: &str,
        bytes: &[u8],
        expected: Option<&ContentIdentity>,
    ) -> Result<(), TargetError> {
        self.release.notified().await;
        self.inner.update(path, bytes, expected).await
    }
    async fn create_dir(
        &self,
        path: &str,
        expected: Option<&ContentIdentity>,
    ) -> Result<(), TargetError> {
        self.inner.create_dir(path, expected).await
    }
    async fn remove(
        &self,
        path: &str,
        expected: Option<&ContentIdentity>,
    ) -> Result<(), TargetError> {
        self.inner.remove(path, expected).await
    }
}

#[tokio::test]
async fn concurrent_job_for_same_path_is_rejected() {
    let storage = Arc::new(MemoryEntryStorage::new());
    let target = Arc::new(GatedTarget {
        inner: MemorySyncTarget::new("remote-gated"),
        release: tokio::sync::Notify::new(),
    });
    let metadata = Arc::new(MemoryMetadataStore::new());
    let engine = Arc::new(SyncEngine::new(
        storage.clone(),
        target.clone(),
        metadata,
        &SyncSettings::default(),
    ));

    storage.write("/busy.md", b"content").unwrap();
    engine.update_diff("/").await.unwrap();
    engine
        .accept("/busy.md", ResolutionAction::AcceptAuto)
        .await
        .unwrap();
    let jobs = engine.get_jobs(10, None).await;
    assert_eq!(jobs.len(), 1);

    // First job blocks inside the gated target's update().
    let first = {
        let engine = engine.clone();
        let job = jobs[0].clone();
        tokio::spawn(async move { engine.do_job(&job).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    // Second job for the same path is rejected, not queued.
    let err = engine.do_job(&jobs[0]).await.unwrap_err();
    assert!(matches!(err, SyncError::JobAlreadyActive(_)));

    // Releasing the gate lets the first job commit normally.
    target.release.notify_one();
    let outcome = first.await.unwrap().unwrap();
    assert_eq!(outcome, JobOutcome::Committed);
    assert_eq!(target.inner.file_bytes("/busy.md").unwrap(), b"content");

    // And the path can be worked on again afterwards.
    let err = engine.do_job(&jobs[0]).await.unwrap_err();
    assert!(matches!(err, SyncError::StaleJob(_)));
}

// ===========================================================================
// Directories and ordering
// ===========================================================================

#[tokio::test]
async fn directory_subtree_converges() {
    let f = fixture_with_settings(auto_accept_clean());
    f.storage.write("/journal/2026/aug.md", b"entries").unwrap();

    f.engine.update_diff("/").await.unwrap();
    let jobs = f.engine.get_jobs(10, None).await;
    // Children come before parents in the scan order.
    let job_paths: Vec<&str> = jobs.iter().map(|j| j.path.as_str()).collect();
    assert_eq!(job_paths, vec!["/journal/2026/aug.md", "/journal/2026", "/journal"]);

    run_all_jobs(&f.engine).await;

    assert!(f.target.contains("/journal"));
    assert!(f.target.contains("/journal/2026"));
    assert_eq!(
        f.target.file_bytes("/journal/2026/aug.md").unwrap(),
        b"entries"
    );
    assert_eq!(f.engine.update_diff("/").await.unwrap(), 0);
}

#[tokio::test]
async fn remote_subtree_removal_cleans_local_tree() {
    let f = fixture_with_settings(auto_accept_clean());
    f.storage.write("/old/a.md", b"a").unwrap();
    f.storage.write("/old/b.md", b"b").unwrap();
    f.target.put_file("/old/a.md", b"a");
    f.target.put_file("/old/b.md", b"b");
    f.engine.update_diff("/").await.unwrap();
    assert!(f.engine.diffs().await.is_empty());

    f.target.delete("/old");

    f.engine.update_diff("/").await.unwrap();
    run_all_jobs(&f.engine).await;

    assert!(!f.storage.exists("/old").unwrap());
    assert!(f.metadata.get_all().unwrap().is_empty());
}

#[tokio::test]
async fn subtree_update_leaves_other_diffs_alone() {
    let f = fixture();
    f.storage.write("/a/in-scope.md", b"a").unwrap();
    f.storage.write("/b/out-of-scope.md", b"b").unwrap();

    f.engine.update_diff("/").await.unwrap();
    assert_eq!(f.engine.diffs().await.len(), 4); // two files + two dirs

    // Converge only /a; /b's entries must survive the subtree pass.
    f.engine
        .accept_multi(&[
            ("/a/in-scope.md".to_string(), ResolutionAction::AcceptAuto),
            ("/a".to_string(), ResolutionAction::AcceptAuto),
        ])
        .await
        .unwrap();
    run_all_jobs(&f.engine).await;
    f.engine.update_diff("/a").await.unwrap();

    let paths: Vec<String> = f.engine.diffs().await.into_iter().map(|e| e.path).collect();
    assert_eq!(paths, vec!["/b/out-of-scope.md", "/b"]);
}

// ===========================================================================
// Metadata lifecycle
// ===========================================================================

#[tokio::test]
async fn stale_metadata_dropped_when_path_gone_everywhere() {
    let f = fixture();

    // A leftover record for a path that exists on neither side.
    f.metadata
        .update_single("/ghost.md", &mut |_| {
            Some(EntrySyncMetadata::baseline(ContentIdentity::of_bytes(
                b"ghost",
            )))
        })
        .unwrap();

    f.engine.update_diff("/").await.unwrap();
    assert!(f.metadata.get("/ghost.md").unwrap().is_none());
}

#[tokio::test]
async fn sqlite_metadata_survives_engine_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("sync.db");
    let storage = Arc::new(MemoryEntryStorage::new());
    let target = Arc::new(MemorySyncTarget::new("remote-sql"));
    storage.write("/note.md", b"hello").unwrap();

    {
        let metadata = Arc::new(notesync_core::SqliteMetadataStore::open(&db_path).unwrap());
        let engine = SyncEngine::new(
            storage.clone(),
            target.clone(),
            metadata,
            &SyncSettings::default(),
        );
        engine.update_diff("/").await.unwrap();
        engine
            .accept("/note.md", ResolutionAction::AcceptAuto)
            .await
            .unwrap();
        run_all_jobs(&engine).await;
    }

    // A new engine over the same database sees the baseline and reports
    // nothing to sync.
    let metadata = Arc::new(notesync_core::SqliteMetadataStore::open(&db_path).unwrap());
    let engine = SyncEngine::new(storage, target, metadata, &SyncSettings::default());
    assert_eq!(engine.update_diff("/").await.unwrap(), 0);
}

// ===========================================================================
// Filesystem storage
// ===========================================================================

#[tokio::test]
async fn fs_storage_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FsEntryStorage::new(dir.path()).unwrap());
    let target = Arc::new(MemorySyncTarget::new("remote-fs"));
    let metadata = Arc::new(MemoryMetadataStore::new());
    let engine = SyncEngine::new(
        storage.clone(),
        target.clone(),
        metadata,
        &auto_accept_clean(),
    );

    std::fs::write(dir.path().join("disk-note.md"), b"on disk").unwrap();
    target.put_file("/from-remote.md", b"from remote");

    engine.update_diff("/").await.unwrap();
    run_all_jobs(&engine).await;

    assert_eq!(target.file_bytes("/disk-note.md").unwrap(), b"on disk");
    assert_eq!(
        std::fs::read(dir.path().join("from-remote.md")).unwrap(),
        b"from remote"
    );
    assert_eq!(engine.update_diff("/").await.unwrap(), 0);
}

// ===========================================================================
// Status surface
// ===========================================================================

#[tokio::test]
async fn status_reports_counts_and_pass_time() {
    let f = fixture();
    let before = f.engine.status().await;
    assert_eq!(before.unresolved_diffs, 0);
    assert!(before.last_pass_at.is_none());
    assert!(!before.updating_diff);

    f.storage.write("/x.md", b"local").unwrap();
    f.target.put_file("/x.md", b"remote");
    f.storage.write("/clean.md", b"new").unwrap();
    f.engine.update_diff("/").await.unwrap();

    let status = f.engine.status().await;
    assert_eq!(status.unresolved_diffs, 2);
    assert_eq!(status.conflicts, 1);
    assert!(status.last_pass_at.is_some());

    assert_eq!(f.engine.remote_id().await.unwrap(), "remote-test");
}
