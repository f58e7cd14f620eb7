//! Three-way note-tree synchronization engine.
//!
//! The [`SyncEngine`] is the heart of NoteSync. It composes the local entry
//! storage, the remote sync target, and the durable metadata store behind a
//! single entry point:
//!
//! 1. [`SyncEngine::update_diff`] walks the union of both trees under a
//!    subtree root, classifies every path against the persisted baseline,
//!    and merges the results into the live diff list.
//! 2. [`SyncEngine::accept`] / [`SyncEngine::accept_multi`] record
//!    resolution decisions, validated against the diff type.
//! 3. [`SyncEngine::get_jobs`] / [`SyncEngine::do_job`] transfer accepted
//!    changes in the correct direction and advance the baseline.
//!
//! One async mutex guards the live diff list and the active-job set as a
//! unit. Data transfers run outside the lock; the re-hash before write and
//! the baseline-unmoved commit guard detect races after the fact instead of
//! preventing them up front.
//!
//! The engine never schedules its own background work: the embedding
//! application decides when to recompute diffs and when to run jobs.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::classify::classify;
use crate::config::SyncSettings;
use crate::errors::{ResolveError, StorageError, SyncError, TargetError};
use crate::identity::ContentIdentity;
use crate::metadata::SyncMetadataStore;
use crate::models::{
    AcceptedIdentity, DiffType, EntrySyncMetadata, ResolutionAction, SyncDiffEntry, SyncStatus,
};
use crate::paths;
use crate::rules::{IgnorePredicate, RuleSet};
use crate::storage::{entry_identity, EntryStorage};
use crate::target::SyncTarget;

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// One queued unit of transfer: converges a single path's baseline toward
/// its accepted state.
#[derive(Debug, Clone)]
pub struct SyncJob {
    /// Normalized path this job converges.
    pub path: String,
    /// Classification the job was queued for.
    pub diff_type: DiffType,
    /// Approved propagation target at queue time.
    pub accepted: AcceptedIdentity,
}

/// What happened to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Data transferred and the baseline advanced.
    Committed,
    /// Data transferred, but the baseline had moved mid-flight; left for the
    /// next diff pass.
    CommitSkipped,
    /// The source drifted between diagnosis and execution; the diff was
    /// reclassified in place instead of writing stale data.
    Recomputed,
}

/// Which way a job moves data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    PushToRemote,
    PullToLocal,
    RemoveRemote,
    RemoveLocal,
}

/// Which state axis drifted mid-flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriftAxis {
    Local,
    Remote,
}

/// Result of the transfer phase, before commit.
enum Transfer {
    Done,
    Drifted {
        axis: DriftAxis,
        observed: Option<ContentIdentity>,
    },
}

/// Callback invoked whenever a job commits a change to the local side:
/// `(path, new identity or None for removal, new bytes or None)`.
pub type UpdateCallback =
    Box<dyn Fn(&str, Option<&ContentIdentity>, Option<&[u8]>) + Send + Sync>;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Shared mutable state guarded by the engine's single mutex.
#[derive(Default)]
struct EngineState {
    /// Live diff entries, rebuildable from metadata plus tree state.
    diffs: Vec<SyncDiffEntry>,
    /// Paths with an in-flight job; at most one job per path.
    active_job_paths: HashSet<String>,
}

/// The three-way synchronization engine.
pub struct SyncEngine {
    storage: Arc<dyn EntryStorage>,
    target: Arc<dyn SyncTarget>,
    metadata: Arc<dyn SyncMetadataStore>,
    /// Rules parsed once at construction; settings changes require a new
    /// engine (see DESIGN.md).
    rules: RuleSet,
    ignore: IgnorePredicate,
    state: tokio::sync::Mutex<EngineState>,
    updating_diff: Arc<AtomicBool>,
    last_pass_at: std::sync::Mutex<Option<DateTime<Utc>>>,
    callbacks: std::sync::Mutex<Vec<UpdateCallback>>,
}

impl SyncEngine {
    /// Create a new engine over the given trees and metadata store.
    pub fn new(
        storage: Arc<dyn EntryStorage>,
        target: Arc<dyn SyncTarget>,
        metadata: Arc<dyn SyncMetadataStore>,
        settings: &SyncSettings,
    ) -> Self {
        info!(rules = settings.rules.len(), "initializing sync engine");
        Self {
            storage,
            target,
            metadata,
            rules: settings.rule_set(),
            ignore: settings.ignore_predicate(),
            state: tokio::sync::Mutex::new(EngineState::default()),
            updating_diff: Arc::new(AtomicBool::new(false)),
            last_pass_at: std::sync::Mutex::new(None),
            callbacks: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Opaque identifier of the remote this engine syncs against.
    pub async fn remote_id(&self) -> Result<String, SyncError> {
        Ok(self.target.id().await?)
    }

    /// Handle to the durable metadata store this engine persists through.
    pub fn metadata_store(&self) -> Arc<dyn SyncMetadataStore> {
        self.metadata.clone()
    }

    /// Register a callback fired when a job commits a local-side change.
    pub fn register_update_callback(&self, callback: UpdateCallback) {
        self.callbacks.lock().unwrap().push(callback);
    }

    fn fire_local_update(
        &self,
        path: &str,
        identity: Option<&ContentIdentity>,
        bytes: Option<&[u8]>,
    ) {
        for callback in self.callbacks.lock().unwrap().iter() {
            callback(path, identity, bytes);
        }
    }

    // -----------------------------------------------------------------------
    // Consumer surface
    // -----------------------------------------------------------------------

    /// Snapshot of the live diff list.
    pub async fn diffs(&self) -> Vec<SyncDiffEntry> {
        self.state.lock().await.diffs.clone()
    }

    /// Diff entries with no resolution decision yet.
    pub async fn unresolved_diff_count(&self) -> usize {
        self.state
            .lock()
            .await
            .diffs
            .iter()
            .filter(|e| e.metadata.accepted.is_none())
            .count()
    }

    /// Diff entries with a conflicting classification.
    pub async fn conflict_count(&self) -> usize {
        self.state
            .lock()
            .await
            .diffs
            .iter()
            .filter(|e| e.diff_type.is_conflicting())
            .count()
    }

    /// Whether a diff computation pass is in flight.
    pub fn is_updating_diff(&self) -> bool {
        self.updating_diff.load(Ordering::SeqCst)
    }

    /// Status summary for polling consumers.
    pub async fn status(&self) -> SyncStatus {
        let state = self.state.lock().await;
        SyncStatus {
            unresolved_diffs: state
                .diffs
                .iter()
                .filter(|e| e.metadata.accepted.is_none())
                .count(),
            conflicts: state
                .diffs
                .iter()
                .filter(|e| e.diff_type.is_conflicting())
                .count(),
            updating_diff: self.is_updating_diff(),
            last_pass_at: *self.last_pass_at.lock().unwrap(),
        }
    }

    // -----------------------------------------------------------------------
    // Diff computation pass
    // -----------------------------------------------------------------------

    /// Recompute diffs for the subtree rooted at `start_path` and merge them
    /// into the live list. Returns the number of diff entries produced.
    ///
    /// Idempotent: a second pass with no intervening mutation yields the
    /// same diff set. A remote outline failure surfaces as a hard error
    /// with no metadata written.
    pub async fn update_diff(&self, start_path: &str) -> Result<usize, SyncError> {
        let start = paths::normalize(start_path);
        info!(start = %start, "updating diff");
        let _busy = UpdatingDiffGuard::engage(self.updating_diff.clone());

        // 1. Remote outline before anything is mutated.
        let outline = self.target.outline(&start).await?;
        let remote_ids: BTreeMap<String, ContentIdentity> = outline
            .map(|o| o.flatten(&start).into_iter().collect())
            .unwrap_or_default();

        let mut state = self.state.lock().await;

        // 2. Union of remote outline paths and the local walk, with ignored
        // paths excluded from sync entirely.
        let mut union: BTreeSet<String> = remote_ids
            .keys()
            .filter(|p| !self.ignore.is_ignored(p))
            .cloned()
            .collect();
        union.extend(self.walk_local(&start)?);

        // 3. Drop persisted metadata for paths gone from both sides.
        let persisted = self.metadata.get_all()?;
        let mut stale: BTreeMap<String, Option<EntrySyncMetadata>> = BTreeMap::new();
        for (path, meta) in &persisted {
            if paths::is_within(path, &start) && !union.contains(path) {
                if meta.needs_job() {
                    // The accepted state never made it across; the path no
                    // longer exists on either side, so this is a data-loss
                    // warning, not a failure.
                    warn!(path, "dropping metadata with un-synced accepted state");
                }
                stale.insert(path.clone(), None);
            }
        }
        if !stale.is_empty() {
            debug!(count = stale.len(), "dropping stale metadata");
            self.metadata.set_multi(&stale)?;
        }

        // 4–6. Classify every path, children before parents.
        let mut ordered: Vec<&String> = union.iter().collect();
        ordered.sort_by(|a, b| {
            paths::depth(b)
                .cmp(&paths::depth(a))
                .then_with(|| a.cmp(b))
        });

        let mut fresh: Vec<SyncDiffEntry> = Vec::new();
        for path in ordered {
            // The root exists by definition on both sides.
            if paths::is_root(path) {
                continue;
            }
            let local = match entry_identity(self.storage.as_ref(), path) {
                Ok(id) => id,
                Err(e) => {
                    warn!(path, error = %e, "skipping path during diff walk");
                    continue;
                }
            };
            let remote = remote_ids.get(path);
            let prior = persisted.get(path).filter(|_| !stale.contains_key(path));
            let synced = prior.and_then(|m| m.synced.as_ref());

            match classify(local.as_ref(), synced, remote) {
                None => {
                    // Clean and unrecorded: seed the baseline so the first
                    // sync needs no diff.
                    if prior.is_none() {
                        if let Some(id) = local.clone() {
                            self.metadata.update_single(path, &mut |_| {
                                Some(EntrySyncMetadata::baseline(id.clone()))
                            })?;
                            debug!(path, "seeded baseline metadata");
                        }
                    }
                }
                Some(diff_type) => {
                    let mut entry = SyncDiffEntry {
                        path: path.clone(),
                        diff_type,
                        actual: local,
                        remote: remote.cloned(),
                        metadata: prior.cloned().unwrap_or_default(),
                    };
                    if let Some(action) = self.rules.evaluate(path, diff_type) {
                        if let Err(e) = self.resolve_entry(&mut entry, action) {
                            warn!(
                                path,
                                %action,
                                error = %e,
                                "diff rule action rejected, surfacing diff"
                            );
                        }
                    }
                    fresh.push(entry);
                }
            }
        }

        // 7. Merge by filter-then-replace: entries under the start path not
        // reproduced by this pass have converged.
        let count = fresh.len();
        state.diffs.retain(|e| !paths::is_within(&e.path, &start));
        state.diffs.extend(fresh);
        *self.last_pass_at.lock().unwrap() = Some(Utc::now());

        info!(start = %start, diffs = count, "diff update complete");
        Ok(count)
    }

    /// Depth-first, children-before-parent walk of the local tree under
    /// `start`, ignore-filtered. Unreadable entries are skipped with a
    /// warning so one bad path cannot abort the pass.
    fn walk_local(&self, start: &str) -> Result<Vec<String>, SyncError> {
        let mut out = Vec::new();
        if !paths::is_root(start) && self.ignore.is_ignored(start) {
            return Ok(out);
        }
        let Some(stats) = self.storage.stats(start)? else {
            return Ok(out);
        };
        self.walk_rec(start, stats.is_directory, &mut out);
        Ok(out)
    }

    fn walk_rec(&self, path: &str, is_dir: bool, out: &mut Vec<String>) {
        if is_dir {
            match self.storage.children(path) {
                Ok(children) => {
                    for child in children {
                        if self.ignore.is_ignored(&child) {
                            continue;
                        }
                        match self.storage.stats(&child) {
                            Ok(Some(stats)) => self.walk_rec(&child, stats.is_directory, out),
                            Ok(None) => {}
                            Err(e) => {
                                warn!(path = %child, error = %e, "skipping unreadable entry")
                            }
                        }
                    }
                }
                Err(e) => warn!(path, error = %e, "skipping unreadable directory"),
            }
        }
        if !paths::is_root(path) {
            out.push(path.to_string());
        }
    }

    // -----------------------------------------------------------------------
    // Conflict resolution
    // -----------------------------------------------------------------------

    /// Record a resolution decision for the diff at `path`.
    ///
    /// Validated before any mutation: `accept-auto` is illegal on
    /// conflicting types, `accept-local` / `accept-remote` are illegal on
    /// clean types. Returns the persisted metadata record.
    pub async fn accept(
        &self,
        path: &str,
        action: ResolutionAction,
    ) -> Result<EntrySyncMetadata, ResolveError> {
        let path = paths::normalize(path);
        let mut state = self.state.lock().await;
        let entry = state
            .diffs
            .iter_mut()
            .find(|e| e.path == path)
            .ok_or_else(|| ResolveError::NoSuchDiff(path.clone()))?;
        self.resolve_entry(entry, action)?;
        Ok(entry.metadata.clone())
    }

    /// Batch variant of [`Self::accept`] for subtree-wide decisions.
    ///
    /// Reads the metadata map once and writes one batch. Requests are
    /// validated in order; on the first invalid request the already-valid
    /// prefix is still written, matching what sequential `accept` calls
    /// would have produced.
    pub async fn accept_multi(
        &self,
        requests: &[(String, ResolutionAction)],
    ) -> Result<(), ResolveError> {
        let mut state = self.state.lock().await;
        let persisted = self.metadata.get_all()?;

        let mut batch: BTreeMap<String, Option<EntrySyncMetadata>> = BTreeMap::new();
        let mut resolved: Vec<(usize, EntrySyncMetadata)> = Vec::new();
        let mut failure: Option<ResolveError> = None;

        for (raw_path, action) in requests {
            let path = paths::normalize(raw_path);
            let Some(idx) = state.diffs.iter().position(|e| e.path == path) else {
                failure = Some(ResolveError::NoSuchDiff(path));
                break;
            };
            let entry = &state.diffs[idx];
            match accepted_identity(entry, *action) {
                Ok(accepted) => {
                    let meta = EntrySyncMetadata {
                        synced: persisted.get(&path).and_then(|m| m.synced.clone()),
                        accepted: Some(accepted),
                        action: Some(*action),
                        diff: Some(entry.diff_type),
                    };
                    batch.insert(path, Some(meta.clone()));
                    resolved.push((idx, meta));
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if !batch.is_empty() {
            self.metadata.set_multi(&batch)?;
            let count = resolved.len();
            for (idx, meta) in resolved {
                state.diffs[idx].metadata = meta;
            }
            info!(count, "accepted diff batch");
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Validate, persist, and mirror one resolution. Callers hold the
    /// engine lock.
    fn resolve_entry(
        &self,
        entry: &mut SyncDiffEntry,
        action: ResolutionAction,
    ) -> Result<(), ResolveError> {
        let accepted = accepted_identity(entry, action)?;
        let diff_type = entry.diff_type;
        let stored = self.metadata.update_single(&entry.path, &mut |old| {
            Some(EntrySyncMetadata {
                synced: old.and_then(|m| m.synced),
                accepted: Some(accepted.clone()),
                action: Some(action),
                diff: Some(diff_type),
            })
        })?;
        if let Some(meta) = stored {
            entry.metadata = meta;
        }
        info!(path = %entry.path, diff = %diff_type, %action, "diff accepted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Job selection
    // -----------------------------------------------------------------------

    /// Select up to `limit` executable jobs: diffs whose accepted state
    /// still differs from the baseline, not already active, matching the
    /// optional path filter. Scanned depth-first, children before parents,
    /// so directory removal ordering is correct.
    pub async fn get_jobs(
        &self,
        limit: usize,
        filter: Option<&(dyn Fn(&str) -> bool + Sync)>,
    ) -> Vec<SyncJob> {
        let state = self.state.lock().await;

        let mut candidates: Vec<&SyncDiffEntry> = state.diffs.iter().collect();
        candidates.sort_by(|a, b| {
            paths::depth(&b.path)
                .cmp(&paths::depth(&a.path))
                .then_with(|| a.path.cmp(&b.path))
        });

        let mut jobs = Vec::new();
        for entry in candidates {
            if jobs.len() >= limit {
                break;
            }
            if !entry.metadata.needs_job() {
                continue;
            }
            if state.active_job_paths.contains(&entry.path) {
                continue;
            }
            if let Some(f) = filter {
                if !f(&entry.path) {
                    continue;
                }
            }
            let Some(accepted) = entry.metadata.accepted.clone() else {
                continue;
            };
            jobs.push(SyncJob {
                path: entry.path.clone(),
                diff_type: entry.diff_type,
                accepted,
            });
        }
        debug!(count = jobs.len(), "jobs selected");
        jobs
    }

    // -----------------------------------------------------------------------
    // Job execution
    // -----------------------------------------------------------------------

    /// Execute one job: transfer data in the accepted direction, then
    /// advance the baseline.
    ///
    /// A second `do_job` for the same path while one is active is rejected,
    /// not queued. The transfer runs outside the engine lock; source drift
    /// detected mid-flight aborts the write and reclassifies the diff in
    /// place. A failed job leaves metadata untouched.
    pub async fn do_job(&self, job: &SyncJob) -> Result<JobOutcome, SyncError> {
        let path = paths::normalize(&job.path);

        // Admission, under the lock: one active job per path, and the
        // direction is fixed from the freshest diagnosis.
        let admitted = {
            let mut state = self.state.lock().await;
            if state.active_job_paths.contains(&path) {
                return Err(SyncError::JobAlreadyActive(path));
            }
            let Some(entry) = state.diffs.iter().find(|e| e.path == path) else {
                return Err(SyncError::StaleJob(path));
            };
            if !entry.metadata.needs_job() {
                return Err(SyncError::StaleJob(path));
            }
            let Some(accepted) = entry.metadata.accepted.clone() else {
                return Err(SyncError::StaleJob(path));
            };
            let synced = entry.metadata.synced.clone();
            // Expected-prior-state token for remote writes: the remote
            // identity observed at diagnosis. For clean diffs this equals
            // the synced baseline; for conflict resolutions the baseline has
            // already diverged and would never match.
            let remote_token = entry.remote.clone();
            let direction =
                direction_of(&accepted, entry.actual.as_ref(), entry.remote.as_ref());
            state.active_job_paths.insert(path.clone());
            (accepted, synced, remote_token, direction)
        };
        let (accepted, synced_at_start, remote_token, direction) = admitted;

        let result = self
            .run_job_phase(
                &path,
                &accepted,
                synced_at_start.as_ref(),
                remote_token.as_ref(),
                direction,
            )
            .await;

        // Always clear the active marker, success or failure.
        {
            let mut state = self.state.lock().await;
            state.active_job_paths.remove(&path);
        }

        result
    }

    async fn run_job_phase(
        &self,
        path: &str,
        accepted: &AcceptedIdentity,
        synced_at_start: Option<&ContentIdentity>,
        remote_token: Option<&ContentIdentity>,
        direction: Option<Direction>,
    ) -> Result<JobOutcome, SyncError> {
        let Some(direction) = direction else {
            // The accepted identity matches neither axis any more: the
            // source drifted between diagnosis and admission. Re-observe
            // the local side and reconcile instead of guessing.
            let observed = entry_identity(self.storage.as_ref(), path)?;
            self.on_identity_change(path, DriftAxis::Local, observed)
                .await?;
            return Ok(JobOutcome::Recomputed);
        };

        // Transfer outside the lock.
        let transfer = self
            .transfer(path, accepted, synced_at_start, remote_token, direction)
            .await?;

        match transfer {
            Transfer::Drifted { axis, observed } => {
                self.on_identity_change(path, axis, observed).await?;
                Ok(JobOutcome::Recomputed)
            }
            Transfer::Done => self.commit_job(path, accepted, synced_at_start).await,
        }
    }

    /// The data-moving half of a job. Runs with no lock held.
    async fn transfer(
        &self,
        path: &str,
        accepted: &AcceptedIdentity,
        synced: Option<&ContentIdentity>,
        remote_token: Option<&ContentIdentity>,
        direction: Direction,
    ) -> Result<Transfer, SyncError> {
        match direction {
            Direction::RemoveRemote => {
                if synced.is_none() {
                    return Err(SyncError::InvariantViolation {
                        path: path.to_string(),
                        detail: "removal job with no synced baseline".into(),
                    });
                }
                self.target.remove(path, remote_token).await?;
                debug!(path, "removed on remote");
            }
            Direction::RemoveLocal => {
                if synced.is_none() {
                    return Err(SyncError::InvariantViolation {
                        path: path.to_string(),
                        detail: "removal job with no synced baseline".into(),
                    });
                }
                match self.storage.remove(path) {
                    Ok(()) => {}
                    // Already gone locally; the removal has converged.
                    Err(StorageError::NotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }
                self.fire_local_update(path, None, None);
                debug!(path, "removed locally");
            }
            Direction::PushToRemote => match accepted {
                AcceptedIdentity::Content(id) if id.is_directory() => {
                    self.target.create_dir(path, remote_token).await?;
                    debug!(path, "directory created on remote");
                }
                AcceptedIdentity::Content(id) => {
                    let bytes = match self.storage.read(path) {
                        Ok(bytes) => bytes,
                        Err(StorageError::NotFound(_)) => {
                            return Ok(Transfer::Drifted {
                                axis: DriftAxis::Local,
                                observed: None,
                            });
                        }
                        Err(StorageError::NotAFile(_)) => {
                            return Ok(Transfer::Drifted {
                                axis: DriftAxis::Local,
                                observed: Some(ContentIdentity::directory()),
                            });
                        }
                        Err(e) => return Err(e.into()),
                    };
                    // Re-verify against the accepted identity so a local
                    // edit racing this job never reaches the remote.
                    let observed = ContentIdentity::of_bytes(&bytes);
                    if &observed != id {
                        debug!(path, "local content drifted since diagnosis");
                        return Ok(Transfer::Drifted {
                            axis: DriftAxis::Local,
                            observed: Some(observed),
                        });
                    }
                    self.target.update(path, &bytes, remote_token).await?;
                    debug!(path, bytes = bytes.len(), "pushed to remote");
                }
                AcceptedIdentity::Removal => {
                    return Err(SyncError::InvariantViolation {
                        path: path.to_string(),
                        detail: "push job with removal accepted".into(),
                    });
                }
            },
            Direction::PullToLocal => match accepted {
                AcceptedIdentity::Content(id) if id.is_directory() => {
                    self.storage.create_dir(path)?;
                    self.fire_local_update(path, Some(id), None);
                    debug!(path, "directory created locally");
                }
                AcceptedIdentity::Content(id) => {
                    let bytes = match self.target.read(path).await {
                        Ok(bytes) => bytes,
                        Err(TargetError::NotFound(_)) => {
                            return Ok(Transfer::Drifted {
                                axis: DriftAxis::Remote,
                                observed: None,
                            });
                        }
                        Err(e) => return Err(e.into()),
                    };
                    let observed = ContentIdentity::of_bytes(&bytes);
                    if &observed != id {
                        debug!(path, "remote content drifted since diagnosis");
                        return Ok(Transfer::Drifted {
                            axis: DriftAxis::Remote,
                            observed: Some(observed),
                        });
                    }
                    self.storage.write(path, &bytes)?;
                    self.fire_local_update(path, Some(id), Some(&bytes));
                    debug!(path, bytes = bytes.len(), "pulled to local");
                }
                AcceptedIdentity::Removal => {
                    return Err(SyncError::InvariantViolation {
                        path: path.to_string(),
                        detail: "pull job with removal accepted".into(),
                    });
                }
            },
        }
        Ok(Transfer::Done)
    }

    /// Advance the baseline for a transferred job, guarding against a
    /// baseline moved by a concurrent diff pass.
    async fn commit_job(
        &self,
        path: &str,
        accepted: &AcceptedIdentity,
        synced_at_start: Option<&ContentIdentity>,
    ) -> Result<JobOutcome, SyncError> {
        let mut state = self.state.lock().await;

        let current = self.metadata.get(path)?;
        let Some(current) = current else {
            // A concurrent pass dropped the record; nothing to advance.
            state.diffs.retain(|e| e.path != path);
            return Ok(JobOutcome::CommitSkipped);
        };
        if current.synced.as_ref() != synced_at_start {
            warn!(path, "baseline moved during job; leaving commit to the next pass");
            return Ok(JobOutcome::CommitSkipped);
        }

        match accepted {
            AcceptedIdentity::Removal => {
                // The path is gone from both sides; its history goes too.
                self.metadata.update_single(path, &mut |_| None)?;
            }
            AcceptedIdentity::Content(id) => {
                self.metadata.update_single(path, &mut |_| {
                    Some(EntrySyncMetadata::baseline(id.clone()))
                })?;
            }
        }
        state.diffs.retain(|e| e.path != path);
        info!(path, accepted = %accepted, "job committed");
        Ok(JobOutcome::Committed)
    }

    // -----------------------------------------------------------------------
    // Identity-change reconciliation
    // -----------------------------------------------------------------------

    /// Re-run the classifier for a path whose identity drifted mid-flight,
    /// with the new identity substituted on the drifted axis. The live
    /// entry is updated and re-submitted to rule evaluation; a clean
    /// reclassification drops the entry and clears its metadata.
    ///
    /// Takes the engine lock itself; callers must not hold it.
    async fn on_identity_change(
        &self,
        path: &str,
        axis: DriftAxis,
        observed: Option<ContentIdentity>,
    ) -> Result<(), SyncError> {
        let mut state = self.state.lock().await;
        let Some(idx) = state.diffs.iter().position(|e| e.path == path) else {
            return Ok(());
        };

        {
            let entry = &mut state.diffs[idx];
            match axis {
                DriftAxis::Local => entry.actual = observed,
                DriftAxis::Remote => entry.remote = observed,
            }
        }

        let entry = &state.diffs[idx];
        let reclassified = classify(
            entry.actual.as_ref(),
            entry.metadata.synced.as_ref(),
            entry.remote.as_ref(),
        );

        match reclassified {
            None => {
                info!(path, "drifted diff converged; clearing entry");
                self.metadata.update_single(path, &mut |_| None)?;
                state.diffs.remove(idx);
            }
            Some(diff_type) => {
                info!(path, diff = %diff_type, "diff reclassified after drift");
                let stored = self.metadata.update_single(path, &mut |old| {
                    Some(EntrySyncMetadata {
                        synced: old.and_then(|m| m.synced),
                        accepted: None,
                        action: None,
                        diff: None,
                    })
                })?;
                let entry = &mut state.diffs[idx];
                entry.diff_type = diff_type;
                if let Some(meta) = stored {
                    entry.metadata = meta;
                }
                if let Some(action) = self.rules.evaluate(path, diff_type) {
                    if let Err(e) = self.resolve_entry(entry, action) {
                        warn!(path, %action, error = %e, "rule action rejected after drift");
                    }
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Resolution semantics
// ---------------------------------------------------------------------------

/// Compute the accepted identity for a resolution, validating the
/// action/diff-type pairing first.
fn accepted_identity(
    entry: &SyncDiffEntry,
    action: ResolutionAction,
) -> Result<AcceptedIdentity, ResolveError> {
    let diff = entry.diff_type;
    match action {
        ResolutionAction::AcceptAuto if diff.is_conflicting() => {
            return Err(ResolveError::AutoOnConflict {
                path: entry.path.clone(),
                diff,
            });
        }
        ResolutionAction::AcceptLocal | ResolutionAction::AcceptRemote if diff.is_clean() => {
            return Err(ResolveError::ExplicitOnClean {
                path: entry.path.clone(),
                action,
                diff,
            });
        }
        _ => {}
    }

    let keep_local = match action {
        ResolutionAction::AcceptAuto => diff.favors_local(),
        ResolutionAction::AcceptLocal => true,
        ResolutionAction::AcceptRemote => false,
    };
    let side = if keep_local { &entry.actual } else { &entry.remote };
    Ok(match side {
        Some(id) => AcceptedIdentity::Content(id.clone()),
        None => AcceptedIdentity::Removal,
    })
}

/// Map an accepted identity onto a transfer direction, given the entry's
/// axis identities at admission time. `None` means the accepted state
/// matches neither side any more (the source drifted).
fn direction_of(
    accepted: &AcceptedIdentity,
    actual: Option<&ContentIdentity>,
    remote: Option<&ContentIdentity>,
) -> Option<Direction> {
    match accepted {
        AcceptedIdentity::Removal => match (actual, remote) {
            (Some(_), None) => Some(Direction::RemoveLocal),
            (None, Some(_)) => Some(Direction::RemoveRemote),
            _ => None,
        },
        AcceptedIdentity::Content(id) => {
            if actual == Some(id) {
                Some(Direction::PushToRemote)
            } else if remote == Some(id) {
                Some(Direction::PullToLocal)
            } else {
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Busy-flag RAII guard
// ---------------------------------------------------------------------------

/// Drop guard that clears the `updating_diff` flag.
///
/// This ensures the busy flag is always released, even if a pass errors out.
struct UpdatingDiffGuard(Arc<AtomicBool>);

impl UpdatingDiffGuard {
    fn engage(flag: Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for UpdatingDiffGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(
        diff_type: DiffType,
        actual: Option<&[u8]>,
        remote: Option<&[u8]>,
    ) -> SyncDiffEntry {
        SyncDiffEntry {
            path: "/note.md".into(),
            diff_type,
            actual: actual.map(ContentIdentity::of_bytes),
            remote: remote.map(ContentIdentity::of_bytes),
            metadata: EntrySyncMetadata::default(),
        }
    }

    #[test]
    fn test_accept_auto_follows_clean_direction() {
        let e = entry(DiffType::LocalUpdate, Some(b"local"), Some(b"remote"));
        let accepted = accepted_identity(&e, ResolutionAction::AcceptAuto).unwrap();
        assert_eq!(
            accepted,
            AcceptedIdentity::Content(ContentIdentity::of_bytes(b"local"))
        );

        let e = entry(DiffType::RemoteUpdate, Some(b"local"), Some(b"remote"));
        let accepted = accepted_identity(&e, ResolutionAction::AcceptAuto).unwrap();
        assert_eq!(
            accepted,
            AcceptedIdentity::Content(ContentIdentity::of_bytes(b"remote"))
        );

        let e = entry(DiffType::LocalRemove, None, Some(b"remote"));
        assert_eq!(
            accepted_identity(&e, ResolutionAction::AcceptAuto).unwrap(),
            AcceptedIdentity::Removal
        );

        let e = entry(DiffType::RemoteRemove, Some(b"local"), None);
        assert_eq!(
            accepted_identity(&e, ResolutionAction::AcceptAuto).unwrap(),
            AcceptedIdentity::Removal
        );
    }

    #[test]
    fn test_accept_auto_rejected_on_conflicts() {
        for diff_type in DiffType::ALL.into_iter().filter(DiffType::is_conflicting) {
            let e = entry(diff_type, Some(b"local"), Some(b"remote"));
            let err = accepted_identity(&e, ResolutionAction::AcceptAuto).unwrap_err();
            assert!(matches!(err, ResolveError::AutoOnConflict { .. }), "{diff_type}");
        }
    }

    #[test]
    fn test_explicit_rejected_on_clean() {
        for diff_type in DiffType::ALL.into_iter().filter(DiffType::is_clean) {
            let e = entry(diff_type, Some(b"local"), Some(b"remote"));
            for action in [ResolutionAction::AcceptLocal, ResolutionAction::AcceptRemote] {
                let err = accepted_identity(&e, action).unwrap_err();
                assert!(
                    matches!(err, ResolveError::ExplicitOnClean { .. }),
                    "{diff_type} {action}"
                );
            }
        }
    }

    #[test]
    fn test_explicit_resolution_on_removal_conflicts() {
        // Local deleted, remote edited: keeping local means removal, keeping
        // remote means the remote content.
        let e = entry(DiffType::ConflictingLocalRemove, None, Some(b"remote"));
        assert_eq!(
            accepted_identity(&e, ResolutionAction::AcceptLocal).unwrap(),
            AcceptedIdentity::Removal
        );
        assert_eq!(
            accepted_identity(&e, ResolutionAction::AcceptRemote).unwrap(),
            AcceptedIdentity::Content(ContentIdentity::of_bytes(b"remote"))
        );

        let e = entry(DiffType::ConflictingRemoteRemove, Some(b"local"), None);
        assert_eq!(
            accepted_identity(&e, ResolutionAction::AcceptLocal).unwrap(),
            AcceptedIdentity::Content(ContentIdentity::of_bytes(b"local"))
        );
        assert_eq!(
            accepted_identity(&e, ResolutionAction::AcceptRemote).unwrap(),
            AcceptedIdentity::Removal
        );
    }

    #[test]
    fn test_direction_of() {
        let local = ContentIdentity::of_bytes(b"local");
        let remote = ContentIdentity::of_bytes(b"remote");

        assert_eq!(
            direction_of(
                &AcceptedIdentity::Content(local.clone()),
                Some(&local),
                Some(&remote)
            ),
            Some(Direction::PushToRemote)
        );
        assert_eq!(
            direction_of(
                &AcceptedIdentity::Content(remote.clone()),
                Some(&local),
                Some(&remote)
            ),
            Some(Direction::PullToLocal)
        );
        // Accepted matches neither side: drift.
        let other = ContentIdentity::of_bytes(b"other");
        assert_eq!(
            direction_of(
                &AcceptedIdentity::Content(other),
                Some(&local),
                Some(&remote)
            ),
            None
        );

        assert_eq!(
            direction_of(&AcceptedIdentity::Removal, Some(&local), None),
            Some(Direction::RemoveLocal)
        );
        assert_eq!(
            direction_of(&AcceptedIdentity::Removal, None, Some(&remote)),
            Some(Direction::RemoveRemote)
        );
        assert_eq!(direction_of(&AcceptedIdentity::Removal, None, None), None);
    }

    #[test]
    fn test_updating_diff_guard_resets_on_drop() {
        let flag = Arc::new(AtomicBool::new(false));
        {
            let _guard = UpdatingDiffGuard::engage(flag.clone());
            assert!(flag.load(Ordering::SeqCst));
        }
        assert!(!flag.load(Ordering::SeqCst));
    }
}
