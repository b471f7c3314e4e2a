//! File-system counter store backend
//!
//! Persists records as JSON under a base directory:
//!
//! ```text
//! <base>/counters/<day>.json    metric -> LiveCounter
//! <base>/runs/<day>.json        Vec<AggregationRun>
//! <base>/aggregates/<day>.json  Vec<DailyAggregate>
//! <base>/audits/<reset-id>.json ResetAudit
//! ```
//!
//! Mutations are serialized behind an in-process mutex plus a TTL-stamped
//! lock file (`store.lock`), so separate CLI or scheduler processes sharing
//! one directory serialize their read-modify-writes too. Writes go through
//! a uniquely-named temp file plus rename; the first claim for a day
//! additionally goes through `create_new`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::error::{StoreError, StoreResult};
use super::lock::FileLockGuard;
use super::types::{
    AggregationRun, ClaimOutcome, CounterSnapshot, DailyAggregate, LiveCounter, ResetAudit,
    ResetScope, RunStatus,
};
use super::{apply_claim, apply_promote, CounterStore};
use crate::bucket::DayBucket;

/// File-backed implementation of the counter store
pub struct FileCounterStore {
    base_dir: PathBuf,
    guard: Mutex<()>,
}

impl FileCounterStore {
    /// Open (and create if needed) a store rooted at `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let base_dir = base_dir.into();
        for sub in ["counters", "runs", "aggregates", "audits"] {
            std::fs::create_dir_all(base_dir.join(sub))?;
        }
        Ok(Self {
            base_dir,
            guard: Mutex::new(()),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn counters_path(&self, day: DayBucket) -> PathBuf {
        self.base_dir.join("counters").join(format!("{day}.json"))
    }

    fn runs_path(&self, day: DayBucket) -> PathBuf {
        self.base_dir.join("runs").join(format!("{day}.json"))
    }

    fn aggregates_path(&self, day: DayBucket) -> PathBuf {
        self.base_dir.join("aggregates").join(format!("{day}.json"))
    }

    fn audit_path(&self, audit: &ResetAudit) -> PathBuf {
        self.base_dir.join("audits").join(format!("{}.json", audit.id))
    }

    fn lock_path(&self) -> PathBuf {
        self.base_dir.join("store.lock")
    }

    /// Cross-process exclusivity for one mutation
    async fn lock(&self) -> StoreResult<FileLockGuard> {
        FileLockGuard::acquire(&self.lock_path()).await
    }

    async fn read_or_default<T: DeserializeOwned + Default>(path: &Path) -> StoreResult<T> {
        match fs::read(path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_atomic<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        // Writer-unique temp name: concurrent writers must never collide on
        // the rename source.
        let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4()));
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Insert-if-absent for the first run of a day. Returns false if the
    /// runs file already exists and the slow path must be taken.
    async fn try_create_runs_file(&self, path: &Path, run: &AggregationRun) -> StoreResult<bool> {
        let bytes = serde_json::to_vec_pretty(&vec![run.clone()])?;
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
        {
            Ok(mut file) => {
                file.write_all(&bytes).await?;
                file.flush().await?;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn runs_for(&self, day: DayBucket) -> StoreResult<Vec<AggregationRun>> {
        Self::read_or_default(&self.runs_path(day)).await
    }

    async fn day_is_final(&self, day: DayBucket) -> StoreResult<bool> {
        let runs = self.runs_for(day).await?;
        Ok(runs.iter().any(|r| r.status == RunStatus::Succeeded))
    }

    async fn counter_days(&self) -> StoreResult<Vec<DayBucket>> {
        let mut days = Vec::new();
        let mut entries = fs::read_dir(self.base_dir.join("counters")).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(stem) = Path::new(&name).file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Ok(day) = stem.parse::<DayBucket>() {
                days.push(day);
            }
        }
        days.sort();
        Ok(days)
    }

    async fn claim(
        &self,
        run: AggregationRun,
        pending_ttl: Duration,
        now: DateTime<Utc>,
        force: bool,
    ) -> StoreResult<ClaimOutcome> {
        let _guard = self.guard.lock().await;
        let _lock = self.lock().await?;
        let path = self.runs_path(run.day);

        if !force && self.try_create_runs_file(&path, &run).await? {
            return Ok(ClaimOutcome::Claimed);
        }

        let mut runs: Vec<AggregationRun> = Self::read_or_default(&path).await?;
        let outcome = apply_claim(&mut runs, run, pending_ttl, now, force);
        Self::write_atomic(&path, &runs).await?;
        Ok(outcome)
    }
}

#[async_trait]
impl CounterStore for FileCounterStore {
    async fn increment(
        &self,
        metric: &str,
        day: DayBucket,
        delta: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<i64> {
        let _guard = self.guard.lock().await;
        let _lock = self.lock().await?;

        if self.day_is_final(day).await? {
            return Err(StoreError::stale_write(metric, day));
        }

        let path = self.counters_path(day);
        let mut counters: HashMap<String, LiveCounter> = Self::read_or_default(&path).await?;
        if counters.get(metric).map(|c| c.archived).unwrap_or(false) {
            return Err(StoreError::stale_write(metric, day));
        }

        let counter = counters.entry(metric.to_string()).or_insert(LiveCounter {
            metric: metric.to_string(),
            day,
            value: 0,
            increments: 0,
            last_updated: now,
            archived: false,
        });
        counter.value += delta;
        counter.increments += 1;
        counter.last_updated = now;
        let value = counter.value;

        Self::write_atomic(&path, &counters).await?;
        Ok(value)
    }

    async fn live_counters(&self, day: DayBucket) -> StoreResult<Vec<LiveCounter>> {
        let counters: HashMap<String, LiveCounter> =
            Self::read_or_default(&self.counters_path(day)).await?;
        let mut counters: Vec<_> = counters
            .into_values()
            .filter(|c| !c.archived)
            .collect();
        counters.sort_by(|a, b| a.metric.cmp(&b.metric));
        Ok(counters)
    }

    async fn all_live_counters(&self) -> StoreResult<Vec<LiveCounter>> {
        let mut all = Vec::new();
        for day in self.counter_days().await? {
            all.extend(self.live_counters(day).await?);
        }
        Ok(all)
    }

    async fn counters_for_day(&self, day: DayBucket) -> StoreResult<Vec<LiveCounter>> {
        let counters: HashMap<String, LiveCounter> =
            Self::read_or_default(&self.counters_path(day)).await?;
        let mut counters: Vec<_> = counters.into_values().collect();
        counters.sort_by(|a, b| a.metric.cmp(&b.metric));
        Ok(counters)
    }

    async fn archive_counters(&self, day: DayBucket) -> StoreResult<usize> {
        let _guard = self.guard.lock().await;
        let _lock = self.lock().await?;
        let path = self.counters_path(day);
        let mut counters: HashMap<String, LiveCounter> = Self::read_or_default(&path).await?;
        let mut archived = 0;
        for counter in counters.values_mut().filter(|c| !c.archived) {
            counter.archived = true;
            archived += 1;
        }
        if archived > 0 {
            Self::write_atomic(&path, &counters).await?;
        }
        Ok(archived)
    }

    async fn zero_counters(
        &self,
        scope: &ResetScope,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<CounterSnapshot>> {
        let _guard = self.guard.lock().await;
        let _lock = self.lock().await?;
        let mut snapshots = Vec::new();
        for day in self.counter_days().await? {
            let path = self.counters_path(day);
            let mut counters: HashMap<String, LiveCounter> =
                Self::read_or_default(&path).await?;
            let mut touched = false;
            for counter in counters.values_mut() {
                if counter.archived || !scope.matches(&counter.metric, counter.day) {
                    continue;
                }
                snapshots.push(CounterSnapshot {
                    metric: counter.metric.clone(),
                    day: counter.day,
                    previous_value: counter.value,
                    previous_increments: counter.increments,
                });
                counter.value = 0;
                counter.increments = 0;
                counter.last_updated = now;
                touched = true;
            }
            if touched {
                Self::write_atomic(&path, &counters).await?;
            }
        }
        snapshots.sort_by(|a, b| (a.day, &a.metric).cmp(&(b.day, &b.metric)));
        Ok(snapshots)
    }

    async fn claim_run(
        &self,
        run: AggregationRun,
        pending_ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<ClaimOutcome> {
        self.claim(run, pending_ttl, now, false).await
    }

    async fn force_claim_run(
        &self,
        run: AggregationRun,
        pending_ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<ClaimOutcome> {
        self.claim(run, pending_ttl, now, true).await
    }

    async fn complete_run(&self, run: AggregationRun) -> StoreResult<()> {
        let _guard = self.guard.lock().await;
        let _lock = self.lock().await?;
        let day = run.day;
        let run_id = run.id.clone();
        let status = run.status.clone();

        let path = self.runs_path(day);
        let mut runs: Vec<AggregationRun> = Self::read_or_default(&path).await?;
        let slot = runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or_else(|| StoreError::not_found(format!("run {run_id}")))?;
        *slot = run;
        Self::write_atomic(&path, &runs).await?;

        // Promote the run's staged aggregates in the same critical section,
        // so a failed run never leaves a current generation behind.
        if status == RunStatus::Succeeded {
            let aggregates_path = self.aggregates_path(day);
            let mut aggregates: Vec<DailyAggregate> =
                Self::read_or_default(&aggregates_path).await?;
            if !aggregates.is_empty() {
                apply_promote(&mut aggregates, &run_id);
                Self::write_atomic(&aggregates_path, &aggregates).await?;
            }
        }
        Ok(())
    }

    async fn run_for_day(&self, day: DayBucket) -> StoreResult<Option<AggregationRun>> {
        let runs = self.runs_for(day).await?;
        Ok(runs
            .into_iter()
            .filter(|r| r.status != RunStatus::SkippedAlreadyDone)
            .next_back())
    }

    async fn recent_runs(&self, limit: usize) -> StoreResult<Vec<AggregationRun>> {
        let mut all = Vec::new();
        let mut entries = fs::read_dir(self.base_dir.join("runs")).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(entry.path()).await?;
            let runs: Vec<AggregationRun> = serde_json::from_slice(&bytes)?;
            all.extend(runs);
        }
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all.truncate(limit);
        Ok(all)
    }

    async fn insert_aggregates(
        &self,
        day: DayBucket,
        aggregates: Vec<DailyAggregate>,
    ) -> StoreResult<()> {
        let _guard = self.guard.lock().await;
        let _lock = self.lock().await?;
        let path = self.aggregates_path(day);
        let mut existing: Vec<DailyAggregate> = Self::read_or_default(&path).await?;
        existing.extend(aggregates);
        Self::write_atomic(&path, &existing).await?;
        Ok(())
    }

    async fn aggregates_for_day(&self, day: DayBucket) -> StoreResult<Vec<DailyAggregate>> {
        Self::read_or_default(&self.aggregates_path(day)).await
    }

    async fn append_reset_audit(&self, audit: ResetAudit) -> StoreResult<()> {
        let _guard = self.guard.lock().await;
        let _lock = self.lock().await?;
        Self::write_atomic(&self.audit_path(&audit), &audit).await
    }

    async fn reset_audits(&self) -> StoreResult<Vec<ResetAudit>> {
        let mut audits = Vec::new();
        let mut entries = fs::read_dir(self.base_dir.join("audits")).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(entry.path()).await?;
            audits.push(serde_json::from_slice::<ResetAudit>(&bytes)?);
        }
        audits.sort_by(|a, b| b.at.cmp(&a.at));
        Ok(audits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn day(s: &str) -> DayBucket {
        s.parse().expect("valid day")
    }

    #[tokio::test]
    async fn counters_survive_reopening_the_store() {
        let dir = TempDir::new().expect("tempdir");
        let target = day("2024-03-01");
        let now = Utc::now();

        {
            let store = FileCounterStore::new(dir.path()).unwrap();
            store.increment("requests", target, 5, now).await.unwrap();
        }

        let reopened = FileCounterStore::new(dir.path()).unwrap();
        let counters = reopened.live_counters(target).await.unwrap();
        assert_eq!(counters.len(), 1);
        assert_eq!(counters[0].value, 5);
    }

    #[tokio::test]
    async fn first_claim_creates_runs_file_exclusively() {
        let dir = TempDir::new().expect("tempdir");
        let store = FileCounterStore::new(dir.path()).unwrap();
        let target = day("2024-03-01");
        let now = Utc::now();
        let ttl = Duration::from_secs(60);

        let first = store
            .claim_run(AggregationRun::pending(target, now), ttl, now)
            .await
            .unwrap();
        assert!(matches!(first, ClaimOutcome::Claimed));

        let second = store
            .claim_run(AggregationRun::pending(target, now), ttl, now)
            .await
            .unwrap();
        assert!(matches!(second, ClaimOutcome::InProgress(_)));
    }

    #[tokio::test]
    async fn tmp_files_are_not_mistaken_for_day_data() {
        let dir = TempDir::new().expect("tempdir");
        let store = FileCounterStore::new(dir.path()).unwrap();
        let now = Utc::now();

        store
            .increment("requests", day("2024-03-01"), 1, now)
            .await
            .unwrap();
        // Leftover temp file from an interrupted write
        std::fs::write(
            dir.path().join("counters").join("garbage.json.tmp"),
            b"not json",
        )
        .unwrap();

        let all = store.all_live_counters().await.unwrap();
        assert_eq!(all.len(), 1);
    }
}
