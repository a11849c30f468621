use std::collections::HashMap;
use std::sync::Arc;

use fieldreport_domain::DomainResult;
use fieldreport_domain::ports::BoxFuture;
use fieldreport_domain::ports::reports::{MirrorError, ReportMirror, ReportRepository};
use fieldreport_domain::report::{Report, ReportDraft, ReportIdGenerator};
use metrics::counter;
use tokio::sync::{Mutex, RwLock};

const MIRROR_WRITE_FAILURES_TOTAL: &str = "fieldreport_mirror_write_failures_total";

#[derive(Default)]
struct ReportLedger {
    reports: Vec<Report>,
    by_user: HashMap<String, Vec<usize>>,
}

impl ReportLedger {
    fn push(&mut self, report: Report) {
        self.by_user
            .entry(report.user_id.clone())
            .or_default()
            .push(self.reports.len());
        self.reports.push(report);
    }

    fn for_user(&self, user_id: &str) -> Vec<Report> {
        self.by_user
            .get(user_id)
            .map(|positions| {
                positions
                    .iter()
                    .map(|&position| self.reports[position].clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Authoritative append-only ledger held in memory. When a mirror is
/// attached, the user's full sequence is rewritten to it after every append;
/// the mirror is never read back except through [`restore_from_mirror`].
///
/// Mirror writes run outside the ledger lock. A per-user write lock keeps one
/// user's snapshots landing in append order.
///
/// [`restore_from_mirror`]: InMemoryReportRepository::restore_from_mirror
#[derive(Default)]
pub struct InMemoryReportRepository {
    ids: ReportIdGenerator,
    store: Arc<RwLock<ReportLedger>>,
    mirror: Option<Arc<dyn ReportMirror>>,
    user_writes: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl InMemoryReportRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mirror(mut self, mirror: Arc<dyn ReportMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Replaces the ledger with `reports`, ordered by id. Duplicate ids keep
    /// the first occurrence. Returns the number of reports kept.
    pub async fn restore(&self, mut reports: Vec<Report>) -> usize {
        reports.sort_by_key(|report| report.id);
        reports.dedup_by_key(|report| report.id);

        let mut ledger = ReportLedger::default();
        for report in reports {
            self.ids.observe(report.id);
            ledger.push(report);
        }
        let restored = ledger.reports.len();
        *self.store.write().await = ledger;
        restored
    }

    pub async fn restore_from_mirror(&self) -> Result<usize, MirrorError> {
        let Some(mirror) = &self.mirror else {
            return Ok(0);
        };
        let reports = mirror.load_all().await?;
        let restored = self.restore(reports).await;
        tracing::info!(restored, "restored reports from mirror");
        Ok(restored)
    }

    async fn user_write_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.user_writes
            .lock()
            .await
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }
}

impl ReportRepository for InMemoryReportRepository {
    fn append(&self, draft: &ReportDraft) -> BoxFuture<'_, DomainResult<Report>> {
        let draft = draft.clone();
        Box::pin(async move {
            let user_lock = self.user_write_lock(&draft.user_id).await;
            let _user_guard = user_lock.lock().await;

            let (report, sequence) = {
                let mut ledger = self.store.write().await;
                let now = fieldreport_domain::util::now_ms();
                let report = Report::from_draft(self.ids.next(now), &draft, now);
                ledger.push(report.clone());
                let sequence = self
                    .mirror
                    .is_some()
                    .then(|| ledger.for_user(&report.user_id));
                (report, sequence)
            };

            if let (Some(mirror), Some(sequence)) = (&self.mirror, sequence)
                && let Err(err) = mirror.write(&report.user_id, &sequence).await
            {
                counter!(MIRROR_WRITE_FAILURES_TOTAL).increment(1);
                tracing::warn!(
                    report_id = %report.id,
                    user_id = %report.user_id,
                    error = %err,
                    "report mirror write failed"
                );
            }

            Ok(report)
        })
    }

    fn list_for_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<Report>>> {
        let user_id = user_id.to_string();
        Box::pin(async move { Ok(self.store.read().await.for_user(&user_id)) })
    }

    fn list_all(&self) -> BoxFuture<'_, DomainResult<Vec<Report>>> {
        Box::pin(async move { Ok(self.store.read().await.reports.clone()) })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio::sync::Notify;

    use fieldreport_domain::report::ReportId;
    use fieldreport_domain::schema::FieldValue;

    use super::*;

    fn draft(user_id: &str, name: &str) -> ReportDraft {
        let mut values = BTreeMap::new();
        values.insert("customer_name".to_string(), FieldValue::Text(name.to_string()));
        ReportDraft {
            user_id: user_id.to_string(),
            values,
            started_at_ms: 0,
            completed_at_ms: 0,
        }
    }

    #[derive(Default)]
    struct RecordingMirror {
        writes: Mutex<Vec<(String, usize)>>,
        fail: bool,
    }

    impl ReportMirror for RecordingMirror {
        fn write(
            &self,
            user_id: &str,
            reports: &[Report],
        ) -> BoxFuture<'_, Result<(), MirrorError>> {
            let entry = (user_id.to_string(), reports.len());
            Box::pin(async move {
                if self.fail {
                    return Err(MirrorError::Io("disk full".to_string()));
                }
                self.writes.lock().expect("mirror lock").push(entry);
                Ok(())
            })
        }

        fn load_all(&self) -> BoxFuture<'_, Result<Vec<Report>, MirrorError>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    /// Holds every write until released.
    #[derive(Default)]
    struct GatedMirror {
        started: Notify,
        release: Notify,
    }

    impl ReportMirror for GatedMirror {
        fn write(
            &self,
            _user_id: &str,
            _reports: &[Report],
        ) -> BoxFuture<'_, Result<(), MirrorError>> {
            Box::pin(async move {
                self.started.notify_one();
                self.release.notified().await;
                Ok(())
            })
        }

        fn load_all(&self) -> BoxFuture<'_, Result<Vec<Report>, MirrorError>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    #[tokio::test]
    async fn slow_mirror_does_not_block_readers() {
        let mirror = Arc::new(GatedMirror::default());
        let repo = Arc::new(InMemoryReportRepository::new().with_mirror(mirror.clone()));

        let pending = tokio::spawn({
            let repo = repo.clone();
            async move { repo.append(&draft("u1", "Acme")).await }
        });
        mirror.started.notified().await;

        let all = tokio::time::timeout(Duration::from_secs(1), repo.list_all())
            .await
            .expect("list_all waited on the mirror")
            .expect("list");
        assert_eq!(all.len(), 1);
        let mine = tokio::time::timeout(Duration::from_secs(1), repo.list_for_user("u1"))
            .await
            .expect("list_for_user waited on the mirror")
            .expect("list");
        assert_eq!(mine, all);

        mirror.release.notify_one();
        let report = pending.await.expect("join").expect("append");
        assert_eq!(report, all[0]);
    }

    #[tokio::test]
    async fn concurrent_appends_for_one_user_mirror_in_order() {
        let mirror = Arc::new(RecordingMirror::default());
        let repo = Arc::new(InMemoryReportRepository::new().with_mirror(mirror.clone()));

        let tasks: Vec<_> = (0..5)
            .map(|index| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.append(&draft("u1", &format!("n{index}"))).await })
            })
            .collect();
        for task in tasks {
            task.await.expect("join").expect("append");
        }

        let lengths: Vec<usize> = mirror
            .writes
            .lock()
            .expect("mirror lock")
            .iter()
            .map(|(_, len)| *len)
            .collect();
        assert_eq!(lengths, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn appends_are_ordered_and_indexed_per_user() {
        let repo = InMemoryReportRepository::new();
        let first = repo.append(&draft("u1", "Acme")).await.expect("append");
        let other = repo.append(&draft("u2", "Beta")).await.expect("append");
        let second = repo.append(&draft("u1", "Gamma")).await.expect("append");

        assert!(first.id < other.id && other.id < second.id);
        let mine = repo.list_for_user("u1").await.expect("list");
        assert_eq!(mine, vec![first.clone(), second]);
        assert_eq!(repo.list_all().await.expect("list").len(), 3);
        assert!(repo.list_for_user("nobody").await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn mirror_receives_the_full_user_sequence() {
        let mirror = Arc::new(RecordingMirror::default());
        let repo = InMemoryReportRepository::new().with_mirror(mirror.clone());
        repo.append(&draft("u1", "Acme")).await.expect("append");
        repo.append(&draft("u1", "Beta")).await.expect("append");

        let writes = mirror.writes.lock().expect("mirror lock").clone();
        assert_eq!(writes, vec![("u1".to_string(), 1), ("u1".to_string(), 2)]);
    }

    #[tokio::test]
    async fn mirror_failure_does_not_fail_append() {
        let mirror = Arc::new(RecordingMirror {
            fail: true,
            ..RecordingMirror::default()
        });
        let repo = InMemoryReportRepository::new().with_mirror(mirror);
        let report = repo.append(&draft("u1", "Acme")).await.expect("append");
        assert_eq!(repo.list_all().await.expect("list"), vec![report]);
    }

    #[tokio::test]
    async fn restore_orders_by_id_and_seeds_the_counter() {
        let repo = InMemoryReportRepository::new();
        let stored = |id: i64, user_id: &str| Report {
            id: ReportId(id),
            user_id: user_id.to_string(),
            values: BTreeMap::new(),
            created_at_ms: id,
        };
        let far_future = i64::MAX / 2;
        let restored = repo
            .restore(vec![
                stored(far_future, "u2"),
                stored(3, "u1"),
                stored(3, "u1"),
            ])
            .await;
        assert_eq!(restored, 2);

        let all = repo.list_all().await.expect("list");
        assert_eq!(all[0].id, ReportId(3));
        assert_eq!(repo.list_for_user("u2").await.expect("list").len(), 1);

        let next = repo.append(&draft("u1", "Acme")).await.expect("append");
        assert_eq!(next.id, ReportId(far_future + 1));
        assert_eq!(repo.list_for_user("u1").await.expect("list").len(), 2);
    }
}
