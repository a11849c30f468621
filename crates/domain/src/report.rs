use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};
use time::Date;

use crate::DomainResult;
use crate::ports::reports::ReportRepository;
use crate::schema::{FieldSchema, FieldValue};
use crate::util::utc_date_of_ms;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ReportId(pub i64);

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out strictly increasing ids seeded from the wall clock, so ids stay
/// ordered across restarts as long as the clock does.
#[derive(Debug, Default)]
pub struct ReportIdGenerator {
    last: AtomicI64,
}

impl ReportIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(last: i64) -> Self {
        Self {
            last: AtomicI64::new(last),
        }
    }

    /// Makes every future id greater than `id`.
    pub fn observe(&self, id: ReportId) {
        self.last.fetch_max(id.0, Ordering::SeqCst);
    }

    pub fn next(&self, now_ms: i64) -> ReportId {
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now_ms.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        ReportId(now_ms.max(previous + 1))
    }
}

/// Fully collected values, produced by the collection state machine and not
/// yet persisted.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReportDraft {
    pub user_id: String,
    pub values: BTreeMap<String, FieldValue>,
    pub started_at_ms: i64,
    pub completed_at_ms: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub id: ReportId,
    pub user_id: String,
    pub values: BTreeMap<String, FieldValue>,
    pub created_at_ms: i64,
}

impl Report {
    pub fn from_draft(id: ReportId, draft: &ReportDraft, created_at_ms: i64) -> Self {
        Self {
            id,
            user_id: draft.user_id.clone(),
            values: draft.values.clone(),
            created_at_ms,
        }
    }

    pub fn value(&self, key: &str) -> Option<&FieldValue> {
        self.values.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.value(key).and_then(FieldValue::as_text)
    }

    /// Numeric value of `key`, zero when absent or non-numeric.
    pub fn number(&self, key: &str) -> f64 {
        self.value(key).and_then(FieldValue::as_f64).unwrap_or(0.0)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReportAggregate {
    pub total_reports: usize,
    pub unique_users: usize,
    pub numeric_totals: BTreeMap<String, f64>,
    pub last_activity_ms: Option<i64>,
}

impl ReportAggregate {
    pub fn from_reports(schema: &FieldSchema, reports: &[Report]) -> Self {
        let mut numeric_totals: BTreeMap<String, f64> = schema
            .numeric_keys()
            .map(|key| (key.to_string(), 0.0))
            .collect();
        for report in reports {
            for (key, total) in numeric_totals.iter_mut() {
                *total += report.number(key);
            }
        }
        let unique_users = reports
            .iter()
            .map(|report| report.user_id.as_str())
            .collect::<HashSet<_>>()
            .len();
        Self {
            total_reports: reports.len(),
            unique_users,
            numeric_totals,
            last_activity_ms: reports.iter().map(|report| report.created_at_ms).max(),
        }
    }

    pub fn total(&self, key: &str) -> f64 {
        self.numeric_totals.get(key).copied().unwrap_or(0.0)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserReportSummary {
    pub user_id: String,
    pub display_name: Option<String>,
    pub reports_count: usize,
    pub last_activity_ms: i64,
    pub last_title: Option<String>,
}

#[derive(Clone)]
pub struct ReportService {
    repository: Arc<dyn ReportRepository>,
    schema: Arc<FieldSchema>,
}

impl ReportService {
    pub fn new(repository: Arc<dyn ReportRepository>, schema: Arc<FieldSchema>) -> Self {
        Self { repository, schema }
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    pub async fn append(&self, draft: &ReportDraft) -> DomainResult<Report> {
        self.repository.append(draft).await
    }

    pub async fn list_for_user(&self, user_id: &str) -> DomainResult<Vec<Report>> {
        self.repository.list_for_user(user_id).await
    }

    pub async fn list_all(&self) -> DomainResult<Vec<Report>> {
        self.repository.list_all().await
    }

    /// Recomputed from the full ledger on every call.
    pub async fn aggregate(&self) -> DomainResult<ReportAggregate> {
        let reports = self.repository.list_all().await?;
        Ok(ReportAggregate::from_reports(&self.schema, &reports))
    }

    pub async fn count_on_day(&self, day: Date) -> DomainResult<usize> {
        Ok(self.reports_on_day(day).await?.len())
    }

    /// Aggregate over the reports created on `day` (UTC).
    pub async fn aggregate_on_day(&self, day: Date) -> DomainResult<ReportAggregate> {
        let reports = self.reports_on_day(day).await?;
        Ok(ReportAggregate::from_reports(&self.schema, &reports))
    }

    async fn reports_on_day(&self, day: Date) -> DomainResult<Vec<Report>> {
        let mut reports = self.repository.list_all().await?;
        reports.retain(|report| utc_date_of_ms(report.created_at_ms) == Some(day));
        Ok(reports)
    }

    /// One entry per submitting user, in order of first submission.
    pub async fn user_summaries(&self) -> DomainResult<Vec<UserReportSummary>> {
        let reports = self.repository.list_all().await?;
        let mut summaries: Vec<UserReportSummary> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for report in &reports {
            let display_name = self
                .schema
                .display_name_field()
                .and_then(|key| report.text(key))
                .map(str::to_string);
            let last_title = self
                .schema
                .title_field()
                .and_then(|key| report.text(key))
                .map(str::to_string);
            match positions.get(&report.user_id) {
                Some(&position) => {
                    let summary = &mut summaries[position];
                    summary.reports_count += 1;
                    summary.last_activity_ms = report.created_at_ms;
                    summary.display_name = display_name.or(summary.display_name.take());
                    summary.last_title = last_title;
                }
                None => {
                    positions.insert(report.user_id.clone(), summaries.len());
                    summaries.push(UserReportSummary {
                        user_id: report.user_id.clone(),
                        display_name,
                        reports_count: 1,
                        last_activity_ms: report.created_at_ms,
                        last_title,
                    });
                }
            }
        }
        Ok(summaries)
    }
}
