use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::{
    Json, Router,
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use fieldreport_domain::report::{Report, UserReportSummary};
use fieldreport_domain::schema::FieldValue;
use fieldreport_domain::util::{format_ms_rfc3339, now_ms, utc_date_of_ms};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::observability;
use crate::{error::ApiError, middleware as app_middleware, state::AppState, validation};

const DEFAULT_PAGE_LIMIT: u32 = 20;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/v1/stats", get(stats))
        .route("/v1/reports", get(list_reports))
        .route("/v1/users", get(list_users))
        .route("/v1/users/:user_id/reports", get(list_user_reports))
        .route("/v1/export", get(export_reports))
        .layer(middleware::from_fn(app_middleware::metrics_layer))
        .layer(app_middleware::timeout_layer())
        .layer(app_middleware::trace_layer())
        .layer(app_middleware::set_request_id_layer())
        .layer(app_middleware::propagate_request_id_layer())
        .layer(middleware::from_fn(
            app_middleware::correlation_id_middleware,
        ))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
    bot_enabled: bool,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.app_env.clone(),
        bot_enabled: state.config.bot_enabled(),
    })
}

async fn metrics() -> Result<Response, ApiError> {
    let body = observability::render_metrics()
        .ok_or_else(|| ApiError::Unavailable("metrics recorder is not installed".to_string()))?;
    Ok((
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        body,
    )
        .into_response())
}

#[derive(Serialize)]
struct StatsResponse {
    total_reports: usize,
    unique_users: usize,
    today_reports: usize,
    numeric_totals: BTreeMap<String, f64>,
    last_activity: Option<String>,
}

async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let aggregate = state.reports.aggregate().await?;
    let today_reports = match utc_date_of_ms(now_ms()) {
        Some(today) => state.reports.count_on_day(today).await?,
        None => 0,
    };
    Ok(Json(StatsResponse {
        total_reports: aggregate.total_reports,
        unique_users: aggregate.unique_users,
        today_reports,
        numeric_totals: aggregate.numeric_totals,
        last_activity: aggregate.last_activity_ms.map(format_ms_rfc3339),
    }))
}

#[derive(Serialize)]
struct ReportView {
    id: i64,
    user_id: String,
    created_at: String,
    values: BTreeMap<String, FieldValue>,
    totals: BTreeMap<String, String>,
}

impl ReportView {
    fn new(state: &AppState, report: Report) -> Self {
        let totals = state
            .schema
            .summary_totals()
            .iter()
            .map(|total| (total.label.clone(), total.format(&report.values)))
            .collect();
        Self {
            id: report.id.0,
            user_id: report.user_id,
            created_at: format_ms_rfc3339(report.created_at_ms),
            values: report.values,
            totals,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
struct ReportListQuery {
    #[validate(range(min = 1))]
    page: Option<u32>,
    #[validate(range(min = 1, max = 100))]
    limit: Option<u32>,
}

#[derive(Serialize)]
struct Pagination {
    page: u32,
    limit: u32,
    total: usize,
    total_pages: usize,
}

#[derive(Serialize)]
struct ReportPage {
    reports: Vec<ReportView>,
    pagination: Pagination,
}

async fn list_reports(
    State(state): State<AppState>,
    Query(query): Query<ReportListQuery>,
) -> Result<Json<ReportPage>, ApiError> {
    validation::validate(&query)?;
    let page = query.page.unwrap_or(1);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT);

    let reports = state.reports.list_all().await?;
    let total = reports.len();
    let start = (page as usize - 1).saturating_mul(limit as usize);
    let views = reports
        .into_iter()
        .skip(start)
        .take(limit as usize)
        .map(|report| ReportView::new(&state, report))
        .collect();

    Ok(Json(ReportPage {
        reports: views,
        pagination: Pagination {
            page,
            limit,
            total,
            total_pages: total.div_ceil(limit as usize),
        },
    }))
}

#[derive(Serialize)]
struct UserView {
    user_id: String,
    display_name: Option<String>,
    reports_count: usize,
    last_activity: String,
    last_title: Option<String>,
}

impl From<UserReportSummary> for UserView {
    fn from(summary: UserReportSummary) -> Self {
        Self {
            user_id: summary.user_id,
            display_name: summary.display_name,
            reports_count: summary.reports_count,
            last_activity: format_ms_rfc3339(summary.last_activity_ms),
            last_title: summary.last_title,
        }
    }
}

#[derive(Serialize)]
struct UserListResponse {
    users: Vec<UserView>,
}

async fn list_users(State(state): State<AppState>) -> Result<Json<UserListResponse>, ApiError> {
    let users = state
        .reports
        .user_summaries()
        .await?
        .into_iter()
        .map(UserView::from)
        .collect();
    Ok(Json(UserListResponse { users }))
}

#[derive(Serialize)]
struct UserReportsResponse {
    user_id: String,
    reports: Vec<ReportView>,
}

async fn list_user_reports(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserReportsResponse>, ApiError> {
    let reports = state.reports.list_for_user(&user_id).await?;
    if reports.is_empty() {
        return Err(ApiError::NotFound);
    }
    let reports = reports
        .into_iter()
        .map(|report| ReportView::new(&state, report))
        .collect();
    Ok(Json(UserReportsResponse { user_id, reports }))
}

async fn export_reports(State(state): State<AppState>) -> Result<Response, ApiError> {
    let reports = state.reports.list_all().await?;
    if reports.is_empty() {
        return Err(ApiError::NotFound);
    }

    let path = state
        .exporter
        .generate_many(&reports, "all")
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "export generation failed");
            ApiError::Internal
        })?;
    let bytes = tokio::fs::read(&path).await;
    if let Err(err) = state.exporter.release(&path).await {
        tracing::warn!(path = %path.display(), error = %err, "failed to release export");
    }
    let bytes = bytes.map_err(|err| {
        tracing::error!(error = %err, "export could not be read back");
        ApiError::Internal
    })?;

    let day = utc_date_of_ms(now_ms())
        .map(|date| date.to_string())
        .unwrap_or_else(|| "export".to_string());
    let disposition = format!("attachment; filename=\"reports_export_{day}.csv\"");
    let disposition = HeaderValue::from_str(&disposition).map_err(|_| ApiError::Internal)?;

    Ok((
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/csv; charset=utf-8"),
            ),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}
