use std::sync::Arc;

use fieldreport_domain::ports::channels::ArtifactExporter;
use fieldreport_domain::ports::reports::ReportRepository;
use fieldreport_domain::ports::sessions::SessionStore;
use fieldreport_domain::report::ReportService;
use fieldreport_domain::schema::{FieldSchema, work_report_schema};
use fieldreport_domain::session::InMemorySessionStore;
use fieldreport_infra::config::AppConfig;
use fieldreport_infra::export::CsvReportExporter;
use fieldreport_infra::repositories::{InMemoryReportRepository, JsonFileReportMirror};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub schema: Arc<FieldSchema>,
    pub repository: Arc<dyn ReportRepository>,
    pub reports: ReportService,
    pub sessions: Arc<dyn SessionStore>,
    pub exporter: Arc<dyn ArtifactExporter>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let schema = Arc::new(work_report_schema(config.numeric_bounds())?);
        let mirror = JsonFileReportMirror::new(config.data_path());
        let repository = InMemoryReportRepository::new().with_mirror(Arc::new(mirror));

        if config.restore_reports_on_start
            && let Err(err) = repository.restore_from_mirror().await
        {
            tracing::warn!(error = %err, "could not restore reports; starting empty");
        }

        Ok(Self::with_repository(config, schema, Arc::new(repository)))
    }

    pub fn with_repository(
        config: AppConfig,
        schema: Arc<FieldSchema>,
        repository: Arc<dyn ReportRepository>,
    ) -> Self {
        let reports = ReportService::new(repository.clone(), schema.clone());
        let sessions = Arc::new(InMemorySessionStore::new(
            schema.clone(),
            config.session_config(),
        ));
        let exporter = Arc::new(CsvReportExporter::new(config.export_path(), schema.clone()));
        Self {
            config,
            schema,
            repository,
            reports,
            sessions,
            exporter,
        }
    }
}
