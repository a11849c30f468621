use std::path::{Path, PathBuf};
use std::sync::Arc;

use fieldreport_domain::ports::BoxFuture;
use fieldreport_domain::ports::channels::{ArtifactExporter, ExportError};
use fieldreport_domain::report::Report;
use fieldreport_domain::schema::{FieldSchema, FieldSpec, FieldValue, Validator};
use fieldreport_domain::util::{format_ms_rfc3339, uuid_v7_without_dashes};
use tokio::fs;

/// Writes reports as CSV spreadsheets, one row per report with a column per
/// schema field followed by the summary totals.
#[derive(Clone)]
pub struct CsvReportExporter {
    dir: PathBuf,
    schema: Arc<FieldSchema>,
}

impl CsvReportExporter {
    pub fn new(dir: impl Into<PathBuf>, schema: Arc<FieldSchema>) -> Self {
        Self {
            dir: dir.into(),
            schema,
        }
    }

    fn encode(&self, reports: &[Report]) -> Result<Vec<u8>, ExportError> {
        let encode_error = |err: csv::Error| ExportError::Encode(err.to_string());
        let mut writer = csv::Writer::from_writer(Vec::new());

        let mut header = vec![
            "Report".to_string(),
            "User".to_string(),
            "Created at".to_string(),
        ];
        header.extend(self.schema.fields().map(|field| field.label.clone()));
        header.extend(
            self.schema
                .summary_totals()
                .iter()
                .map(|total| total.label.clone()),
        );
        writer.write_record(&header).map_err(encode_error)?;

        for report in reports {
            let mut row = vec![
                report.id.to_string(),
                report.user_id.clone(),
                format_ms_rfc3339(report.created_at_ms),
            ];
            row.extend(self.schema.fields().map(|field| {
                report
                    .value(&field.key)
                    .map(|value| cell(field, value))
                    .unwrap_or_default()
            }));
            row.extend(
                self.schema
                    .summary_totals()
                    .iter()
                    .map(|total| total.format(&report.values)),
            );
            writer.write_record(&row).map_err(encode_error)?;
        }

        writer
            .into_inner()
            .map_err(|err| ExportError::Encode(err.to_string()))
    }

    async fn write_file(&self, name: String, bytes: Vec<u8>) -> Result<PathBuf, ExportError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| ExportError::Io(err.to_string()))?;
        let path = self.dir.join(name);
        fs::write(&path, bytes)
            .await
            .map_err(|err| ExportError::Io(err.to_string()))?;
        tracing::debug!(path = %path.display(), "artifact written");
        Ok(path)
    }
}

fn cell(field: &FieldSpec, value: &FieldValue) -> String {
    match value {
        FieldValue::Empty => String::new(),
        FieldValue::Boolean(true) => "yes".to_string(),
        FieldValue::Boolean(false) => "no".to_string(),
        FieldValue::Integer(value) => value.to_string(),
        FieldValue::Decimal(value) => value.to_string(),
        FieldValue::Text(value) => match &field.validator {
            Validator::Choice(options) => options
                .iter()
                .find(|option| &option.value == value)
                .map(|option| option.label.clone())
                .unwrap_or_else(|| value.clone()),
            _ => value.clone(),
        },
    }
}

fn file_label(raw: &str) -> String {
    let label: String = raw
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '-' || *ch == '_')
        .collect();
    if label.is_empty() {
        "all".to_string()
    } else {
        label
    }
}

impl ArtifactExporter for CsvReportExporter {
    fn generate(&self, report: &Report) -> BoxFuture<'_, Result<PathBuf, ExportError>> {
        let encoded = self.encode(std::slice::from_ref(report));
        let name = format!("report_{}_{}.csv", report.id, uuid_v7_without_dashes());
        Box::pin(async move { self.write_file(name, encoded?).await })
    }

    fn generate_many(
        &self,
        reports: &[Report],
        label: &str,
    ) -> BoxFuture<'_, Result<PathBuf, ExportError>> {
        let encoded = if reports.is_empty() {
            Err(ExportError::Empty)
        } else {
            self.encode(reports)
        };
        let name = format!(
            "reports_{}_{}.csv",
            file_label(label),
            uuid_v7_without_dashes()
        );
        Box::pin(async move { self.write_file(name, encoded?).await })
    }

    fn release(&self, path: &Path) -> BoxFuture<'_, Result<(), ExportError>> {
        let path = path.to_path_buf();
        Box::pin(async move {
            match fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(ExportError::Io(err.to_string())),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use fieldreport_domain::report::ReportId;
    use fieldreport_domain::schema::{NumericBounds, work_report_schema};

    use super::*;

    fn exporter(dir: &Path) -> CsvReportExporter {
        let schema = work_report_schema(NumericBounds::default()).expect("schema");
        CsvReportExporter::new(dir, Arc::new(schema))
    }

    fn report(id: i64) -> Report {
        let mut values = BTreeMap::new();
        values.insert(
            "customer_type".to_string(),
            FieldValue::Text("legal_entity".to_string()),
        );
        values.insert(
            "customer_name".to_string(),
            FieldValue::Text("Acme, Ltd".to_string()),
        );
        values.insert("sockets".to_string(), FieldValue::Integer(2));
        values.insert("manholes".to_string(), FieldValue::Integer(1));
        values.insert("trench".to_string(), FieldValue::Decimal(3.5));
        values.insert("minimuff".to_string(), FieldValue::Boolean(false));
        values.insert("comment".to_string(), FieldValue::Empty);
        Report {
            id: ReportId(id),
            user_id: "100".to_string(),
            values,
            created_at_ms: 0,
        }
    }

    #[tokio::test]
    async fn single_report_artifact_has_header_and_row() {
        let dir = tempfile::tempdir().expect("tempdir");
        let exporter = exporter(dir.path());
        let path = exporter.generate(&report(42)).await.expect("generate");

        let mut reader = csv::Reader::from_path(&path).expect("open csv");
        let headers = reader.headers().expect("headers").clone();
        let rows: Vec<csv::StringRecord> = reader.records().map(|row| row.expect("row")).collect();
        assert_eq!(rows.len(), 1);

        let column = |name: &str| {
            headers
                .iter()
                .position(|header| header == name)
                .unwrap_or_else(|| panic!("missing column {name}"))
        };
        let row = &rows[0];
        assert_eq!(&row[0], "42");
        assert_eq!(&row[column("Name")], "Acme, Ltd");
        assert_eq!(&row[column("Customer")], "Legal entity");
        assert_eq!(&row[column("Mini splice closure spliced")], "no");
        assert_eq!(&row[column("Comment")], "");
        assert_eq!(&row[column("Total items")], "3");
        assert_eq!(&row[column("Total length")], "3.50");
    }

    #[tokio::test]
    async fn release_removes_the_file_and_tolerates_repeats() {
        let dir = tempfile::tempdir().expect("tempdir");
        let exporter = exporter(dir.path());
        let path = exporter.generate(&report(1)).await.expect("generate");
        assert!(path.exists());

        exporter.release(&path).await.expect("release");
        assert!(!path.exists());
        exporter.release(&path).await.expect("release again");
    }

    #[tokio::test]
    async fn many_reports_share_one_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let exporter = exporter(dir.path());
        let path = exporter
            .generate_many(&[report(1), report(2), report(3)], "user 100")
            .await
            .expect("generate");
        let name = path.file_name().and_then(|name| name.to_str()).expect("name");
        assert!(name.starts_with("reports_user100_"));

        let mut reader = csv::Reader::from_path(&path).expect("open csv");
        assert_eq!(reader.records().count(), 3);
    }

    #[tokio::test]
    async fn empty_selection_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = exporter(dir.path())
            .generate_many(&[], "all")
            .await
            .expect_err("empty");
        assert!(matches!(err, ExportError::Empty));
    }
}
