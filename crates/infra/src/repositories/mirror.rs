use std::path::{Path, PathBuf};

use fieldreport_domain::ports::BoxFuture;
use fieldreport_domain::ports::reports::{MirrorError, ReportMirror};
use fieldreport_domain::report::Report;
use tokio::fs;

const FILE_PREFIX: &str = "reports_";
const FILE_SUFFIX: &str = ".json";

/// One pretty-printed JSON array per user, `reports_<user>.json`.
#[derive(Clone, Debug)]
pub struct JsonFileReportMirror {
    dir: PathBuf,
}

impl JsonFileReportMirror {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, user_id: &str) -> PathBuf {
        self.dir
            .join(format!("{FILE_PREFIX}{}{FILE_SUFFIX}", file_safe(user_id)))
    }
}

fn file_safe(user_id: &str) -> String {
    user_id
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

fn io_error(err: std::io::Error) -> MirrorError {
    MirrorError::Io(err.to_string())
}

impl ReportMirror for JsonFileReportMirror {
    fn write(&self, user_id: &str, reports: &[Report]) -> BoxFuture<'_, Result<(), MirrorError>> {
        let path = self.path_for(user_id);
        let payload = serde_json::to_vec_pretty(reports);
        Box::pin(async move {
            let payload = payload.map_err(|err| MirrorError::Serialization(err.to_string()))?;
            fs::create_dir_all(&self.dir).await.map_err(io_error)?;
            let staging = path.with_extension("json.tmp");
            fs::write(&staging, payload).await.map_err(io_error)?;
            fs::rename(&staging, &path).await.map_err(io_error)?;
            Ok(())
        })
    }

    fn load_all(&self) -> BoxFuture<'_, Result<Vec<Report>, MirrorError>> {
        Box::pin(async move {
            let mut entries = match fs::read_dir(&self.dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(err) => return Err(io_error(err)),
            };

            let mut reports = Vec::new();
            while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
                let name = entry.file_name();
                let Some(name) = name.to_str() else {
                    continue;
                };
                if !name.starts_with(FILE_PREFIX) || !name.ends_with(FILE_SUFFIX) {
                    continue;
                }
                let raw = fs::read(entry.path()).await.map_err(io_error)?;
                match serde_json::from_slice::<Vec<Report>>(&raw) {
                    Ok(mut loaded) => reports.append(&mut loaded),
                    Err(err) => {
                        tracing::warn!(file = name, error = %err, "skipping unreadable report mirror file");
                    }
                }
            }
            Ok(reports)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use fieldreport_domain::report::ReportId;
    use fieldreport_domain::schema::FieldValue;

    use super::*;

    fn report(id: i64, user_id: &str) -> Report {
        let mut values = BTreeMap::new();
        values.insert("sockets".to_string(), FieldValue::Integer(id));
        values.insert("trench".to_string(), FieldValue::Decimal(2.5));
        values.insert("comment".to_string(), FieldValue::Empty);
        Report {
            id: ReportId(id),
            user_id: user_id.to_string(),
            values,
            created_at_ms: id,
        }
    }

    #[tokio::test]
    async fn writes_one_file_per_user_and_loads_them_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mirror = JsonFileReportMirror::new(dir.path().join("data"));

        mirror
            .write("100", &[report(1, "100"), report(3, "100")])
            .await
            .expect("write");
        mirror.write("200", &[report(2, "200")]).await.expect("write");
        mirror.write("100", &[report(1, "100")]).await.expect("rewrite");

        assert!(mirror.path_for("100").exists());
        assert!(!mirror.path_for("100").with_extension("json.tmp").exists());

        let mut loaded = mirror.load_all().await.expect("load");
        loaded.sort_by_key(|report| report.id);
        assert_eq!(loaded, vec![report(1, "100"), report(2, "200")]);
    }

    #[tokio::test]
    async fn missing_directory_loads_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mirror = JsonFileReportMirror::new(dir.path().join("absent"));
        assert!(mirror.load_all().await.expect("load").is_empty());
    }

    #[tokio::test]
    async fn corrupt_files_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mirror = JsonFileReportMirror::new(dir.path());
        mirror.write("100", &[report(1, "100")]).await.expect("write");
        std::fs::write(dir.path().join("reports_broken.json"), b"{not json").expect("write");
        std::fs::write(dir.path().join("notes.txt"), b"ignored").expect("write");

        let loaded = mirror.load_all().await.expect("load");
        assert_eq!(loaded, vec![report(1, "100")]);
    }

    #[test]
    fn user_ids_are_made_file_safe() {
        let mirror = JsonFileReportMirror::new("/data");
        assert_eq!(
            mirror.path_for("../etc/passwd"),
            PathBuf::from("/data/reports____etc_passwd.json")
        );
    }
}
