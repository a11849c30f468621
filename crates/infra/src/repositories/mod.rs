mod mirror;
mod reports;

pub use mirror::JsonFileReportMirror;
pub use reports::InMemoryReportRepository;
