pub mod collection;
pub mod distribution;
pub mod error;
pub mod ports;
pub mod render;
pub mod report;
pub mod schema;
pub mod session;
pub mod util;

pub type DomainResult<T> = Result<T, error::DomainError>;
