pub mod config;
pub mod export;
pub mod logging;
pub mod mail;
pub mod repositories;
pub mod telegram;
