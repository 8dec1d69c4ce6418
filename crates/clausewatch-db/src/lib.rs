pub mod change_repository;
pub mod config;
pub mod database;
pub mod version_repository;

pub use change_repository::ChangeRepository;
pub use config::DatabaseConfig;
pub use database::Database;
pub use version_repository::VersionRepository;
