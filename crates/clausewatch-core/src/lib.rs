pub mod auth_wall;
pub mod cascade;
pub mod diff;
pub mod error;
pub mod locale;
pub mod models;
pub mod monitor;
pub mod pipeline;
pub mod rate_limit;
pub mod recovery;
pub mod strategies;
pub mod summary;
pub mod traits;
pub mod validation;
pub mod version_cache;

#[cfg(test)]
pub mod testutil;

pub use cascade::{CascadeConfig, FetchCascade};
pub use diff::{DiffEngine, VersionDiff};
pub use error::AppError;
pub use models::{
    Analysis, ChangeRecord, DocumentType, ExtractedDocument, FetchSource, FetchedDocument,
    PolicyVersion, content_hash,
};
pub use monitor::{ChangeMonitor, MonitorConfig, MonitorTarget, RecheckOutcome};
pub use pipeline::{PipelineResult, PolicyPipeline};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use traits::{
    Acquirer, Analyzer, ChangeStore, ContentExtractor, NullAnalyzer, NullChangeStore, Transport,
    VersionStore,
};
pub use version_cache::{CacheConfig, CacheStatus, Freshness, VersionCache};
