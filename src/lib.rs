pub mod config;
pub mod digest_builder;
pub mod fingerprint;
pub mod orchestrator;
pub mod retry;
pub mod scheduler;
pub mod sources;
pub mod store;
pub mod summarizer;
pub mod traits;
pub mod types;

pub use config::PipelineConfig;
pub use digest_builder::DigestBuilder;
pub use fingerprint::Fingerprint;
pub use orchestrator::PipelineOrchestrator;
pub use retry::RetryPolicy;
pub use scheduler::Scheduler;
pub use store::{ItemStore, MemoryStore, SqliteStore};
pub use summarizer::ExtractiveSummarizer;
pub use traits::{DigestDelivery, SourceAdapter, Summarizer};
pub use types::*;
