//! # System Constants
//!
//! Stage identifiers, persisted table names and operational defaults shared by
//! configuration and the stage loops.

/// Stage identifiers as they appear in configuration, logs and error details
pub mod stages {
    pub const INGESTION: &str = "ingestion";
    pub const EMBEDDING: &str = "embedding";
    pub const EXPLANATION: &str = "explanation";
    pub const SUMMARY: &str = "summary";
}

/// Persisted tables touched by the orchestrator
pub mod tables {
    pub const LECTURES: &str = "lectures";
    pub const EXPLANATIONS: &str = "explanations";
}

/// Suffix appended to a stage queue name to form its dead-letter queue
pub const DEAD_LETTER_SUFFIX: &str = "_dlq";

/// Operational defaults applied when a stage setting is omitted
pub mod defaults {
    pub const POLL_TIMEOUT_SECONDS: u64 = 5;
    pub const POLL_MAX_MESSAGES: i32 = 1;
    pub const VISIBILITY_TIMEOUT_SECONDS: i32 = 30;
    pub const MAX_RETRIES: u32 = 5;
    pub const BACKOFF_INITIAL_SECONDS: u64 = 1;
    pub const BACKOFF_MAX_SECONDS: u64 = 10;
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;
    pub const DEFER_INTERVAL_MS: u64 = 1000;
    pub const POLL_ERROR_DELAY_MS: u64 = 1000;
    pub const PROCESSING_SERVICE_BASE_URL: &str = "http://localhost:8000";
    pub const DATABASE_MAX_CONNECTIONS: u32 = 10;
    pub const DATABASE_ACQUIRE_TIMEOUT_SECONDS: u64 = 30;
}

/// Longest response body kept in a dispatch error message
pub const MAX_ERROR_BODY_BYTES: usize = 2048;
