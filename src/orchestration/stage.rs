//! Pipeline stages. Each stage owns one queue, one dead-letter queue and one
//! processing-service endpoint.

use crate::constants::stages;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingestion,
    Embedding,
    Explanation,
    Summary,
}

impl Stage {
    /// All stages in pipeline order
    pub const ALL: [Stage; 4] = [
        Stage::Ingestion,
        Stage::Embedding,
        Stage::Explanation,
        Stage::Summary,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Ingestion => stages::INGESTION,
            Stage::Embedding => stages::EMBEDDING,
            Stage::Explanation => stages::EXPLANATION,
            Stage::Summary => stages::SUMMARY,
        }
    }

    /// Path segment of the processing-service endpoint for this stage
    pub fn default_endpoint_verb(self) -> &'static str {
        match self {
            Stage::Ingestion => "ingest",
            Stage::Embedding => "embed",
            Stage::Explanation => "explain",
            Stage::Summary => "summarize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown stage: {s}"))
    }
}
