use crate::orchestration::stage::Stage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lecture lifecycle status stored in `lectures.status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LectureStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl LectureStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LectureStatus::Pending => "pending",
            LectureStatus::Processing => "processing",
            LectureStatus::Completed => "completed",
            LectureStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, LectureStatus::Completed | LectureStatus::Failed)
    }
}

impl fmt::Display for LectureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LectureStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LectureStatus::Pending),
            "processing" => Ok(LectureStatus::Processing),
            "completed" => Ok(LectureStatus::Completed),
            "failed" => Ok(LectureStatus::Failed),
            other => Err(format!("Unknown lecture status: {other}")),
        }
    }
}

/// Structured failure detail written to `lectures.error_details`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub stage: Stage,
    pub message: String,
}

impl ErrorDetails {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "stage": self.stage.as_str(),
            "message": self.message,
        })
    }
}

/// Status row as read back by API consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LectureStatusRecord {
    pub lecture_id: String,
    pub status: LectureStatus,
    pub error_details: Option<ErrorDetails>,
}

/// Ordering key of a per-slide result row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepResultKey {
    pub lecture_id: String,
    pub slide_number: i32,
}

impl StepResultKey {
    pub fn new(lecture_id: impl Into<String>, slide_number: i32) -> Self {
        Self {
            lecture_id: lecture_id.into(),
            slide_number,
        }
    }

    /// Key of the immediately preceding slide, if there is one
    pub fn predecessor(&self) -> Option<StepResultKey> {
        (self.slide_number > 1).then(|| StepResultKey::new(self.lecture_id.clone(), self.slide_number - 1))
    }
}
