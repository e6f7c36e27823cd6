use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// A pipeline stage. Every episode moves through these in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Download,
    Downsample,
    Transcribe,
    Clean,
    Summarize,
}

impl Stage {
    /// All stages, in pipeline order.
    pub const ALL: [Stage; 5] = [
        Stage::Download,
        Stage::Downsample,
        Stage::Transcribe,
        Stage::Clean,
        Stage::Summarize,
    ];

    /// The stage that follows this one, or `None` if this is the last stage.
    pub fn next(self) -> Option<Stage> {
        match self {
            Self::Download => Some(Self::Downsample),
            Self::Downsample => Some(Self::Transcribe),
            Self::Transcribe => Some(Self::Clean),
            Self::Clean => Some(Self::Summarize),
            Self::Summarize => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Download => "download",
            Self::Downsample => "downsample",
            Self::Transcribe => "transcribe",
            Self::Clean => "clean",
            Self::Summarize => "summarize",
        };
        f.write_str(s)
    }
}

impl FromStr for Stage {
    type Err = StageParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "download" => Ok(Self::Download),
            "downsample" => Ok(Self::Downsample),
            "transcribe" => Ok(Self::Transcribe),
            "clean" => Ok(Self::Clean),
            "summarize" => Ok(Self::Summarize),
            other => Err(StageParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Stage`] string.
#[derive(Debug, Clone)]
pub struct StageParseError(pub String);

impl fmt::Display for StageParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid stage: {:?}", self.0)
    }
}

impl std::error::Error for StageParseError {}

// ---------------------------------------------------------------------------

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    RetryScheduled,
    Failed,
    Dead,
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::RetryScheduled => "retry_scheduled",
            Self::Failed => "failed",
            Self::Dead => "dead",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "retry_scheduled" => Ok(Self::RetryScheduled),
            "failed" => Ok(Self::Failed),
            "dead" => Ok(Self::Dead),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// Classification of a task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Transient,
    Fatal,
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

impl FromStr for ErrorType {
    type Err = ErrorTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient" => Ok(Self::Transient),
            "fatal" => Ok(Self::Fatal),
            other => Err(ErrorTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ErrorType`] string.
#[derive(Debug, Clone)]
pub struct ErrorTypeParseError(pub String);

impl fmt::Display for ErrorTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error type: {:?}", self.0)
    }
}

impl std::error::Error for ErrorTypeParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A unit of work: one pipeline stage for one episode.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub episode_id: Uuid,
    pub stage: Stage,
    pub status: TaskStatus,
    pub priority: i32,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub error_type: Option<ErrorType>,
    pub last_error: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// The last recorded failure for an episode, if any. One row per episode;
/// absence of a row means the episode has never failed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EpisodeFailure {
    pub episode_id: Uuid,
    pub failed_at_stage: Option<Stage>,
    pub failure_reason: Option<String>,
    pub failure_type: Option<ErrorType>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl EpisodeFailure {
    /// A clean (never-failed) record for `episode_id`.
    pub fn clean(episode_id: Uuid) -> Self {
        Self {
            episode_id,
            failed_at_stage: None,
            failure_reason: None,
            failure_type: None,
            failed_at: None,
        }
    }

    /// Whether this episode has a recorded failure.
    pub fn is_failed(&self) -> bool {
        self.failed_at.is_some()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
