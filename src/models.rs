use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceType {
    Financial,
    Scientific,
    Social,
    Iot,
}

impl SourceType {
    pub const ALL: [SourceType; 4] = [
        SourceType::Financial,
        SourceType::Scientific,
        SourceType::Social,
        SourceType::Iot,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Financial => "financial",
            SourceType::Scientific => "scientific",
            SourceType::Social => "social",
            SourceType::Iot => "iot",
        }
    }

    /// Stored source types are free text; anything outside the closed set is
    /// reported as `None` rather than an error.
    pub fn recognize(value: &str) -> Option<SourceType> {
        SourceType::ALL
            .into_iter()
            .find(|source_type| source_type.as_str() == value)
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        SourceType::recognize(value).ok_or_else(|| {
            anyhow::anyhow!(
                "unknown source type '{value}' (expected financial, scientific, social or iot)"
            )
        })
    }
}

#[derive(Debug, Clone)]
pub struct RawRecord {
    pub id: i64,
    pub source_type: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub processed: bool,
}

#[derive(Debug, Clone)]
pub struct Insight {
    pub id: i64,
    pub raw_record_id: i64,
    pub text: String,
    pub confidence: f64,
    pub category_label: String,
    pub generated_at: DateTime<Utc>,
    pub run_id: Uuid,
}

/// Output of the templating step, before it is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedInsight {
    pub text: String,
    pub confidence: f64,
    pub category_label: String,
}

#[derive(Debug, Clone)]
pub struct PassReport {
    pub run_id: Uuid,
    pub insights_generated: usize,
    pub skipped_unrecognized: usize,
    pub failed: usize,
    pub already_processed: usize,
}

#[derive(Debug, Clone)]
pub struct SourceTypeCount {
    pub source_type: String,
    pub count: i64,
}

#[derive(Debug, Clone)]
pub struct DataStats {
    pub total_records: i64,
    pub processed_records: i64,
    pub total_insights: i64,
    pub by_source_type: Vec<SourceTypeCount>,
}

impl DataStats {
    pub fn pending_records(&self) -> i64 {
        self.total_records - self.processed_records
    }
}

#[derive(Debug, Clone)]
pub struct RecentInsight {
    pub text: String,
    pub confidence: f64,
    pub category_label: String,
    pub generated_at: DateTime<Utc>,
    pub source_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Ready,
    Configuring,
    Planned,
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SourceStatus::Ready => "ready",
            SourceStatus::Configuring => "configuring",
            SourceStatus::Planned => "planned",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    pub source_type: SourceType,
    pub name: &'static str,
    pub endpoints: &'static [&'static str],
    pub status: SourceStatus,
}
