use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Default thresholds used when neither an exact id nor a prefix is registered
pub const DEFAULT_THRESHOLD: Threshold = Threshold {
    warning_ms: 500.0,
    critical_ms: 2000.0,
    samples_required: 5,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub warning_ms: f64,
    pub critical_ms: f64,
    pub samples_required: usize,
}

impl Default for Threshold {
    fn default() -> Self {
        DEFAULT_THRESHOLD
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

/// Classification counters for one operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: u64,
    pub warning: u64,
}

/// Result of a classification sweep; an id appears in at most one list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BottleneckReport {
    pub critical: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueType {
    ExecutionTime,
    MemoryUsage,
    OperationsCount,
    MemoryLeakSuspected,
    OperationCountGrowth,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::ExecutionTime => "execution-time",
            IssueType::MemoryUsage => "memory-usage",
            IssueType::OperationsCount => "operations-count",
            IssueType::MemoryLeakSuspected => "memory-leak-suspected",
            IssueType::OperationCountGrowth => "operation-count-growth",
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A threshold violation observed during a profiling session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceIssue {
    pub issue_type: IssueType,
    pub metric: f64,
    pub threshold: f64,
    pub session_id: String,
    /// Stamped when the issue is reported
    pub timestamp_ms: i64,
}

impl PerformanceIssue {
    pub fn new(issue_type: IssueType, metric: f64, threshold: f64, session_id: impl Into<String>) -> Self {
        Self {
            issue_type,
            metric,
            threshold,
            session_id: session_id.into(),
            timestamp_ms: 0,
        }
    }

    /// Key of the rolling metric history and of the derived pattern
    pub fn pattern_key(&self) -> String {
        pattern_key(&self.session_id, self.issue_type)
    }
}

pub fn pattern_key(session_id: &str, issue_type: IssueType) -> String {
    format!("{}-{}", session_id, issue_type)
}

/// Directed co-occurrence of two issue types inside one time window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub from: IssueType,
    pub to: IssueType,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.from, self.to)
    }
}

/// Behavioral signature derived from the issue history of one (session, type) key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationPattern {
    pub operation_id: String,
    pub session_id: String,
    pub issue_type: IssueType,
    pub avg_duration: f64,
    /// Issues per second over the window covered by the history
    pub frequency: f64,
    /// Relative change of the metric from the first to the last history sample
    pub memory_impact: f64,
    pub dependencies: Vec<Dependency>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternAnalysis {
    pub patterns: Vec<OperationPattern>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueSummary {
    pub total_issues: usize,
    pub issues_by_type: HashMap<IssueType, usize>,
    pub most_frequent_issues: Vec<(IssueType, usize)>,
    pub critical_patterns: Vec<OperationPattern>,
}
