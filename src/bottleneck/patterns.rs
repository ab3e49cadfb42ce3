//! Issue history and pattern inference
//!
//! Issues are appended per session. Each issue also feeds a rolling metric history
//! keyed by (session, type); once that history holds enough samples a pattern is
//! recomputed for the key and overwrites the previous one.

use std::collections::{HashMap, HashSet, VecDeque};

use super::structs::{Dependency, IssueSummary, IssueType, OperationPattern, PatternAnalysis, PerformanceIssue};

pub const METRIC_HISTORY_WINDOW: usize = 100;
pub const PATTERN_MIN_SAMPLES: usize = 10;
pub const DEPENDENCY_WINDOW_MS: i64 = 1000;
pub const SAMPLING_INTERVAL_MS: i64 = 100;

pub const HIGH_FREQUENCY_PER_SEC: f64 = 10.0;
pub const MEMORY_INTENSIVE_RATIO: f64 = 0.1;
pub const HIGH_COUPLING_DEPENDENCIES: usize = 3;

/// Groups issues into windows by extending while consecutive timestamps are less than
/// `window_ms` apart, then links every earlier issue of a window to every later issue
/// of a different type. A pair straddling two windows is not linked.
pub fn detect_dependencies(issues: &[PerformanceIssue], window_ms: i64) -> Vec<Dependency> {
    let mut window = DependencyWindow::new(window_ms);
    for issue in issues {
        window.push(issue.issue_type, issue.timestamp_ms);
    }
    window.edges
}

/// Running state of `detect_dependencies` for one issue stream.
///
/// Only the issue types already seen in the open window matter for new edges, so each
/// push costs at most one check per issue type.
#[derive(Debug)]
struct DependencyWindow {
    window_ms: i64,
    last_timestamp_ms: Option<i64>,
    seen: Vec<IssueType>,
    edges: Vec<Dependency>,
}

impl DependencyWindow {
    fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            last_timestamp_ms: None,
            seen: Vec::new(),
            edges: Vec::new(),
        }
    }

    fn push(&mut self, issue_type: IssueType, timestamp_ms: i64) {
        if let Some(last) = self.last_timestamp_ms {
            if timestamp_ms - last >= self.window_ms {
                self.seen.clear();
            }
        }
        self.last_timestamp_ms = Some(timestamp_ms);

        for &from in &self.seen {
            if from == issue_type {
                continue;
            }
            let dependency = Dependency { from, to: issue_type };
            if !self.edges.contains(&dependency) {
                self.edges.push(dependency);
            }
        }
        if !self.seen.contains(&issue_type) {
            self.seen.push(issue_type);
        }
    }
}

fn relative_change(first: f64, last: f64) -> f64 {
    if first == 0.0 {
        0.0
    } else {
        (last - first) / first
    }
}

pub fn is_high_frequency(pattern: &OperationPattern) -> bool {
    pattern.frequency > HIGH_FREQUENCY_PER_SEC
}

pub fn is_memory_intensive(pattern: &OperationPattern) -> bool {
    pattern.memory_impact > MEMORY_INTENSIVE_RATIO
}

#[derive(Debug, Default)]
pub struct IssueTracker {
    issues: HashMap<String, Vec<PerformanceIssue>>,
    metric_history: HashMap<String, VecDeque<f64>>,
    dependencies: HashMap<String, DependencyWindow>,
    patterns: HashMap<String, OperationPattern>,
}

impl IssueTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an already stamped issue; returns the pattern if one was recomputed
    pub fn record(&mut self, issue: PerformanceIssue) -> Option<OperationPattern> {
        let key = issue.pattern_key();

        let history = self.metric_history.entry(key.clone()).or_default();
        history.push_back(issue.metric);
        while history.len() > METRIC_HISTORY_WINDOW {
            history.pop_front();
        }
        let ready = history.len() >= PATTERN_MIN_SAMPLES;

        let session_id = issue.session_id.clone();
        let issue_type = issue.issue_type;
        self.dependencies
            .entry(session_id.clone())
            .or_insert_with(|| DependencyWindow::new(DEPENDENCY_WINDOW_MS))
            .push(issue_type, issue.timestamp_ms);
        self.issues.entry(session_id.clone()).or_default().push(issue);

        if !ready {
            return None;
        }

        let pattern = self.compute_pattern(&key, &session_id, issue_type)?;
        self.patterns.insert(key, pattern.clone());
        Some(pattern)
    }

    fn compute_pattern(&self, key: &str, session_id: &str, issue_type: IssueType) -> Option<OperationPattern> {
        let history = self.metric_history.get(key)?;
        let session_issues = self.issues.get(session_id)?;
        let first = *history.front()?;
        let last = *history.back()?;

        let avg_duration = history.iter().sum::<f64>() / history.len() as f64;

        // The history is assumed to cover one sample per capture interval
        let window_ms = history.len() as i64 * SAMPLING_INTERVAL_MS;
        let newest = session_issues.last().map(|i| i.timestamp_ms).unwrap_or(0);
        // Issues are appended in report order, so the window is a suffix of the log
        let recent = session_issues
            .iter()
            .rev()
            .take_while(|i| i.timestamp_ms > newest - window_ms)
            .filter(|i| i.issue_type == issue_type)
            .count();
        let frequency = recent as f64 / (window_ms as f64 / 1000.0);

        let dependencies: Vec<Dependency> = self
            .dependencies
            .get(session_id)
            .map(|window| {
                window
                    .edges
                    .iter()
                    .filter(|d| d.from == issue_type || d.to == issue_type)
                    .copied()
                    .collect()
            })
            .unwrap_or_default();

        Some(OperationPattern {
            operation_id: key.to_string(),
            session_id: session_id.to_string(),
            issue_type,
            avg_duration,
            frequency,
            memory_impact: relative_change(first, last),
            dependencies,
        })
    }

    pub fn issues(&self, session_id: &str) -> Vec<PerformanceIssue> {
        self.issues.get(session_id).cloned().unwrap_or_default()
    }

    pub fn metric_history(&self, key: &str) -> Vec<f64> {
        self.metric_history
            .get(key)
            .map(|h| h.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn pattern_analysis(&self, session_id: &str) -> PatternAnalysis {
        let prefix = format!("{}-", session_id);
        let mut patterns: Vec<OperationPattern> = self
            .patterns
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, pattern)| pattern.clone())
            .collect();
        patterns.sort_by(|a, b| a.operation_id.cmp(&b.operation_id));

        let recommendations = recommendations_for(&patterns);
        PatternAnalysis {
            patterns,
            recommendations,
        }
    }

    pub fn summary(&self) -> IssueSummary {
        let mut issues_by_type: HashMap<IssueType, usize> = HashMap::new();
        let mut total_issues = 0;
        for issue in self.issues.values().flatten() {
            *issues_by_type.entry(issue.issue_type).or_default() += 1;
            total_issues += 1;
        }

        let mut most_frequent_issues: Vec<(IssueType, usize)> =
            issues_by_type.iter().map(|(t, c)| (*t, *c)).collect();
        most_frequent_issues.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        most_frequent_issues.truncate(3);

        let mut critical_patterns: Vec<OperationPattern> = self
            .patterns
            .values()
            .filter(|p| is_high_frequency(p) || is_memory_intensive(p))
            .cloned()
            .collect();
        critical_patterns.sort_by(|a, b| a.operation_id.cmp(&b.operation_id));

        IssueSummary {
            total_issues,
            issues_by_type,
            most_frequent_issues,
            critical_patterns,
        }
    }

    pub fn clear(&mut self) {
        self.issues.clear();
        self.metric_history.clear();
        self.dependencies.clear();
        self.patterns.clear();
    }
}

fn recommendations_for(patterns: &[OperationPattern]) -> Vec<String> {
    let mut recommendations: Vec<String> = Vec::new();
    let mut push = |text: String| {
        if !recommendations.contains(&text) {
            recommendations.push(text);
        }
    };

    for pattern in patterns {
        if is_high_frequency(pattern) {
            push(format!(
                "High-frequency {} issues ({:.1}/s) in {}: debounce or batch the triggering work",
                pattern.issue_type, pattern.frequency, pattern.session_id
            ));
        }

        if is_memory_intensive(pattern) {
            push(format!(
                "Memory-intensive pattern {}: metric grew {:.1}% across the window, check for retained allocations",
                pattern.operation_id,
                pattern.memory_impact * 100.0
            ));
        }

        let distinct: HashSet<&Dependency> = pattern.dependencies.iter().collect();
        if distinct.len() > HIGH_COUPLING_DEPENDENCIES {
            push(format!(
                "Highly coupled pattern {} ({} dependencies): isolate the affected subsystems",
                pattern.operation_id,
                distinct.len()
            ));
        }

        for dependency in &pattern.dependencies {
            if dependency.from != pattern.issue_type {
                continue;
            }
            let cascades = patterns
                .iter()
                .any(|other| other.issue_type == dependency.to && other.operation_id != pattern.operation_id && is_high_frequency(other));
            if cascades {
                push(format!(
                    "Cascading failure suspected: {} issues are followed by high-frequency {} issues",
                    dependency.from, dependency.to
                ));
            }
        }
    }

    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue_at(issue_type: IssueType, session: &str, metric: f64, timestamp_ms: i64) -> PerformanceIssue {
        PerformanceIssue {
            timestamp_ms,
            ..PerformanceIssue::new(issue_type, metric, 1.0, session)
        }
    }

    #[test]
    fn test_dependency_within_window() {
        let issues = vec![
            issue_at(IssueType::MemoryUsage, "s1", 1.0, 1_000),
            issue_at(IssueType::ExecutionTime, "s1", 1.0, 1_100),
        ];
        let deps = detect_dependencies(&issues, DEPENDENCY_WINDOW_MS);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].to_string(), "memory-usage->execution-time");
    }

    #[test]
    fn test_no_dependency_across_gap() {
        let issues = vec![
            issue_at(IssueType::MemoryUsage, "s1", 1.0, 1_000),
            issue_at(IssueType::ExecutionTime, "s1", 1.0, 3_000),
        ];
        assert!(detect_dependencies(&issues, DEPENDENCY_WINDOW_MS).is_empty());
    }

    #[test]
    fn test_greedy_window_extends_through_consecutive_issues() {
        // 0 -> 900 -> 1800: each step is under a second, so all three share a window
        let issues = vec![
            issue_at(IssueType::MemoryUsage, "s1", 1.0, 0),
            issue_at(IssueType::ExecutionTime, "s1", 1.0, 900),
            issue_at(IssueType::OperationsCount, "s1", 1.0, 1_800),
        ];
        let deps = detect_dependencies(&issues, DEPENDENCY_WINDOW_MS);
        assert_eq!(deps.len(), 3);
        assert!(deps.contains(&Dependency {
            from: IssueType::MemoryUsage,
            to: IssueType::OperationsCount
        }));
    }

    #[test]
    fn test_dependencies_match_every_ordered_pair_in_window() {
        let types = [
            IssueType::MemoryUsage,
            IssueType::ExecutionTime,
            IssueType::MemoryUsage,
            IssueType::OperationsCount,
            IssueType::MemoryLeakSuspected,
            IssueType::ExecutionTime,
        ];
        // Two windows: the gap after the third issue closes the first one
        let timestamps = [0, 300, 600, 2_000, 2_500, 2_900];
        let issues: Vec<PerformanceIssue> = types
            .iter()
            .zip(timestamps)
            .map(|(t, ts)| issue_at(*t, "s1", 1.0, ts))
            .collect();

        let mut expected = HashSet::new();
        for window in [&issues[..3], &issues[3..]] {
            for (i, earlier) in window.iter().enumerate() {
                for later in &window[i + 1..] {
                    if earlier.issue_type != later.issue_type {
                        expected.insert(Dependency {
                            from: earlier.issue_type,
                            to: later.issue_type,
                        });
                    }
                }
            }
        }

        let deps = detect_dependencies(&issues, DEPENDENCY_WINDOW_MS);
        assert_eq!(deps.len(), expected.len());
        assert_eq!(deps.into_iter().collect::<HashSet<_>>(), expected);
    }

    #[test]
    fn test_long_single_window_session_stays_cheap() {
        let mut tracker = IssueTracker::new();
        let started = std::time::Instant::now();
        for i in 0..20_000i64 {
            let issue_type = if i % 2 == 0 { IssueType::MemoryUsage } else { IssueType::OperationsCount };
            tracker.record(issue_at(issue_type, "s1", 100.0, i * 50));
        }
        let pattern = tracker
            .record(issue_at(IssueType::MemoryUsage, "s1", 100.0, 20_000 * 50))
            .expect("pattern for a full history");

        assert_eq!(pattern.dependencies.len(), 2);
        // 100 same-type issues in the last 10s
        assert!((pattern.frequency - 10.0).abs() < 1e-9);
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }

    #[test]
    fn test_pattern_needs_ten_samples() {
        let mut tracker = IssueTracker::new();
        for i in 0..9 {
            assert!(tracker.record(issue_at(IssueType::MemoryUsage, "s1", 100.0, i * 100)).is_none());
        }
        let pattern = tracker
            .record(issue_at(IssueType::MemoryUsage, "s1", 150.0, 900))
            .expect("pattern after 10 samples");

        assert_eq!(pattern.operation_id, "s1-memory-usage");
        assert!((pattern.avg_duration - 105.0).abs() < 1e-9);
        assert!((pattern.memory_impact - 0.5).abs() < 1e-9);
        assert!((pattern.frequency - 10.0).abs() < 1e-9);
        assert!(pattern.dependencies.is_empty());
    }

    #[test]
    fn test_metric_history_is_capped() {
        let mut tracker = IssueTracker::new();
        for i in 0..150 {
            tracker.record(issue_at(IssueType::ExecutionTime, "s1", i as f64, i * 100));
        }
        let history = tracker.metric_history("s1-execution-time");
        assert_eq!(history.len(), METRIC_HISTORY_WINDOW);
        assert_eq!(history[0], 50.0);
        // Issues themselves are not evicted
        assert_eq!(tracker.issues("s1").len(), 150);
    }

    #[test]
    fn test_pattern_analysis_filters_by_session() {
        let mut tracker = IssueTracker::new();
        for i in 0..10 {
            tracker.record(issue_at(IssueType::MemoryUsage, "s1", 100.0, i * 100));
            tracker.record(issue_at(IssueType::MemoryUsage, "s10", 100.0, i * 100));
        }

        let analysis = tracker.pattern_analysis("s1");
        assert_eq!(analysis.patterns.len(), 1);
        assert_eq!(analysis.patterns[0].session_id, "s1");
    }

    #[test]
    fn test_high_frequency_and_cascade_recommendations() {
        let mut tracker = IssueTracker::new();
        // Two issue types reported every 10ms: 120 of each inside the 10s window covered
        // by a full history is 12/s, and they co-occur in one window
        for i in 0..120 {
            tracker.record(issue_at(IssueType::MemoryUsage, "s1", 100.0 + i as f64 * 10.0, i * 10));
            tracker.record(issue_at(IssueType::ExecutionTime, "s1", 1500.0, i * 10 + 5));
        }

        let analysis = tracker.pattern_analysis("s1");
        assert_eq!(analysis.patterns.len(), 2);
        assert!(analysis.patterns.iter().all(is_high_frequency));
        assert!(analysis.recommendations.iter().any(|r| r.starts_with("High-frequency memory-usage")));
        assert!(analysis.recommendations.iter().any(|r| r.starts_with("Memory-intensive pattern s1-memory-usage")));
        assert!(analysis
            .recommendations
            .iter()
            .any(|r| r.contains("memory-usage issues are followed by high-frequency execution-time")));
    }

    #[test]
    fn test_highly_coupled_recommendation_needs_more_than_three_dependencies() {
        let mut tracker = IssueTracker::new();
        let cycle = [IssueType::MemoryUsage, IssueType::ExecutionTime, IssueType::OperationsCount];

        // "coupled": three types cycling in one window, every type pair linked both ways
        let mut ts = 0;
        for _ in 0..12 {
            for issue_type in cycle {
                tracker.record(issue_at(issue_type, "coupled", 100.0, ts));
                ts += 50;
            }
        }

        // "loose": one operations-count issue, then two types alternating. The
        // operations-count type never follows the others, so each pattern has 3 edges
        tracker.record(issue_at(IssueType::OperationsCount, "loose", 100.0, 0));
        for i in 1..=24 {
            let issue_type = if i % 2 == 0 { IssueType::MemoryUsage } else { IssueType::ExecutionTime };
            tracker.record(issue_at(issue_type, "loose", 100.0, i * 50));
        }

        let coupled = tracker.pattern_analysis("coupled");
        assert_eq!(coupled.patterns.len(), 3);
        assert!(coupled.patterns.iter().all(|p| p.dependencies.len() == 4));
        assert!(coupled
            .recommendations
            .iter()
            .any(|r| r.starts_with("Highly coupled pattern coupled-memory-usage (4 dependencies)")));

        let loose = tracker.pattern_analysis("loose");
        assert_eq!(loose.patterns.len(), 2);
        assert!(loose.patterns.iter().all(|p| p.dependencies.len() == 3));
        assert!(!loose.recommendations.iter().any(|r| r.starts_with("Highly coupled")));
    }

    #[test]
    fn test_summary_counts() {
        let mut tracker = IssueTracker::new();
        for i in 0..4 {
            tracker.record(issue_at(IssueType::ExecutionTime, "a", 1.0, i));
        }
        for i in 0..2 {
            tracker.record(issue_at(IssueType::MemoryUsage, "b", 1.0, i));
        }
        tracker.record(issue_at(IssueType::OperationsCount, "b", 1.0, 5));
        tracker.record(issue_at(IssueType::MemoryLeakSuspected, "b", 1.0, 6));

        let summary = tracker.summary();
        assert_eq!(summary.total_issues, 8);
        assert_eq!(summary.issues_by_type[&IssueType::ExecutionTime], 4);
        assert_eq!(summary.most_frequent_issues.len(), 3);
        assert_eq!(summary.most_frequent_issues[0], (IssueType::ExecutionTime, 4));
        assert_eq!(summary.most_frequent_issues[1], (IssueType::MemoryUsage, 2));
        assert_eq!(summary.most_frequent_issues[2], (IssueType::OperationsCount, 1));
        assert!(summary.critical_patterns.is_empty());

        tracker.clear();
        assert_eq!(tracker.summary().total_issues, 0);
    }
}
