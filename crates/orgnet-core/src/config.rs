//! Engine constants, clamping guards, and per-run analysis options.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{OrgNetError, OrgNetResult};
use crate::models::TimeWindow;

// Centrality
pub const PAGERANK_DAMPING: f64 = 0.85;
pub const PAGERANK_TOLERANCE: f64 = 1e-6;
pub const DEFAULT_PAGERANK_MAX_ITERATIONS: usize = 100;
pub const MAX_PAGERANK_ITERATIONS: usize = 1000;

// Network
pub const DEFAULT_TIME_WINDOW_DAYS: i64 = 90;
/// Upper bound for any day-count option.
pub const MAX_WINDOW_DAYS: i64 = 3650;
pub const DEFAULT_MIN_COMMUNICATIONS: i64 = 2;
pub const RECENT_ACTIVITY_DAYS: i64 = 30;
pub const SPARSE_DENSITY_THRESHOLD: f64 = 0.05;
pub const SPARSE_MIN_PERSONS: usize = 10;

// Community
pub const DEFAULT_MIN_COMMUNITY_SIZE: usize = 3;
pub const DEFAULT_MAX_COMMUNITY_ITERATIONS: usize = 50;
pub const MAX_COMMUNITY_ITERATIONS: usize = 1000;
pub const LOW_MODULARITY_THRESHOLD: f64 = 0.3;
pub const ISOLATED_NODE_THRESHOLD: usize = 5;

// Hierarchy
pub const LOW_ALIGNMENT_THRESHOLD: f64 = 0.5;
pub const SHADOW_LEADER_THRESHOLD: usize = 3;

// Hidden influencers
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.5;

// Patterns
pub const DEFAULT_PATTERN_LOOKBACK_DAYS: i64 = 30;
pub const AFTER_HOURS_CONCERN_RATIO: f64 = 0.4;
pub const SILO_CONCERN_RISK: f64 = 0.6;
pub const COLLABORATION_CONCERN_SCORE: f64 = 0.3;

// Insights
pub const INSIGHT_DEDUP_WINDOW_DAYS: i64 = 7;
pub const KEY_INFLUENCER_COUNT: usize = 3;

// Execution
pub const DEFAULT_WORKERS: usize = 4;
pub const MAX_WORKERS: usize = 64;

pub fn clamp_int(value: i64, minimum: i64, maximum: i64) -> i64 {
    value.max(minimum).min(maximum)
}

/// Clamp to `[0, 1]`, mapping NaN to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn parse_i64(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<i64> {
    lookup(name).and_then(|val| val.trim().parse::<i64>().ok())
}

/// Provisional thresholds for the formal-level heuristic and gap
/// classification. Direct-report counts are a rough proxy for seniority.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HierarchyThresholds {
    /// Minimum direct reports for level 2.
    pub level2_min_reports: usize,
    /// Minimum direct reports for level 3.
    pub level3_min_reports: usize,
    /// Minimum direct reports for level 4.
    pub level4_min_reports: usize,
    /// Largest `|gap|` still counted as agreement.
    pub agreement_tolerance: i64,
    /// Gap at or beyond which a person is a shadow leader (or, negated,
    /// under-leveraged).
    pub leader_gap: i64,
    pub min_ranked_persons: usize,
}

impl Default for HierarchyThresholds {
    fn default() -> Self {
        Self {
            level2_min_reports: 11,
            level3_min_reports: 4,
            level4_min_reports: 1,
            agreement_tolerance: 1,
            leader_gap: 2,
            min_ranked_persons: 3,
        }
    }
}

/// Options carried in the job payload. Every field has a default so the
/// payload may omit `options` entirely. `minCommunications`,
/// `patternLookbackDays` and `workers` stay `None` when absent so an
/// environment override can fill them; read them through the accessors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisOptions {
    pub time_window_days: i64,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_communications: Option<i64>,
    pub min_community_size: usize,
    pub max_community_iterations: usize,
    pub merge_small_communities: bool,
    pub pagerank_max_iterations: usize,
    pub closeness_penalize_disconnected: bool,
    pub min_confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern_lookback_days: Option<i64>,
    pub business_hours_start: u32,
    pub business_hours_end: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    /// Fixed "now" for reproducible runs; the wall clock otherwise.
    pub reference_time: Option<DateTime<Utc>>,
    pub hierarchy: HierarchyThresholds,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            time_window_days: DEFAULT_TIME_WINDOW_DAYS,
            window_start: None,
            window_end: None,
            min_communications: None,
            min_community_size: DEFAULT_MIN_COMMUNITY_SIZE,
            max_community_iterations: DEFAULT_MAX_COMMUNITY_ITERATIONS,
            merge_small_communities: true,
            pagerank_max_iterations: DEFAULT_PAGERANK_MAX_ITERATIONS,
            closeness_penalize_disconnected: false,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            pattern_lookback_days: None,
            business_hours_start: 8,
            business_hours_end: 18,
            workers: None,
            reference_time: None,
            hierarchy: HierarchyThresholds::default(),
        }
    }
}

impl AnalysisOptions {
    /// Apply `ORGNET_*` environment overrides to fields the payload left
    /// out. Values present in the payload always win.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if self.workers.is_none() {
            self.workers = parse_i64(&lookup, "ORGNET_WORKERS")
                .map(|workers| clamp_int(workers, 1, MAX_WORKERS as i64) as usize);
        }
        if self.pattern_lookback_days.is_none() {
            self.pattern_lookback_days = parse_i64(&lookup, "ORGNET_PATTERN_LOOKBACK_DAYS")
                .map(|days| clamp_int(days, 1, MAX_WINDOW_DAYS));
        }
        if self.min_communications.is_none() {
            self.min_communications =
                parse_i64(&lookup, "ORGNET_MIN_COMMUNICATIONS").map(|min| min.max(1));
        }
        self
    }

    pub fn min_communications(&self) -> i64 {
        self.min_communications.unwrap_or(DEFAULT_MIN_COMMUNICATIONS)
    }

    pub fn pattern_lookback_days(&self) -> i64 {
        self.pattern_lookback_days.unwrap_or(DEFAULT_PATTERN_LOOKBACK_DAYS)
    }

    /// Reject option combinations that cannot produce a meaningful run.
    pub fn validate(&self) -> OrgNetResult<()> {
        if !(1..=MAX_WINDOW_DAYS).contains(&self.time_window_days) {
            return Err(OrgNetError::Config(format!(
                "timeWindowDays must be within 1..={MAX_WINDOW_DAYS}, got {}",
                self.time_window_days
            )));
        }
        if self.min_communications() < 1 {
            return Err(OrgNetError::Config(format!(
                "minCommunications must be at least 1, got {}",
                self.min_communications()
            )));
        }
        if self.min_community_size == 0 {
            return Err(OrgNetError::Config(
                "minCommunitySize must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(OrgNetError::Config(format!(
                "minConfidence must be within [0, 1], got {}",
                self.min_confidence
            )));
        }
        if !(1..=MAX_WINDOW_DAYS).contains(&self.pattern_lookback_days()) {
            return Err(OrgNetError::Config(format!(
                "patternLookbackDays must be within 1..={MAX_WINDOW_DAYS}, got {}",
                self.pattern_lookback_days()
            )));
        }
        if self.business_hours_start >= self.business_hours_end || self.business_hours_end > 24 {
            return Err(OrgNetError::Config(format!(
                "business hours {}..{} are not a valid range",
                self.business_hours_start, self.business_hours_end
            )));
        }
        if let (Some(start), Some(end)) = (self.window_start, self.window_end) {
            if start >= end {
                return Err(OrgNetError::Config(format!(
                    "windowStart {start} is not before windowEnd {end}"
                )));
            }
        }
        Ok(())
    }

    pub fn reference_time(&self) -> DateTime<Utc> {
        self.reference_time.unwrap_or_else(Utc::now)
    }

    /// Window the Network Builder aggregates over.
    pub fn network_window(&self, now: DateTime<Utc>) -> OrgNetResult<TimeWindow> {
        let end = self.window_end.unwrap_or(now);
        match self.window_start {
            Some(start) => Ok(TimeWindow::new(start, end)),
            None => TimeWindow::trailing(end, self.time_window_days),
        }
    }

    /// Window the Pattern Analyzer looks back over.
    pub fn pattern_window(&self, now: DateTime<Utc>) -> OrgNetResult<TimeWindow> {
        TimeWindow::trailing(now, self.pattern_lookback_days())
    }

    /// Fail early when either analysis window cannot be built around `now`.
    pub fn check_windows(&self, now: DateTime<Utc>) -> OrgNetResult<()> {
        self.network_window(now)?;
        self.pattern_window(now)?;
        Ok(())
    }

    pub fn pagerank_iterations(&self) -> usize {
        self.pagerank_max_iterations.clamp(1, MAX_PAGERANK_ITERATIONS)
    }

    pub fn community_iterations(&self) -> usize {
        self.max_community_iterations.clamp(1, MAX_COMMUNITY_ITERATIONS)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or(DEFAULT_WORKERS).clamp(1, MAX_WORKERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn clamp_helpers_bound_values() {
        assert_eq!(clamp_int(0, 1, 10), 1);
        assert_eq!(clamp_int(42, 1, 10), 10);
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert_eq!(clamp_unit(1.7), 1.0);
        assert_eq!(clamp_unit(-0.2), 0.0);
    }

    #[test]
    fn options_parse_camel_case_with_defaults() {
        let opts: AnalysisOptions =
            serde_json::from_str(r#"{"minCommunications": 5, "hierarchy": {"leaderGap": 3}}"#)
                .unwrap();
        assert_eq!(opts.min_communications(), 5);
        assert_eq!(opts.pattern_lookback_days(), DEFAULT_PATTERN_LOOKBACK_DAYS);
        assert_eq!(opts.hierarchy.leader_gap, 3);
        assert_eq!(opts.hierarchy.level2_min_reports, 11);
        assert_eq!(opts.time_window_days, DEFAULT_TIME_WINDOW_DAYS);
    }

    #[test]
    fn validate_rejects_bad_ranges() {
        let opts = AnalysisOptions {
            min_community_size: 0,
            ..Default::default()
        };
        assert!(matches!(opts.validate(), Err(OrgNetError::Config(_))));

        let opts = AnalysisOptions {
            business_hours_start: 18,
            business_hours_end: 9,
            ..Default::default()
        };
        assert!(matches!(opts.validate(), Err(OrgNetError::Config(_))));

        assert!(AnalysisOptions::default().validate().is_ok());
    }

    #[test]
    fn network_window_prefers_explicit_bounds() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let opts = AnalysisOptions {
            time_window_days: 10,
            ..Default::default()
        };
        let window = opts.network_window(now).unwrap();
        assert_eq!(window.end, now);
        assert_eq!(window.start, now - Duration::days(10));

        let start = now - Duration::days(3);
        let opts = AnalysisOptions {
            window_start: Some(start),
            ..Default::default()
        };
        assert_eq!(opts.network_window(now).unwrap().start, start);
    }

    #[test]
    fn validate_caps_day_counts() {
        let opts = AnalysisOptions {
            time_window_days: MAX_WINDOW_DAYS + 1,
            ..Default::default()
        };
        assert!(matches!(opts.validate(), Err(OrgNetError::Config(_))));

        let opts = AnalysisOptions {
            pattern_lookback_days: Some(i64::MAX),
            ..Default::default()
        };
        assert!(matches!(opts.validate(), Err(OrgNetError::Config(_))));

        let opts = AnalysisOptions {
            time_window_days: MAX_WINDOW_DAYS,
            ..Default::default()
        };
        assert!(opts.validate().is_ok());
    }

    fn fake_env(name: &str) -> Option<String> {
        match name {
            "ORGNET_MIN_COMMUNICATIONS" => Some("5".to_string()),
            "ORGNET_WORKERS" => Some("9".to_string()),
            "ORGNET_PATTERN_LOOKBACK_DAYS" => Some(" 14 ".to_string()),
            _ => None,
        }
    }

    #[test]
    fn env_overrides_fill_only_absent_fields() {
        let opts: AnalysisOptions = serde_json::from_str("{}").unwrap();
        let opts = opts.with_overrides_from(fake_env);
        assert_eq!(opts.min_communications(), 5);
        assert_eq!(opts.worker_count(), 9);
        assert_eq!(opts.pattern_lookback_days(), 14);

        // Explicit values equal to the defaults still beat the environment.
        let opts: AnalysisOptions = serde_json::from_str(&format!(
            r#"{{"minCommunications": {DEFAULT_MIN_COMMUNICATIONS}, "workers": {DEFAULT_WORKERS}, "patternLookbackDays": {DEFAULT_PATTERN_LOOKBACK_DAYS}}}"#
        ))
        .unwrap();
        let opts = opts.with_overrides_from(fake_env);
        assert_eq!(opts.min_communications(), DEFAULT_MIN_COMMUNICATIONS);
        assert_eq!(opts.worker_count(), DEFAULT_WORKERS);
        assert_eq!(opts.pattern_lookback_days(), DEFAULT_PATTERN_LOOKBACK_DAYS);
    }

    #[test]
    fn env_values_that_do_not_parse_are_ignored() {
        let opts = AnalysisOptions::default()
            .with_overrides_from(|_| Some("lots".to_string()));
        assert_eq!(opts.min_communications, None);
        assert_eq!(opts.worker_count(), DEFAULT_WORKERS);
    }
}
