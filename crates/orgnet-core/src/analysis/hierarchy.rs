//! Formal versus informal hierarchy comparison.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{AnalysisOptions, HierarchyThresholds};
use crate::errors::{OrgNetError, OrgNetResult};
use crate::models::{normalize_identity, Person, ScoreFields};
use crate::store::GraphStore;

pub const MOST_SENIOR_LEVEL: i64 = 1;
pub const LEAST_SENIOR_LEVEL: i64 = 5;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyEntry {
    pub email: String,
    pub direct_reports: usize,
    pub formal_level: i64,
    pub influence_level: Option<i64>,
    pub gap: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchySummary {
    pub compared_count: usize,
    pub alignment_score: f64,
    pub shadow_leader_count: usize,
    pub under_leveraged_count: usize,
    pub shadow_leaders: Vec<String>,
    pub under_leveraged: Vec<String>,
    /// Persons per formal level.
    pub level_distribution: BTreeMap<i64, usize>,
}

/// Heuristic formal level from reporting structure: 1 is senior leadership,
/// 5 an individual contributor.
pub fn formal_level(direct_reports: usize, has_manager: bool, t: &HierarchyThresholds) -> i64 {
    if !has_manager && direct_reports >= 1 {
        1
    } else if direct_reports >= t.level2_min_reports {
        2
    } else if direct_reports >= t.level3_min_reports {
        3
    } else if direct_reports >= t.level4_min_reports.max(1) {
        4
    } else {
        LEAST_SENIOR_LEVEL
    }
}

/// Map a 1-based influence rank onto the same 1..=5 scale.
pub fn influence_level(rank: i64, total_ranked: usize) -> i64 {
    if total_ranked == 0 {
        return LEAST_SENIOR_LEVEL;
    }
    let scaled = (rank as f64 / total_ranked as f64 * LEAST_SENIOR_LEVEL as f64).ceil() as i64;
    scaled.clamp(MOST_SENIOR_LEVEL, LEAST_SENIOR_LEVEL)
}

fn has_manager(person: &Person) -> bool {
    person
        .manager_email
        .as_deref()
        .is_some_and(|m| !m.trim().is_empty())
}

/// Compare every person's formal level with their influence level. Fails
/// when the organization is too small or has no reporting data at all.
pub fn compare_hierarchy(
    persons: &[Person],
    thresholds: &HierarchyThresholds,
) -> OrgNetResult<(HierarchySummary, Vec<HierarchyEntry>)> {
    let mut reports: HashMap<String, usize> = HashMap::new();
    for manager in persons.iter().filter_map(|p| p.manager_email.as_deref()) {
        let key = normalize_identity(manager);
        if !key.is_empty() {
            *reports.entry(key).or_insert(0) += 1;
        }
    }
    if reports.is_empty() {
        return Err(OrgNetError::Analysis(
            "no manager links available for hierarchy comparison".to_string(),
        ));
    }

    let total_ranked = persons.iter().filter(|p| p.influence_rank.is_some()).count();
    if total_ranked < thresholds.min_ranked_persons {
        return Err(OrgNetError::Analysis(format!(
            "hierarchy comparison needs at least {} ranked persons, found {total_ranked}",
            thresholds.min_ranked_persons
        )));
    }

    let entries: Vec<HierarchyEntry> = persons
        .iter()
        .map(|p| {
            let direct_reports = reports.get(&p.email).copied().unwrap_or(0);
            let formal = formal_level(direct_reports, has_manager(p), thresholds);
            let informal = p.influence_rank.map(|r| influence_level(r, total_ranked));
            HierarchyEntry {
                email: p.email.clone(),
                direct_reports,
                formal_level: formal,
                influence_level: informal,
                gap: informal.map(|level| formal - level),
            }
        })
        .collect();

    let gaps: Vec<(&str, i64)> = entries
        .iter()
        .filter_map(|e| e.gap.map(|g| (e.email.as_str(), g)))
        .collect();
    let agreeing = gaps
        .iter()
        .filter(|(_, g)| g.abs() <= thresholds.agreement_tolerance)
        .count();
    let shadow_leaders: Vec<String> = gaps
        .iter()
        .filter(|(_, g)| *g >= thresholds.leader_gap)
        .map(|(e, _)| e.to_string())
        .collect();
    let under_leveraged: Vec<String> = gaps
        .iter()
        .filter(|(_, g)| *g <= -thresholds.leader_gap)
        .map(|(e, _)| e.to_string())
        .collect();
    let mut level_distribution = BTreeMap::new();
    for entry in &entries {
        *level_distribution.entry(entry.formal_level).or_insert(0) += 1;
    }

    let summary = HierarchySummary {
        compared_count: gaps.len(),
        alignment_score: agreeing as f64 / gaps.len() as f64,
        shadow_leader_count: shadow_leaders.len(),
        under_leveraged_count: under_leveraged.len(),
        shadow_leaders,
        under_leveraged,
        level_distribution,
    };
    Ok((summary, entries))
}

pub fn compare_and_store(
    graph_store: &dyn GraphStore,
    organization_id: &str,
    options: &AnalysisOptions,
) -> OrgNetResult<HierarchySummary> {
    let started = Instant::now();
    let persons = graph_store.get_persons(organization_id)?;
    let (summary, entries) = compare_hierarchy(&persons, &options.hierarchy)?;

    let updates: Vec<(String, ScoreFields)> = entries
        .into_iter()
        .map(|e| {
            (
                e.email,
                ScoreFields::Hierarchy {
                    formal_level: e.formal_level,
                    influence_level: e.influence_level,
                    gap: e.gap,
                },
            )
        })
        .collect();
    graph_store.write_scores_batch(organization_id, &updates)?;

    info!(
        organization_id,
        alignment = summary.alignment_score,
        shadow_leaders = summary.shadow_leader_count,
        under_leveraged = summary.under_leveraged_count,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "hierarchy compared"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_support::person;

    /// ceo -> vp -> {a, b, c, d}
    fn org(ranks: &[(&str, i64)]) -> Vec<Person> {
        let mut people = vec![person("ceo", None), person("vp", None)];
        people[1].manager_email = Some("ceo".into());
        for name in ["a", "b", "c", "d"] {
            let mut p = person(name, None);
            p.manager_email = Some("vp".into());
            people.push(p);
        }
        for p in people.iter_mut() {
            p.influence_rank = ranks.iter().find(|(n, _)| *n == p.email).map(|(_, r)| *r);
        }
        people
    }

    fn entry<'a>(entries: &'a [HierarchyEntry], email: &str) -> &'a HierarchyEntry {
        entries.iter().find(|e| e.email == email).unwrap()
    }

    #[test]
    fn formal_levels_follow_reporting_lines() {
        let t = HierarchyThresholds::default();
        assert_eq!(formal_level(2, false, &t), 1);
        assert_eq!(formal_level(11, true, &t), 2);
        assert_eq!(formal_level(10, true, &t), 3);
        assert_eq!(formal_level(4, true, &t), 3);
        assert_eq!(formal_level(3, true, &t), 4);
        assert_eq!(formal_level(0, true, &t), 5);
        assert_eq!(formal_level(0, false, &t), 5);
    }

    #[test]
    fn influence_level_scales_rank() {
        assert_eq!(influence_level(1, 6), 1);
        assert_eq!(influence_level(3, 6), 3);
        assert_eq!(influence_level(6, 6), 5);
        assert_eq!(influence_level(1, 100), 1);
    }

    #[test]
    fn finds_shadow_and_under_leveraged() {
        let people = org(&[("a", 1), ("c", 2), ("vp", 3), ("b", 4), ("ceo", 5), ("d", 6)]);
        let (summary, entries) =
            compare_hierarchy(&people, &HierarchyThresholds::default()).unwrap();

        assert_eq!(entry(&entries, "ceo").formal_level, 1);
        assert_eq!(entry(&entries, "vp").formal_level, 3);
        assert_eq!(entry(&entries, "vp").direct_reports, 4);
        assert_eq!(entry(&entries, "a").gap, Some(4));
        assert_eq!(entry(&entries, "ceo").gap, Some(-4));

        assert_eq!(summary.compared_count, 6);
        assert!((summary.alignment_score - 0.5).abs() < 1e-12);
        assert_eq!(summary.shadow_leaders, vec!["a", "c"]);
        assert_eq!(summary.under_leveraged, vec!["ceo"]);
        assert_eq!(summary.level_distribution.get(&5), Some(&4));
    }

    #[test]
    fn unranked_persons_get_no_gap() {
        let people = org(&[("a", 1), ("b", 2), ("c", 3)]);
        let (summary, entries) =
            compare_hierarchy(&people, &HierarchyThresholds::default()).unwrap();
        assert_eq!(summary.compared_count, 3);
        assert_eq!(entry(&entries, "ceo").gap, None);
        assert_eq!(entry(&entries, "ceo").formal_level, 1);
    }

    #[test]
    fn fails_without_manager_links() {
        let mut people = org(&[("a", 1), ("b", 2), ("c", 3)]);
        for p in people.iter_mut() {
            p.manager_email = None;
        }
        let err = compare_hierarchy(&people, &HierarchyThresholds::default()).unwrap_err();
        assert!(matches!(err, OrgNetError::Analysis(_)));
    }

    #[test]
    fn fails_for_tiny_organizations() {
        let people = org(&[("a", 1), ("b", 2)]);
        assert!(compare_hierarchy(&people, &HierarchyThresholds::default()).is_err());
    }
}
