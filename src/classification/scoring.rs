//! Scoring accumulator (C5): skip pass + project pass over a rule set and a
//! single event. Pure function over plain data so it is unit-testable
//! without a database.

use uuid::Uuid;

use super::dsl::{parse, Query};
use super::eval::{matches, EventView};
use crate::error::Result;
use crate::event_store::ClassificationSource;

#[derive(Debug, Clone)]
pub struct Rule {
    pub id: Uuid,
    pub query: Query,
    pub weight: f64,
    /// `Some(project_id)` for a project rule; `None` for a skip rule.
    pub project_id: Option<Uuid>,
    pub is_fingerprint: bool,
}

impl Rule {
    pub fn compile(id: Uuid, query_text: &str, weight: f64, project_id: Option<Uuid>, is_fingerprint: bool) -> Result<Self> {
        let query = parse(query_text)?;
        Ok(Self { id, query, weight, project_id, is_fingerprint })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub is_skipped: bool,
    pub classification: Option<Classification>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub project_id: Uuid,
    pub confidence: f64,
    pub source: ClassificationSource,
    pub needs_review: bool,
}

/// Runs the skip pass and the project pass over `rules` for `event`. `rules`
/// should already be filtered to enabled rules for the owning user; skip
/// rules are those with `project_id = None`, project rules the rest.
///
/// Rules are summed in ascending `id` order before the argmax step so
/// floating-point accumulation order is deterministic across runs.
pub fn classify(rules: &[Rule], event: &EventView, floor: f64, ceiling: f64) -> Outcome {
    let mut sorted: Vec<&Rule> = rules.iter().collect();
    sorted.sort_by_key(|r| r.id);

    let is_skipped = sorted
        .iter()
        .filter(|r| r.project_id.is_none())
        .any(|r| matches(&r.query, event));

    let mut scores: std::collections::BTreeMap<Uuid, (f64, bool)> = std::collections::BTreeMap::new();
    for rule in sorted.iter().filter(|r| r.project_id.is_some()) {
        if matches(&rule.query, event) {
            let project_id = rule.project_id.unwrap();
            let entry = scores.entry(project_id).or_insert((0.0, true));
            entry.0 += rule.weight;
            entry.1 = entry.1 && rule.is_fingerprint;
        }
    }

    if scores.is_empty() {
        return Outcome { is_skipped, classification: None };
    }

    let total: f64 = scores.values().map(|(s, _)| s).sum();
    // BTreeMap iterates in ascending Uuid order; taking the first entry that
    // attains the maximum score implements "lower project UUID wins" on an
    // exact tie without a custom comparator.
    let max_score = scores.values().map(|(s, _)| *s).fold(f64::MIN, f64::max);
    let (top_project, (top_score, top_is_fingerprint_only)) = scores
        .iter()
        .find(|(_, (s, _))| *s == max_score)
        .map(|(id, v)| (*id, *v))
        .expect("scores is non-empty");

    let confidence = if total > 0.0 { top_score / total } else { 0.0 };

    if confidence < floor {
        return Outcome { is_skipped, classification: None };
    }

    Outcome {
        is_skipped,
        classification: Some(Classification {
            project_id: top_project,
            confidence,
            source: if top_is_fingerprint_only { ClassificationSource::Fingerprint } else { ClassificationSource::Rule },
            needs_review: confidence < ceiling,
        }),
    }
}

/// Synthesizes the implicit rules a project contributes from its
/// fingerprint sets.
pub fn fingerprint_rules(
    project_id: Uuid,
    domains: &[String],
    emails: &[String],
    keywords: &[String],
    default_weight: f64,
) -> Vec<Rule> {
    let mut rules = Vec::new();
    for d in domains {
        if let Ok(query) = parse(&format!("domain:{d}")) {
            rules.push(Rule { id: Uuid::new_v4(), query, weight: default_weight, project_id: Some(project_id), is_fingerprint: true });
        }
    }
    for e in emails {
        if let Ok(query) = parse(&format!("email:{e}")) {
            rules.push(Rule { id: Uuid::new_v4(), query, weight: default_weight, project_id: Some(project_id), is_fingerprint: true });
        }
    }
    for k in keywords {
        if let Ok(query) = parse(&format!("text:{k}")) {
            rules.push(Rule { id: Uuid::new_v4(), query, weight: default_weight, project_id: Some(project_id), is_fingerprint: true });
        }
    }
    rules
}
