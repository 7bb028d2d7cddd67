//! Heuristic routing classification.
//!
//! Scores a question against two weighted cue tables, one for questions
//! best answered by generating and running SQL and one for questions best
//! answered from retrieved knowledge, then folds in the question's
//! extracted entities. The balance of the two scores picks exactly one
//! [`ProcessingPath`] and a confidence in `[0, 1]`.
//!
//! The cue tables are plain data so they can be tested in isolation; the
//! classifier holds no state.

use regex::Regex;
use std::sync::LazyLock;

use crate::entities::{extract, Entity, EntityKind};
use crate::models::ProcessingPath;

/// Below this share of the total score for the stronger side, a question
/// carrying both kinds of cue is routed to [`ProcessingPath::Hybrid`].
pub const HYBRID_SPLIT: f64 = 0.65;

/// Which path a cue argues for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Code,
    Rag,
}

/// A weighted `(pattern, signal)` cue.
pub struct Cue {
    pub pattern: Regex,
    pub signal: Signal,
    pub weight: f64,
}

fn cue(pattern: &str, signal: Signal, weight: f64) -> Cue {
    Cue {
        pattern: Regex::new(pattern).expect("routing cue pattern is valid"),
        signal,
        weight,
    }
}

static CUES: LazyLock<Vec<Cue>> = LazyLock::new(|| {
    vec![
        cue(
            r"(?i)\b(?:total|sum|average|avg|mean|median|count|how many|how much|number of)\b",
            Signal::Code,
            2.0,
        ),
        cue(
            r"(?i)\b(?:top|bottom|highest|lowest|max(?:imum)?|min(?:imum)?|rank(?:ed|ing)?)\b",
            Signal::Code,
            1.5,
        ),
        cue(
            r"(?i)\b(?:trend|compare|comparison|versus|vs|year over year|month over month)\b",
            Signal::Code,
            1.0,
        ),
        cue(
            r"(?i)\b(?:list|show|select|query|sql|table|rows?|chart|plot)\b",
            Signal::Code,
            1.0,
        ),
        cue(r"(?i)\b(?:per|group(?:ed)? by|breakdown|broken down)\b", Signal::Code, 0.5),
        cue(
            r"(?i)^\s*(?:what is|what are|what does|who is|define|explain|describe)\b",
            Signal::Rag,
            2.0,
        ),
        cue(
            r"(?i)\b(?:why|meaning|definitions?|documentation|docs|polic(?:y|ies)|guidelines?|procedures?|process)\b",
            Signal::Rag,
            1.5,
        ),
        cue(r"(?i)\bhow (?:do|does|to|can|should)\b", Signal::Rag, 1.5),
        cue(
            r"(?i)\b(?:summari[sz]e|overview|background|tell me about)\b",
            Signal::Rag,
            1.0,
        ),
    ]
});

/// The cue table, in evaluation order.
pub fn cues() -> &'static [Cue] {
    &CUES
}

/// Optional context for a routing decision.
#[derive(Debug, Clone, Default)]
pub struct RoutingHints {
    /// Pre-extracted entities; extracted from the question when `None`.
    pub entities: Option<Vec<Entity>>,
    /// Whether schema context is known to be available for the target
    /// source. `Some(false)` rules out SQL generation.
    pub schema_available: Option<bool>,
}

/// Result of [`classify`], with the raw scores that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub path: ProcessingPath,
    pub confidence: f64,
    pub code_score: f64,
    pub rag_score: f64,
}

fn entity_score(entities: &[Entity]) -> f64 {
    let metrics = entities
        .iter()
        .filter(|e| e.kind == EntityKind::Metric)
        .count()
        .min(2) as f64;
    let temporal = entities.iter().any(|e| e.kind.is_temporal());
    let numeric = entities
        .iter()
        .filter(|e| e.kind.is_numeric())
        .count()
        .min(2) as f64;
    metrics + if temporal { 1.0 } else { 0.0 } + numeric * 0.5
}

/// Saturating evidence strength in `[0, 1)`.
fn strength(score: f64) -> f64 {
    score / (score + 1.0)
}

/// Classify `question` into exactly one processing path.
pub fn classify(question: &str, hints: &RoutingHints) -> Classification {
    let extracted;
    let entities = match &hints.entities {
        Some(e) => e.as_slice(),
        None => {
            extracted = extract(question);
            extracted.as_slice()
        }
    };

    let mut code = entity_score(entities);
    let mut rag = 0.0;
    for c in cues() {
        if c.pattern.is_match(question) {
            match c.signal {
                Signal::Code => code += c.weight,
                Signal::Rag => rag += c.weight,
            }
        }
    }

    let total = code + rag;
    let (mut path, mut confidence) = if total <= f64::EPSILON {
        (ProcessingPath::Rag, 0.5)
    } else {
        let (hi, lo) = if code >= rag { (code, rag) } else { (rag, code) };
        let share = hi / total;
        if lo > 0.0 && share < HYBRID_SPLIT {
            (ProcessingPath::Hybrid, 0.5 + 0.3 * (lo / hi))
        } else if code >= rag {
            (ProcessingPath::CodeExecution, 0.5 + 0.45 * share * strength(hi))
        } else {
            (ProcessingPath::Rag, 0.5 + 0.45 * share * strength(hi))
        }
    };

    if hints.schema_available == Some(false) && path != ProcessingPath::Rag {
        path = ProcessingPath::Rag;
        confidence = confidence.min(0.6);
    }

    Classification {
        path,
        confidence: confidence.clamp(0.0, 1.0),
        code_score: code,
        rag_score: rag,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(q: &str) -> Classification {
        classify(q, &RoutingHints::default())
    }

    #[test]
    fn aggregate_metric_question_runs_sql() {
        let c = route("What was total revenue last month?");
        assert_eq!(c.path, ProcessingPath::CodeExecution);
        assert!(c.confidence > 0.7);
    }

    #[test]
    fn definition_question_uses_rag() {
        let c = route("Explain our refund policy");
        assert_eq!(c.path, ProcessingPath::Rag);
    }

    #[test]
    fn mixed_question_is_hybrid() {
        let c = route("Explain why churn increased and show the top 5 regions by churn");
        assert_eq!(c.path, ProcessingPath::Hybrid);
        assert!(c.code_score > 0.0 && c.rag_score > 0.0);
    }

    #[test]
    fn no_cues_defaults_to_rag() {
        let c = route("hello there");
        assert_eq!(c.path, ProcessingPath::Rag);
        assert_eq!(c.confidence, 0.5);
    }

    #[test]
    fn missing_schema_rules_out_sql() {
        let hints = RoutingHints {
            entities: None,
            schema_available: Some(false),
        };
        let c = classify("How many orders were placed this week?", &hints);
        assert_eq!(c.path, ProcessingPath::Rag);
        assert!(c.confidence <= 0.6);
    }

    #[test]
    fn confidence_always_in_unit_interval() {
        let questions = [
            "",
            "total sum average count top highest trend list show per",
            "what is why how do documentation policy overview",
            "revenue profit margin cost churn 2023 2024-01 between 100 and 200 $5 10%",
            "Describe the sales table and plot the total sales per region",
        ];
        for q in questions {
            let c = route(q);
            assert!(ProcessingPath::ALL.contains(&c.path));
            assert!((0.0..=1.0).contains(&c.confidence), "{} -> {}", q, c.confidence);
        }
    }

    #[test]
    fn supplied_entities_are_used_verbatim() {
        let hints = RoutingHints {
            entities: Some(Vec::new()),
            schema_available: None,
        };
        let with = route("revenue last year");
        let without = classify("revenue last year", &hints);
        assert!(with.code_score > without.code_score);
    }
}
