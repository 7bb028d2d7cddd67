//! Rule-table entity extraction.
//!
//! [`extract`] pulls typed domain entities out of a free-text question:
//! time periods and dates, business metrics and dimensions, proper nouns,
//! multi-word noun phrases around business vocabulary, and numeric
//! values (percentages, currency, ranges, comparisons, large numbers).
//!
//! Every rule is a `(pattern, category)` pair in one of three ordered
//! tables, evaluated independently against the whole input:
//!
//! | Stage | Table | Keeps |
//! |-------|-------|-------|
//! | 1 | [`lexical_rules`] | every non-overlapping match |
//! | 2 | [`noun_phrase_rules`] | trimmed matches of more than one word |
//! | 3 | [`numeric_rules`] | every non-overlapping match |
//!
//! Entities are deduplicated by exact text, keep first-occurrence order,
//! and anything made only of stop-words is dropped. Extraction is pure and
//! deterministic; no input is rejected.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

/// Words that never stand alone as an entity.
pub const STOP_WORDS: &[&str] = &[
    "the", "and", "or", "of", "in", "on", "at", "by", "for", "with", "about",
];

/// Category of an extracted entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    TimePeriod,
    Date,
    Month,
    Quarter,
    Year,
    Metric,
    Dimension,
    NamedEntity,
    NounPhrase,
    Percentage,
    Currency,
    Range,
    Comparison,
    Number,
}

impl EntityKind {
    /// Calendar references: periods, dates, months, quarters, years.
    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            EntityKind::TimePeriod
                | EntityKind::Date
                | EntityKind::Month
                | EntityKind::Quarter
                | EntityKind::Year
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            EntityKind::Percentage
                | EntityKind::Currency
                | EntityKind::Range
                | EntityKind::Comparison
                | EntityKind::Number
        )
    }
}

/// A substring of the input matched by a rule, tagged with its category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    #[serde(rename = "category")]
    pub kind: EntityKind,
}

/// One `(pattern, category)` extraction rule.
pub struct Rule {
    pub pattern: Regex,
    pub kind: EntityKind,
}

fn rule(pattern: &str, kind: EntityKind) -> Rule {
    Rule {
        pattern: Regex::new(pattern).expect("entity rule pattern is valid"),
        kind,
    }
}

const METRICS: &[&str] = &[
    "revenue",
    "sales",
    "profit",
    "margin",
    "cost",
    "conversion rate",
    "click-through rate",
    "engagement",
    "retention",
    "churn",
    "roi",
    "cac",
    "ltv",
    "arpu",
    "ctr",
    "cpc",
    "cpa",
    "nps",
    "csat",
];

const DIMENSIONS: &[&str] = &[
    "region",
    "country",
    "state",
    "city",
    "product(?: category)?",
    "customer(?: segment)?",
    "channel",
    "department",
    "industry",
    "sector",
    "market",
    "segment",
    "demographic",
    "age group",
    "gender",
    "location",
];

static LEXICAL_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    let mut rules = vec![
        rule(
            r"(?i)\b(?:last|next|this) (?:year|month|quarter|week|day)\b",
            EntityKind::TimePeriod,
        ),
        rule(
            r"(?i)\b\d+ (?:years?|months?|quarters?|weeks?|days?) ago\b",
            EntityKind::TimePeriod,
        ),
        rule(r"\b\d{4}-\d{2}-\d{2}\b", EntityKind::Date),
        // Also matches full dates; those are skipped in `collect_matches`.
        rule(r"\b\d{4}-\d{2}(?:-\d{2})?\b", EntityKind::Month),
        rule(r"(?i)\b\d{4}q[1-4]\b", EntityKind::Quarter),
        rule(r"\b\d{4}\b", EntityKind::Year),
    ];
    rules.extend(
        METRICS
            .iter()
            .map(|m| rule(&format!(r"(?i)\b{}", m), EntityKind::Metric)),
    );
    rules.extend(
        DIMENSIONS
            .iter()
            .map(|d| rule(&format!(r"(?i)\b{}", d), EntityKind::Dimension)),
    );
    rules.push(rule(
        r"\b(?:[A-Z][a-z]+ )+[A-Z][a-z]+\b",
        EntityKind::NamedEntity,
    ));
    rules
});

const NOUN_PHRASE_CORES: &[&str] = &[
    "sales|revenue|profit|cost|margin|conversion|retention",
    "customer|product|service|market|channel",
    "performance|growth|decline|increase|decrease|trend",
    "roi|return on investment|cash flow|budget|expense",
    "revenue|profit|margin|cost|price|discount",
    "campaign|lead|conversion|click|impression|engagement",
    "ctr|cpc|cpa|cpm|acquisition|retention",
    "usage|adoption|feature|performance|quality|rating",
    "satisfaction|nps|csat|feedback|complaint|support",
    "churn|retention|loyalty|lifetime value|ltv",
    "daily|weekly|monthly|quarterly|yearly|annual",
    "trend|growth|decline|change|comparison",
];

static NOUN_PHRASE_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    NOUN_PHRASE_CORES
        .iter()
        .map(|core| {
            rule(
                &format!(r"(?i)\b(?:\w+ ){{0,2}}(?:{})\w*(?: \w+){{0,2}}", core),
                EntityKind::NounPhrase,
            )
        })
        .collect()
});

const NUM: &str = r"(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?";

static NUMERIC_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(&format!(r"{}\s*%", NUM), EntityKind::Percentage),
        rule(&format!(r"[$€£]\s*{}", NUM), EntityKind::Currency),
        rule(
            &format!(r"(?i){}\s*(?:dollars|euros|pounds)\b", NUM),
            EntityKind::Currency,
        ),
        rule(
            &format!(r"(?i)\bbetween\s+{}\s+and\s+{}", NUM, NUM),
            EntityKind::Range,
        ),
        rule(
            &format!(r"(?i)\bfrom\s+{}\s+to\s+{}", NUM, NUM),
            EntityKind::Range,
        ),
        rule(
            &format!(r"(?i)\b(?:greater|more|higher|larger)\s+than\s+{}", NUM),
            EntityKind::Comparison,
        ),
        rule(
            &format!(r"(?i)\b(?:less|lower|smaller|fewer)\s+than\s+{}", NUM),
            EntityKind::Comparison,
        ),
        rule(r"\b\d{3,}(?:\.\d+)?\b", EntityKind::Number),
    ]
});

/// Stage 1: time, date, vocabulary, and proper-noun rules, in order.
pub fn lexical_rules() -> &'static [Rule] {
    &LEXICAL_RULES
}

/// Stage 2: filler-word templates around business vocabulary.
pub fn noun_phrase_rules() -> &'static [Rule] {
    &NOUN_PHRASE_RULES
}

/// Stage 3: percentages, currency, ranges, comparisons, numbers.
pub fn numeric_rules() -> &'static [Rule] {
    &NUMERIC_RULES
}

/// Ordered working set keyed by exact text.
#[derive(Default)]
struct EntitySet {
    seen: HashSet<String>,
    items: Vec<Entity>,
}

impl EntitySet {
    fn insert(&mut self, text: &str, kind: EntityKind) {
        if self.seen.insert(text.to_string()) {
            self.items.push(Entity {
                text: text.to_string(),
                kind,
            });
        }
    }
}

fn collect_matches(set: &mut EntitySet, rules: &[Rule], query: &str) {
    for r in rules {
        for m in r.pattern.find_iter(query) {
            if r.kind == EntityKind::Month && m.as_str().len() != 7 {
                continue;
            }
            set.insert(m.as_str(), r.kind);
        }
    }
}

fn is_stop_phrase(text: &str) -> bool {
    let mut words = text.split_whitespace().peekable();
    if words.peek().is_none() {
        return true;
    }
    words.all(|w| {
        let w = w.trim_matches(|c: char| !c.is_alphanumeric());
        w.is_empty() || STOP_WORDS.iter().any(|s| s.eq_ignore_ascii_case(w))
    })
}

/// Extract typed entities from `query`.
///
/// # Example
///
/// ```rust
/// use nl_query_core::entities::{extract, EntityKind};
///
/// let entities = extract("last year revenue increased by 20%");
/// assert!(entities.iter().any(|e| e.text == "last year" && e.kind == EntityKind::TimePeriod));
/// assert!(entities.iter().any(|e| e.text == "20%" && e.kind == EntityKind::Percentage));
/// ```
pub fn extract(query: &str) -> Vec<Entity> {
    let mut set = EntitySet::default();

    collect_matches(&mut set, lexical_rules(), query);

    for r in noun_phrase_rules() {
        for m in r.pattern.find_iter(query) {
            let phrase = m.as_str().trim();
            if phrase.split_whitespace().count() > 1 {
                set.insert(phrase, r.kind);
            }
        }
    }

    collect_matches(&mut set, numeric_rules(), query);

    set.items
        .into_iter()
        .filter(|e| !is_stop_phrase(&e.text))
        .collect()
}

/// Entity texts only, in extraction order.
pub fn extract_texts(query: &str) -> Vec<String> {
    extract(query).into_iter().map(|e| e.text).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has(entities: &[Entity], text: &str, kind: EntityKind) -> bool {
        entities.iter().any(|e| e.text == text && e.kind == kind)
    }

    #[test]
    fn revenue_growth_example() {
        let e = extract("last year revenue increased by 20%");
        assert!(has(&e, "last year", EntityKind::TimePeriod));
        assert!(has(&e, "revenue", EntityKind::Metric));
        assert!(has(&e, "20%", EntityKind::Percentage));
    }

    #[test]
    fn quarter_and_currency_example() {
        let e = extract("revenue in 2023Q2 was $1500");
        assert!(e
            .iter()
            .any(|x| x.kind == EntityKind::Quarter && x.text.eq_ignore_ascii_case("2023q2")));
        assert!(has(&e, "revenue", EntityKind::Metric));
        assert!(e
            .iter()
            .any(|x| x.kind == EntityKind::Currency && x.text.contains("1500")));
    }

    #[test]
    fn extraction_is_idempotent() {
        let q = "Compare churn by region between 100 and 250 for Acme Corp in 2024-03";
        assert_eq!(extract(q), extract(q));
    }

    #[test]
    fn stop_words_and_punctuation_yield_nothing() {
        for q in ["", "the and or", "Of, the! about... with?", "The And", "  ;;  "] {
            assert!(extract(q).is_empty(), "expected no entities for {:?}", q);
        }
    }

    #[test]
    fn full_date_is_not_also_a_month() {
        let e = extract("orders since 2024-03-15 and during 2024-04");
        assert!(has(&e, "2024-03-15", EntityKind::Date));
        assert!(has(&e, "2024-04", EntityKind::Month));
        assert!(!e.iter().any(|x| x.text == "2024-03"));
    }

    #[test]
    fn any_four_digit_run_is_a_year() {
        let e = extract("compare 1850 with 2024 but not 12345");
        assert!(has(&e, "1850", EntityKind::Year));
        assert!(has(&e, "2024", EntityKind::Year));
        assert!(!e.iter().any(|x| x.kind == EntityKind::Year && x.text == "1234"));
        assert!(has(&e, "12345", EntityKind::Number));
    }

    #[test]
    fn vocabulary_needs_word_start() {
        let e = extract("a heroic effort");
        assert!(!e.iter().any(|x| x.kind == EntityKind::Metric));
    }

    #[test]
    fn dimension_with_optional_qualifier() {
        let e = extract("sales by product category and customer segment");
        assert!(has(&e, "product category", EntityKind::Dimension));
        assert!(has(&e, "customer segment", EntityKind::Dimension));
    }

    #[test]
    fn named_entities_need_two_capitalized_words() {
        let e = extract("profit for New York versus Boston");
        assert!(has(&e, "New York", EntityKind::NamedEntity));
        assert!(!e.iter().any(|x| x.text == "Boston"));
    }

    #[test]
    fn noun_phrases_are_multi_word() {
        let e = extract("monthly active users");
        assert!(has(&e, "monthly active users", EntityKind::NounPhrase));
        let single = extract("growth");
        assert!(!single.iter().any(|x| x.kind == EntityKind::NounPhrase));
    }

    #[test]
    fn numeric_ranges_and_comparisons() {
        let e = extract("deals between 10 and 20.5 with value greater than 1,000 dollars");
        assert!(has(&e, "between 10 and 20.5", EntityKind::Range));
        assert!(has(&e, "greater than 1,000", EntityKind::Comparison));
        assert!(has(&e, "1,000 dollars", EntityKind::Currency));
    }

    #[test]
    fn dedup_keeps_first_category() {
        let e = extract("sales sales sales");
        assert_eq!(
            e.iter()
                .filter(|x| x.text == "sales")
                .map(|x| x.kind)
                .collect::<Vec<_>>(),
            vec![EntityKind::Metric]
        );
    }

    #[test]
    fn relative_periods_ago() {
        let e = extract("signups 3 weeks ago vs 1 day ago");
        assert!(has(&e, "3 weeks ago", EntityKind::TimePeriod));
        assert!(has(&e, "1 day ago", EntityKind::TimePeriod));
    }

    #[test]
    fn rule_tables_compile() {
        assert!(!lexical_rules().is_empty());
        assert_eq!(noun_phrase_rules().len(), NOUN_PHRASE_CORES.len());
        assert_eq!(numeric_rules().len(), 8);
    }
}
