use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::models::{AnswerValue, Question, ThankYouPage};

/// Outcome label used when no thank-you page range contains the score.
pub const FALLBACK_OUTCOME: &str = "Default";

pub const SCORE_BUCKET_WIDTH: i64 = 10;

/// Sum of the `score` of every selected option across all questions. Values
/// that match no option, and options without a score, contribute 0.
pub fn compute_score(questions: &[Question], answers: &BTreeMap<String, AnswerValue>) -> i64 {
    questions
        .iter()
        .filter_map(|q| answers.get(&q.id).map(|a| (q, a)))
        .map(|(q, answer)| {
            answer
                .values()
                .into_iter()
                .filter_map(|v| q.option(v))
                .map(|o| o.score.unwrap_or(0))
                .sum::<i64>()
        })
        .sum()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<'a> {
    pub label: String,
    pub page: Option<&'a ThankYouPage>,
}

/// First page in the given order whose inclusive range contains `score`.
pub fn resolve_outcome(score: i64, pages: &[ThankYouPage]) -> Outcome<'_> {
    match pages.iter().find(|p| p.contains(score)) {
        Some(page) => Outcome {
            label: page.title.clone(),
            page: Some(page),
        },
        None => Outcome {
            label: FALLBACK_OUTCOME.to_string(),
            page: None,
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBucket {
    pub range: String,
    pub bucket_start: i64,
    pub count: usize,
}

/// Buckets scores into `[0-9], [10-19], ...`, ascending by bucket start.
pub fn score_distribution(scores: impl IntoIterator<Item = i64>) -> Vec<ScoreBucket> {
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for score in scores {
        let start = score.div_euclid(SCORE_BUCKET_WIDTH) * SCORE_BUCKET_WIDTH;
        *counts.entry(start).or_default() += 1;
    }
    let mut buckets: Vec<ScoreBucket> = counts
        .into_iter()
        .map(|(start, count)| ScoreBucket {
            range: format!("{}-{}", start, start + SCORE_BUCKET_WIDTH - 1),
            bucket_start: start,
            count,
        })
        .collect();
    buckets.sort_by_key(|b| b.bucket_start);
    buckets
}
