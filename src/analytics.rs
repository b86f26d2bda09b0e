use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

use crate::models::{Lead, ResponseRecord};
use crate::scoring::{score_distribution, ScoreBucket};
use crate::tracking::{Interaction, InteractionType};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizStats {
    pub total_responses: usize,
    pub avg_time_taken: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStats {
    pub total_responses: usize,
    pub avg_time_taken: i64,
    pub total_leads: usize,
    pub total_quizzes: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FunnelStep {
    pub step: InteractionType,
    pub sessions: usize,
}

fn rounded_mean_time<'a>(responses: impl Iterator<Item = &'a ResponseRecord>) -> i64 {
    let times: Vec<u32> = responses.filter_map(|r| r.time_taken).collect();
    if times.is_empty() {
        return 0;
    }
    let total: u64 = times.iter().map(|t| u64::from(*t)).sum();
    (total as f64 / times.len() as f64).round() as i64
}

pub fn quiz_stats(responses: &[ResponseRecord], quiz_id: Uuid) -> QuizStats {
    let for_quiz: Vec<&ResponseRecord> = responses.iter().filter(|r| r.quiz_id == quiz_id).collect();
    QuizStats {
        total_responses: for_quiz.len(),
        avg_time_taken: rounded_mean_time(for_quiz.into_iter()),
    }
}

pub fn global_stats(responses: &[ResponseRecord], total_leads: usize, total_quizzes: usize) -> GlobalStats {
    GlobalStats {
        total_responses: responses.len(),
        avg_time_taken: rounded_mean_time(responses.iter()),
        total_leads,
        total_quizzes,
    }
}

/// Distinct sessions that reached each of view, start and complete.
pub fn funnel<'a>(interactions: impl IntoIterator<Item = &'a Interaction>, quiz_id: Uuid) -> Vec<FunnelStep> {
    let steps = [InteractionType::View, InteractionType::Start, InteractionType::Complete];
    let mut seen: [HashSet<&str>; 3] = Default::default();
    for i in interactions.into_iter().filter(|i| i.quiz_id == quiz_id) {
        if let Some(pos) = steps.iter().position(|s| *s == i.kind) {
            seen[pos].insert(i.session_id.as_str());
        }
    }
    steps
        .iter()
        .zip(seen.iter())
        .map(|(step, sessions)| FunnelStep {
            step: *step,
            sessions: sessions.len(),
        })
        .collect()
}

pub fn lead_score_distribution<'a>(leads: impl IntoIterator<Item = &'a Lead>, quiz_id: Uuid) -> Vec<ScoreBucket> {
    score_distribution(
        leads
            .into_iter()
            .filter(|l| l.quiz_id == quiz_id)
            .filter_map(|l| l.score),
    )
}
