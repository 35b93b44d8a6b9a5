// feedback.rs — Aggregate user ratings of agent replies.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::AgentFeedback;

/// Ratings at or above this count as approval.
const POSITIVE_RATING: u8 = 4;
/// Ratings at or below this count as negative.
const NEGATIVE_RATING: u8 = 2;
/// Ratings at or below this contribute their categories.
const CATEGORY_RATING: u8 = 3;
const RECENT_NEGATIVE_LIMIT: usize = 10;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AgentFeedbackStats {
    pub agent_id: Option<String>,
    pub total_feedback: usize,
    /// Mean rating, one decimal place.
    pub avg_rating: f64,
    /// Percentage of ratings that were positive.
    pub approval_rate: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CategoryCount {
    pub category: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FeedbackSummary {
    pub by_agent: Vec<AgentFeedbackStats>,
    pub by_category: Vec<CategoryCount>,
    pub recent_negative: Vec<AgentFeedback>,
}

/// Summarize feedback rows. `rows` must be newest first.
pub fn summarize(rows: &[AgentFeedback]) -> FeedbackSummary {
    let mut agents: BTreeMap<Option<&str>, (usize, u32, usize)> = BTreeMap::new();
    let mut categories: BTreeMap<&str, usize> = BTreeMap::new();

    for row in rows {
        let entry = agents.entry(row.agent_id.as_deref()).or_default();
        entry.0 += 1;
        entry.1 += u32::from(row.rating);
        if row.rating >= POSITIVE_RATING {
            entry.2 += 1;
        }
        if row.rating <= CATEGORY_RATING {
            for category in &row.categories {
                *categories.entry(category.as_str()).or_default() += 1;
            }
        }
    }

    let by_agent = agents
        .into_iter()
        .map(|(agent_id, (total, sum, positive))| AgentFeedbackStats {
            agent_id: agent_id.map(str::to_string),
            total_feedback: total,
            avg_rating: (f64::from(sum) / total as f64 * 10.0).round() / 10.0,
            approval_rate: ((positive as f64 / total as f64) * 100.0).round() as u32,
        })
        .collect();

    let mut by_category: Vec<CategoryCount> = categories
        .into_iter()
        .map(|(category, count)| CategoryCount {
            category: category.to_string(),
            count,
        })
        .collect();
    // Stable sort keeps the alphabetical order among equal counts.
    by_category.sort_by(|a, b| b.count.cmp(&a.count));

    let recent_negative = rows
        .iter()
        .filter(|f| f.rating <= NEGATIVE_RATING && f.comment.is_some())
        .take(RECENT_NEGATIVE_LIMIT)
        .cloned()
        .collect();

    FeedbackSummary {
        by_agent,
        by_category,
        recent_negative,
    }
}
