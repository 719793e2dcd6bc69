//! Shared context-packing helpers for the search orchestrators (spec §4.14).
pub mod basic;
pub mod local;

use common::config::SearchConfig;

/// Cheap token estimate (chars/4) — the same heuristic the teacher's
/// `RetrievalTuning::avg_chars_per_token` used for query-time budgeting, kept
/// distinct from the real tokenizer `indexing-pipeline` uses at ingest time
/// since a search-time estimate has no model-specific vocabulary to load.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() / 4).max(1)
}

/// Greedily pack `lines` into a section, stopping before the next line's
/// estimated cost would push the running total past `budget_tokens`.
pub fn pack_budget(lines: &[String], budget_tokens: usize) -> Vec<String> {
    let mut packed = Vec::new();
    let mut used = 0usize;
    for line in lines {
        let cost = estimate_tokens(line);
        if used + cost > budget_tokens && !packed.is_empty() {
            break;
        }
        packed.push(line.clone());
        used += cost;
    }
    packed
}

/// Per-section token budgets derived from `max_tokens`, `text_unit_prop`,
/// and `community_prop` (spec §4.14); the remainder splits evenly between
/// entities and relationships.
pub struct SectionBudgets {
    pub entities: usize,
    pub relationships: usize,
    pub text_units: usize,
    pub communities: usize,
}

pub fn section_budgets(config: &SearchConfig) -> SectionBudgets {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let text_units = (config.max_tokens as f32 * config.text_unit_prop) as usize;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let communities = (config.max_tokens as f32 * config.community_prop) as usize;
    let remaining = config.max_tokens.saturating_sub(text_units).saturating_sub(communities);
    SectionBudgets { text_units, communities, entities: remaining / 2, relationships: remaining - remaining / 2 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_budget_always_keeps_at_least_one_line() {
        let lines = vec!["x".repeat(1000)];
        assert_eq!(pack_budget(&lines, 1).len(), 1);
    }

    #[test]
    fn pack_budget_stops_once_over_budget() {
        let lines = vec!["short".to_string(), "short".to_string(), "short".to_string()];
        let packed = pack_budget(&lines, 1);
        assert_eq!(packed.len(), 1);
    }

    #[test]
    fn section_budgets_sum_to_max_tokens() {
        let config = SearchConfig { max_tokens: 1000, text_unit_prop: 0.5, community_prop: 0.25, ..SearchConfig::default() };
        let budgets = section_budgets(&config);
        assert_eq!(budgets.entities + budgets.relationships + budgets.text_units + budgets.communities, 1000);
    }
}
