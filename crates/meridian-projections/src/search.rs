//! # Search
//!
//! Token-frequency search over task fields, weighted by field and ranked by
//! overall score (`spec.md` §4.6, `cross_repo_search.py`).

use meridian_shared::types::{Task, TaskPriority, TaskStatus};
use meridian_shared::MeridianError;
use meridian_store::{TaskFilterSpec, TaskStore};
use sqlx::PgPool;

const CANDIDATE_LIMIT: i64 = 10_000;
const SNIPPET_MAX_LEN: usize = 100;
const SNIPPET_LEAD: usize = 30;
const MIN_TERM_LEN: usize = 2;

fn field_weight(field: &str) -> f64 {
    match field {
        "title" => 3.0,
        "tags" => 2.0,
        "description" => 1.0,
        _ => 1.0,
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    pub query: String,
    pub repo_names: Vec<String>,
    pub statuses: Vec<TaskStatus>,
    pub priorities: Vec<TaskPriority>,
    pub tags: Vec<String>,
    pub search_fields: Vec<String>,
    pub limit: usize,
    pub min_score: f64,
}

#[derive(Debug, Clone)]
pub struct FieldMatch {
    pub field: String,
    pub snippet: String,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub task: Task,
    pub matches: Vec<FieldMatch>,
    pub overall_score: f64,
}

pub struct Search;

impl Search {
    pub async fn search(pool: &PgPool, criteria: &SearchCriteria) -> Result<Vec<SearchResult>, MeridianError> {
        let mut task_filter = TaskFilterSpec {
            limit: CANDIDATE_LIMIT,
            ..Default::default()
        };
        if criteria.statuses.len() == 1 {
            task_filter.status = Some(criteria.statuses[0]);
        }
        if criteria.priorities.len() == 1 {
            task_filter.priority = Some(criteria.priorities[0]);
        }
        if criteria.tags.len() == 1 {
            task_filter.tags = criteria.tags.clone();
        }
        let candidates = TaskStore::list(pool, &task_filter).await?;

        let mut results = text_search(candidates, criteria);
        results.retain(|r| {
            (criteria.repo_names.is_empty() || criteria.repo_names.contains(&r.task.repository))
                && (criteria.statuses.is_empty() || criteria.statuses.contains(&r.task.status))
                && (criteria.priorities.is_empty() || criteria.priorities.contains(&r.task.priority))
                && (criteria.tags.is_empty()
                    || criteria.tags.iter().any(|t| r.task.tags.contains(t)))
        });

        results.sort_by(|a, b| {
            b.overall_score
                .partial_cmp(&a.overall_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if criteria.min_score > 0.0 {
            results.retain(|r| r.overall_score >= criteria.min_score);
        }

        let limit = if criteria.limit == 0 { 50 } else { criteria.limit };
        results.truncate(limit);
        Ok(results)
    }
}

fn parse_query(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= MIN_TERM_LEN)
        .map(|t| t.to_lowercase())
        .collect()
}

fn field_value(task: &Task, field: &str) -> String {
    match field {
        "title" => task.title.clone(),
        "description" => task.description.clone().unwrap_or_default(),
        "tags" => task.tags.iter().cloned().collect::<Vec<_>>().join(" "),
        _ => String::new(),
    }
}

fn text_search(tasks: Vec<Task>, criteria: &SearchCriteria) -> Vec<SearchResult> {
    if criteria.query.is_empty() {
        return tasks
            .into_iter()
            .map(|task| SearchResult {
                task,
                matches: vec![],
                overall_score: 0.5,
            })
            .collect();
    }

    let terms = parse_query(&criteria.query);
    let default_fields = ["title".to_string(), "description".to_string(), "tags".to_string()];
    let search_fields: &[String] = if criteria.search_fields.is_empty() {
        &default_fields
    } else {
        &criteria.search_fields
    };

    let mut results = Vec::new();
    for task in tasks {
        let mut matches = Vec::new();
        for field in search_fields {
            let value = field_value(&task, field);
            if value.is_empty() {
                continue;
            }
            if let Some(m) = find_match(field, &value, &terms) {
                matches.push(m);
            }
        }
        if !matches.is_empty() {
            let overall_score = weighted_score(&matches);
            results.push(SearchResult {
                task,
                matches,
                overall_score,
            });
        }
    }
    results
}

fn find_match(field: &str, value: &str, terms: &[String]) -> Option<FieldMatch> {
    let value_lower = value.to_lowercase();
    let mut positions = Vec::new();
    let mut matched_terms = std::collections::HashSet::new();

    for term in terms {
        let mut search_from = 0;
        while let Some(idx) = value_lower[search_from..].find(term.as_str()) {
            let start = search_from + idx;
            positions.push((start, start + term.len()));
            matched_terms.insert(term.clone());
            search_from = start + term.len();
        }
    }

    if positions.is_empty() {
        return None;
    }

    let snippet = create_snippet(value, &positions);
    let coverage = matched_terms.len() as f64 / terms.len() as f64;
    let word_count = value.split_whitespace().count().max(1);
    let density = positions.len() as f64 / word_count as f64;
    let score = (coverage * 0.7 + density * 0.3).min(1.0);

    Some(FieldMatch {
        field: field.to_string(),
        snippet,
        score,
    })
}

/// Window of up to `SNIPPET_MAX_LEN` chars centred on the first match,
/// ellipsised at either end when truncated, with every matched span wrapped
/// in `**...**` so a UI can render the highlight.
fn create_snippet(value: &str, positions: &[(usize, usize)]) -> String {
    if positions.is_empty() {
        return value.chars().take(SNIPPET_MAX_LEN).collect();
    }
    let chars: Vec<char> = value.chars().collect();
    let first_match = positions.iter().map(|p| p.0).min().unwrap_or(0);
    let start = first_match.saturating_sub(SNIPPET_LEAD);
    let end = (start + SNIPPET_MAX_LEN).min(chars.len());
    let window = &chars[start..end];

    let mut spans: Vec<(usize, usize)> = positions
        .iter()
        .filter_map(|&(s, e)| {
            let s = s.max(start);
            let e = e.min(end);
            (s < e).then(|| (s - start, e - start))
        })
        .collect();
    spans.sort_unstable();
    let mut merged: Vec<(usize, usize)> = Vec::new();
    for (s, e) in spans {
        match merged.last_mut() {
            Some(last) if s <= last.1 => last.1 = last.1.max(e),
            _ => merged.push((s, e)),
        }
    }

    let mut snippet = String::new();
    let mut cursor = 0;
    for (s, e) in merged {
        snippet.extend(&window[cursor..s]);
        snippet.push_str("**");
        snippet.extend(&window[s..e]);
        snippet.push_str("**");
        cursor = e;
    }
    snippet.extend(&window[cursor..]);

    if end < chars.len() {
        snippet.push_str("...");
    }
    if start > 0 {
        snippet = format!("...{snippet}");
    }
    snippet
}

fn weighted_score(matches: &[FieldMatch]) -> f64 {
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    for m in matches {
        let weight = field_weight(&m.field);
        weighted_sum += m.score * weight;
        total_weight += weight;
    }
    if total_weight > 0.0 {
        weighted_sum / total_weight
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn task(title: &str, description: Option<&str>) -> Task {
        Task {
            id: uuid::Uuid::now_v7(),
            title: title.to_string(),
            repository: "repo".to_string(),
            description: description.map(str::to_string),
            status: TaskStatus::Pending,
            priority: TaskPriority::Medium,
            assignee: None,
            tags: Default::default(),
            metadata: Default::default(),
            due_date: None,
            external_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
            created_by: "tester".to_string(),
        }
    }

    #[test]
    fn parse_query_drops_single_char_tokens() {
        let terms = parse_query("fix a bug");
        assert_eq!(terms, vec!["fix".to_string(), "bug".to_string()]);
    }

    #[test]
    fn find_match_scores_full_coverage_higher_than_partial() {
        let terms = vec!["auth".to_string(), "bug".to_string()];
        let full = find_match("title", "auth bug fix", &terms).unwrap();
        let partial = find_match("title", "auth fix", &terms).unwrap();
        assert!(full.score > partial.score);
    }

    #[test]
    fn text_search_with_empty_query_returns_neutral_score() {
        let tasks = vec![task("anything", None)];
        let criteria = SearchCriteria::default();
        let results = text_search(tasks, &criteria);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].overall_score, 0.5);
    }

    #[test]
    fn title_matches_outweigh_description_matches() {
        let matches_title_only = vec![FieldMatch {
            field: "title".to_string(),
            snippet: String::new(),
            score: 1.0,
        }];
        let matches_desc_only = vec![FieldMatch {
            field: "description".to_string(),
            snippet: String::new(),
            score: 1.0,
        }];
        assert_eq!(weighted_score(&matches_title_only), weighted_score(&matches_desc_only));
        // both scored 1.0 so weighted average is identical; weight only
        // matters when matches have differing per-field scores.
        let mixed = vec![
            FieldMatch { field: "title".to_string(), snippet: String::new(), score: 1.0 },
            FieldMatch { field: "description".to_string(), snippet: String::new(), score: 0.0 },
        ];
        // weighted: (1.0*3.0 + 0.0*1.0) / 4.0 = 0.75
        assert!((weighted_score(&mixed) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn snippet_is_truncated_with_ellipsis() {
        let value = "x".repeat(200);
        let snippet = create_snippet(&value, &[(150, 151)]);
        assert!(snippet.starts_with("..."));
        assert!(snippet.ends_with("..."));
    }
}
