//! Search Planner: turns a request identifier plus resolved metadata into
//! an ordered, deduplicated set of [`SearchPlan`]s for the indexer fan-out.

use crate::models::{normalize_title, PlanTokens, PlanType, SearchPlan};
use crate::services::metadata::ResolvedMetadata;

#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub plan_type: PlanType,
    pub imdb_id: Option<String>,
    pub tvdb_id: Option<String>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

/// Plans 1-2: id-based, need no title — dispatched before metadata resolves.
pub fn id_based_plans(req: &PlanRequest) -> Vec<SearchPlan> {
    let mut plans = Vec::new();
    let mut emitted_tvdb = false;

    if req.plan_type == PlanType::Series {
        if let Some(ref tvdb_id) = req.tvdb_id {
            plans.push(SearchPlan {
                plan_type: PlanType::Series,
                query: format!("tvdb:{}", tvdb_id),
                tokens: PlanTokens {
                    tvdb_id: Some(tvdb_id.clone()),
                    season: req.season,
                    episode: req.episode,
                    ..Default::default()
                },
                strict_phrase: None,
                ascii_fallback_title: None,
            });
            emitted_tvdb = true;
        }
    }

    if !emitted_tvdb {
        if let Some(ref imdb_id) = req.imdb_id {
            plans.push(SearchPlan {
                plan_type: req.plan_type,
                query: format!("imdb:{}", imdb_id),
                tokens: PlanTokens {
                    imdb_id: Some(imdb_id.clone()),
                    season: req.season,
                    episode: req.episode,
                    ..Default::default()
                },
                strict_phrase: None,
                ascii_fallback_title: None,
            });
        }
    }

    dedupe_by_identity(plans)
}

/// Only ASCII-safe titles become Newznab text-search queries — non-ASCII
/// titles trigger false matches in its fuzzy search.
fn is_ascii_safe(title: &str) -> bool {
    title.is_ascii() && !title.trim().is_empty()
}

fn season_episode_suffix(season: Option<u32>, episode: Option<u32>) -> Option<String> {
    match (season, episode) {
        (Some(s), Some(e)) => Some(format!("S{:02}E{:02}", s, e)),
        _ => None,
    }
}

fn text_plan(plan_type: PlanType, title: &str, year: Option<i32>, season: Option<u32>, episode: Option<u32>) -> SearchPlan {
    let suffix = season_episode_suffix(season, episode).or_else(|| year.map(|y| y.to_string()));
    let query = match suffix {
        Some(s) => format!("{} {}", title, s),
        None => title.to_string(),
    };
    SearchPlan {
        plan_type,
        query,
        tokens: PlanTokens {
            season,
            episode,
            ..Default::default()
        },
        strict_phrase: Some(normalize_title(title)),
        ascii_fallback_title: None,
    }
}

/// Plans 3+: primary title plus one per ASCII-safe localized title,
/// dispatched once metadata resolution completes.
pub fn text_plans(req: &PlanRequest, metadata: &ResolvedMetadata) -> Vec<SearchPlan> {
    let mut plans = Vec::new();

    if is_ascii_safe(&metadata.primary_title) {
        plans.push(text_plan(req.plan_type, &metadata.primary_title, metadata.year, req.season, req.episode));
    }

    for localized in &metadata.localized_titles {
        if localized != &metadata.primary_title && is_ascii_safe(localized) {
            plans.push(text_plan(req.plan_type, localized, metadata.year, req.season, req.episode));
        }
    }

    dedupe_by_identity(plans)
}

/// Re-dispatch with the original (possibly non-primary) title when every
/// plan so far produced zero results — only if it's ASCII-safe.
pub fn fallback_plan(req: &PlanRequest, metadata: &ResolvedMetadata) -> Option<SearchPlan> {
    let original = metadata.original_title.as_ref()?;
    if original == &metadata.primary_title || !is_ascii_safe(original) {
        return None;
    }
    Some(text_plan(req.plan_type, original, metadata.year, req.season, req.episode))
}

/// Contiguous-token-subsequence match against the phrase normalization,
/// used to confirm a candidate title actually matches the dispatched plan.
pub fn matches_strict_phrase(strict_phrase: &str, candidate_title: &str) -> bool {
    let phrase_tokens: Vec<&str> = strict_phrase.split_whitespace().collect();
    if phrase_tokens.is_empty() {
        return true;
    }
    let normalized_candidate = normalize_title(candidate_title);
    let candidate_tokens: Vec<&str> = normalized_candidate.split_whitespace().collect();
    candidate_tokens
        .windows(phrase_tokens.len())
        .any(|window| window == phrase_tokens.as_slice())
}

fn dedupe_by_identity(plans: Vec<SearchPlan>) -> Vec<SearchPlan> {
    let mut seen = std::collections::HashSet::new();
    plans
        .into_iter()
        .filter(|p| seen.insert(p.identity()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series_req() -> PlanRequest {
        PlanRequest {
            plan_type: PlanType::Series,
            imdb_id: Some("tt1234567".into()),
            tvdb_id: Some("98765".into()),
            season: Some(1),
            episode: Some(3),
        }
    }

    #[test]
    fn tvdb_plan_wins_over_imdb_for_series() {
        let plans = id_based_plans(&series_req());
        assert_eq!(plans.len(), 1);
        assert!(plans[0].tokens.tvdb_id.is_some());
        assert!(plans[0].tokens.imdb_id.is_none());
    }

    #[test]
    fn imdb_plan_emitted_for_movies() {
        let req = PlanRequest {
            plan_type: PlanType::Movie,
            imdb_id: Some("tt0111161".into()),
            tvdb_id: None,
            season: None,
            episode: None,
        };
        let plans = id_based_plans(&req);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].tokens.imdb_id.as_deref(), Some("tt0111161"));
    }

    #[test]
    fn text_plans_drop_non_ascii_localized_titles() {
        let metadata = ResolvedMetadata {
            primary_title: "The Matrix".into(),
            original_title: None,
            localized_titles: vec!["La Matrice".into(), "マトリックス".into()],
            year: Some(1999),
        };
        let req = PlanRequest {
            plan_type: PlanType::Movie,
            imdb_id: None,
            tvdb_id: None,
            season: None,
            episode: None,
        };
        let plans = text_plans(&req, &metadata);
        assert_eq!(plans.len(), 2);
        assert!(plans.iter().all(|p| p.query.is_ascii()));
    }

    #[test]
    fn fallback_plan_skipped_when_same_as_primary() {
        let metadata = ResolvedMetadata {
            primary_title: "The Matrix".into(),
            original_title: Some("The Matrix".into()),
            localized_titles: vec![],
            year: Some(1999),
        };
        let req = PlanRequest {
            plan_type: PlanType::Movie,
            imdb_id: None,
            tvdb_id: None,
            season: None,
            episode: None,
        };
        assert!(fallback_plan(&req, &metadata).is_none());
    }

    #[test]
    fn strict_phrase_requires_contiguous_subsequence() {
        assert!(matches_strict_phrase("the matrix", "The.Matrix.1999.1080p.mkv"));
        assert!(!matches_strict_phrase("the matrix", "Matrix.Reloaded.1999.mkv"));
    }
}
