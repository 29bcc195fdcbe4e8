//! Ranker: a fixed six-stage pipeline (blocklist, resolution whitelist,
//! size cap, sort, per-resolution cap, dedupe) applied to a release list
//! before triage and response assembly.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

use crate::config::{RankerConfig, SortMode};
use crate::models::{normalize_title, Release};

lazy_static! {
    static ref BLOCKLIST_RE: Regex = Regex::new(r"(?i)\b(iso|img|bin|cue|exe)\b").unwrap();
}

const DEDUPE_WINDOW_DAYS: f64 = 14.0;

pub fn rank(releases: Vec<Release>, config: &RankerConfig, paid_indexer_ids: &[String]) -> Vec<Release> {
    let releases = apply_blocklist(releases);
    let releases = apply_resolution_whitelist(releases, config);
    let releases = apply_size_cap(releases, config);
    let releases = sort(releases, config);
    let releases = apply_resolution_cap(releases, config);
    apply_dedupe(releases, paid_indexer_ids)
}

fn apply_blocklist(releases: Vec<Release>) -> Vec<Release> {
    releases.into_iter().filter(|r| !BLOCKLIST_RE.is_match(&r.raw_title)).collect()
}

fn apply_resolution_whitelist(releases: Vec<Release>, config: &RankerConfig) -> Vec<Release> {
    if config.allowed_resolutions.is_empty() {
        return releases;
    }
    releases
        .into_iter()
        .filter(|r| config.allowed_resolutions.iter().any(|a| a == &r.resolution))
        .collect()
}

fn apply_size_cap(releases: Vec<Release>, config: &RankerConfig) -> Vec<Release> {
    let max_bytes = (config.max_result_size_gb * 1024.0 * 1024.0 * 1024.0) as u64;
    releases.into_iter().filter(|r| r.size_bytes <= max_bytes).collect()
}

fn preferred_language_bucket(release: &Release, preferred: &[String]) -> usize {
    for (idx, lang) in preferred.iter().enumerate() {
        if release.languages.iter().any(|l| l == lang) {
            return idx;
        }
    }
    preferred.len()
}

/// Total order: ties broken by insertion index (stable sort) then
/// bytes-desc, per spec §5's determinism guarantee.
fn sort(mut releases: Vec<Release>, config: &RankerConfig) -> Vec<Release> {
    match config.sort_mode {
        SortMode::QualityThenSize => {
            releases.sort_by(|a, b| {
                b.quality_score
                    .cmp(&a.quality_score)
                    .then(b.size_bytes.cmp(&a.size_bytes))
            });
        }
        SortMode::LanguageQualitySize => {
            releases.sort_by(|a, b| {
                let bucket_a = preferred_language_bucket(a, &config.preferred_language);
                let bucket_b = preferred_language_bucket(b, &config.preferred_language);
                bucket_a
                    .cmp(&bucket_b)
                    .then(b.quality_score.cmp(&a.quality_score))
                    .then(b.size_bytes.cmp(&a.size_bytes))
            });
        }
    }
    releases
}

fn apply_resolution_cap(releases: Vec<Release>, config: &RankerConfig) -> Vec<Release> {
    let Some(limit) = config.resolution_limit_per_quality else {
        return releases;
    };
    let mut counts: HashMap<String, u32> = HashMap::new();
    releases
        .into_iter()
        .filter(|r| {
            let count = counts.entry(r.resolution.clone()).or_insert(0);
            *count += 1;
            *count <= limit
        })
        .collect()
}

/// Group by normalized title, subgroup by 14-day publish window, keep at
/// most one per subgroup — preferring a paid indexer, then most recent.
fn apply_dedupe(releases: Vec<Release>, paid_indexer_ids: &[String]) -> Vec<Release> {
    let mut groups: HashMap<String, Vec<Release>> = HashMap::new();
    let mut group_order: Vec<String> = Vec::new();

    for release in releases {
        let key = normalize_title(&release.raw_title);
        if !groups.contains_key(&key) {
            group_order.push(key.clone());
        }
        groups.entry(key).or_default().push(release);
    }

    let mut result = Vec::new();
    for key in group_order {
        let members = groups.remove(&key).unwrap_or_default();
        result.extend(dedupe_within_title_group(members, paid_indexer_ids));
    }
    result
}

fn dedupe_within_title_group(members: Vec<Release>, paid_indexer_ids: &[String]) -> Vec<Release> {
    let mut subgroups: Vec<Vec<Release>> = Vec::new();

    'outer: for release in members {
        for subgroup in subgroups.iter_mut() {
            let anchor_instant = subgroup[0].publish_instant_ms;
            let delta_days = (release.publish_instant_ms - anchor_instant).unsigned_abs() as f64 / 86_400_000.0;
            if delta_days <= DEDUPE_WINDOW_DAYS {
                subgroup.push(release);
                continue 'outer;
            }
        }
        subgroups.push(vec![release]);
    }

    subgroups
        .into_iter()
        .map(|subgroup| pick_best_in_subgroup(subgroup, paid_indexer_ids))
        .collect()
}

fn pick_best_in_subgroup(subgroup: Vec<Release>, paid_indexer_ids: &[String]) -> Release {
    subgroup
        .into_iter()
        .max_by(|a, b| {
            let a_paid = a.is_paid(paid_indexer_ids);
            let b_paid = b.is_paid(paid_indexer_ids);
            a_paid
                .cmp(&b_paid)
                .then(a.publish_instant_ms.cmp(&b.publish_instant_ms))
        })
        .expect("subgroup is never empty")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;

    fn release(title: &str, resolution: &str, size_bytes: u64, publish_instant_ms: i64, indexer_id: &str) -> Release {
        Release {
            raw_title: title.to_string(),
            download_url: "https://example/nzb".to_string(),
            indexer_name: indexer_id.to_string(),
            indexer_id: indexer_id.to_string(),
            size_bytes,
            publish_instant_ms,
            age_days: 0.0,
            resolution: resolution.to_string(),
            languages: vec![],
            quality_score: crate::services::release_parser::quality_score(resolution),
            source_type: SourceType::Direct,
            payload_token: None,
        }
    }

    #[test]
    fn blocklist_drops_disc_image_titles() {
        let releases = vec![
            release("Movie.2024.1080p.ISO", "1080p", 1, 0, "a"),
            release("Movie.2024.1080p.MKV", "1080p", 1, 0, "a"),
        ];
        let result = apply_blocklist(releases);
        assert_eq!(result.len(), 1);
        assert!(result[0].raw_title.contains("MKV"));
    }

    #[test]
    fn sort_quality_then_size_orders_descending() {
        let config = RankerConfig::default();
        let releases = vec![
            release("A", "720p", 100, 0, "a"),
            release("B", "2160p", 50, 0, "a"),
            release("C", "2160p", 200, 0, "a"),
        ];
        let sorted = sort(releases, &config);
        assert_eq!(sorted[0].raw_title, "C");
        assert_eq!(sorted[1].raw_title, "B");
        assert_eq!(sorted[2].raw_title, "A");
    }

    #[test]
    fn dedupe_prefers_paid_indexer_within_window() {
        let releases = vec![
            release("The Movie 2024", "1080p", 100, 0, "free"),
            release("The.Movie.2024", "1080p", 100, 3 * 86_400_000, "paid"),
        ];
        let result = apply_dedupe(releases, &["paid".to_string()]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].indexer_id, "paid");
    }

    #[test]
    fn dedupe_keeps_separate_subgroups_outside_window() {
        let releases = vec![
            release("The Movie 2024", "1080p", 100, 0, "a"),
            release("The.Movie.2024", "1080p", 100, 30 * 86_400_000, "b"),
        ];
        let result = apply_dedupe(releases, &[]);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn resolution_cap_limits_per_bucket() {
        let mut config = RankerConfig::default();
        config.resolution_limit_per_quality = Some(1);
        let releases = vec![
            release("A", "1080p", 100, 0, "a"),
            release("B", "1080p", 90, 0, "a"),
            release("C", "720p", 100, 0, "a"),
        ];
        let result = apply_resolution_cap(releases, &config);
        assert_eq!(result.len(), 2);
    }
}
