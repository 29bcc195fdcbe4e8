//! Triage Runner: downloads candidate NZBs, samples their segments against
//! the NNTP pool, and sniffs the leading archive to decide whether a
//! release is actually playable before it's offered to a client.
//!
//! Worker fan-out and per-indexer serialization mirror the aggregator's
//! retry/backoff shape; the Archive Sniffer and NZB parser do the payload
//! inspection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use reqwest::Client;
use tokio::sync::{Mutex, Semaphore};

use crate::models::{normalize_title, NzbFile, Release, TriageDecision, TriageStatus};
use crate::services::nntp::{NntpPool, PoolError};
use crate::services::nzb::archive_sniffer::{sniff, SniffStatus};
use crate::services::nzb::{parse_nzb, NzbParseError};

const NZB_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const ARCHIVE_EXTENSIONS: &[&str] = &["rar", "7z", "zip"];

pub struct TriageConfig {
    pub time_budget: Duration,
    pub max_candidates: usize,
    pub download_concurrency: usize,
    pub stat_sample_count: usize,
    pub serialized_indexer_ids: HashSet<String>,
}

pub struct TriageSummary {
    pub elapsed_ms: u64,
    pub timed_out: bool,
    pub status_counts: HashMap<String, usize>,
}

pub struct TriageReport {
    pub decisions: HashMap<String, TriageDecision>,
    /// Raw NZB bytes for every `verified` candidate, so the orchestrator
    /// can seed the Verified-NZB cache without downloading twice.
    pub verified_bodies: HashMap<String, Arc<String>>,
    pub summary: TriageSummary,
}

pub struct TriageRunner {
    client: Client,
    pool: Arc<NntpPool>,
}

impl TriageRunner {
    pub fn new(client: Client, pool: Arc<NntpPool>) -> Self {
        Self { client, pool }
    }

    /// Runs the full triage pipeline over `candidates`, capped at
    /// `config.max_candidates` after normalized-title dedupe.
    pub async fn run(&self, candidates: Vec<Release>, config: TriageConfig) -> TriageReport {
        let start = Instant::now();
        let deduped = dedupe_by_normalized_title(candidates, config.max_candidates);

        let semaphore = Arc::new(Semaphore::new(config.download_concurrency.max(1)));
        let indexer_chains: HashMap<String, Arc<Mutex<()>>> = config
            .serialized_indexer_ids
            .iter()
            .map(|id| (id.clone(), Arc::new(Mutex::new(()))))
            .collect();

        let decisions: Arc<Mutex<HashMap<String, TriageDecision>>> = Arc::new(Mutex::new(HashMap::new()));
        let verified_bodies: Arc<Mutex<HashMap<String, Arc<String>>>> = Arc::new(Mutex::new(HashMap::new()));
        let timed_out = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let mut handles = Vec::with_capacity(deduped.len());
        for release in deduped {
            let semaphore = Arc::clone(&semaphore);
            let chain = indexer_chains.get(&release.indexer_id).cloned();
            let decisions = Arc::clone(&decisions);
            let verified_bodies = Arc::clone(&verified_bodies);
            let timed_out = Arc::clone(&timed_out);
            let client = self.client.clone();
            let pool = Arc::clone(&self.pool);
            let time_budget = config.time_budget;
            let stat_sample_count = config.stat_sample_count;

            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(p) => p,
                    Err(_) => return,
                };

                if start.elapsed() >= time_budget {
                    timed_out.store(true, std::sync::atomic::Ordering::SeqCst);
                    let mut decisions = decisions.lock().await;
                    decisions.insert(release.download_url.clone(), pending_decision(&release));
                    return;
                }

                let _chain_guard = match chain {
                    Some(ref lock) => Some(lock.lock().await),
                    None => None,
                };

                let remaining = time_budget.saturating_sub(start.elapsed());
                let (decision, body) = triage_one(&client, &pool, &release, remaining, stat_sample_count).await;

                if decision.status == TriageStatus::Verified {
                    if let Some(body) = body {
                        verified_bodies.lock().await.insert(release.download_url.clone(), body);
                    }
                }
                let mut decisions = decisions.lock().await;
                decisions.insert(release.download_url.clone(), decision);
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        let decisions = Arc::try_unwrap(decisions).map(Mutex::into_inner).unwrap_or_default();
        let verified_bodies = Arc::try_unwrap(verified_bodies).map(Mutex::into_inner).unwrap_or_default();
        let mut status_counts: HashMap<String, usize> = HashMap::new();
        for decision in decisions.values() {
            *status_counts.entry(format!("{:?}", decision.status)).or_insert(0) += 1;
        }

        TriageReport {
            decisions,
            verified_bodies,
            summary: TriageSummary {
                elapsed_ms: start.elapsed().as_millis() as u64,
                timed_out: timed_out.load(std::sync::atomic::Ordering::SeqCst),
                status_counts,
            },
        }
    }
}

fn pending_decision(release: &Release) -> TriageDecision {
    TriageDecision {
        download_url: release.download_url.clone(),
        status: TriageStatus::Pending,
        blockers: Vec::new(),
        warnings: Vec::new(),
        archive_findings: Vec::new(),
        file_count: 0,
        source_title: release.raw_title.clone(),
        normalized_title: normalize_title(&release.raw_title),
        indexer_id: release.indexer_id.clone(),
        indexer_name: release.indexer_name.clone(),
        publish_instant_ms: release.publish_instant_ms,
        age_days: release.age_days,
    }
}

/// At most `cap` candidates survive, one per normalized title, earliest
/// occurrence wins (insertion order is preserved by the caller's ranking).
fn dedupe_by_normalized_title(candidates: Vec<Release>, cap: usize) -> Vec<Release> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for release in candidates {
        let key = normalize_title(&release.raw_title);
        if seen.insert(key) {
            out.push(release);
            if out.len() >= cap {
                break;
            }
        }
    }
    out
}

async fn triage_one(
    client: &Client,
    pool: &NntpPool,
    release: &Release,
    budget: Duration,
    stat_sample_count: usize,
) -> (TriageDecision, Option<Arc<String>>) {
    let mut base = pending_decision(release);

    let body = match tokio::time::timeout(NZB_FETCH_TIMEOUT.min(budget.max(Duration::from_millis(1))), client.get(&release.download_url).send()).await {
        Ok(Ok(resp)) if resp.status().is_success() => match resp.text().await {
            Ok(text) => text,
            Err(e) => {
                base.status = TriageStatus::FetchError;
                base.blockers.push(format!("nzb-fetch-error: {e}"));
                return (base, None);
            }
        },
        Ok(Ok(resp)) => {
            base.status = TriageStatus::FetchError;
            base.blockers.push(format!("nzb-fetch-status: {}", resp.status()));
            return (base, None);
        }
        Ok(Err(e)) => {
            base.status = TriageStatus::FetchError;
            base.blockers.push(format!("nzb-fetch-error: {e}"));
            return (base, None);
        }
        Err(_) => {
            base.status = TriageStatus::FetchError;
            base.blockers.push("nzb-fetch-timeout".to_string());
            return (base, None);
        }
    };

    let tree = match parse_nzb(&body) {
        Ok(tree) => tree,
        Err(NzbParseError::Empty) => {
            base.status = TriageStatus::Skipped;
            return (base, None);
        }
        Err(e) => {
            base.status = TriageStatus::Error;
            base.blockers.push(format!("nzb-parse-error: {e}"));
            return (base, None);
        }
    };
    base.file_count = tree.files.len();

    let decision = analyze(pool, &tree, stat_sample_count, base).await;
    let body = Arc::new(body);
    (decision, Some(body))
}

/// Mirrors the Triage Analyzer algorithm: archive-candidate selection,
/// segment sampling, archive sniffing, and decision synthesis.
async fn analyze(
    pool: &NntpPool,
    tree: &crate::models::NzbTree,
    stat_sample_count: usize,
    mut decision: TriageDecision,
) -> TriageDecision {
    let archive_candidates = collect_archive_candidates(&tree.files);

    if archive_candidates.is_empty() {
        decision.warnings.push("no-archive-candidates".to_string());
        let sample = sample_segments(&tree.files, stat_sample_count);
        let mut any_missing = false;
        for message_id in &sample {
            match pool.stat(message_id).await {
                Ok(true) => {}
                Ok(false) => any_missing = true,
                Err(PoolError::MissingArticle) => any_missing = true,
                Err(_) => {}
            }
        }
        if any_missing {
            decision.blockers.push("missing-articles".to_string());
            decision.status = TriageStatus::Blocked;
        } else {
            decision.archive_findings.push("segment-ok".to_string());
            decision.status = TriageStatus::Verified;
        }
        return decision;
    }

    let best = archive_candidates
        .iter()
        .max_by_key(|c| c.score)
        .expect("non-empty archive_candidates");

    let first_segment = best.file.segments.first().map(|s| s.message_id.clone());
    let mut saw_positive = false;
    let mut saw_sevenzip_only = false;

    if let Some(message_id) = first_segment {
        match pool.stat(&message_id).await {
            Ok(true) => match pool.body(&message_id, 16 * 1024 * 1024).await {
                Ok(decoded) => {
                    let status = sniff(&decoded, best.extension == "7z");
                    decision.archive_findings.push(status.token().to_string());
                    if status.is_blocker() {
                        decision.blockers.push(status.token().to_string());
                    } else if status == SniffStatus::SevenzipUntested {
                        saw_sevenzip_only = true;
                    } else if status.is_success() {
                        saw_positive = true;
                        if matches!(status, SniffStatus::SevenzipStored) {
                            saw_sevenzip_only = true;
                        }
                    }
                }
                Err(PoolError::MissingArticle) => decision.blockers.push("missing-articles".to_string()),
                Err(e) => decision.blockers.push(format!("body-fetch-error: {e}")),
            },
            Ok(false) | Err(PoolError::MissingArticle) => decision.blockers.push("missing-articles".to_string()),
            Err(e) => decision.blockers.push(format!("stat-error: {e}")),
        }
    } else if best.extension == "7z" {
        decision.archive_findings.push(SniffStatus::SevenzipUntested.token().to_string());
        saw_sevenzip_only = true;
    }

    let others: Vec<&ArchiveCandidate> = archive_candidates.iter().filter(|c| !std::ptr::eq(*c, best)).collect();
    let other_files: Vec<&NzbFile> = others.iter().map(|c| c.file).collect();
    let extra_sample = sample_segments(&other_files, stat_sample_count);
    for message_id in &extra_sample {
        match pool.stat(message_id).await {
            Ok(false) | Err(PoolError::MissingArticle) => {
                decision.blockers.push("missing-articles".to_string());
            }
            _ => {}
        }
    }

    if !decision.blockers.is_empty() {
        decision.status = TriageStatus::Blocked;
    } else if saw_positive {
        decision.status = TriageStatus::Verified;
    } else if saw_sevenzip_only {
        decision.status = TriageStatus::Unverified7z;
    } else {
        decision.status = TriageStatus::Unverified;
    }

    decision
}

struct ArchiveCandidate<'a> {
    file: &'a NzbFile,
    extension: String,
    score: i32,
}

/// Collapses `name.part01.rar`/`name.r00`/... to a single canonical base
/// name and scores by filename heuristics: `.rar` beats `.r00` beats a
/// bare `part-rar` token; `proof|sample|nfo` is penalized.
fn collect_archive_candidates(files: &[NzbFile]) -> Vec<ArchiveCandidate<'_>> {
    let mut by_canonical: HashMap<String, ArchiveCandidate> = HashMap::new();

    for file in files {
        let Some(extension) = file.extension.as_deref() else { continue };
        let is_archive = ARCHIVE_EXTENSIONS.contains(&extension) || extension.starts_with('r') && extension[1..].chars().all(|c| c.is_ascii_digit());
        if !is_archive {
            continue;
        }

        let filename = file.filename.clone().unwrap_or_else(|| file.subject.clone());
        let canonical = canonical_base_name(&filename);
        let score = score_archive_name(&filename, extension);

        by_canonical
            .entry(canonical)
            .and_modify(|existing| {
                if score > existing.score {
                    existing.file = file;
                    existing.extension = extension.to_string();
                    existing.score = score;
                }
            })
            .or_insert(ArchiveCandidate { file, extension: extension.to_string(), score });
    }

    by_canonical.into_values().collect()
}

lazy_static::lazy_static! {
    static ref PART_VOLUME_RE: regex::Regex = regex::Regex::new(r"\.part\d+\.rar$").unwrap();
    static ref RXX_VOLUME_RE: regex::Regex = regex::Regex::new(r"\.r\d{2,3}$").unwrap();
}

/// `name.part01.rar` and `name.r00` both collapse to `name.rar`.
fn canonical_base_name(filename: &str) -> String {
    let lower = filename.to_lowercase();
    if let Some(m) = PART_VOLUME_RE.find(&lower) {
        format!("{}.rar", &lower[..m.start()])
    } else if let Some(m) = RXX_VOLUME_RE.find(&lower) {
        format!("{}.rar", &lower[..m.start()])
    } else {
        lower
    }
}

fn score_archive_name(filename: &str, extension: &str) -> i32 {
    let lower = filename.to_lowercase();
    let mut score = match extension {
        "rar" => 100,
        "7z" => 90,
        "zip" => 80,
        _ if extension.starts_with("r0") => 60,
        _ => 10,
    };
    if lower.contains("proof") || lower.contains("sample") || lower.contains("nfo") {
        score -= 50;
    }
    score
}

fn sample_segments(files: &[&NzbFile], count: usize) -> Vec<String> {
    let mut all: Vec<&str> = files.iter().flat_map(|f| f.segments.iter().map(|s| s.message_id.as_str())).collect();
    let mut rng = rand::thread_rng();
    all.shuffle(&mut rng);
    all.into_iter().take(count).map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NzbSegment, SourceType};

    fn file(subject: &str, filename: &str, ext: &str, segment_ids: &[&str]) -> NzbFile {
        NzbFile {
            subject: subject.to_string(),
            filename: Some(filename.to_string()),
            extension: Some(ext.to_string()),
            segments: segment_ids
                .iter()
                .enumerate()
                .map(|(i, id)| NzbSegment { number: i as u32 + 1, bytes: 1000, message_id: id.to_string() })
                .collect(),
        }
    }

    fn release(url: &str, title: &str, indexer: &str) -> Release {
        Release {
            raw_title: title.to_string(),
            download_url: url.to_string(),
            indexer_name: indexer.to_string(),
            indexer_id: indexer.to_string(),
            size_bytes: 1_000_000,
            publish_instant_ms: 0,
            age_days: 1.0,
            resolution: "1080p".to_string(),
            languages: vec!["en".to_string()],
            quality_score: 100,
            source_type: SourceType::Aggregator,
            payload_token: None,
        }
    }

    #[test]
    fn dedupe_caps_by_normalized_title() {
        let releases = vec![
            release("url1", "Same.Movie.2024", "idx1"),
            release("url2", "same movie 2024", "idx2"),
            release("url3", "Different.Movie.2024", "idx3"),
        ];
        let deduped = dedupe_by_normalized_title(releases, 10);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn archive_candidates_collapse_part_volumes() {
        let files = vec![
            file("vol1 \"name.part01.rar\"", "name.part01.rar", "rar", &["a@x"]),
            file("vol2 \"name.part02.rar\"", "name.part02.rar", "rar", &["b@x"]),
        ];
        let candidates = collect_archive_candidates(&files);
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn score_penalizes_sample_and_proof() {
        let clean = score_archive_name("release.rar", "rar");
        let sample = score_archive_name("release.sample.rar", "rar");
        assert!(clean > sample);
    }

    #[test]
    fn best_candidate_prefers_rar_over_r00() {
        let files = vec![
            file("\"movie.r00\"", "movie.r00", "r00", &["a@x"]),
            file("\"movie.rar\"", "movie.rar", "rar", &["b@x"]),
        ];
        let candidates = collect_archive_candidates(&files);
        let best = candidates.iter().max_by_key(|c| c.score).unwrap();
        assert_eq!(best.extension, "rar");
    }
}
