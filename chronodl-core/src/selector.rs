//! C7 — selector: scores candidates and ranks them by provider priority
//! then score (§4.3).
//!
//! Grounded on the original Python `api/matching.py`: fuzzy token-set title
//! scoring, best-over-creators creator scoring, and the combined-score
//! formula. No crate in the corpus implements `difflib`'s `SequenceMatcher`
//! or fuzzywuzzy's `token_set_ratio`, so both are reimplemented here on top
//! of `strsim`'s normalised edit-distance primitive, matching the original's
//! algorithm shape (common-token intersection compared against each side's
//! remainder) rather than its exact numeric output.

use std::collections::BTreeSet;

use crate::config::{Config, SelectionStrategy};
use crate::normalize::normalize;
use crate::provider::{Scores, SearchResult};

/// A 0–100 similarity ratio between two already-normalised strings.
fn simple_ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 100.0;
    }
    (strsim::normalized_levenshtein(a, b) * 100.0 * 100.0).round() / 100.0
}

/// fuzzywuzzy-style token-set ratio: tokenise both strings, compare the
/// sorted common-token string against each side's sorted full token string,
/// and take the best of the three pairings. Robust to word reordering and
/// one string being a subset of the other's tokens — the case that matters
/// most for library-catalogue title variants ("The Art of Cooking" vs.
/// "Art of Cooking, The: a Manual").
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();

    let intersection: Vec<&str> = tokens_a.intersection(&tokens_b).copied().collect();
    let only_a: Vec<&str> = tokens_a.difference(&tokens_b).copied().collect();
    let only_b: Vec<&str> = tokens_b.difference(&tokens_a).copied().collect();

    let joined_intersection = intersection.join(" ");
    let joined_a = if joined_intersection.is_empty() {
        only_a.join(" ")
    } else {
        format!("{joined_intersection} {}", only_a.join(" ")).trim().to_string()
    };
    let joined_b = if joined_intersection.is_empty() {
        only_b.join(" ")
    } else {
        format!("{joined_intersection} {}", only_b.join(" ")).trim().to_string()
    };

    let r1 = simple_ratio(&joined_intersection, &joined_a);
    let r2 = simple_ratio(&joined_intersection, &joined_b);
    let r3 = simple_ratio(&joined_a, &joined_b);
    r1.max(r2).max(r3)
}

/// Title score: fuzzy token-set ratio of normalised strings (§4.3).
pub fn title_score(query_title: &str, candidate_title: &str) -> f64 {
    token_set_ratio(&normalize(query_title), &normalize(candidate_title))
}

/// Creator score: the best fuzzy match over the candidate's creators list
/// (§4.3). Returns 0.0 if either side has no creator information — absence
/// of a creator never boosts nor penalises beyond that.
pub fn creator_score(query_creator: Option<&str>, candidate_creators: &[String]) -> f64 {
    let Some(query_creator) = query_creator else {
        return 0.0;
    };
    if candidate_creators.is_empty() {
        return 0.0;
    }
    let normalised_query = normalize(query_creator);
    candidate_creators
        .iter()
        .map(|c| token_set_ratio(&normalised_query, &normalize(c)))
        .fold(0.0, f64::max)
}

/// Combined score = `title_score · (1 − creator_weight) + creator_score ·
/// creator_weight`, plus quality boosts (§4.3): +3 for a IIIF manifest,
/// +0.5 for an item URL.
pub fn score_candidate(query_title: &str, query_creator: Option<&str>, candidate: &SearchResult, creator_weight: f64) -> Scores {
    let creator_weight = creator_weight.clamp(0.0, 1.0);
    let t_score = title_score(query_title, &candidate.title);
    let c_score = creator_score(query_creator, &candidate.creators);
    let combined = t_score * (1.0 - creator_weight) + c_score * creator_weight;

    let mut boosts = 0.0;
    if candidate.manifest_url.is_some() {
        boosts += 3.0;
    }
    if candidate.item_url.is_some() {
        boosts += 0.5;
    }

    Scores {
        title_score: t_score,
        creator_score: c_score,
        combined,
        boosts,
        total: combined + boosts,
    }
}

/// One candidate plus the provider-priority index it's ranked under and
/// whether it clears its provider's `min_title_score` threshold.
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub result: SearchResult,
    pub provider_priority: usize,
    pub eligible: bool,
}

/// Scores every candidate, attaches the score to its `raw` payload, and
/// sorts by `(provider_priority, −total_score)` with ties broken by
/// insertion order (§3's candidate ranking key, §4.3's tie-break rule —
/// `sort_by` is a stable sort, so equal keys preserve input order).
pub fn rank_candidates(
    query_title: &str,
    query_creator: Option<&str>,
    mut candidates: Vec<SearchResult>,
    config: &Config,
) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = candidates
        .drain(..)
        .map(|mut candidate| {
            let settings = config.provider_settings(&candidate.provider_key);
            let threshold = if settings.min_title_score > 0.0 {
                settings.min_title_score
            } else {
                config.selection.min_title_score
            };
            let scores = score_candidate(query_title, query_creator, &candidate, config.selection.creator_weight);
            candidate.attach_scores(scores);
            let eligible = scores.title_score >= threshold;
            let provider_priority = config.provider_priority(&candidate.provider_key);
            RankedCandidate {
                result: candidate,
                provider_priority,
                eligible,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        a.provider_priority
            .cmp(&b.provider_priority)
            .then(
                b.result
                    .scores
                    .map(|s| s.total)
                    .unwrap_or(0.0)
                    .partial_cmp(&a.result.scores.map(|s| s.total).unwrap_or(0.0))
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });
    ranked
}

/// The outcome of selection: either a chosen candidate plus the full
/// audited candidate list, or no eligible candidate (still carrying the
/// full audited list so `work.json` can record every score seen).
pub enum SelectionOutcome {
    Selected { chosen_index: usize, all: Vec<RankedCandidate> },
    NoMatch { all: Vec<RankedCandidate> },
}

/// `collect-and-select` (default, §4.3): rank every candidate across every
/// provider that searched, then pick the top eligible one.
pub fn collect_and_select(ranked: Vec<RankedCandidate>) -> SelectionOutcome {
    match ranked.iter().position(|c| c.eligible) {
        Some(index) => SelectionOutcome::Selected { chosen_index: index, all: ranked },
        None => SelectionOutcome::NoMatch { all: ranked },
    }
}

/// `sequential-first-hit` (§4.3): providers are searched one at a time in
/// hierarchy order by the caller; this picks the first provider's own best
/// candidate if it passes threshold, without looking at later providers at
/// all. The caller is expected to stop issuing further searches once this
/// returns `Selected`.
pub fn sequential_first_hit(
    query_title: &str,
    query_creator: Option<&str>,
    provider_candidates: Vec<SearchResult>,
    config: &Config,
) -> SelectionOutcome {
    let ranked = rank_candidates(query_title, query_creator, provider_candidates, config);
    match ranked.iter().position(|c| c.eligible) {
        Some(index) => SelectionOutcome::Selected { chosen_index: index, all: ranked },
        None => SelectionOutcome::NoMatch { all: ranked },
    }
}

pub fn strategy_for(config: &Config) -> SelectionStrategy {
    config.selection.strategy
}
