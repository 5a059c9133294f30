//! C3 — fragment auditor: a deterministic heuristic scorer plus a
//! peer-consensus voting pass. No learned model anywhere in this file;
//! every weight below is a fixed, documented constant.

use std::collections::HashSet;

use rand::seq::SliceRandom;
use rusqlite::params;
use tracing::debug;

use crate::error::StoreError;
use crate::ledger::{FactRecord, FragmentState, TRUST_FLOOR};
use crate::store::Store;
use crate::sync::PeerClient;

const SHORT_STRONG: usize = 4;
const SHORT_WEAK: usize = 8;
const WEIGHT_STRONG: f64 = 0.4;
const WEIGHT_WEAK: f64 = 0.15;

const PRONOUNS: &[&str] = &[
    "he", "she", "they", "it", "this", "that", "these", "those", "we", "i",
];
const TERMINAL_PUNCTUATION: &[char] = &['.', '!', '?'];

/// Up to this many non-disputed facts are scored per audit run.
const SAMPLE_SIZE: usize = 40;

/// Scores `content` against the closed set of length, lexical and
/// punctuation signals. The two length signals are mutually exclusive
/// (a sentence under `SHORT_STRONG` tokens is never also scored for
/// `SHORT_WEAK`), which keeps the maximum achievable score at exactly
/// `WEIGHT_STRONG + 4 * WEIGHT_WEAK == 1.0` — the four remaining weak
/// signals being named-entity absence, pronoun lead, non-terminal
/// ending and lowercase lead.
pub fn score(content: &str) -> f64 {
    let tokens: Vec<&str> = content.split_whitespace().collect();
    let mut score = 0.0;

    if tokens.len() < SHORT_STRONG {
        score += WEIGHT_STRONG;
    } else if tokens.len() < SHORT_WEAK {
        score += WEIGHT_WEAK;
    }

    let has_named_entity = tokens.iter().any(|t| {
        let mut chars = t.chars();
        match chars.next() {
            Some(c) if c.is_uppercase() => true,
            _ => t.chars().any(|c| c.is_ascii_digit()),
        }
    });
    if !has_named_entity {
        score += WEIGHT_WEAK;
    }

    if let Some(first) = tokens.first() {
        let normalized = first.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
        if PRONOUNS.contains(&normalized.as_str()) {
            score += WEIGHT_WEAK;
        }
    }

    if !content
        .trim_end()
        .chars()
        .next_back()
        .map(|c| TERMINAL_PUNCTUATION.contains(&c))
        .unwrap_or(false)
    {
        score += WEIGHT_WEAK;
    }

    if let Some(first_alpha) = content.chars().find(|c| c.is_alphabetic()) {
        if first_alpha.is_lowercase() {
            score += WEIGHT_WEAK;
        }
    }

    score.min(1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Vote {
    Positive,
    Negative,
    Abstain,
}

fn tally_vote(opinion: &crate::sync::FragmentOpinion) -> Vote {
    if !opinion.seen {
        return Vote::Positive;
    }
    let fragment_state = opinion.fragment_state.as_deref().unwrap_or("unknown");
    if fragment_state == FragmentState::RejectedFragment.as_str() {
        return Vote::Negative;
    }
    let trusted_and_confident = opinion.status.as_deref() == Some("trusted")
        && opinion.trust_score.unwrap_or(0) >= TRUST_FLOOR;
    if trusted_and_confident {
        return Vote::Negative;
    }
    if fragment_state == FragmentState::SuspectedFragment.as_str()
        || fragment_state == FragmentState::ConfirmedFragment.as_str()
    {
        return Vote::Positive;
    }
    Vote::Abstain
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Consensus {
    Positive,
    Negative,
    NoChange,
}

async fn consult_peers(client: &PeerClient, peers: &[String], fact_id: &str) -> Consensus {
    let mut positives = 0;
    let mut negatives = 0;

    for peer in peers {
        match client.fragment_opinion(peer, fact_id).await {
            Ok(opinion) => match tally_vote(&opinion) {
                Vote::Positive => positives += 1,
                Vote::Negative => negatives += 1,
                Vote::Abstain => {}
            },
            Err(err) => debug!(peer, %err, "fragment_opinion query failed, treating as abstain"),
        }
    }

    if positives > 0 && negatives == 0 {
        Consensus::Positive
    } else if negatives > 0 && positives == 0 {
        Consensus::Negative
    } else {
        Consensus::NoChange
    }
}

fn next_state(current: FragmentState, heuristic_score: f64, consensus: Consensus) -> FragmentState {
    if consensus == Consensus::Negative {
        return FragmentState::RejectedFragment;
    }

    match current {
        FragmentState::Unknown if heuristic_score >= 0.5 => FragmentState::SuspectedFragment,
        FragmentState::SuspectedFragment if heuristic_score < 0.2 => FragmentState::RejectedFragment,
        FragmentState::SuspectedFragment if consensus == Consensus::Positive => {
            FragmentState::ConfirmedFragment
        }
        other => other,
    }
}

fn sample_candidates(store: &Store, limit: usize) -> Result<Vec<(String, String, FragmentState)>, StoreError> {
    let conn = store.lock();
    let mut stmt = conn.prepare(
        "SELECT fact_id, content, fragment_state FROM facts WHERE status != 'disputed'",
    )?;
    let mut rows: Vec<(String, Vec<u8>, String)> = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<_, _>>()?;
    drop(stmt);
    drop(conn);

    let mut rng = rand::thread_rng();
    rows.shuffle(&mut rng);
    rows.truncate(limit);

    rows.into_iter()
        .map(|(fact_id, compressed, state_str)| {
            let content = crate::ledger::decompress(&compressed)?;
            let state = FragmentState::parse(&state_str)?;
            Ok((fact_id, content, state))
        })
        .collect()
}

/// One audit pass: samples up to `SAMPLE_SIZE` non-disputed facts
/// uniformly at random, scores each, queries up to 3 peers when the
/// heuristic alone leaves a fact at `suspected_fragment`, and persists
/// whatever state transition results. Returns the number of facts
/// whose `fragment_state` actually changed.
pub async fn run_audit(store: &Store, client: &PeerClient, peers: &[String]) -> Result<usize, StoreError> {
    let candidates = sample_candidates(store, SAMPLE_SIZE)?;
    let mut changed = 0;

    for (fact_id, content, current_state) in candidates {
        let heuristic_score = score(&content);

        let consensus = if current_state == FragmentState::SuspectedFragment && !peers.is_empty() {
            let mut sample: Vec<String> = peers.to_vec();
            let mut rng = rand::thread_rng();
            sample.shuffle(&mut rng);
            sample.truncate(3);
            consult_peers(client, &sample, &fact_id).await
        } else {
            Consensus::NoChange
        };

        let new_state = next_state(current_state, heuristic_score, consensus);
        if new_state != current_state {
            let reason = describe_reason(&content, heuristic_score, consensus);
            crate::ledger::update_fragment(store, &fact_id, new_state, heuristic_score, Some(reason))?;
            changed += 1;
        }
    }

    Ok(changed)
}

fn describe_reason(content: &str, heuristic_score: f64, consensus: Consensus) -> String {
    let mut tags: Vec<&str> = Vec::new();
    let tokens = content.split_whitespace().count();
    if tokens < SHORT_STRONG {
        tags.push("very_short");
    } else if tokens < SHORT_WEAK {
        tags.push("short");
    }
    match consensus {
        Consensus::Positive => tags.push("peer_consensus_positive"),
        Consensus::Negative => tags.push("peer_consensus_negative"),
        Consensus::NoChange => {}
    }
    if tags.is_empty() {
        format!("heuristic_score={heuristic_score:.2}")
    } else {
        tags.join(",")
    }
}

/// Answers `GET /fragment_opinion`: this node's own opinion of a fact
/// it may or may not have seen.
pub fn local_opinion(store: &Store, fact_id: &str) -> Result<Option<FactRecord>, StoreError> {
    let facts = crate::ledger::get_facts_by_id(store, std::slice::from_ref(&fact_id.to_string()))?;
    Ok(facts.into_iter().next())
}

#[allow(dead_code)]
fn unique_peers(peers: &[String]) -> HashSet<String> {
    peers.iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_pronoun_leading_sentence_scores_at_least_half() {
        let s = score("he went there");
        assert!(s >= 0.5, "expected >= 0.5, got {s}");
    }

    #[test]
    fn well_formed_sentence_scores_low() {
        let s = score("The Eiffel Tower was completed in Paris in 1889.");
        assert!(s < 0.5, "expected < 0.5, got {s}");
    }

    #[test]
    fn score_never_exceeds_one() {
        let s = score("it");
        assert!(s <= 1.0);
    }

    #[test]
    fn unknown_promotes_to_suspected_above_threshold() {
        let next = next_state(FragmentState::Unknown, 0.5, Consensus::NoChange);
        assert_eq!(next, FragmentState::SuspectedFragment);
    }

    #[test]
    fn suspected_demotes_to_rejected_on_weak_score() {
        let next = next_state(FragmentState::SuspectedFragment, 0.1, Consensus::NoChange);
        assert_eq!(next, FragmentState::RejectedFragment);
    }

    #[test]
    fn suspected_promotes_to_confirmed_on_positive_consensus() {
        let next = next_state(FragmentState::SuspectedFragment, 0.5, Consensus::Positive);
        assert_eq!(next, FragmentState::ConfirmedFragment);
    }

    #[test]
    fn negative_consensus_always_rejects() {
        let next = next_state(FragmentState::ConfirmedFragment, 0.9, Consensus::Negative);
        assert_eq!(next, FragmentState::RejectedFragment);
    }

    #[test]
    fn unseen_peer_votes_positive() {
        let opinion = crate::sync::FragmentOpinion {
            seen: false,
            status: None,
            trust_score: None,
            fragment_state: None,
            fragment_score: None,
        };
        assert_eq!(tally_vote(&opinion), Vote::Positive);
    }

    #[test]
    fn trusted_high_score_peer_votes_negative() {
        let opinion = crate::sync::FragmentOpinion {
            seen: true,
            status: Some("trusted".to_string()),
            trust_score: Some(5),
            fragment_state: Some("unknown".to_string()),
            fragment_score: Some(0.0),
        };
        assert_eq!(tally_vote(&opinion), Vote::Negative);
    }
}
