//! Merges the partial device-info documents returned by each configured
//! extractor into one document (§4.7 step 1).

use provd_domain::{Document, IdentRequest, InfoExtractor};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorMergePolicy {
    /// On key conflict the later extractor's value wins; non-conflicting
    /// keys accumulate.
    LastSeen,
    /// Per key, the value with the most votes wins; ties leave the key
    /// unset.
    Voting,
}

/// Wraps an already-decoded info document as an [`InfoExtractor`], for
/// transports (DHCP) whose out-of-scope helper hands the engine a
/// pre-parsed mapping rather than a raw request to run extractors over.
pub struct FixedInfoExtractor(pub Document);

impl InfoExtractor for FixedInfoExtractor {
    fn extract(&self, _request: &IdentRequest) -> Option<Document> {
        Some(self.0.clone())
    }
}

pub struct CompositeExtractor {
    policy: ExtractorMergePolicy,
}

impl CompositeExtractor {
    pub fn new(policy: ExtractorMergePolicy) -> Self {
        Self { policy }
    }

    pub fn extract_all(&self, extractors: &[&dyn InfoExtractor], request: &IdentRequest) -> Document {
        let partials: Vec<Document> = extractors.iter().filter_map(|e| e.extract(request)).collect();
        match self.policy {
            ExtractorMergePolicy::LastSeen => merge_last_seen(&partials),
            ExtractorMergePolicy::Voting => merge_voting(&partials),
        }
    }
}

fn merge_last_seen(partials: &[Document]) -> Document {
    let mut out = Document::new();
    for partial in partials {
        for (key, value) in partial.as_map() {
            out.set(key.clone(), value.clone());
        }
    }
    out
}

fn merge_voting(partials: &[Document]) -> Document {
    // `Value` implements neither `Eq` nor `Hash`, so the inner tally is
    // keyed by its serialized form and carries the original `Value`
    // alongside the count.
    let mut votes: HashMap<String, HashMap<String, (Value, usize)>> = HashMap::new();
    for partial in partials {
        for (key, value) in partial.as_map() {
            let entry = votes.entry(key.clone()).or_default().entry(value.to_string()).or_insert((value.clone(), 0));
            entry.1 += 1;
        }
    }

    let mut out = Document::new();
    for (key, counts) in votes {
        let max = counts.values().map(|(_, count)| *count).max().unwrap_or(0);
        let mut winners = counts.values().filter(|(_, count)| *count == max);
        let winner = winners.next();
        if winner.is_some() && winners.next().is_none() {
            out.set(key, winner.unwrap().0.clone());
        }
    }
    out
}
