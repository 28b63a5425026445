//! Fuzzy threat-actor alias matching
//!
//! Actor names have no canonical spelling across vendors ("APT 28",
//! "APT28", "Fancy Bear"). Exact and alias lookups run first; this module
//! is the fallback that decides whether an unseen name is a new actor or a
//! variant spelling of a known one. The similarity function sits behind a
//! narrow trait so the threshold stays a configuration value and tests can
//! substitute their own metric.

use crate::entity::EntityId;

/// Pluggable name-similarity metric. Returns a score in [0, 1].
pub trait AliasMatcher: Send + Sync {
    fn similarity(&self, a: &str, b: &str) -> f64;
}

/// Default metric: Jaro-Winkler over case-folded, whitespace-collapsed
/// names. Favors shared prefixes, which suits vendor naming ("APT28" vs
/// "APT 28", "Lazarus" vs "Lazarus Group").
#[derive(Debug, Default, Clone, Copy)]
pub struct JaroWinklerMatcher;

fn fold(name: &str) -> String {
    name.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

impl AliasMatcher for JaroWinklerMatcher {
    fn similarity(&self, a: &str, b: &str) -> f64 {
        strsim::jaro_winkler(&fold(a), &fold(b))
    }
}

/// Outcome of a fuzzy directory search.
#[derive(Debug, Clone)]
pub struct AliasResolution {
    pub entity_id: EntityId,
    /// Canonical name of the matched actor
    pub name: String,
    pub similarity: f64,
    /// Second candidate that also cleared the threshold, if any.
    /// Callers log this as an ambiguity rather than silently merging.
    pub runner_up: Option<(String, f64)>,
}

/// Find the best fuzzy match for `candidate` in the actor directory.
///
/// Deterministic: the highest similarity wins; exact ties break toward the
/// lexicographically smaller canonical name, so replays with the same
/// directory always resolve the same way.
pub fn best_match(
    matcher: &dyn AliasMatcher,
    candidate: &str,
    directory: &[(EntityId, String)],
    threshold: f64,
) -> Option<AliasResolution> {
    let mut above: Vec<(f64, &EntityId, &String)> = directory
        .iter()
        .map(|(id, name)| (matcher.similarity(candidate, name), id, name))
        .filter(|(sim, _, _)| *sim >= threshold)
        .collect();

    above.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.2.cmp(b.2))
    });

    let mut iter = above.into_iter();
    let (similarity, entity_id, name) = iter.next()?;
    let runner_up = iter.next().map(|(sim, _, name)| (name.clone(), sim));

    Some(AliasResolution {
        entity_id: *entity_id,
        name: name.clone(),
        similarity,
        runner_up,
    })
}
