//! Canonicalization: raw candidates -> canonical entities + article links
//!
//! The only code path that mutates canonical entity rows. Indicators and
//! techniques resolve by exact normalized value; threat actors resolve
//! exact-then-fuzzy against the known name/alias set. Everything is
//! upsert-based so re-running extraction never duplicates links.

mod alias;
mod normalize;

pub use alias::{best_match, AliasMatcher, AliasResolution, JaroWinklerMatcher};
pub use normalize::{
    normalize_actor, normalize_indicator, normalize_technique, refang, NormalizeError,
};

use crate::entity::{ArticleEntityLink, ArticleId, CanonicalEntity, EntityKind, RawEntity};
use crate::storage::{IntelStore, StorageResult};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default fuzzy-match threshold for actor aliasing.
pub const DEFAULT_ALIAS_THRESHOLD: f64 = 0.85;

/// What one canonicalization call produced.
#[derive(Debug, Clone, Default)]
pub struct CanonicalizeOutcome {
    /// Links written (one per resolved entity)
    pub links: Vec<ArticleEntityLink>,
    /// Candidates dropped as malformed
    pub dropped: u32,
    /// Entities that did not exist before this call
    pub created: u32,
}

/// In-call dedupe key. Indicators and techniques are already
/// case-normalized; actor names keep their case, so fold here.
fn dedupe_key(kind: EntityKind, normalized: &str) -> String {
    match kind {
        EntityKind::ThreatActor => normalized.to_lowercase(),
        EntityKind::Indicator | EntityKind::Technique => normalized.to_string(),
    }
}

/// Merges raw extraction candidates into the entity store.
pub struct Canonicalizer {
    store: Arc<dyn IntelStore>,
    matcher: Box<dyn AliasMatcher>,
    alias_threshold: f64,
}

impl Canonicalizer {
    pub fn new(store: Arc<dyn IntelStore>) -> Self {
        Self {
            store,
            matcher: Box::new(JaroWinklerMatcher),
            alias_threshold: DEFAULT_ALIAS_THRESHOLD,
        }
    }

    /// Override the fuzzy-match threshold (0..=1).
    pub fn with_alias_threshold(mut self, threshold: f64) -> Self {
        self.alias_threshold = threshold;
        self
    }

    /// Substitute a different similarity metric.
    pub fn with_matcher(mut self, matcher: impl AliasMatcher + 'static) -> Self {
        self.matcher = Box::new(matcher);
        self
    }

    /// Resolve raw candidates to canonical entities and upsert the article
    /// links.
    ///
    /// A value repeated within one call counts as one occurrence (the
    /// highest-confidence copy wins); malformed candidates are dropped and
    /// logged, never fatal to the batch.
    pub fn canonicalize(
        &self,
        article_id: ArticleId,
        candidates: &[RawEntity],
        now: DateTime<Utc>,
    ) -> StorageResult<CanonicalizeOutcome> {
        let mut outcome = CanonicalizeOutcome::default();

        // Dedupe within the call on the normalized value, so an indicator
        // mentioned in both the original text and the summary increments
        // its occurrence count exactly once.
        let mut unique: BTreeMap<(EntityKind, String), RawEntity> = BTreeMap::new();
        for candidate in candidates {
            let normalized = match self.normalize(candidate) {
                Ok(value) => value,
                Err(e) => {
                    warn!(
                        kind = %candidate.kind,
                        value = %candidate.value,
                        error = %e,
                        "dropping malformed candidate"
                    );
                    outcome.dropped += 1;
                    continue;
                }
            };
            let key = (candidate.kind, dedupe_key(candidate.kind, &normalized));
            let entry = unique.entry(key).or_insert_with(|| RawEntity {
                value: normalized.clone(),
                ..candidate.clone()
            });
            if candidate.confidence > entry.confidence {
                entry.confidence = candidate.confidence;
            }
            if entry.evidence.is_none() {
                entry.evidence = candidate.evidence.clone();
            }
        }

        for ((kind, _), candidate) in unique {
            let entity = match kind {
                EntityKind::Indicator | EntityKind::Technique => {
                    self.resolve_exact(kind, &candidate, now)?
                }
                EntityKind::ThreatActor => self.resolve_actor(&candidate, now)?,
            };
            if entity.occurrence_count == 1 {
                outcome.created += 1;
            }

            let link = ArticleEntityLink {
                article_id,
                entity_id: entity.id,
                confidence: candidate.confidence,
                evidence: candidate.evidence.clone(),
                source: candidate.source,
                extracted_at: now,
            };
            self.store.upsert_link(&link)?;
            outcome.links.push(link);
        }

        Ok(outcome)
    }

    fn normalize(&self, candidate: &RawEntity) -> Result<String, NormalizeError> {
        match candidate.kind {
            EntityKind::Indicator => normalize_indicator(&candidate.value),
            EntityKind::Technique => normalize_technique(&candidate.value),
            EntityKind::ThreatActor => normalize_actor(&candidate.value),
        }
    }

    fn resolve_exact(
        &self,
        kind: EntityKind,
        candidate: &RawEntity,
        now: DateTime<Utc>,
    ) -> StorageResult<CanonicalEntity> {
        // record_occurrence is an atomic upsert: a concurrent discovery of
        // the same value resolves at the storage layer, not here.
        self.store
            .record_occurrence(kind, &candidate.value, candidate.confidence, now)
    }

    fn resolve_actor(
        &self,
        candidate: &RawEntity,
        now: DateTime<Utc>,
    ) -> StorageResult<CanonicalEntity> {
        let name = &candidate.value;

        // 1. Exact match on canonical name or any alias, case-insensitive
        if let Some(actor) = self.store.find_actor(name)? {
            return self
                .store
                .record_occurrence(EntityKind::ThreatActor, &actor.value, candidate.confidence, now);
        }

        // 2. Fuzzy match against canonical names
        let directory = self.store.actor_directory()?;
        if let Some(resolution) =
            best_match(self.matcher.as_ref(), name, &directory, self.alias_threshold)
        {
            if let Some((other, sim)) = &resolution.runner_up {
                warn!(
                    candidate = %name,
                    matched = %resolution.name,
                    matched_similarity = resolution.similarity,
                    runner_up = %other,
                    runner_up_similarity = sim,
                    "ambiguous actor alias; keeping highest-similarity match"
                );
            }
            debug!(
                candidate = %name,
                matched = %resolution.name,
                similarity = resolution.similarity,
                "aliasing actor to existing canonical name"
            );
            let entity = self.store.record_occurrence(
                EntityKind::ThreatActor,
                &resolution.name,
                candidate.confidence,
                now,
            )?;
            self.store.add_alias(entity.id, name)?;
            // Re-read so the returned row includes the fresh alias
            return Ok(self
                .store
                .load_entity(entity.id)?
                .unwrap_or(entity));
        }

        // 3. New actor
        debug!(name = %name, "creating new threat actor");
        self.store
            .record_occurrence(EntityKind::ThreatActor, name, candidate.confidence, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ExtractionSource;
    use crate::storage::{OpenStore, SqliteStore};

    fn setup() -> (Arc<SqliteStore>, Canonicalizer) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let canonicalizer = Canonicalizer::new(store.clone() as Arc<dyn IntelStore>);
        (store, canonicalizer)
    }

    fn raw(kind: EntityKind, value: &str) -> RawEntity {
        RawEntity::new(kind, value, 60)
    }

    #[test]
    fn repeated_value_in_one_call_counts_once() {
        let (store, canonicalizer) = setup();
        let article = ArticleId::new();
        let outcome = canonicalizer
            .canonicalize(
                article,
                &[
                    raw(EntityKind::Indicator, "198.51.100.7"),
                    // Same indicator, defanged, different source
                    raw(EntityKind::Indicator, "198.51.100[.]7")
                        .with_source(ExtractionSource::TechnicalSummary),
                ],
                Utc::now(),
            )
            .unwrap();

        assert_eq!(outcome.links.len(), 1);
        assert_eq!(outcome.dropped, 0);
        let entity = store
            .lookup_entity(EntityKind::Indicator, "198.51.100.7")
            .unwrap()
            .unwrap();
        assert_eq!(entity.occurrence_count, 1);
    }

    #[test]
    fn second_call_increments_exactly_once() {
        let (store, canonicalizer) = setup();
        let candidates = [raw(EntityKind::Technique, "T1566.001")];
        canonicalizer
            .canonicalize(ArticleId::new(), &candidates, Utc::now())
            .unwrap();
        canonicalizer
            .canonicalize(ArticleId::new(), &candidates, Utc::now())
            .unwrap();

        let entity = store
            .lookup_entity(EntityKind::Technique, "T1566.001")
            .unwrap()
            .unwrap();
        assert_eq!(entity.occurrence_count, 2);
    }

    #[test]
    fn malformed_candidates_drop_without_failing_batch() {
        let (_, canonicalizer) = setup();
        let outcome = canonicalizer
            .canonicalize(
                ArticleId::new(),
                &[
                    raw(EntityKind::Indicator, "300.300.300.300"),
                    raw(EntityKind::Indicator, "evil.example.com"),
                ],
                Utc::now(),
            )
            .unwrap();
        assert_eq!(outcome.dropped, 1);
        assert_eq!(outcome.links.len(), 1);
    }

    #[test]
    fn actor_fuzzy_match_adds_alias() {
        let (store, canonicalizer) = setup();
        canonicalizer
            .canonicalize(
                ArticleId::new(),
                &[raw(EntityKind::ThreatActor, "Lazarus Group")],
                Utc::now(),
            )
            .unwrap();
        canonicalizer
            .canonicalize(
                ArticleId::new(),
                &[raw(EntityKind::ThreatActor, "LAZARUS  GROUP ")],
                Utc::now(),
            )
            .unwrap();
        // A close variant spelling resolves to the same actor
        canonicalizer
            .canonicalize(
                ArticleId::new(),
                &[raw(EntityKind::ThreatActor, "Lazarus Gruop")],
                Utc::now(),
            )
            .unwrap();

        let actor = store.find_actor("Lazarus Group").unwrap().unwrap();
        assert_eq!(actor.occurrence_count, 3);
        assert!(actor.known_as("Lazarus Gruop"));
        assert_eq!(store.actor_directory().unwrap().len(), 1);
    }

    #[test]
    fn unrelated_actor_creates_new_row() {
        let (store, canonicalizer) = setup();
        for name in ["APT28", "Scattered Spider"] {
            canonicalizer
                .canonicalize(
                    ArticleId::new(),
                    &[raw(EntityKind::ThreatActor, name)],
                    Utc::now(),
                )
                .unwrap();
        }
        assert_eq!(store.actor_directory().unwrap().len(), 2);
    }

    #[test]
    fn alias_resolves_on_later_calls() {
        let (store, canonicalizer) = setup();
        let first = canonicalizer
            .canonicalize(
                ArticleId::new(),
                &[raw(EntityKind::ThreatActor, "APT28")],
                Utc::now(),
            )
            .unwrap();
        let actor_id = first.links[0].entity_id;
        store.add_alias(actor_id, "Fancy Bear").unwrap();

        let second = canonicalizer
            .canonicalize(
                ArticleId::new(),
                &[raw(EntityKind::ThreatActor, "fancy bear")],
                Utc::now(),
            )
            .unwrap();
        assert_eq!(second.links[0].entity_id, actor_id);
    }
}
