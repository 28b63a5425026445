//! SQLite storage backend
//!
//! Single database file, thread-safe via an internal mutex on the
//! connection. All canonical-key writes go through `ON CONFLICT` upserts so
//! concurrent workers converge on one row instead of racing inserts.

use super::traits::{IntelStore, OpenStore, StorageError, StorageResult, StoreStats};
use crate::entity::{
    ArticleEntityLink, ArticleId, ArticleRecord, ArticleRelationship, Campaign, CanonicalEntity,
    EntityId, EntityKind, ExtractionRun, ExtractionSource, RunId, RunStatus, SimilarityConfig,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

/// SQLite-backed intel store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Initialize the database schema
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            -- Articles: the pipeline's minimal view, enough for lookback
            -- filtering and embedding input
            CREATE TABLE IF NOT EXISTS articles (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                published_at TEXT NOT NULL,
                executive_summary TEXT,
                technical_summary TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_articles_published
                ON articles(published_at);

            -- Canonical entities. value is COLLATE NOCASE so the unique
            -- constraint and lookups are case-insensitive for every kind.
            CREATE TABLE IF NOT EXISTS entities (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                value TEXT NOT NULL COLLATE NOCASE,
                aliases_json TEXT NOT NULL DEFAULT '[]',
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                occurrence_count INTEGER NOT NULL DEFAULT 1,
                confidence INTEGER NOT NULL DEFAULT 0,
                false_positive INTEGER NOT NULL DEFAULT 0,
                UNIQUE (kind, value)
            );

            -- Article <-> entity join. One row per pair; repeated
            -- extraction updates in place.
            CREATE TABLE IF NOT EXISTS article_entities (
                article_id TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                confidence INTEGER NOT NULL,
                evidence TEXT,
                source TEXT NOT NULL,
                extracted_at TEXT NOT NULL,
                PRIMARY KEY (article_id, entity_id),
                FOREIGN KEY (entity_id) REFERENCES entities(id)
            );
            -- Reverse index: the candidate generator's entry point
            CREATE INDEX IF NOT EXISTS idx_article_entities_entity
                ON article_entities(entity_id);

            -- Extraction run audit trail
            CREATE TABLE IF NOT EXISTS extraction_runs (
                id TEXT PRIMARY KEY,
                article_id TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                status TEXT NOT NULL,
                entity_count INTEGER NOT NULL DEFAULT 0,
                sources_json TEXT NOT NULL DEFAULT '[]',
                error_code TEXT,
                error_message TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_runs_started
                ON extraction_runs(started_at);

            -- Relationships keyed by ordered pair; the CHECK makes a
            -- reverse duplicate impossible at the schema level.
            CREATE TABLE IF NOT EXISTS relationships (
                article_lo TEXT NOT NULL,
                article_hi TEXT NOT NULL,
                shared_indicators INTEGER NOT NULL,
                shared_techniques INTEGER NOT NULL,
                shared_actors INTEGER NOT NULL,
                semantic_similarity REAL,
                score REAL NOT NULL,
                lookback_days INTEGER NOT NULL,
                computed_at TEXT NOT NULL,
                PRIMARY KEY (article_lo, article_hi),
                CHECK (article_lo < article_hi)
            );
            CREATE INDEX IF NOT EXISTS idx_relationships_hi
                ON relationships(article_hi);
            CREATE INDEX IF NOT EXISTS idx_relationships_score
                ON relationships(score);

            -- Versioned similarity configs; at most one active row
            CREATE TABLE IF NOT EXISTS similarity_configs (
                version INTEGER PRIMARY KEY AUTOINCREMENT,
                lookback_days INTEGER NOT NULL,
                w_indicator REAL NOT NULL,
                w_technique REAL NOT NULL,
                w_actor REAL NOT NULL,
                w_semantic REAL NOT NULL,
                min_score REAL NOT NULL,
                require_exact_match INTEGER NOT NULL,
                campaign_min_score REAL NOT NULL,
                active INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            -- Campaigns: derived view, replaced wholesale per rebuild
            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                member_ids_json TEXT NOT NULL,
                entities_json TEXT NOT NULL,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                detected_at TEXT NOT NULL
            );

            -- Embedding cache for technical summaries
            CREATE TABLE IF NOT EXISTS article_embeddings (
                article_id TEXT PRIMARY KEY,
                dim INTEGER NOT NULL,
                vector_json TEXT NOT NULL,
                computed_at TEXT NOT NULL
            );

            PRAGMA foreign_keys = ON;

            -- WAL so candidate generation and scoring can read while
            -- another worker's canonicalization writes
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn parse_dt(s: &str) -> StorageResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StorageError::DateParse(format!("{}: {}", s, e)))
    }

    fn parse_article_id(s: &str) -> StorageResult<ArticleId> {
        ArticleId::parse(s).map_err(|e| StorageError::IdParse(format!("{}: {}", s, e)))
    }

    fn parse_entity_id(s: &str) -> StorageResult<EntityId> {
        EntityId::parse(s).map_err(|e| StorageError::IdParse(format!("{}: {}", s, e)))
    }

    #[allow(clippy::too_many_arguments)]
    fn row_to_entity(
        id: String,
        kind: String,
        value: String,
        aliases_json: String,
        first_seen: String,
        last_seen: String,
        occurrence_count: i64,
        confidence: i64,
        false_positive: bool,
    ) -> StorageResult<CanonicalEntity> {
        let kind = EntityKind::from_str(&kind)
            .ok_or_else(|| StorageError::IdParse(format!("unknown entity kind: {}", kind)))?;
        let aliases: BTreeSet<String> = serde_json::from_str(&aliases_json)?;
        Ok(CanonicalEntity {
            id: Self::parse_entity_id(&id)?,
            kind,
            value,
            aliases,
            first_seen: Self::parse_dt(&first_seen)?,
            last_seen: Self::parse_dt(&last_seen)?,
            occurrence_count: occurrence_count as u64,
            confidence: confidence as u8,
            false_positive,
        })
    }

    fn query_entity_where(
        conn: &Connection,
        where_clause: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> StorageResult<Option<CanonicalEntity>> {
        let sql = format!(
            "SELECT id, kind, value, aliases_json, first_seen, last_seen, \
             occurrence_count, confidence, false_positive FROM entities WHERE {}",
            where_clause
        );
        let row = conn
            .query_row(&sql, rusqlite::params_from_iter(args.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, bool>(8)?,
                ))
            })
            .optional()?;

        match row {
            Some((id, kind, value, aliases, first, last, count, conf, fp)) => Ok(Some(
                Self::row_to_entity(id, kind, value, aliases, first, last, count, conf, fp)?,
            )),
            None => Ok(None),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn row_to_relationship(
        lo: String,
        hi: String,
        ind: i64,
        ttp: i64,
        actor: i64,
        semantic: Option<f64>,
        score: f64,
        lookback: i64,
        computed_at: String,
    ) -> StorageResult<ArticleRelationship> {
        Ok(ArticleRelationship {
            article_lo: Self::parse_article_id(&lo)?,
            article_hi: Self::parse_article_id(&hi)?,
            shared_indicators: ind as u32,
            shared_techniques: ttp as u32,
            shared_actors: actor as u32,
            semantic_similarity: semantic,
            score,
            lookback_days: lookback as u32,
            computed_at: Self::parse_dt(&computed_at)?,
        })
    }

    const RELATIONSHIP_COLS: &'static str =
        "article_lo, article_hi, shared_indicators, shared_techniques, shared_actors, \
         semantic_similarity, score, lookback_days, computed_at";

    fn collect_relationships(
        conn: &Connection,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> StorageResult<Vec<ArticleRelationship>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, Option<f64>>(5)?,
                row.get::<_, f64>(6)?,
                row.get::<_, i64>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (lo, hi, ind, ttp, actor, sem, score, lb, at) = row?;
            out.push(Self::row_to_relationship(
                lo, hi, ind, ttp, actor, sem, score, lb, at,
            )?);
        }
        Ok(out)
    }

    fn config_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(SimilarityConfig, String)> {
        Ok((
            SimilarityConfig {
                version: Some(row.get::<_, i64>(0)?),
                lookback_days: row.get::<_, i64>(1)? as u32,
                w_indicator: row.get(2)?,
                w_technique: row.get(3)?,
                w_actor: row.get(4)?,
                w_semantic: row.get(5)?,
                min_score: row.get(6)?,
                require_exact_match: row.get(7)?,
                campaign_min_score: row.get(8)?,
                // placeholder; fixed up from the created_at column below
                created_at: Utc::now(),
            },
            row.get::<_, String>(9)?,
        ))
    }

    fn count(conn: &Connection, table: &str) -> StorageResult<usize> {
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })?;
        Ok(n as usize)
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl IntelStore for SqliteStore {
    // === Articles ===

    fn save_article(&self, article: &ArticleRecord) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO articles (id, title, published_at, executive_summary, technical_summary)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                published_at = excluded.published_at,
                executive_summary = excluded.executive_summary,
                technical_summary = excluded.technical_summary
            "#,
            params![
                article.id.to_string(),
                article.title,
                article.published_at.to_rfc3339(),
                article.executive_summary,
                article.technical_summary,
            ],
        )?;
        Ok(())
    }

    fn load_article(&self, id: ArticleId) -> StorageResult<Option<ArticleRecord>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, title, published_at, executive_summary, technical_summary \
                 FROM articles WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((id, title, published_at, exec, tech)) => Ok(Some(ArticleRecord {
                id: Self::parse_article_id(&id)?,
                title,
                published_at: Self::parse_dt(&published_at)?,
                executive_summary: exec,
                technical_summary: tech,
            })),
            None => Ok(None),
        }
    }

    // === Canonical entities ===

    fn record_occurrence(
        &self,
        kind: EntityKind,
        value: &str,
        confidence: u8,
        seen_at: DateTime<Utc>,
    ) -> StorageResult<CanonicalEntity> {
        let conn = self.conn.lock().unwrap();
        // Atomic discover-or-increment on the canonical key. Two workers
        // racing on a brand-new value both land on this statement; the
        // loser's INSERT turns into the UPDATE arm.
        conn.execute(
            r#"
            INSERT INTO entities (id, kind, value, aliases_json, first_seen, last_seen,
                                  occurrence_count, confidence, false_positive)
            VALUES (?1, ?2, ?3, '[]', ?4, ?4, 1, ?5, 0)
            ON CONFLICT(kind, value) DO UPDATE SET
                occurrence_count = occurrence_count + 1,
                last_seen = excluded.last_seen,
                confidence = MAX(confidence, excluded.confidence)
            "#,
            params![
                EntityId::new().to_string(),
                kind.as_str(),
                value,
                seen_at.to_rfc3339(),
                confidence as i64,
            ],
        )?;

        Self::query_entity_where(
            &conn,
            "kind = ?1 AND value = ?2",
            &[&kind.as_str(), &value],
        )?
        .ok_or_else(|| StorageError::EntityNotFound(format!("{}:{}", kind, value)))
    }

    fn add_alias(&self, entity: EntityId, alias: &str) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        // Alias union is read-modify-write, but the connection mutex
        // serializes it; the canonical-key race is already settled by the
        // time an alias is added.
        let aliases_json: Option<String> = conn
            .query_row(
                "SELECT aliases_json FROM entities WHERE id = ?1",
                params![entity.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        let aliases_json =
            aliases_json.ok_or_else(|| StorageError::EntityNotFound(entity.to_string()))?;
        let mut aliases: BTreeSet<String> = serde_json::from_str(&aliases_json)?;

        let lower = alias.to_lowercase();
        if aliases.iter().any(|a| a.to_lowercase() == lower) {
            return Ok(());
        }
        aliases.insert(alias.to_string());

        conn.execute(
            "UPDATE entities SET aliases_json = ?1 WHERE id = ?2",
            params![serde_json::to_string(&aliases)?, entity.to_string()],
        )?;
        Ok(())
    }

    fn lookup_entity(
        &self,
        kind: EntityKind,
        value: &str,
    ) -> StorageResult<Option<CanonicalEntity>> {
        let conn = self.conn.lock().unwrap();
        Self::query_entity_where(
            &conn,
            "kind = ?1 AND value = ?2",
            &[&kind.as_str(), &value],
        )
    }

    fn load_entity(&self, id: EntityId) -> StorageResult<Option<CanonicalEntity>> {
        let conn = self.conn.lock().unwrap();
        Self::query_entity_where(&conn, "id = ?1", &[&id.to_string()])
    }

    fn find_actor(&self, name: &str) -> StorageResult<Option<CanonicalEntity>> {
        let conn = self.conn.lock().unwrap();
        // Bundled SQLite ships the JSON1 functions, so aliases can be
        // searched without a second table.
        Self::query_entity_where(
            &conn,
            "kind = 'threat_actor' AND (value = ?1 COLLATE NOCASE OR EXISTS ( \
                SELECT 1 FROM json_each(entities.aliases_json) \
                WHERE json_each.value = ?1 COLLATE NOCASE))",
            &[&name],
        )
    }

    fn actor_directory(&self) -> StorageResult<Vec<(EntityId, String)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, value FROM entities \
             WHERE kind = 'threat_actor' AND false_positive = 0 ORDER BY value",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, value) = row?;
            out.push((Self::parse_entity_id(&id)?, value));
        }
        Ok(out)
    }

    fn set_false_positive(&self, entity: EntityId, flag: bool) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE entities SET false_positive = ?1 WHERE id = ?2",
            params![flag, entity.to_string()],
        )?;
        if changed == 0 {
            return Err(StorageError::EntityNotFound(entity.to_string()));
        }
        Ok(())
    }

    // === Article-entity links ===

    fn upsert_link(&self, link: &ArticleEntityLink) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO article_entities (article_id, entity_id, confidence, evidence, source, extracted_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(article_id, entity_id) DO UPDATE SET
                confidence = MAX(confidence, excluded.confidence),
                evidence = COALESCE(excluded.evidence, evidence),
                source = excluded.source,
                extracted_at = excluded.extracted_at
            "#,
            params![
                link.article_id.to_string(),
                link.entity_id.to_string(),
                link.confidence as i64,
                link.evidence,
                link.source.as_str(),
                link.extracted_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn links_for_article(&self, article: ArticleId) -> StorageResult<Vec<ArticleEntityLink>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT article_id, entity_id, confidence, evidence, source, extracted_at \
             FROM article_entities WHERE article_id = ?1 ORDER BY entity_id",
        )?;
        let rows = stmt.query_map(params![article.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (aid, eid, conf, evidence, source, extracted_at) = row?;
            let source = ExtractionSource::from_str(&source)
                .ok_or_else(|| StorageError::IdParse(format!("unknown source: {}", source)))?;
            out.push(ArticleEntityLink {
                article_id: Self::parse_article_id(&aid)?,
                entity_id: Self::parse_entity_id(&eid)?,
                confidence: conf as u8,
                evidence,
                source,
                extracted_at: Self::parse_dt(&extracted_at)?,
            });
        }
        Ok(out)
    }

    fn linked_entities(&self, article: ArticleId) -> StorageResult<Vec<(EntityId, EntityKind)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT e.id, e.kind FROM article_entities ae \
             JOIN entities e ON e.id = ae.entity_id \
             WHERE ae.article_id = ?1 AND e.false_positive = 0 \
             ORDER BY e.id",
        )?;
        let rows = stmt.query_map(params![article.to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, kind) = row?;
            let kind = EntityKind::from_str(&kind)
                .ok_or_else(|| StorageError::IdParse(format!("unknown entity kind: {}", kind)))?;
            out.push((Self::parse_entity_id(&id)?, kind));
        }
        Ok(out)
    }

    fn articles_linked_to(
        &self,
        entity: EntityId,
        published_after: DateTime<Utc>,
        exclude: ArticleId,
    ) -> StorageResult<Vec<ArticleId>> {
        let conn = self.conn.lock().unwrap();
        // RFC 3339 UTC strings compare lexicographically in date order
        let mut stmt = conn.prepare(
            "SELECT ae.article_id FROM article_entities ae \
             JOIN articles a ON a.id = ae.article_id \
             WHERE ae.entity_id = ?1 AND ae.article_id != ?2 AND a.published_at >= ?3",
        )?;
        let rows = stmt.query_map(
            params![
                entity.to_string(),
                exclude.to_string(),
                published_after.to_rfc3339()
            ],
            |row| row.get::<_, String>(0),
        )?;

        let mut out = Vec::new();
        for row in rows {
            out.push(Self::parse_article_id(&row?)?);
        }
        Ok(out)
    }

    // === Extraction runs ===

    fn begin_run(
        &self,
        article: ArticleId,
        sources: &[ExtractionSource],
        started_at: DateTime<Utc>,
    ) -> StorageResult<RunId> {
        let conn = self.conn.lock().unwrap();
        let id = RunId::new();
        conn.execute(
            "INSERT INTO extraction_runs (id, article_id, started_at, status, sources_json) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.to_string(),
                article.to_string(),
                started_at.to_rfc3339(),
                RunStatus::Running.as_str(),
                serde_json::to_string(sources)?,
            ],
        )?;
        Ok(id)
    }

    fn finish_run(
        &self,
        run: RunId,
        status: RunStatus,
        entity_count: u32,
        finished_at: DateTime<Utc>,
        error_code: Option<&str>,
        error_message: Option<&str>,
    ) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        // Finalization is one-shot: a finished run is immutable
        conn.execute(
            "UPDATE extraction_runs \
             SET status = ?1, entity_count = ?2, finished_at = ?3, \
                 error_code = ?4, error_message = ?5 \
             WHERE id = ?6 AND finished_at IS NULL",
            params![
                status.as_str(),
                entity_count as i64,
                finished_at.to_rfc3339(),
                error_code,
                error_message,
                run.to_string(),
            ],
        )?;
        Ok(())
    }

    fn recent_runs(&self, limit: usize) -> StorageResult<Vec<ExtractionRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, article_id, started_at, finished_at, status, entity_count, \
                    sources_json, error_code, error_message \
             FROM extraction_runs ORDER BY started_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, aid, started, finished, status, count, sources, code, msg) = row?;
            let status = RunStatus::from_str(&status)
                .ok_or_else(|| StorageError::IdParse(format!("unknown run status: {}", status)))?;
            let run_id =
                RunId::parse(&id).map_err(|e| StorageError::IdParse(format!("{}: {}", id, e)))?;
            out.push(ExtractionRun {
                id: run_id,
                article_id: Self::parse_article_id(&aid)?,
                started_at: Self::parse_dt(&started)?,
                finished_at: finished.as_deref().map(Self::parse_dt).transpose()?,
                status,
                entity_count: count as u32,
                sources: serde_json::from_str(&sources)?,
                error_code: code,
                error_message: msg,
            });
        }
        Ok(out)
    }

    // === Similarity config ===

    fn insert_config(&self, config: &SimilarityConfig) -> StorageResult<SimilarityConfig> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("UPDATE similarity_configs SET active = 0 WHERE active = 1", [])?;
        tx.execute(
            r#"
            INSERT INTO similarity_configs
                (lookback_days, w_indicator, w_technique, w_actor, w_semantic,
                 min_score, require_exact_match, campaign_min_score, active, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9)
            "#,
            params![
                config.lookback_days as i64,
                config.w_indicator,
                config.w_technique,
                config.w_actor,
                config.w_semantic,
                config.min_score,
                config.require_exact_match,
                config.campaign_min_score,
                config.created_at.to_rfc3339(),
            ],
        )?;
        let version = tx.last_insert_rowid();
        tx.commit()?;

        let mut saved = config.clone();
        saved.version = Some(version);
        Ok(saved)
    }

    fn active_config(&self) -> StorageResult<Option<SimilarityConfig>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT version, lookback_days, w_indicator, w_technique, w_actor, w_semantic, \
                        min_score, require_exact_match, campaign_min_score, created_at \
                 FROM similarity_configs WHERE active = 1",
                [],
                Self::config_from_row,
            )
            .optional()?;

        match row {
            Some((mut config, created_at)) => {
                config.created_at = Self::parse_dt(&created_at)?;
                Ok(Some(config))
            }
            None => Ok(None),
        }
    }

    // === Relationships ===

    fn replace_relationships(
        &self,
        article: ArticleId,
        evaluated: &[ArticleId],
        accepted: &[ArticleRelationship],
    ) -> StorageResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        for other in evaluated {
            let (lo, hi) = ArticleRelationship::ordered_pair(article, *other);
            tx.execute(
                "DELETE FROM relationships WHERE article_lo = ?1 AND article_hi = ?2",
                params![lo.to_string(), hi.to_string()],
            )?;
        }

        for rel in accepted {
            let inserted = tx.execute(
                r#"
                INSERT INTO relationships
                    (article_lo, article_hi, shared_indicators, shared_techniques,
                     shared_actors, semantic_similarity, score, lookback_days, computed_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    rel.article_lo.to_string(),
                    rel.article_hi.to_string(),
                    rel.shared_indicators as i64,
                    rel.shared_techniques as i64,
                    rel.shared_actors as i64,
                    rel.semantic_similarity,
                    rel.score,
                    rel.lookback_days as i64,
                    rel.computed_at.to_rfc3339(),
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    // Duplicate pair inside one persist call: writer bug,
                    // surface it instead of silently keeping two rows.
                    // The transaction rolls back on drop.
                    return Err(StorageError::DuplicatePair(format!(
                        "{} <-> {}",
                        rel.article_lo, rel.article_hi
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn relationships_for(&self, article: ArticleId) -> StorageResult<Vec<ArticleRelationship>> {
        let conn = self.conn.lock().unwrap();
        let id = article.to_string();
        Self::collect_relationships(
            &conn,
            &format!(
                "SELECT {} FROM relationships WHERE article_lo = ?1 OR article_hi = ?1 \
                 ORDER BY score DESC",
                Self::RELATIONSHIP_COLS
            ),
            &[&id],
        )
    }

    fn relationships_above(&self, min_score: f64) -> StorageResult<Vec<ArticleRelationship>> {
        let conn = self.conn.lock().unwrap();
        Self::collect_relationships(
            &conn,
            &format!(
                "SELECT {} FROM relationships WHERE score >= ?1 ORDER BY article_lo, article_hi",
                Self::RELATIONSHIP_COLS
            ),
            &[&min_score],
        )
    }

    fn recently_linked_articles(&self, limit: usize) -> StorageResult<Vec<ArticleId>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT a.id FROM articles a \
             JOIN article_entities ae ON ae.article_id = a.id \
             ORDER BY a.published_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(Self::parse_article_id(&row?)?);
        }
        Ok(out)
    }

    // === Campaigns ===

    fn replace_campaigns(&self, campaigns: &[Campaign]) -> StorageResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM campaigns", [])?;
        for campaign in campaigns {
            tx.execute(
                "INSERT INTO campaigns \
                     (id, member_ids_json, entities_json, first_seen, last_seen, detected_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    campaign.id.to_string(),
                    serde_json::to_string(&campaign.member_ids)?,
                    serde_json::to_string(&campaign.representative_entities)?,
                    campaign.first_seen.to_rfc3339(),
                    campaign.last_seen.to_rfc3339(),
                    campaign.detected_at.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn list_campaigns(&self) -> StorageResult<Vec<Campaign>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, member_ids_json, entities_json, first_seen, last_seen, detected_at \
             FROM campaigns",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, members, entities, first, last, detected) = row?;
            let id = crate::entity::CampaignId::parse(&id)
                .map_err(|e| StorageError::IdParse(format!("{}: {}", id, e)))?;
            out.push(Campaign {
                id,
                member_ids: serde_json::from_str(&members)?,
                representative_entities: serde_json::from_str(&entities)?,
                first_seen: Self::parse_dt(&first)?,
                last_seen: Self::parse_dt(&last)?,
                detected_at: Self::parse_dt(&detected)?,
            });
        }
        out.sort_by(|a, b| b.len().cmp(&a.len()));
        Ok(out)
    }

    // === Embedding cache ===

    fn load_embedding(&self, article: ArticleId) -> StorageResult<Option<Vec<f32>>> {
        let conn = self.conn.lock().unwrap();
        let vector_json: Option<String> = conn
            .query_row(
                "SELECT vector_json FROM article_embeddings WHERE article_id = ?1",
                params![article.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        match vector_json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn store_embedding(
        &self,
        article: ArticleId,
        vector: &[f32],
        computed_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO article_embeddings (article_id, dim, vector_json, computed_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(article_id) DO UPDATE SET
                dim = excluded.dim,
                vector_json = excluded.vector_json,
                computed_at = excluded.computed_at
            "#,
            params![
                article.to_string(),
                vector.len() as i64,
                serde_json::to_string(vector)?,
                computed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // === Stats ===

    fn stats(&self) -> StorageResult<StoreStats> {
        let conn = self.conn.lock().unwrap();
        Ok(StoreStats {
            articles: Self::count(&conn, "articles")?,
            entities: Self::count(&conn, "entities")?,
            links: Self::count(&conn, "article_entities")?,
            relationships: Self::count(&conn, "relationships")?,
            campaigns: Self::count(&conn, "campaigns")?,
            runs: Self::count(&conn, "extraction_runs")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn article(published_at: DateTime<Utc>) -> ArticleRecord {
        ArticleRecord::new(ArticleId::new(), "test article", published_at)
    }

    #[test]
    fn record_occurrence_creates_then_increments() {
        let store = store();
        let now = Utc::now();

        let first = store
            .record_occurrence(EntityKind::Indicator, "198.51.100.7", 60, now)
            .unwrap();
        assert_eq!(first.occurrence_count, 1);
        assert_eq!(first.confidence, 60);

        let later = now + Duration::hours(1);
        let second = store
            .record_occurrence(EntityKind::Indicator, "198.51.100.7", 40, later)
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.occurrence_count, 2);
        // Confidence keeps the maximum observed
        assert_eq!(second.confidence, 60);
        assert_eq!(second.first_seen, first.first_seen);
        assert!(second.last_seen > first.last_seen);
    }

    #[test]
    fn value_uniqueness_is_case_insensitive() {
        let store = store();
        let now = Utc::now();
        let a = store
            .record_occurrence(EntityKind::ThreatActor, "APT28", 50, now)
            .unwrap();
        let b = store
            .record_occurrence(EntityKind::ThreatActor, "apt28", 50, now)
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.occurrence_count, 2);
    }

    #[test]
    fn find_actor_matches_aliases() {
        let store = store();
        let actor = store
            .record_occurrence(EntityKind::ThreatActor, "APT28", 50, Utc::now())
            .unwrap();
        store.add_alias(actor.id, "Fancy Bear").unwrap();
        // Duplicate alias with different case is a no-op
        store.add_alias(actor.id, "FANCY BEAR").unwrap();

        let found = store.find_actor("fancy bear").unwrap().unwrap();
        assert_eq!(found.id, actor.id);
        assert_eq!(found.aliases.len(), 1);
    }

    #[test]
    fn link_upsert_keeps_one_row_per_pair() {
        let store = store();
        let now = Utc::now();
        let art = article(now);
        store.save_article(&art).unwrap();
        let entity = store
            .record_occurrence(EntityKind::Indicator, "evil.example.com", 70, now)
            .unwrap();

        let link = ArticleEntityLink {
            article_id: art.id,
            entity_id: entity.id,
            confidence: 70,
            evidence: Some("seen in C2 traffic".into()),
            source: ExtractionSource::Original,
            extracted_at: now,
        };
        store.upsert_link(&link).unwrap();
        store
            .upsert_link(&ArticleEntityLink {
                confidence: 90,
                ..link.clone()
            })
            .unwrap();

        let links = store.links_for_article(art.id).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].confidence, 90);
    }

    #[test]
    fn articles_linked_to_respects_window_and_exclusion() {
        let store = store();
        let now = Utc::now();
        let recent = article(now - Duration::days(5));
        let stale = article(now - Duration::days(400));
        let target = article(now);
        for a in [&recent, &stale, &target] {
            store.save_article(a).unwrap();
        }
        let entity = store
            .record_occurrence(EntityKind::Indicator, "198.51.100.7", 60, now)
            .unwrap();
        for a in [&recent, &stale, &target] {
            store
                .upsert_link(&ArticleEntityLink {
                    article_id: a.id,
                    entity_id: entity.id,
                    confidence: 60,
                    evidence: None,
                    source: ExtractionSource::Original,
                    extracted_at: now,
                })
                .unwrap();
        }

        let cutoff = now - Duration::days(90);
        let hits = store.articles_linked_to(entity.id, cutoff, target.id).unwrap();
        assert_eq!(hits, vec![recent.id]);
    }

    #[test]
    fn replace_relationships_is_transactional_replace() {
        let store = store();
        let now = Utc::now();
        let a = ArticleId::new();
        let b = ArticleId::new();
        let (lo, hi) = ArticleRelationship::ordered_pair(a, b);

        let rel = ArticleRelationship {
            article_lo: lo,
            article_hi: hi,
            shared_indicators: 2,
            shared_techniques: 0,
            shared_actors: 0,
            semantic_similarity: None,
            score: 0.4,
            lookback_days: 90,
            computed_at: now,
        };
        store.replace_relationships(a, &[b], &[rel.clone()]).unwrap();

        // Re-evaluating the pair with no accepted rows deletes the old one
        store.replace_relationships(a, &[b], &[]).unwrap();
        assert!(store.relationships_for(a).unwrap().is_empty());

        // A duplicate pair in one call aborts and leaves nothing behind
        let err = store
            .replace_relationships(a, &[b], &[rel.clone(), rel.clone()])
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicatePair(_)));
        assert!(store.relationships_for(a).unwrap().is_empty());
    }

    #[test]
    fn config_activation_is_exclusive() {
        let store = store();
        assert!(store.active_config().unwrap().is_none());

        let v1 = store.insert_config(&SimilarityConfig::default()).unwrap();
        let v2 = store
            .insert_config(&SimilarityConfig {
                min_score: 0.5,
                ..SimilarityConfig::default()
            })
            .unwrap();
        assert!(v2.version.unwrap() > v1.version.unwrap());

        let active = store.active_config().unwrap().unwrap();
        assert_eq!(active.version, v2.version);
        assert_eq!(active.min_score, 0.5);
    }

    #[test]
    fn embeddings_roundtrip() {
        let store = store();
        let id = ArticleId::new();
        assert!(store.load_embedding(id).unwrap().is_none());
        store.store_embedding(id, &[0.1, 0.2, 0.3], Utc::now()).unwrap();
        let v = store.load_embedding(id).unwrap().unwrap();
        assert_eq!(v.len(), 3);
    }

    #[test]
    fn on_disk_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tessera.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .record_occurrence(EntityKind::Technique, "T1566.001", 80, Utc::now())
                .unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let entity = store
            .lookup_entity(EntityKind::Technique, "T1566.001")
            .unwrap()
            .unwrap();
        assert_eq!(entity.occurrence_count, 1);
    }
}
