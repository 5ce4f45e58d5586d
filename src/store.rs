use rusqlite::{Connection, params};
use std::sync::Mutex;

use crate::cycles;
use crate::models::audit::{ActiveSlo, AuditAction, AuditEntry};
use crate::models::dependency::{
    CommunicationMode, CycleRecord, CycleStatus, DependencyEdge, DiscoverySource, EdgeCriticality,
};
use crate::models::recommendation::{Recommendation, RecommendationStatus};
use crate::models::service::{Criticality, Service, ServiceType};
use crate::models::sli::SliType;

pub struct Store {
    conn: Mutex<Connection>,
}

/// Normalized node row ready for upsert (validation happened in ingest).
pub struct NodeUpsert {
    pub service_id: String,
    pub team: String,
    pub criticality: Criticality,
    pub service_type: ServiceType,
    pub published_sla: Option<f64>,
    pub metadata: serde_json::Value,
    pub explicit: bool,
}

/// Normalized edge row ready for upsert.
pub struct EdgeUpsert {
    pub source_id: String,
    pub target_id: String,
    pub discovery_source: DiscoverySource,
    pub communication_mode: CommunicationMode,
    pub criticality: EdgeCriticality,
    pub protocol: String,
    pub timeout_ms: Option<i64>,
    pub retry_config: Option<serde_json::Value>,
    pub redundancy_group: Option<String>,
    pub confidence_score: f64,
}

pub struct IngestOutcome {
    pub nodes_upserted: usize,
    pub edges_upserted: usize,
    pub new_cycles: Vec<Vec<String>>,
    pub conflicts: Vec<String>,
}

impl Store {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS services (
                service_id    TEXT PRIMARY KEY,
                team          TEXT NOT NULL DEFAULT '',
                criticality   TEXT NOT NULL DEFAULT 'medium' CHECK(criticality IN ('critical','high','medium','low')),
                service_type  TEXT NOT NULL DEFAULT 'internal' CHECK(service_type IN ('internal','external')),
                published_sla REAL,
                discovered    INTEGER NOT NULL DEFAULT 0,
                metadata      TEXT NOT NULL DEFAULT '{}',
                created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                updated_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
            );

            CREATE TABLE IF NOT EXISTS dependency_edges (
                id                 TEXT PRIMARY KEY,
                source_id          TEXT NOT NULL,
                target_id          TEXT NOT NULL CHECK(target_id != source_id),
                discovery_source   TEXT NOT NULL CHECK(discovery_source IN ('manual','service_mesh','otel_service_graph','kubernetes')),
                priority           INTEGER NOT NULL,
                communication_mode TEXT NOT NULL CHECK(communication_mode IN ('sync','async')),
                criticality        TEXT NOT NULL CHECK(criticality IN ('hard','soft')),
                protocol           TEXT NOT NULL DEFAULT '',
                timeout_ms         INTEGER,
                retry_config       TEXT,
                redundancy_group   TEXT,
                confidence_score   REAL NOT NULL,
                last_observed_at   TEXT NOT NULL,
                is_stale           INTEGER NOT NULL DEFAULT 0,
                created_at         TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                UNIQUE(source_id, target_id, discovery_source)
            );
            CREATE INDEX IF NOT EXISTS idx_edges_source ON dependency_edges(source_id);
            CREATE INDEX IF NOT EXISTS idx_edges_target ON dependency_edges(target_id);

            CREATE TABLE IF NOT EXISTS cycle_records (
                id          TEXT PRIMARY KEY,
                member_key  TEXT NOT NULL UNIQUE,
                members     TEXT NOT NULL,
                status      TEXT NOT NULL DEFAULT 'open' CHECK(status IN ('open','acknowledged','resolved')),
                detected_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                updated_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
            );

            CREATE TABLE IF NOT EXISTS recommendations (
                id                     TEXT PRIMARY KEY,
                service_id             TEXT NOT NULL,
                sli_type               TEXT NOT NULL CHECK(sli_type IN ('availability','latency')),
                metric                 TEXT NOT NULL,
                tiers                  TEXT NOT NULL,
                explanation            TEXT NOT NULL,
                data_quality           TEXT NOT NULL,
                lookback_window_start  TEXT NOT NULL,
                lookback_window_end    TEXT NOT NULL,
                generated_at           TEXT NOT NULL,
                expires_at             TEXT NOT NULL,
                status                 TEXT NOT NULL DEFAULT 'active' CHECK(status IN ('active','superseded','expired'))
            );
            CREATE INDEX IF NOT EXISTS idx_recs_service ON recommendations(service_id, sli_type, status);
            CREATE INDEX IF NOT EXISTS idx_recs_expiry ON recommendations(expires_at);

            CREATE TABLE IF NOT EXISTS active_slos (
                id                TEXT PRIMARY KEY,
                service_id        TEXT NOT NULL,
                sli_type          TEXT NOT NULL CHECK(sli_type IN ('availability','latency')),
                metric            TEXT NOT NULL,
                target            REAL NOT NULL,
                tier              TEXT NOT NULL,
                recommendation_id TEXT NOT NULL,
                approved_by       TEXT NOT NULL,
                rationale         TEXT NOT NULL DEFAULT '',
                created_at        TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                UNIQUE(service_id, sli_type)
            );

            CREATE TABLE IF NOT EXISTS audit_entries (
                id                TEXT PRIMARY KEY,
                service_id        TEXT NOT NULL,
                recommendation_id TEXT,
                action            TEXT NOT NULL CHECK(action IN ('accept','modify','reject','auto_approve','drift_triggered','expire')),
                actor             TEXT NOT NULL,
                previous_state    TEXT,
                new_state         TEXT,
                rationale         TEXT NOT NULL DEFAULT '',
                created_at        TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_service ON audit_entries(service_id, created_at);
            ",
        )?;
        Ok(())
    }

    // ── Service operations ──

    pub fn get_service(&self, service_id: &str) -> anyhow::Result<Option<Service>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT service_id, team, criticality, service_type, published_sla, discovered, \
             metadata, created_at, updated_at FROM services WHERE service_id = ?1",
        )?;
        let mut rows = stmt.query_map(params![service_id], map_service)?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_services(
        &self,
        skip: i64,
        limit: i64,
        team: Option<&str>,
        criticality: Option<&str>,
        discovered: Option<bool>,
    ) -> anyhow::Result<Vec<Service>> {
        let conn = self.conn.lock().unwrap();
        let mut sql = "SELECT service_id, team, criticality, service_type, published_sla, \
             discovered, metadata, created_at, updated_at FROM services WHERE 1=1"
            .to_string();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(t) = team {
            sql.push_str(&format!(" AND team = ?{}", param_values.len() + 1));
            param_values.push(Box::new(t.to_string()));
        }
        if let Some(c) = criticality {
            sql.push_str(&format!(" AND criticality = ?{}", param_values.len() + 1));
            param_values.push(Box::new(c.to_string()));
        }
        if let Some(d) = discovered {
            sql.push_str(&format!(" AND discovered = ?{}", param_values.len() + 1));
            param_values.push(Box::new(d));
        }
        sql.push_str(&format!(
            " ORDER BY service_id LIMIT ?{} OFFSET ?{}",
            param_values.len() + 1,
            param_values.len() + 2
        ));
        param_values.push(Box::new(limit));
        param_values.push(Box::new(skip));

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), map_service)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Service ids eligible for batch recomputation.
    pub fn list_batch_eligible(&self, include_discovered: bool) -> anyhow::Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let sql = if include_discovered {
            "SELECT service_id FROM services ORDER BY service_id"
        } else {
            "SELECT service_id FROM services WHERE discovered = 0 ORDER BY service_id"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Explicit registration outside the ingest path.
    pub fn register_service(&self, node: &NodeUpsert) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO services (service_id, team, criticality, service_type, published_sla, discovered, metadata) \
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6) \
             ON CONFLICT(service_id) DO UPDATE SET \
               team = ?2, criticality = ?3, service_type = ?4, published_sla = ?5, \
               discovered = 0, metadata = ?6, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')",
            params![
                node.service_id,
                node.team,
                node.criticality.as_str(),
                node.service_type.as_str(),
                node.published_sla,
                node.metadata.to_string(),
            ],
        )?;
        Ok(())
    }

    // ── Graph ingest (single transaction) ──

    pub fn apply_ingest(
        &self,
        nodes: &[NodeUpsert],
        edges: &[EdgeUpsert],
        now: &str,
    ) -> anyhow::Result<IngestOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut nodes_upserted = 0usize;
        let mut edges_upserted = 0usize;
        let mut conflicts = Vec::new();

        for node in nodes {
            if upsert_node(&tx, node, now)? {
                nodes_upserted += 1;
            }
        }

        // Placeholder rows for edge endpoints nobody registered yet.
        for edge in edges {
            for endpoint in [&edge.source_id, &edge.target_id] {
                let created = tx.execute(
                    "INSERT OR IGNORE INTO services (service_id, discovered) VALUES (?1, 1)",
                    params![endpoint],
                )?;
                if created > 0 {
                    nodes_upserted += 1;
                }
            }
        }

        for edge in edges {
            let (changed, conflict) = upsert_edge(&tx, edge, now)?;
            if changed {
                edges_upserted += 1;
            }
            if let Some(c) = conflict {
                conflicts.push(c);
            }
        }

        // Cycle detection over the merged, non-stale edge set as of this
        // transaction.
        let pairs = merged_edge_pairs(&tx)?;
        let sccs = cycles::strongly_connected_components(&pairs);
        let mut new_cycles = Vec::new();
        for members in &sccs {
            let key = cycles::cycle_key(members);
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO cycle_records (id, member_key, members) VALUES (?1, ?2, ?3)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    key,
                    serde_json::to_string(members)?,
                ],
            )?;
            if inserted > 0 {
                new_cycles.push(members.clone());
            }
        }

        tx.commit()?;
        Ok(IngestOutcome {
            nodes_upserted,
            edges_upserted,
            new_cycles,
            conflicts,
        })
    }

    // ── Edge operations ──

    /// Merged effective view: one edge per (source, target), highest
    /// discovery-source priority wins.
    pub fn edges_from(&self, service_id: &str, include_stale: bool) -> anyhow::Result<Vec<DependencyEdge>> {
        self.merged_edges("e.source_id = ?1", service_id, include_stale)
    }

    pub fn edges_to(&self, service_id: &str, include_stale: bool) -> anyhow::Result<Vec<DependencyEdge>> {
        self.merged_edges("e.target_id = ?1", service_id, include_stale)
    }

    fn merged_edges(
        &self,
        filter: &str,
        service_id: &str,
        include_stale: bool,
    ) -> anyhow::Result<Vec<DependencyEdge>> {
        let conn = self.conn.lock().unwrap();
        let stale_clause = if include_stale { "" } else { " AND e.is_stale = 0" };
        let sql = format!(
            "SELECT e.id, e.source_id, e.target_id, e.discovery_source, e.communication_mode, \
             e.criticality, e.protocol, e.timeout_ms, e.retry_config, e.redundancy_group, \
             e.confidence_score, e.last_observed_at, e.is_stale, e.created_at \
             FROM dependency_edges e \
             JOIN (SELECT source_id, target_id, MAX(priority) AS max_p \
                   FROM dependency_edges GROUP BY source_id, target_id) m \
               ON e.source_id = m.source_id AND e.target_id = m.target_id AND e.priority = m.max_p \
             WHERE {filter}{stale_clause} \
             ORDER BY e.source_id, e.target_id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![service_id], map_edge)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// All source-tagged rows for one pair, highest priority first. Used to
    /// report merge conflicts.
    pub fn list_edges_by_source(&self, service_id: &str) -> anyhow::Result<Vec<DependencyEdge>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, source_id, target_id, discovery_source, communication_mode, criticality, \
             protocol, timeout_ms, retry_config, redundancy_group, confidence_score, \
             last_observed_at, is_stale, created_at \
             FROM dependency_edges WHERE source_id = ?1 ORDER BY target_id, priority DESC",
        )?;
        let rows = stmt
            .query_map(params![service_id], map_edge)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Staleness sweep. Returns how many edges were newly marked.
    pub fn mark_stale_older_than(&self, threshold: &str) -> anyhow::Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE dependency_edges SET is_stale = 1 WHERE is_stale = 0 AND last_observed_at < ?1",
            params![threshold],
        )?;
        Ok(count)
    }

    // ── Cycle record operations ──

    pub fn list_cycles(&self) -> anyhow::Result<Vec<CycleRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, members, status, detected_at, updated_at FROM cycle_records ORDER BY detected_at DESC",
        )?;
        let rows = stmt
            .query_map([], map_cycle)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn open_cycles(&self) -> anyhow::Result<Vec<Vec<String>>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT members FROM cycle_records WHERE status != 'resolved'")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut cycles = Vec::with_capacity(rows.len());
        for raw in rows {
            cycles.push(serde_json::from_str(&raw)?);
        }
        Ok(cycles)
    }

    pub fn update_cycle_status(&self, id: &str, status: CycleStatus) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE cycle_records SET status = ?2, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now') WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        Ok(count > 0)
    }

    // ── Recommendation operations ──

    /// Supersede-then-insert, atomically: the previous active row for the
    /// pair flips to superseded in the same transaction that inserts the
    /// new active row.
    pub fn save_recommendation(&self, rec: &Recommendation) -> anyhow::Result<()> {
        self.save_recommendations(std::slice::from_ref(rec))
    }

    /// Batch variant: every supersede and insert commits together, so a
    /// failed pipeline leaves no partial writes behind.
    pub fn save_recommendations(&self, recs: &[Recommendation]) -> anyhow::Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for rec in recs {
            tx.execute(
                "UPDATE recommendations SET status = 'superseded' \
                 WHERE service_id = ?1 AND sli_type = ?2 AND status = 'active'",
                params![rec.service_id, rec.sli_type.as_str()],
            )?;
            tx.execute(
                "INSERT INTO recommendations (id, service_id, sli_type, metric, tiers, explanation, \
                 data_quality, lookback_window_start, lookback_window_end, generated_at, expires_at, status) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    rec.id,
                    rec.service_id,
                    rec.sli_type.as_str(),
                    rec.metric,
                    serde_json::to_string(&rec.tiers)?,
                    serde_json::to_string(&rec.explanation)?,
                    serde_json::to_string(&rec.data_quality)?,
                    rec.lookback_window_start,
                    rec.lookback_window_end,
                    rec.generated_at,
                    rec.expires_at,
                    rec.status.as_str(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_recommendation(&self, id: &str) -> anyhow::Result<Option<Recommendation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, service_id, sli_type, metric, tiers, explanation, data_quality, \
             lookback_window_start, lookback_window_end, generated_at, expires_at, status \
             FROM recommendations WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], map_recommendation)?;
        Ok(rows.next().transpose()?)
    }

    pub fn get_active_recommendations(
        &self,
        service_id: &str,
        sli_type: Option<SliType>,
    ) -> anyhow::Result<Vec<Recommendation>> {
        let conn = self.conn.lock().unwrap();
        let mut sql = "SELECT id, service_id, sli_type, metric, tiers, explanation, data_quality, \
             lookback_window_start, lookback_window_end, generated_at, expires_at, status \
             FROM recommendations WHERE service_id = ?1 AND status = 'active'"
            .to_string();
        if sli_type.is_some() {
            sql.push_str(" AND sli_type = ?2");
        }
        sql.push_str(" ORDER BY sli_type");
        let mut stmt = conn.prepare(&sql)?;
        let rows = match sli_type {
            Some(t) => stmt
                .query_map(params![service_id, t.as_str()], map_recommendation)?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt
                .query_map(params![service_id], map_recommendation)?
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    }

    /// Expire every active recommendation past its TTL, appending an audit
    /// entry per row in the same transaction. Returns the expired ids.
    pub fn expire_stale_recommendations(&self, now: &str) -> anyhow::Result<Vec<(String, String)>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let expired: Vec<(String, String)> = {
            let mut stmt = tx.prepare(
                "SELECT id, service_id FROM recommendations WHERE status = 'active' AND expires_at < ?1",
            )?;
            stmt.query_map(params![now], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?
        };

        for (rec_id, service_id) in &expired {
            tx.execute(
                "UPDATE recommendations SET status = 'expired' WHERE id = ?1",
                params![rec_id],
            )?;
            tx.execute(
                "INSERT INTO audit_entries (id, service_id, recommendation_id, action, actor, \
                 previous_state, new_state, rationale, created_at) \
                 VALUES (?1, ?2, ?3, 'expire', 'system', ?4, ?5, 'recommendation ttl elapsed', ?6)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    service_id,
                    rec_id,
                    serde_json::json!({"status": "active"}).to_string(),
                    serde_json::json!({"status": "expired"}).to_string(),
                    now,
                ],
            )?;
        }

        tx.commit()?;
        Ok(expired)
    }

    // ── Active SLO and audit operations ──

    /// Record a lifecycle decision: the audit entry always, the active SLO
    /// row when the decision produced one, atomically.
    pub fn record_decision(
        &self,
        active_slo: Option<&ActiveSlo>,
        audit: &AuditEntry,
    ) -> anyhow::Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        if let Some(slo) = active_slo {
            tx.execute(
                "INSERT INTO active_slos (id, service_id, sli_type, metric, target, tier, \
                 recommendation_id, approved_by, rationale) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                 ON CONFLICT(service_id, sli_type) DO UPDATE SET \
                   id = ?1, metric = ?4, target = ?5, tier = ?6, recommendation_id = ?7, \
                   approved_by = ?8, rationale = ?9, created_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')",
                params![
                    slo.id,
                    slo.service_id,
                    slo.sli_type.as_str(),
                    slo.metric,
                    slo.target,
                    slo.tier,
                    slo.recommendation_id,
                    slo.approved_by,
                    slo.rationale,
                ],
            )?;
        }
        insert_audit(&tx, audit)?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_active_slo(
        &self,
        service_id: &str,
        sli_type: SliType,
    ) -> anyhow::Result<Option<ActiveSlo>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, service_id, sli_type, metric, target, tier, recommendation_id, \
             approved_by, rationale, created_at FROM active_slos \
             WHERE service_id = ?1 AND sli_type = ?2",
        )?;
        let mut rows = stmt.query_map(params![service_id, sli_type.as_str()], map_active_slo)?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_active_slos(&self) -> anyhow::Result<Vec<ActiveSlo>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, service_id, sli_type, metric, target, tier, recommendation_id, \
             approved_by, rationale, created_at FROM active_slos ORDER BY service_id, sli_type",
        )?;
        let rows = stmt
            .query_map([], map_active_slo)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn append_audit(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        insert_audit(&conn, entry)
    }

    pub fn audit_history(&self, service_id: &str) -> anyhow::Result<Vec<AuditEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, service_id, recommendation_id, action, actor, previous_state, new_state, \
             rationale, created_at FROM audit_entries WHERE service_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map(params![service_id], map_audit)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

// ── Row mapping and transaction helpers ──

fn map_service(row: &rusqlite::Row<'_>) -> rusqlite::Result<Service> {
    let criticality: String = row.get(2)?;
    let service_type: String = row.get(3)?;
    let metadata: String = row.get(6)?;
    Ok(Service {
        service_id: row.get(0)?,
        team: row.get(1)?,
        criticality: Criticality::parse(&criticality).unwrap_or(Criticality::Medium),
        service_type: ServiceType::parse(&service_type).unwrap_or(ServiceType::Internal),
        published_sla: row.get(4)?,
        discovered: row.get(5)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::json!({})),
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn map_edge(row: &rusqlite::Row<'_>) -> rusqlite::Result<DependencyEdge> {
    let source: String = row.get(3)?;
    let mode: String = row.get(4)?;
    let criticality: String = row.get(5)?;
    let retry_config: Option<String> = row.get(8)?;
    Ok(DependencyEdge {
        id: row.get(0)?,
        source_id: row.get(1)?,
        target_id: row.get(2)?,
        discovery_source: DiscoverySource::parse(&source).unwrap_or(DiscoverySource::Manual),
        communication_mode: CommunicationMode::parse(&mode).unwrap_or(CommunicationMode::Sync),
        criticality: EdgeCriticality::parse(&criticality).unwrap_or(EdgeCriticality::Hard),
        protocol: row.get(6)?,
        timeout_ms: row.get(7)?,
        retry_config: retry_config.and_then(|r| serde_json::from_str(&r).ok()),
        redundancy_group: row.get(9)?,
        confidence_score: row.get(10)?,
        last_observed_at: row.get(11)?,
        is_stale: row.get(12)?,
        created_at: row.get(13)?,
    })
}

fn map_cycle(row: &rusqlite::Row<'_>) -> rusqlite::Result<CycleRecord> {
    let members: String = row.get(1)?;
    let status: String = row.get(2)?;
    Ok(CycleRecord {
        id: row.get(0)?,
        members: serde_json::from_str(&members).unwrap_or_default(),
        status: CycleStatus::parse(&status).unwrap_or(CycleStatus::Open),
        detected_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn map_recommendation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Recommendation> {
    let sli_type: String = row.get(2)?;
    let tiers: String = row.get(4)?;
    let explanation: String = row.get(5)?;
    let data_quality: String = row.get(6)?;
    let status: String = row.get(11)?;
    Ok(Recommendation {
        id: row.get(0)?,
        service_id: row.get(1)?,
        sli_type: SliType::parse(&sli_type).unwrap_or(SliType::Availability),
        metric: row.get(3)?,
        tiers: serde_json::from_str(&tiers).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?,
        explanation: serde_json::from_str(&explanation).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?,
        data_quality: serde_json::from_str(&data_quality).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?,
        lookback_window_start: row.get(7)?,
        lookback_window_end: row.get(8)?,
        generated_at: row.get(9)?,
        expires_at: row.get(10)?,
        status: RecommendationStatus::parse(&status).unwrap_or(RecommendationStatus::Expired),
    })
}

fn map_active_slo(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActiveSlo> {
    let sli_type: String = row.get(2)?;
    Ok(ActiveSlo {
        id: row.get(0)?,
        service_id: row.get(1)?,
        sli_type: SliType::parse(&sli_type).unwrap_or(SliType::Availability),
        metric: row.get(3)?,
        target: row.get(4)?,
        tier: row.get(5)?,
        recommendation_id: row.get(6)?,
        approved_by: row.get(7)?,
        rationale: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn map_audit(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEntry> {
    let action: String = row.get(3)?;
    let previous: Option<String> = row.get(5)?;
    let new: Option<String> = row.get(6)?;
    Ok(AuditEntry {
        id: row.get(0)?,
        service_id: row.get(1)?,
        recommendation_id: row.get(2)?,
        action: AuditAction::parse(&action).unwrap_or(AuditAction::Expire),
        actor: row.get(4)?,
        previous_state: previous.and_then(|p| serde_json::from_str(&p).ok()),
        new_state: new.and_then(|n| serde_json::from_str(&n).ok()),
        rationale: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn insert_audit(conn: &Connection, entry: &AuditEntry) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO audit_entries (id, service_id, recommendation_id, action, actor, \
         previous_state, new_state, rationale, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            entry.id,
            entry.service_id,
            entry.recommendation_id,
            entry.action.as_str(),
            entry.actor,
            entry.previous_state.as_ref().map(|v| v.to_string()),
            entry.new_state.as_ref().map(|v| v.to_string()),
            entry.rationale,
            entry.created_at,
        ],
    )?;
    Ok(())
}

/// Returns true when the row was inserted or its attribute set changed.
/// A re-observation of identical data still clears the discovered flag on
/// explicit registration but does not count as an upsert.
fn upsert_node(conn: &Connection, node: &NodeUpsert, _now: &str) -> anyhow::Result<bool> {
    let existing: Option<(String, String, String, Option<f64>, bool, String)> = conn
        .query_row(
            "SELECT team, criticality, service_type, published_sla, discovered, metadata \
             FROM services WHERE service_id = ?1",
            params![node.service_id],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            },
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    let metadata = node.metadata.to_string();
    match existing {
        None => {
            conn.execute(
                "INSERT INTO services (service_id, team, criticality, service_type, published_sla, discovered, metadata) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    node.service_id,
                    node.team,
                    node.criticality.as_str(),
                    node.service_type.as_str(),
                    node.published_sla,
                    !node.explicit,
                    metadata,
                ],
            )?;
            Ok(true)
        }
        Some((team, criticality, service_type, published_sla, discovered, old_metadata)) => {
            let discovered_after = discovered && !node.explicit;
            let unchanged = team == node.team
                && criticality == node.criticality.as_str()
                && service_type == node.service_type.as_str()
                && published_sla == node.published_sla
                && discovered == discovered_after
                && old_metadata == metadata;
            if unchanged {
                return Ok(false);
            }
            conn.execute(
                "UPDATE services SET team = ?2, criticality = ?3, service_type = ?4, \
                 published_sla = ?5, discovered = ?6, metadata = ?7, \
                 updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now') WHERE service_id = ?1",
                params![
                    node.service_id,
                    node.team,
                    node.criticality.as_str(),
                    node.service_type.as_str(),
                    node.published_sla,
                    discovered_after,
                    metadata,
                ],
            )?;
            Ok(true)
        }
    }
}

/// Returns (changed, conflict-note). The observation timestamp refreshes
/// either way and staleness clears on every sighting.
fn upsert_edge(
    conn: &Connection,
    edge: &EdgeUpsert,
    now: &str,
) -> anyhow::Result<(bool, Option<String>)> {
    let retry_config = edge.retry_config.as_ref().map(|v| v.to_string());
    let existing: Option<(String, String, String, Option<i64>, Option<String>, Option<String>, f64)> =
        conn.query_row(
            "SELECT communication_mode, criticality, protocol, timeout_ms, retry_config, \
             redundancy_group, confidence_score FROM dependency_edges \
             WHERE source_id = ?1 AND target_id = ?2 AND discovery_source = ?3",
            params![edge.source_id, edge.target_id, edge.discovery_source.as_str()],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            },
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    let changed = match existing {
        None => {
            conn.execute(
                "INSERT INTO dependency_edges (id, source_id, target_id, discovery_source, priority, \
                 communication_mode, criticality, protocol, timeout_ms, retry_config, redundancy_group, \
                 confidence_score, last_observed_at, is_stale) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 0)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    edge.source_id,
                    edge.target_id,
                    edge.discovery_source.as_str(),
                    edge.discovery_source.priority(),
                    edge.communication_mode.as_str(),
                    edge.criticality.as_str(),
                    edge.protocol,
                    edge.timeout_ms,
                    retry_config,
                    edge.redundancy_group,
                    edge.confidence_score,
                    now,
                ],
            )?;
            true
        }
        Some((mode, criticality, protocol, timeout_ms, old_retry, old_group, confidence)) => {
            let unchanged = mode == edge.communication_mode.as_str()
                && criticality == edge.criticality.as_str()
                && protocol == edge.protocol
                && timeout_ms == edge.timeout_ms
                && old_retry == retry_config
                && old_group == edge.redundancy_group
                && (confidence - edge.confidence_score).abs() < f64::EPSILON;
            conn.execute(
                "UPDATE dependency_edges SET communication_mode = ?4, criticality = ?5, protocol = ?6, \
                 timeout_ms = ?7, retry_config = ?8, redundancy_group = ?9, confidence_score = ?10, \
                 last_observed_at = ?11, is_stale = 0 \
                 WHERE source_id = ?1 AND target_id = ?2 AND discovery_source = ?3",
                params![
                    edge.source_id,
                    edge.target_id,
                    edge.discovery_source.as_str(),
                    edge.communication_mode.as_str(),
                    edge.criticality.as_str(),
                    edge.protocol,
                    edge.timeout_ms,
                    retry_config,
                    edge.redundancy_group,
                    edge.confidence_score,
                    now,
                ],
            )?;
            !unchanged
        }
    };

    // A lower-priority sighting that disagrees with the effective row is a
    // merge conflict worth surfacing.
    let higher: Option<(String, String)> = conn
        .query_row(
            "SELECT discovery_source, criticality FROM dependency_edges \
             WHERE source_id = ?1 AND target_id = ?2 AND priority > ?3 \
             ORDER BY priority DESC LIMIT 1",
            params![edge.source_id, edge.target_id, edge.discovery_source.priority()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;
    let conflict = higher.and_then(|(winning_source, winning_criticality)| {
        if winning_criticality != edge.criticality.as_str() {
            Some(format!(
                "edge {}->{}: {} reports criticality '{}' but '{}' from {} takes precedence",
                edge.source_id,
                edge.target_id,
                edge.discovery_source.as_str(),
                edge.criticality.as_str(),
                winning_criticality,
                winning_source,
            ))
        } else {
            None
        }
    });

    Ok((changed, conflict))
}

fn merged_edge_pairs(conn: &Connection) -> anyhow::Result<Vec<(String, String)>> {
    let mut stmt = conn
        .prepare("SELECT DISTINCT source_id, target_id FROM dependency_edges WHERE is_stale = 0")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
