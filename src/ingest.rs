//! Graph ingest: validate a discovery payload, upsert nodes and edges in a
//! single transaction, and report any strongly connected components the new
//! edges introduced. Cycles are informational and never block a payload.

use crate::error::EngineError;
use crate::models::dependency::{IngestPayload, IngestReport};
use crate::models::service::ServiceType;
use crate::store::{EdgeUpsert, NodeUpsert, Store};

pub fn ingest_graph(
    store: &Store,
    payload: IngestPayload,
    now: &str,
) -> Result<IngestReport, EngineError> {
    let mut warnings = Vec::new();

    // ── Validation, before any write ──

    for edge in &payload.edges {
        if edge.source == edge.target {
            return Err(EngineError::InvalidInput(format!(
                "self loop rejected: {} -> {}",
                edge.source, edge.target
            )));
        }
        if edge.source.is_empty() || edge.target.is_empty() {
            return Err(EngineError::InvalidInput(
                "edge with empty endpoint".to_string(),
            ));
        }
        if let Some(score) = edge.confidence_score {
            if !(0.0..=1.0).contains(&score) {
                return Err(EngineError::InvalidInput(format!(
                    "confidence_score {score} out of [0, 1] for edge {} -> {}",
                    edge.source, edge.target
                )));
            }
        }
    }

    for node in &payload.nodes {
        if node.service_id.is_empty() {
            return Err(EngineError::InvalidInput("node with empty service_id".to_string()));
        }
        if let Some(sla) = node.published_sla {
            let service_type = node.service_type.unwrap_or(ServiceType::Internal);
            if service_type != ServiceType::External {
                return Err(EngineError::InvalidInput(format!(
                    "published_sla is only valid for external services ({})",
                    node.service_id
                )));
            }
            if !(sla > 0.0 && sla <= 1.0) {
                return Err(EngineError::InvalidInput(format!(
                    "published_sla {sla} out of (0, 1] for {}",
                    node.service_id
                )));
            }
        }
    }

    // ── Normalization ──

    let nodes: Vec<NodeUpsert> = payload
        .nodes
        .iter()
        .map(|n| NodeUpsert {
            service_id: n.service_id.clone(),
            team: n.team.clone(),
            criticality: n
                .criticality
                .unwrap_or(crate::models::service::Criticality::Medium),
            service_type: n.service_type.unwrap_or(ServiceType::Internal),
            published_sla: n.published_sla,
            metadata: n.metadata.clone().unwrap_or(serde_json::json!({})),
            explicit: true,
        })
        .collect();

    let edges: Vec<EdgeUpsert> = payload
        .edges
        .iter()
        .map(|e| EdgeUpsert {
            source_id: e.source.clone(),
            target_id: e.target.clone(),
            discovery_source: payload.source,
            communication_mode: e.communication_mode,
            criticality: e.criticality,
            protocol: e.protocol.clone(),
            timeout_ms: e.timeout_ms,
            retry_config: e.retry_config.clone(),
            redundancy_group: e.redundancy_group.clone(),
            confidence_score: e
                .confidence_score
                .unwrap_or_else(|| payload.source.default_confidence()),
        })
        .collect();

    // Endpoints neither declared in this payload nor registered earlier
    // become placeholders; note them so operators can follow up.
    for edge in &edges {
        for endpoint in [&edge.source_id, &edge.target_id] {
            let declared = nodes.iter().any(|n| n.service_id == *endpoint);
            if !declared
                && store
                    .get_service(endpoint)
                    .map_err(EngineError::storage)?
                    .is_none()
            {
                warnings.push(format!(
                    "edge endpoint '{endpoint}' is unregistered; created as discovered placeholder"
                ));
            }
        }
    }
    warnings.sort();
    warnings.dedup();

    let outcome = store
        .apply_ingest(&nodes, &edges, now)
        .map_err(EngineError::storage)?;

    if !outcome.new_cycles.is_empty() {
        tracing::info!(
            "ingest from {} detected {} new dependency cycle(s)",
            payload.source.as_str(),
            outcome.new_cycles.len()
        );
    }

    Ok(IngestReport {
        nodes_upserted: outcome.nodes_upserted,
        edges_upserted: outcome.edges_upserted,
        newly_detected_cycles: outcome.new_cycles,
        warnings,
        conflicts: outcome.conflicts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::dependency::{
        CommunicationMode, DiscoverySource, EdgeCriticality, IngestEdge, IngestNode,
    };
    use crate::models::service::Criticality;

    const NOW: &str = "2026-07-01T00:00:00Z";

    fn node(service_id: &str) -> IngestNode {
        IngestNode {
            service_id: service_id.to_string(),
            team: "payments".to_string(),
            criticality: Some(Criticality::High),
            service_type: Some(ServiceType::Internal),
            published_sla: None,
            metadata: None,
        }
    }

    fn edge(source: &str, target: &str) -> IngestEdge {
        IngestEdge {
            source: source.to_string(),
            target: target.to_string(),
            communication_mode: CommunicationMode::Sync,
            criticality: EdgeCriticality::Hard,
            protocol: "grpc".to_string(),
            timeout_ms: Some(250),
            retry_config: None,
            redundancy_group: None,
            confidence_score: None,
        }
    }

    fn payload(source: DiscoverySource, nodes: Vec<IngestNode>, edges: Vec<IngestEdge>) -> IngestPayload {
        IngestPayload {
            source,
            nodes,
            edges,
        }
    }

    #[test]
    fn test_resubmitting_same_payload_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let build = || {
            payload(
                DiscoverySource::ServiceMesh,
                vec![node("checkout"), node("payments")],
                vec![edge("checkout", "payments")],
            )
        };

        let first = ingest_graph(&store, build(), NOW).unwrap();
        assert_eq!(first.nodes_upserted, 2);
        assert_eq!(first.edges_upserted, 1);

        let second = ingest_graph(&store, build(), "2026-07-01T01:00:00Z").unwrap();
        assert_eq!(second.nodes_upserted, 0);
        assert_eq!(second.edges_upserted, 0);

        // The re-observation still refreshed the sighting timestamp.
        let edges = store.edges_from("checkout", false).unwrap();
        assert_eq!(edges[0].last_observed_at, "2026-07-01T01:00:00Z");
    }

    #[test]
    fn test_self_loop_rejected_without_writes() {
        let store = Store::open_in_memory().unwrap();
        let err = ingest_graph(
            &store,
            payload(DiscoverySource::Manual, vec![node("a")], vec![edge("a", "a")]),
            NOW,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
        assert!(store.get_service("a").unwrap().is_none());
    }

    #[test]
    fn test_published_sla_requires_external_type() {
        let store = Store::open_in_memory().unwrap();
        let mut bad = node("stripe");
        bad.published_sla = Some(0.9999);
        let err = ingest_graph(&store, payload(DiscoverySource::Manual, vec![bad], vec![]), NOW)
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[test]
    fn test_placeholder_is_claimed_by_explicit_registration() {
        let store = Store::open_in_memory().unwrap();
        let first = ingest_graph(
            &store,
            payload(DiscoverySource::Kubernetes, vec![], vec![edge("web", "db")]),
            NOW,
        )
        .unwrap();
        assert_eq!(first.nodes_upserted, 2);
        assert_eq!(first.warnings.len(), 2);
        assert!(store.get_service("db").unwrap().unwrap().discovered);

        ingest_graph(
            &store,
            payload(DiscoverySource::Manual, vec![node("db")], vec![]),
            NOW,
        )
        .unwrap();
        assert!(!store.get_service("db").unwrap().unwrap().discovered);
    }

    #[test]
    fn test_new_cycle_reported_once() {
        let store = Store::open_in_memory().unwrap();
        let first = ingest_graph(
            &store,
            payload(
                DiscoverySource::ServiceMesh,
                vec![],
                vec![edge("a", "b"), edge("b", "c"), edge("c", "a")],
            ),
            NOW,
        )
        .unwrap();
        assert_eq!(first.newly_detected_cycles.len(), 1);
        assert_eq!(first.newly_detected_cycles[0], vec!["a", "b", "c"]);

        // Re-detection on the next payload does not duplicate the record.
        let second = ingest_graph(
            &store,
            payload(DiscoverySource::ServiceMesh, vec![], vec![edge("a", "b")]),
            NOW,
        )
        .unwrap();
        assert!(second.newly_detected_cycles.is_empty());
        assert_eq!(store.list_cycles().unwrap().len(), 1);
    }

    #[test]
    fn test_confidence_defaults_per_source() {
        let store = Store::open_in_memory().unwrap();
        ingest_graph(
            &store,
            payload(DiscoverySource::OtelServiceGraph, vec![], vec![edge("a", "b")]),
            NOW,
        )
        .unwrap();
        let edges = store.edges_from("a", false).unwrap();
        assert!((edges[0].confidence_score - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_conflicting_sources_surface_conflict_note() {
        let store = Store::open_in_memory().unwrap();
        ingest_graph(
            &store,
            payload(DiscoverySource::Manual, vec![], vec![edge("a", "b")]),
            NOW,
        )
        .unwrap();

        let mut soft = edge("a", "b");
        soft.criticality = EdgeCriticality::Soft;
        let report = ingest_graph(
            &store,
            payload(DiscoverySource::Kubernetes, vec![], vec![soft]),
            NOW,
        )
        .unwrap();
        assert_eq!(report.conflicts.len(), 1);
        assert!(report.conflicts[0].contains("manual"));
    }
}
