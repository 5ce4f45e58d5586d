//! Dependency-aware availability math: the composite bound a service can
//! reach given its hard synchronous dependency chain, plus the pessimism
//! buffer applied to external published SLAs.

/// One resolved dependency entering the composite computation.
#[derive(Debug, Clone)]
pub struct DepAvailability {
    pub service_id: String,
    pub availability: f64,
    pub hard_sync: bool,
    /// Deps sharing a group label are redundant replicas: the group enters
    /// the serial product as `1 - prod(1 - a)`.
    pub redundancy_group: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Bottleneck {
    /// Service id for a serial dependency, group label for a redundant group.
    pub name: String,
    /// How much the final bound would improve if this factor were perfect.
    pub delta: f64,
}

#[derive(Debug, Clone)]
pub struct SoftRisk {
    pub service_id: String,
    pub availability: f64,
}

#[derive(Debug, Clone)]
pub struct CompositeResult {
    pub composite: f64,
    pub bottleneck: Option<Bottleneck>,
    pub hard_count: usize,
    pub soft_count: usize,
    /// Soft deps are excluded from the product and surfaced here instead.
    pub soft_risks: Vec<SoftRisk>,
}

/// Serial product over hard-sync factors: `R = R_self * prod(factor)`.
/// Redundant groups collapse to one factor before the product. The
/// bottleneck is the factor whose removal would lift the bound the most,
/// i.e. the smallest factor.
pub fn composite_availability(r_self: f64, deps: &[DepAvailability]) -> CompositeResult {
    let mut factors: Vec<(String, f64)> = Vec::new();
    let mut groups: Vec<(String, f64)> = Vec::new(); // (label, prod(1 - a))
    let mut soft_risks = Vec::new();
    let mut hard_count = 0usize;
    let mut soft_count = 0usize;

    for dep in deps {
        if !dep.hard_sync {
            soft_count += 1;
            soft_risks.push(SoftRisk {
                service_id: dep.service_id.clone(),
                availability: dep.availability,
            });
            continue;
        }
        hard_count += 1;
        match &dep.redundancy_group {
            Some(group) => {
                let unavail = 1.0 - dep.availability.clamp(0.0, 1.0);
                match groups.iter_mut().find(|(g, _)| g == group) {
                    Some((_, acc)) => *acc *= unavail,
                    None => groups.push((group.clone(), unavail)),
                }
            }
            None => factors.push((dep.service_id.clone(), dep.availability.clamp(0.0, 1.0))),
        }
    }

    for (group, joint_unavail) in groups {
        factors.push((group, 1.0 - joint_unavail));
    }

    let composite = factors
        .iter()
        .fold(r_self.clamp(0.0, 1.0), |acc, (_, f)| acc * f);

    let bottleneck = factors
        .iter()
        .filter(|(_, f)| *f > 0.0)
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
        .map(|(name, f)| Bottleneck {
            name: name.clone(),
            delta: composite / f - composite,
        });

    CompositeResult {
        composite,
        bottleneck,
        hard_count,
        soft_count,
        soft_risks,
    }
}

/// Collapse dependencies that belong to the same strongly connected
/// component into one supernode whose availability is the weakest member's.
pub fn collapse_cycles(deps: Vec<DepAvailability>, cycles: &[Vec<String>]) -> Vec<DepAvailability> {
    if cycles.is_empty() {
        return deps;
    }
    let mut out: Vec<DepAvailability> = Vec::with_capacity(deps.len());

    for dep in deps {
        let membership = cycles
            .iter()
            .position(|members| members.iter().any(|m| *m == dep.service_id));
        match membership {
            None => out.push(dep),
            Some(ci) => {
                let sid = supernode_id(&cycles[ci]);
                match out.iter_mut().find(|d| d.service_id == sid) {
                    Some(existing) => {
                        if dep.availability < existing.availability {
                            existing.availability = dep.availability;
                        }
                        existing.hard_sync = existing.hard_sync || dep.hard_sync;
                    }
                    None => out.push(DepAvailability {
                        service_id: sid,
                        availability: dep.availability,
                        hard_sync: dep.hard_sync,
                        redundancy_group: None,
                    }),
                }
            }
        }
    }
    out
}

fn supernode_id(members: &[String]) -> String {
    members.join("+")
}

/// Services reachable from `root` by following hard-sync edges only, in the
/// order discovered. These are the serial factors of the composite bound;
/// each transitive dependency enters the product once.
pub fn hard_sync_closure(edges: &[crate::models::dependency::DependencyEdge], root: &str) -> Vec<String> {
    let mut reachable: Vec<String> = Vec::new();
    let mut frontier: Vec<&str> = vec![root];
    while let Some(node) = frontier.pop() {
        for edge in edges {
            if edge.source_id == node && edge.is_hard_sync() {
                let target = &edge.target_id;
                if target != root && !reachable.iter().any(|r| r == target) {
                    reachable.push(target.clone());
                    frontier.push(target.as_str());
                }
            }
        }
    }
    reachable
}

/// Effective availability of an external dependency. A published SLA is
/// discounted by the pessimism multiplier `k` before being trusted:
/// `adjusted = 1 - (1 - sla) * k`.
pub fn effective_external_availability(
    observed: Option<f64>,
    published_sla: Option<f64>,
    buffer_k: f64,
    fallback: f64,
) -> f64 {
    let adjusted = published_sla.map(|s| (1.0 - (1.0 - s) * buffer_k).max(0.0));
    match (observed, adjusted) {
        (Some(o), Some(a)) => o.min(a),
        (Some(o), None) => o,
        (None, Some(a)) => a,
        (None, None) => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::dependency::{
        CommunicationMode, DependencyEdge, DiscoverySource, EdgeCriticality,
    };

    fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
        assert!(
            (actual - expected).abs() < epsilon,
            "expected {expected}, got {actual} (diff: {})",
            (actual - expected).abs()
        );
    }

    fn hard(id: &str, a: f64) -> DepAvailability {
        DepAvailability {
            service_id: id.to_string(),
            availability: a,
            hard_sync: true,
            redundancy_group: None,
        }
    }

    #[test]
    fn test_no_deps_identity() {
        let r = composite_availability(0.999, &[]);
        assert_approx(r.composite, 0.999, 1e-12);
        assert!(r.bottleneck.is_none());
        assert_eq!(r.hard_count, 0);
    }

    #[test]
    fn test_single_hard_dep_product() {
        let r = composite_availability(0.999, &[hard("b", 0.9995)]);
        assert_approx(r.composite, 0.999 * 0.9995, 1e-12);
        assert_eq!(r.bottleneck.unwrap().name, "b");
    }

    #[test]
    fn test_serial_chain_bound() {
        // A depends on B and C: 0.999 * 0.9995 * 0.9999
        let r = composite_availability(0.999, &[hard("b", 0.9995), hard("c", 0.9999)]);
        assert_approx(r.composite, 0.99840, 5e-5);
        assert_eq!(r.hard_count, 2);
        assert_eq!(r.bottleneck.unwrap().name, "b");
    }

    #[test]
    fn test_soft_deps_excluded_but_reported() {
        let mut soft = hard("cache", 0.95);
        soft.hard_sync = false;
        let r = composite_availability(0.999, &[hard("db", 0.9995), soft]);
        assert_approx(r.composite, 0.999 * 0.9995, 1e-12);
        assert_eq!(r.soft_count, 1);
        assert_eq!(r.soft_risks[0].service_id, "cache");
    }

    #[test]
    fn test_redundant_group_combines_in_parallel() {
        let mut a = hard("replica-a", 0.99);
        a.redundancy_group = Some("payments".to_string());
        let mut b = hard("replica-b", 0.99);
        b.redundancy_group = Some("payments".to_string());
        let r = composite_availability(1.0, &[a, b]);
        // 1 - (1 - 0.99)^2 = 0.9999
        assert_approx(r.composite, 0.9999, 1e-12);
        assert_eq!(r.hard_count, 2);
    }

    #[test]
    fn test_bottleneck_is_weakest_factor() {
        let r = composite_availability(0.9999, &[hard("a", 0.999), hard("b", 0.99), hard("c", 0.9995)]);
        let bn = r.bottleneck.unwrap();
        assert_eq!(bn.name, "b");
        assert!(bn.delta > 0.0);
    }

    #[test]
    fn test_collapse_cycles_uses_min_member() {
        let deps = vec![hard("x", 0.999), hard("y", 0.99), hard("z", 0.9999)];
        let cycles = vec![vec!["x".to_string(), "y".to_string()]];
        let collapsed = collapse_cycles(deps, &cycles);
        assert_eq!(collapsed.len(), 2);
        let supernode = collapsed.iter().find(|d| d.service_id == "x+y").unwrap();
        assert_approx(supernode.availability, 0.99, 1e-12);
    }

    fn sync_edge(source: &str, target: &str, criticality: EdgeCriticality) -> DependencyEdge {
        DependencyEdge {
            id: format!("{source}-{target}"),
            source_id: source.to_string(),
            target_id: target.to_string(),
            discovery_source: DiscoverySource::ServiceMesh,
            communication_mode: CommunicationMode::Sync,
            criticality,
            protocol: "grpc".to_string(),
            timeout_ms: None,
            retry_config: None,
            redundancy_group: None,
            confidence_score: 0.9,
            last_observed_at: "2026-07-01T00:00:00Z".to_string(),
            is_stale: false,
            created_at: "2026-07-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_hard_sync_closure_follows_transitive_chain() {
        let edges = vec![
            sync_edge("a", "b", EdgeCriticality::Hard),
            sync_edge("b", "c", EdgeCriticality::Hard),
            sync_edge("a", "cache", EdgeCriticality::Soft),
            sync_edge("cache", "d", EdgeCriticality::Hard),
        ];
        let mut closure = hard_sync_closure(&edges, "a");
        closure.sort();
        // The soft hop breaks the chain: d is only reachable through cache.
        assert_eq!(closure, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_hard_sync_closure_ignores_async_edges() {
        let mut queue = sync_edge("a", "worker", EdgeCriticality::Hard);
        queue.communication_mode = CommunicationMode::Async;
        let edges = vec![queue, sync_edge("a", "db", EdgeCriticality::Hard)];
        assert_eq!(hard_sync_closure(&edges, "a"), vec!["db".to_string()]);
    }

    #[test]
    fn test_external_buffer_published_only() {
        // 0.9999 published -> 1 - 0.0001 * 11 = 0.9989
        let eff = effective_external_availability(None, Some(0.9999), 11.0, 0.999);
        assert_approx(eff, 0.9989, 1e-9);
    }

    #[test]
    fn test_external_buffer_min_of_observed_and_adjusted() {
        let eff = effective_external_availability(Some(0.9985), Some(0.9999), 11.0, 0.999);
        assert_approx(eff, 0.9985, 1e-9);
        let eff = effective_external_availability(Some(0.9999), Some(0.9999), 11.0, 0.999);
        assert_approx(eff, 0.9989, 1e-9);
    }

    #[test]
    fn test_external_buffer_fallbacks() {
        assert_approx(
            effective_external_availability(Some(0.997), None, 11.0, 0.999),
            0.997,
            1e-12,
        );
        assert_approx(
            effective_external_availability(None, None, 11.0, 0.999),
            0.999,
            1e-12,
        );
    }

    #[test]
    fn test_external_buffer_floors_at_zero() {
        let eff = effective_external_availability(None, Some(0.5), 11.0, 0.999);
        assert_approx(eff, 0.0, 1e-12);
    }
}
