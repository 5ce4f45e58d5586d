//! Strongly connected component detection over the dependency edge set.
//! Tarjan's algorithm, iterative so deep graphs cannot overflow the stack.

use std::collections::HashMap;

struct TarjanState {
    next: u32,
    index: Vec<Option<u32>>,
    lowlink: Vec<u32>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    call: Vec<(usize, usize)>,
}

/// All SCCs with more than one member, each sorted lexicographically, the
/// whole list sorted by its first member. Single-node components are not
/// cycles (self loops are rejected upstream).
pub fn strongly_connected_components(edges: &[(String, String)]) -> Vec<Vec<String>> {
    let mut names: Vec<&str> = Vec::new();
    let mut ids: HashMap<&str, usize> = HashMap::new();

    for (src, dst) in edges {
        for name in [src.as_str(), dst.as_str()] {
            if !ids.contains_key(name) {
                ids.insert(name, names.len());
                names.push(name);
            }
        }
    }

    let mut adj: Vec<Vec<usize>> = vec![Vec::new(); names.len()];
    for (src, dst) in edges {
        adj[ids[src.as_str()]].push(ids[dst.as_str()]);
    }

    let n = names.len();
    let mut state = TarjanState {
        next: 0,
        index: vec![None; n],
        lowlink: vec![0; n],
        on_stack: vec![false; n],
        stack: Vec::new(),
        call: Vec::new(),
    };
    let mut components: Vec<Vec<usize>> = Vec::new();

    for root in 0..n {
        if state.index[root].is_none() {
            visit(root, &adj, &mut state, &mut components);
        }
    }

    let mut cycles: Vec<Vec<String>> = components
        .into_iter()
        .filter(|c| c.len() > 1)
        .map(|c| {
            let mut members: Vec<String> = c.into_iter().map(|i| names[i].to_string()).collect();
            members.sort();
            members
        })
        .collect();
    cycles.sort();
    cycles
}

fn visit(root: usize, adj: &[Vec<usize>], state: &mut TarjanState, out: &mut Vec<Vec<usize>>) {
    state.index[root] = Some(state.next);
    state.lowlink[root] = state.next;
    state.next += 1;
    state.stack.push(root);
    state.on_stack[root] = true;
    state.call.push((root, 0));

    while let Some(&(v, child)) = state.call.last() {
        if child < adj[v].len() {
            state.call.last_mut().unwrap().1 += 1;
            let w = adj[v][child];
            if state.index[w].is_none() {
                state.index[w] = Some(state.next);
                state.lowlink[w] = state.next;
                state.next += 1;
                state.stack.push(w);
                state.on_stack[w] = true;
                state.call.push((w, 0));
            } else if state.on_stack[w] {
                state.lowlink[v] = state.lowlink[v].min(state.index[w].unwrap());
            }
        } else {
            state.call.pop();
            if let Some(&(parent, _)) = state.call.last() {
                state.lowlink[parent] = state.lowlink[parent].min(state.lowlink[v]);
            }
            if state.lowlink[v] == state.index[v].unwrap() {
                let mut component = Vec::new();
                loop {
                    let w = state.stack.pop().unwrap();
                    state.on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                out.push(component);
            }
        }
    }
}

/// Canonical identity of a cycle: sorted members joined with commas.
pub fn cycle_key(members: &[String]) -> String {
    let mut sorted = members.to_vec();
    sorted.sort();
    sorted.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edges(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }

    #[test]
    fn test_dag_has_no_cycles() {
        let sccs = strongly_connected_components(&edges(&[("a", "b"), ("b", "c"), ("a", "c")]));
        assert!(sccs.is_empty());
    }

    #[test]
    fn test_two_node_cycle() {
        let sccs = strongly_connected_components(&edges(&[("a", "b"), ("b", "a")]));
        assert_eq!(sccs, vec![vec!["a".to_string(), "b".to_string()]]);
    }

    #[test]
    fn test_three_node_cycle_sorted_canonically() {
        let sccs = strongly_connected_components(&edges(&[("c", "a"), ("a", "b"), ("b", "c")]));
        assert_eq!(
            sccs,
            vec![vec!["a".to_string(), "b".to_string(), "c".to_string()]]
        );
    }

    #[test]
    fn test_disjoint_cycles_reported_separately() {
        let sccs = strongly_connected_components(&edges(&[
            ("a", "b"),
            ("b", "a"),
            ("x", "y"),
            ("y", "x"),
            ("b", "x"),
        ]));
        assert_eq!(sccs.len(), 2);
        assert_eq!(sccs[0], vec!["a".to_string(), "b".to_string()]);
        assert_eq!(sccs[1], vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_cycle_with_tail_excludes_tail() {
        // d -> a -> b -> c -> a ; only {a, b, c} is strongly connected
        let sccs = strongly_connected_components(&edges(&[
            ("d", "a"),
            ("a", "b"),
            ("b", "c"),
            ("c", "a"),
        ]));
        assert_eq!(
            sccs,
            vec![vec!["a".to_string(), "b".to_string(), "c".to_string()]]
        );
    }

    #[test]
    fn test_long_chain_terminates() {
        let mut pairs: Vec<(String, String)> = Vec::new();
        for i in 0..5000 {
            pairs.push((format!("svc-{i}"), format!("svc-{}", i + 1)));
        }
        pairs.push(("svc-5000".to_string(), "svc-0".to_string()));
        let sccs = strongly_connected_components(&pairs);
        assert_eq!(sccs.len(), 1);
        assert_eq!(sccs[0].len(), 5001);
    }

    #[test]
    fn test_cycle_key_is_order_independent() {
        let k1 = cycle_key(&["b".to_string(), "a".to_string()]);
        let k2 = cycle_key(&["a".to_string(), "b".to_string()]);
        assert_eq!(k1, k2);
        assert_eq!(k1, "a,b");
    }
}
