//! Dependency graph over containers, built from `dockwarden.depends-on` labels and
//! shared network namespaces. Topological order drives stop/start sequencing for
//! dependency-aware update batches.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use dockwarden_docker::ContainerRef;

/// A directed graph of container names, edge `a -> b` meaning "a depends on b".
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeSet<String>,
    edges: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    pub cycle_members: Vec<String>,
}

impl DependencyGraph {
    /// Build a graph from a container scan. Dependency targets that don't match
    /// any known container name are silently dropped.
    pub fn from_containers(containers: &[ContainerRef]) -> Self {
        let known: BTreeSet<String> = containers.iter().map(|c| c.name.clone()).collect();
        let mut edges: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for container in containers {
            let deps: BTreeSet<String> = container
                .declared_dependencies()
                .into_iter()
                .filter(|d| known.contains(d) && d != &container.name)
                .collect();
            edges.insert(container.name.clone(), deps);
        }

        Self {
            nodes: known,
            edges,
        }
    }

    /// Topological sort via Kahn's algorithm, with ties broken alphabetically for
    /// determinism. A node with dependency `b` depends ON `b`, so `b` must appear
    /// before it in the "start order" returned here (dependencies start first).
    ///
    /// On a cycle, returns the partial order already computed plus a [`CycleError`]
    /// naming the nodes that never reached in-degree zero.
    pub fn topological_order(&self) -> Result<Vec<String>, (Vec<String>, CycleError)> {
        // in_degree[n] = number of things n depends on that haven't been placed yet.
        let mut in_degree: BTreeMap<String, usize> = self
            .nodes
            .iter()
            .map(|n| (n.clone(), self.edges.get(n).map(|d| d.len()).unwrap_or(0)))
            .collect();

        // dependents[d] = nodes that depend on d (an edge d -> consumer in start order).
        let mut dependents: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (node, deps) in &self.edges {
            for dep in deps {
                dependents.entry(dep.clone()).or_default().push(node.clone());
            }
        }
        for list in dependents.values_mut() {
            list.sort();
        }

        let mut ready: VecDeque<String> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(n, _)| n.clone())
            .collect();
        let mut ready_sorted: Vec<String> = ready.iter().cloned().collect();
        ready_sorted.sort();
        ready = ready_sorted.into();

        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(node) = ready.pop_front() {
            order.push(node.clone());
            if let Some(consumers) = dependents.get(&node) {
                let mut newly_ready = Vec::new();
                for consumer in consumers {
                    let deg = in_degree.get_mut(consumer).expect("consumer is a known node");
                    *deg -= 1;
                    if *deg == 0 {
                        newly_ready.push(consumer.clone());
                    }
                }
                newly_ready.sort();
                for n in newly_ready {
                    // keep the deque ordered by re-sorting after insertion
                    let pos = ready.iter().position(|x| x > &n).unwrap_or(ready.len());
                    ready.insert(pos, n);
                }
            }
        }

        if order.len() == self.nodes.len() {
            Ok(order)
        } else {
            let placed: BTreeSet<&String> = order.iter().collect();
            let remaining: Vec<String> = self
                .nodes
                .iter()
                .filter(|n| !placed.contains(n))
                .cloned()
                .collect();
            Err((
                order,
                CycleError {
                    cycle_members: remaining,
                },
            ))
        }
    }

    /// Reverse of [`Self::topological_order`]: stop order. Dependents stop before
    /// their dependencies.
    pub fn stop_order(&self) -> Result<Vec<String>, (Vec<String>, CycleError)> {
        self.topological_order().map(|mut order| {
            order.reverse();
            order
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn container(name: &str, depends_on: &str) -> ContainerRef {
        let mut labels = HashMap::new();
        if !depends_on.is_empty() {
            labels.insert("dockwarden.depends-on".to_string(), depends_on.to_string());
        }
        ContainerRef {
            id: name.to_string(),
            name: name.to_string(),
            image_reference: "example:latest".to_string(),
            image_digest: None,
            labels,
            network_mode: "bridge".to_string(),
            running: true,
        }
    }

    #[test]
    fn start_order_places_dependencies_first() {
        let containers = vec![
            container("web", "db,cache"),
            container("db", ""),
            container("cache", ""),
        ];
        let graph = DependencyGraph::from_containers(&containers);
        let order = graph.topological_order().unwrap();
        let web_pos = order.iter().position(|n| n == "web").unwrap();
        let db_pos = order.iter().position(|n| n == "db").unwrap();
        let cache_pos = order.iter().position(|n| n == "cache").unwrap();
        assert!(db_pos < web_pos);
        assert!(cache_pos < web_pos);
    }

    #[test]
    fn ties_are_broken_alphabetically() {
        let containers = vec![container("zeta", ""), container("alpha", ""), container("mu", "")];
        let graph = DependencyGraph::from_containers(&containers);
        let order = graph.topological_order().unwrap();
        assert_eq!(order, vec!["alpha".to_string(), "mu".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn cycle_is_detected_and_returns_partial_order() {
        let containers = vec![container("a", "b"), container("b", "a")];
        let graph = DependencyGraph::from_containers(&containers);
        let (partial, cycle) = graph.topological_order().unwrap_err();
        assert!(partial.is_empty());
        let mut members = cycle.cycle_members.clone();
        members.sort();
        assert_eq!(members, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn unknown_dependency_target_is_dropped() {
        let containers = vec![container("web", "ghost")];
        let graph = DependencyGraph::from_containers(&containers);
        let order = graph.topological_order().unwrap();
        assert_eq!(order, vec!["web".to_string()]);
    }

    #[test]
    fn stop_order_is_reverse_of_start_order() {
        let containers = vec![container("web", "db"), container("db", "")];
        let graph = DependencyGraph::from_containers(&containers);
        let start = graph.topological_order().unwrap();
        let stop = graph.stop_order().unwrap();
        let mut reversed = start.clone();
        reversed.reverse();
        assert_eq!(stop, reversed);
    }
}
