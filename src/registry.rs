//! Registry of units and their dependency order.
//!
//! The `UnitRegistry` is an append-only container filled before boot. It
//! rejects blank and duplicate names and produces the init order with a
//! topological sort over the declared dependency graph.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::{algo, Direction};

use crate::error::{RegistryError, RegistryResult};
use crate::unit::UnitSpec;

/// A registry of units, kept in registration order.
///
/// # Example
///
/// ```rust
/// use unitboot::{Runner, UnitRegistry, UnitSpec};
///
/// let mut registry = UnitRegistry::new();
/// registry
///     .register(UnitSpec::new("web", |_| async { Ok(Runner::idle()) }).depends_on(["db"]))
///     .unwrap();
/// registry
///     .register(UnitSpec::new("db", |_| async { Ok(Runner::idle()) }))
///     .unwrap();
///
/// assert_eq!(registry.ordered_names().unwrap(), vec!["db", "web"]);
/// ```
#[derive(Debug, Default)]
pub struct UnitRegistry {
    units: HashMap<String, UnitSpec>,
    ordered: Vec<String>,
}

impl UnitRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit, returning an error for a blank or taken name.
    ///
    /// A rejected unit leaves the registry untouched.
    pub fn register(&mut self, spec: UnitSpec) -> RegistryResult<()> {
        let name = spec.name().to_string();
        if name.trim().is_empty() {
            return Err(RegistryError::InvalidName(name));
        }
        if let Some(dep) = spec.dependencies().iter().find(|d| d.trim().is_empty()) {
            return Err(RegistryError::InvalidName(dep.clone()));
        }
        if self.units.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        self.ordered.push(name.clone());
        self.units.insert(name, spec);
        Ok(())
    }

    /// Get a unit by name.
    pub fn get(&self, name: &str) -> Option<&UnitSpec> {
        self.units.get(name)
    }

    /// Check if a unit with the given name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.units.contains_key(name)
    }

    /// Declared dependencies of a unit.
    pub fn dependencies_of(&self, name: &str) -> Option<&[String]> {
        self.units.get(name).map(|u| u.dependencies())
    }

    /// Get the names of all registered units, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.ordered.iter().map(|s| s.as_str()).collect()
    }

    /// Get the number of registered units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Iterate over all units in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &UnitSpec> {
        self.ordered.iter().filter_map(move |name| self.units.get(name))
    }

    /// Unit names in init order.
    pub fn ordered_names(&self) -> RegistryResult<Vec<&str>> {
        Ok(self
            .topological_order()?
            .into_iter()
            .map(|i| self.ordered[i].as_str())
            .collect())
    }

    /// Consume the registry, yielding units in init order.
    pub fn into_ordered(mut self) -> RegistryResult<Vec<UnitSpec>> {
        let order = self.topological_order()?;
        Ok(order
            .into_iter()
            .filter_map(|i| self.units.remove(&self.ordered[i]))
            .collect())
    }

    /// Build the dependency graph and order it.
    ///
    /// Nodes are added in registration order and edges point from a
    /// dependency to its dependent. `toposort` rejects cycles; the order
    /// itself releases the earliest registered ready unit first, so
    /// independent units keep registration order.
    fn topological_order(&self) -> RegistryResult<Vec<usize>> {
        let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(self.ordered.len(), 0);
        let nodes: HashMap<&str, NodeIndex> = self
            .ordered
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), graph.add_node(i)))
            .collect();

        for name in &self.ordered {
            let unit = nodes[name.as_str()];
            for dep in self.units[name].dependencies() {
                let Some(&dependency) = nodes.get(dep.as_str()) else {
                    return Err(RegistryError::UnknownDependency {
                        unit: name.clone(),
                        dependency: dep.clone(),
                    });
                };
                graph.update_edge(dependency, unit, ());
            }
        }

        if algo::toposort(&graph, None).is_err() {
            return Err(RegistryError::DependencyCycle(self.cycle_members(&graph)));
        }

        let mut pending: Vec<usize> = graph
            .node_indices()
            .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();
        let mut ready: BinaryHeap<Reverse<NodeIndex>> = graph
            .node_indices()
            .filter(|n| pending[n.index()] == 0)
            .map(Reverse)
            .collect();
        let mut order = Vec::with_capacity(graph.node_count());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(graph[node]);
            for next in graph.neighbors_directed(node, Direction::Outgoing) {
                pending[next.index()] -= 1;
                if pending[next.index()] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }
        Ok(order)
    }

    /// Units on a cycle, in registration order.
    fn cycle_members(&self, graph: &DiGraph<usize, ()>) -> Vec<String> {
        let mut members: Vec<usize> = algo::tarjan_scc(graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
            .flatten()
            .map(|n| graph[n])
            .collect();
        members.sort_unstable();
        members.into_iter().map(|i| self.ordered[i].clone()).collect()
    }
}
