//! Apparatus topology: components connected by tubes.
//!
//! The [`ApparatusGraph`] is plain data. It is built incrementally and is
//! allowed to be temporarily inconsistent (duplicate names, tubes pointing at
//! components that have not been added yet); [`crate::validation`] decides
//! whether a snapshot is usable.
//!
//! ```rust
//! use rust_flow::apparatus::{ApparatusGraph, Component, Tube};
//!
//! let mut apparatus = ApparatusGraph::new("demo");
//! apparatus.add_component(Component::vessel("feed").as_source());
//! apparatus.add_component(Component::pump("pump", 10.0));
//! apparatus.connect("feed", "pump", Tube::new(120.0, 0.8, 1.6, "PFA"));
//! assert_eq!(apparatus.connections().len(), 1);
//! ```

pub mod component;
pub mod parameter;
pub mod tube;

pub use component::{Component, ComponentKind, ComponentRole};
pub use parameter::{Bounds, ParamKind, ParamValue, ParameterMap, ParameterSpec, ValueRejection};
pub use tube::{Connection, Tube};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Directed graph of hardware components and the tubes between them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApparatusGraph {
    pub name: String,
    #[serde(default)]
    components: Vec<Component>,
    #[serde(default)]
    connections: Vec<Connection>,
}

impl ApparatusGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            components: Vec::new(),
            connections: Vec::new(),
        }
    }

    /// Add a component. Duplicate names are accepted here and rejected by
    /// validation.
    pub fn add_component(&mut self, component: Component) -> &mut Self {
        self.components.push(component);
        self
    }

    /// Connect two components (by name) with a tube.
    pub fn connect(&mut self, from: impl Into<String>, to: impl Into<String>, tube: Tube) -> &mut Self {
        self.connections.push(Connection {
            from: from.into(),
            to: to.into(),
            tube,
        });
        self
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// First component declared under `name`.
    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.component(name).is_some()
    }

    /// Components that protocols can drive.
    pub fn active_components(&self) -> impl Iterator<Item = &Component> {
        self.components.iter().filter(|c| c.is_active())
    }

    /// Build a petgraph view of the apparatus.
    ///
    /// Connections whose endpoints are unknown are left out.
    pub fn topology(&self) -> Topology<'_> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for component in &self.components {
            index
                .entry(component.name.as_str())
                .or_insert_with(|| graph.add_node(component.name.as_str()));
        }
        for connection in &self.connections {
            if let (Some(&a), Some(&b)) = (
                index.get(connection.from.as_str()),
                index.get(connection.to.as_str()),
            ) {
                graph.add_edge(a, b, &connection.tube);
            }
        }
        Topology { graph, index }
    }
}

/// Borrowed petgraph view of an [`ApparatusGraph`].
pub struct Topology<'a> {
    pub graph: DiGraph<&'a str, &'a Tube>,
    pub index: HashMap<&'a str, NodeIndex>,
}

impl<'a> Topology<'a> {
    /// Number of tubes touching a component in either direction.
    pub fn degree(&self, name: &str) -> usize {
        self.index
            .get(name)
            .map(|&idx| {
                self.graph.neighbors_directed(idx, Direction::Incoming).count()
                    + self.graph.neighbors_directed(idx, Direction::Outgoing).count()
            })
            .unwrap_or(0)
    }

    /// Entry points: declared sources, or components without incoming tubes
    /// when no source is declared.
    pub fn entry_points(&self, apparatus: &'a ApparatusGraph) -> Vec<NodeIndex> {
        let declared: Vec<NodeIndex> = apparatus
            .components()
            .iter()
            .filter(|c| c.role == ComponentRole::Source)
            .filter_map(|c| self.index.get(c.name.as_str()).copied())
            .collect();
        if !declared.is_empty() {
            return declared;
        }
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .collect()
    }

    /// Names of every component reachable from an entry point.
    pub fn reachable(&self, apparatus: &'a ApparatusGraph) -> HashSet<&'a str> {
        let mut seen = HashSet::new();
        for start in self.entry_points(apparatus) {
            let mut bfs = Bfs::new(&self.graph, start);
            while let Some(idx) = bfs.next(&self.graph) {
                seen.insert(self.graph[idx]);
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tube() -> Tube {
        Tube::new(127.0, 1.5875, 3.175, "PFA")
    }

    #[test]
    fn reachability_follows_tube_direction() {
        let mut apparatus = ApparatusGraph::new("line");
        apparatus
            .add_component(Component::vessel("feed").as_source())
            .add_component(Component::pump("pump", 10.0))
            .add_component(Component::sensor("uv"))
            .add_component(Component::vessel("waste"));
        apparatus
            .connect("feed", "pump", tube())
            .connect("pump", "uv", tube())
            .connect("waste", "uv", tube());

        let topology = apparatus.topology();
        let reachable = topology.reachable(&apparatus);
        assert!(reachable.contains("pump"));
        assert!(reachable.contains("uv"));
        assert!(!reachable.contains("waste"));
    }

    #[test]
    fn roots_are_entry_points_without_declared_sources() {
        let mut apparatus = ApparatusGraph::new("line");
        apparatus
            .add_component(Component::pump("pump", 10.0))
            .add_component(Component::sensor("uv"));
        apparatus.connect("pump", "uv", tube());

        let topology = apparatus.topology();
        let reachable = topology.reachable(&apparatus);
        assert_eq!(reachable.len(), 2);
        assert_eq!(topology.degree("uv"), 1);
    }

    #[test]
    fn dangling_connections_are_left_out_of_topology() {
        let mut apparatus = ApparatusGraph::new("broken");
        apparatus.add_component(Component::pump("pump", 10.0));
        apparatus.connect("pump", "ghost", tube());
        assert_eq!(apparatus.topology().graph.edge_count(), 0);
    }
}
