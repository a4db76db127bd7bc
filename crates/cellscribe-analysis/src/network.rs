use cellscribe_core::NetworkTriple;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Gene,
    Concept,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkNode {
    pub id: String,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkEdge {
    pub source: String,
    pub target: String,
    pub relation: String,
}

/// Gene/concept graph assembled from extracted triples.
///
/// Nodes are keyed case-sensitively. A node is a gene when it appears as a
/// subject anywhere; objects that never appear as subjects are concepts.
/// Identical edges collapse into one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkGraph {
    pub nodes: Vec<NetworkNode>,
    pub edges: Vec<NetworkEdge>,
}

impl NetworkGraph {
    pub fn from_triples(triples: &[NetworkTriple]) -> Self {
        let genes: HashSet<&str> = triples.iter().map(|t| t.subject_gene.as_str()).collect();

        let mut nodes: BTreeMap<&str, NodeKind> = BTreeMap::new();
        let mut seen = HashSet::new();
        let mut edges = Vec::new();

        for triple in triples {
            nodes.insert(&triple.subject_gene, NodeKind::Gene);
            let object_kind = if genes.contains(triple.object.as_str()) {
                NodeKind::Gene
            } else {
                NodeKind::Concept
            };
            nodes.entry(&triple.object).or_insert(object_kind);

            let edge = NetworkEdge {
                source: triple.subject_gene.clone(),
                target: triple.object.clone(),
                relation: triple.relation.clone(),
            };
            if seen.insert(edge.clone()) {
                edges.push(edge);
            }
        }

        Self {
            nodes: nodes
                .into_iter()
                .map(|(id, kind)| NetworkNode {
                    id: id.to_string(),
                    kind,
                })
                .collect(),
            edges,
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn genes(&self) -> impl Iterator<Item = &str> {
        self.nodes
            .iter()
            .filter(|node| node.kind == NodeKind::Gene)
            .map(|node| node.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_dedups_edges_and_types_nodes() {
        let triples = vec![
            NetworkTriple::new("CDK1", "Involved in", "Cell cycle"),
            NetworkTriple::new("CCNB1", "Interacts with", "CDK1"),
            NetworkTriple::new("CDK1", "Involved in", "Cell cycle"),
        ];
        let graph = NetworkGraph::from_triples(&triples);

        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.genes().collect::<Vec<_>>(), vec!["CCNB1", "CDK1"]);
        let concept = graph.nodes.iter().find(|n| n.id == "Cell cycle").unwrap();
        assert_eq!(concept.kind, NodeKind::Concept);
    }

    #[test]
    fn test_empty_graph() {
        assert!(NetworkGraph::from_triples(&[]).is_empty());
    }
}
