// eval/graph.rs - React Flow graph → validated, indexed DAG
//
// Parses the flat { nodes, edges } format that React Flow uses into a dense
// node list ready for evaluation. Node ids are sorted so indices are stable
// across runs, node types are parsed into `NodeKind`s, and every edge handle
// is resolved into a port slot up front.
//
// Construction fails on malformed topology: duplicate node ids, edges naming
// unknown nodes or ports the target does not declare, two edges into one
// port, unknown node types, and cycles. Missing
// connections are not an error here; they surface as faults when the
// scheduler reaches the node.

use crate::error::{GraphError, GraphResult};
use crate::eval::nodes::{field_f32, Fields, NodeKind};
use crate::eval::ports::{classify_port, resolve_inputs, PortRef, ResolvedInputs, DEFAULT_PORT};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;
use std::collections::HashMap;

/// A node from the React Flow graph, as sent over IPC.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub data: NodeData,
    #[serde(rename = "type")]
    pub node_type: Option<String>,
}

/// The `data` payload of a React Flow node.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeData {
    /// Node kind, e.g. "SimplexNoise", "DomainWarp", "VectorDeform"
    #[serde(rename = "type", default)]
    pub kind: Option<String>,

    /// Parameter values (Frequency, Seed, Strength, Contribution, …)
    #[serde(default)]
    pub fields: Fields,

    /// User-designated output node flag
    #[serde(rename = "_outputNode", default)]
    pub is_output: bool,
}

/// An edge from the React Flow graph.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    #[serde(rename = "targetHandle")]
    pub target_handle: Option<String>,
}

/// A node after parsing: its kind, local contribution and resolved inputs.
#[derive(Debug, Clone)]
pub struct CompiledNode {
    pub id: String,
    pub kind: NodeKind,
    /// Node-local contribution in [0, 1], multiplied into the pass factor.
    pub contribution: f32,
    pub inputs: ResolvedInputs,
    pub is_output: bool,
}

/// Which caller-injected inputs a subgraph reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputRequirements {
    pub vector: bool,
    pub mask: bool,
}

/// Parsed, indexed graph ready for evaluation.
#[derive(Debug, Clone)]
pub struct EvalGraph {
    /// Nodes in id order.
    pub nodes: Vec<CompiledNode>,
    /// Node id → dense index into `nodes`.
    pub id_to_idx: FxHashMap<String, usize>,
    /// Default output node.
    pub root_idx: usize,
}

impl EvalGraph {
    #[inline]
    pub fn idx_of(&self, id: &str) -> Option<usize> {
        self.id_to_idx.get(id).copied()
    }

    #[inline]
    pub fn node(&self, idx: usize) -> &CompiledNode {
        &self.nodes[idx]
    }

    /// Upstream node connected to `port` of `node`, or `None`.
    #[inline]
    pub fn resolve(&self, node: usize, port: PortRef) -> Option<usize> {
        self.nodes[node].inputs.resolve(port)
    }

    /// Injected inputs needed to evaluate `output` and everything upstream.
    pub fn requires_external_inputs(&self, output: usize) -> InputRequirements {
        let mut req = InputRequirements::default();
        let mut seen = FxHashSet::default();
        let mut stack = vec![output];
        while let Some(idx) = stack.pop() {
            if !seen.insert(idx) {
                continue;
            }
            let node = &self.nodes[idx];
            req.vector |= node.kind.needs_vector_input();
            req.mask |= node.kind.needs_mask_input();
            stack.extend(node.inputs.sources());
        }
        req
    }
}

impl EvalGraph {
    /// Build an `EvalGraph` from raw React Flow nodes and edges.
    pub fn from_raw(
        nodes: Vec<GraphNode>,
        edges: Vec<GraphEdge>,
        root_node_id: Option<&str>,
    ) -> GraphResult<Self> {
        // ── 1. Dense index in id order ──

        let mut node_map: HashMap<String, GraphNode> = HashMap::with_capacity(nodes.len());
        for node in nodes {
            if node_map.contains_key(&node.id) {
                return Err(GraphError::DuplicateNode(node.id));
            }
            node_map.insert(node.id.clone(), node);
        }
        let mut sorted_ids: Vec<String> = node_map.keys().cloned().collect();
        sorted_ids.sort();

        let id_to_idx: FxHashMap<String, usize> = sorted_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        // ── 2. Port maps per target, rejecting bad edges ──

        let mut port_maps: Vec<HashMap<PortRef, usize>> = vec![HashMap::new(); sorted_ids.len()];
        for edge in &edges {
            let source = *id_to_idx
                .get(&edge.source)
                .ok_or_else(|| GraphError::UnknownNode(edge.source.clone()))?;
            let target = *id_to_idx
                .get(&edge.target)
                .ok_or_else(|| GraphError::UnknownNode(edge.target.clone()))?;
            let handle = edge.target_handle.as_deref().unwrap_or(DEFAULT_PORT);
            let port = classify_port(handle).ok_or_else(|| GraphError::UnknownPort {
                node: edge.target.clone(),
                port: handle.to_string(),
            })?;
            if port_maps[target].insert(port, source).is_some() {
                return Err(GraphError::DuplicateConnection {
                    node: edge.target.clone(),
                    port: port.to_string(),
                });
            }
        }

        // ── 3. Compile nodes ──

        let mut compiled = Vec::with_capacity(sorted_ids.len());
        for (id, port_map) in sorted_ids.iter().zip(&port_maps) {
            let Some(raw) = node_map.remove(id) else {
                continue;
            };
            let type_name = raw.data.kind.as_deref().unwrap_or("");
            let kind = NodeKind::parse(type_name, &raw.data.fields).ok_or_else(|| {
                GraphError::UnknownNodeType {
                    node: id.clone(),
                    kind: type_name.to_string(),
                }
            })?;
            let mut ports: Vec<PortRef> = port_map.keys().copied().collect();
            ports.sort_by_key(|port| port.to_string());
            if let Some(port) = ports.into_iter().find(|&port| !kind.accepts_port(port)) {
                return Err(GraphError::UnknownPort {
                    node: id.clone(),
                    port: port.to_string(),
                });
            }
            compiled.push(CompiledNode {
                contribution: field_f32(&raw.data.fields, "Contribution", 1.0).clamp(0.0, 1.0),
                id: raw.id,
                kind,
                inputs: resolve_inputs(port_map),
                is_output: raw.data.is_output,
            });
        }

        check_acyclic(&compiled)?;

        let root_idx = Self::find_root(&compiled, &id_to_idx, &edges, root_node_id)?;

        Ok(EvalGraph {
            nodes: compiled,
            id_to_idx,
            root_idx,
        })
    }

    /// Determine which node is the evaluation root.
    ///
    /// Strategy:
    ///   0. Explicit `root_node_id` parameter (must exist)
    ///   1. `_outputNode === true`
    ///   2. Terminal nodes (no outgoing edges)
    fn find_root(
        nodes: &[CompiledNode],
        id_to_idx: &FxHashMap<String, usize>,
        edges: &[GraphEdge],
        explicit_id: Option<&str>,
    ) -> GraphResult<usize> {
        if let Some(id) = explicit_id {
            return id_to_idx
                .get(id)
                .copied()
                .ok_or_else(|| GraphError::UnknownOutput(id.to_string()));
        }

        if let Some(idx) = nodes.iter().position(|n| n.is_output) {
            return Ok(idx);
        }

        let sources_with_outgoing: FxHashSet<&str> =
            edges.iter().map(|e| e.source.as_str()).collect();
        nodes
            .iter()
            .position(|n| !sources_with_outgoing.contains(n.id.as_str()))
            .ok_or(GraphError::NoRoot)
    }
}

/// Reject graphs whose input edges form a cycle.
fn check_acyclic(nodes: &[CompiledNode]) -> GraphResult<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        Active,
        Done,
    }

    let mut marks = vec![Mark::Unvisited; nodes.len()];
    for start in 0..nodes.len() {
        if marks[start] != Mark::Unvisited {
            continue;
        }
        // (node, expanded) pairs; a node is finished when popped expanded.
        let mut stack = vec![(start, false)];
        while let Some((idx, expanded)) = stack.pop() {
            if expanded {
                marks[idx] = Mark::Done;
                continue;
            }
            if marks[idx] == Mark::Done {
                continue;
            }
            marks[idx] = Mark::Active;
            stack.push((idx, true));
            for src in nodes[idx].inputs.sources() {
                match marks[src] {
                    Mark::Active => return Err(GraphError::Cycle(nodes[src].id.clone())),
                    Mark::Unvisited => stack.push((src, false)),
                    Mark::Done => {}
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::ports::{P_INPUT, P_INPUT_A, P_INPUT_B};

    fn make_node(id: &str, kind: &str) -> GraphNode {
        GraphNode {
            id: id.to_string(),
            data: NodeData {
                kind: Some(kind.to_string()),
                fields: Fields::new(),
                is_output: false,
            },
            node_type: None,
        }
    }

    fn make_output_node(id: &str, kind: &str) -> GraphNode {
        let mut node = make_node(id, kind);
        node.data.is_output = true;
        node
    }

    fn make_edge(source: &str, target: &str, handle: Option<&str>) -> GraphEdge {
        GraphEdge {
            source: source.to_string(),
            target: target.to_string(),
            target_handle: handle.map(|h| h.to_string()),
        }
    }

    #[test]
    fn explicit_root_node_id() {
        let nodes = vec![make_node("a", "Constant"), make_node("b", "Constant")];
        let graph = EvalGraph::from_raw(nodes, vec![], Some("b")).unwrap();
        assert_eq!(graph.node(graph.root_idx).id, "b");
    }

    #[test]
    fn explicit_root_must_exist() {
        let nodes = vec![make_node("a", "Constant")];
        let err = EvalGraph::from_raw(nodes, vec![], Some("zzz")).unwrap_err();
        assert_eq!(err, GraphError::UnknownOutput("zzz".into()));
    }

    #[test]
    fn output_node_takes_priority() {
        let nodes = vec![
            make_node("a", "Constant"),
            make_output_node("b", "Constant"),
        ];
        let graph = EvalGraph::from_raw(nodes, vec![], None).unwrap();
        assert_eq!(graph.node(graph.root_idx).id, "b");
    }

    #[test]
    fn terminal_node_is_root() {
        let nodes = vec![make_node("a", "Constant"), make_node("b", "Abs")];
        let edges = vec![make_edge("a", "b", None)];
        let graph = EvalGraph::from_raw(nodes, edges, None).unwrap();
        assert_eq!(graph.node(graph.root_idx).id, "b");
    }

    #[test]
    fn empty_graph_has_no_root() {
        let err = EvalGraph::from_raw(vec![], vec![], None).unwrap_err();
        assert_eq!(err, GraphError::NoRoot);
    }

    #[test]
    fn default_handle_when_missing() {
        let nodes = vec![make_node("a", "Constant"), make_node("b", "Invert")];
        let edges = vec![make_edge("a", "b", None)];
        let graph = EvalGraph::from_raw(nodes, edges, None).unwrap();
        let b = graph.idx_of("b").unwrap();
        assert_eq!(graph.node(b).inputs.get(P_INPUT), graph.idx_of("a"));
    }

    #[test]
    fn resolved_inputs_for_binary_node() {
        let nodes = vec![
            make_node("a", "Constant"),
            make_node("b", "Constant"),
            make_node("m", "Multiply"),
        ];
        let edges = vec![
            make_edge("a", "m", Some("InputA")),
            make_edge("b", "m", Some("InputB")),
        ];
        let graph = EvalGraph::from_raw(nodes, edges, None).unwrap();
        let m = graph.idx_of("m").unwrap();
        assert_eq!(graph.resolve(m, PortRef::Named(P_INPUT_A)), graph.idx_of("a"));
        assert_eq!(graph.resolve(m, PortRef::Named(P_INPUT_B)), graph.idx_of("b"));
    }

    #[test]
    fn resolved_inputs_for_sum_node() {
        let nodes = vec![
            make_node("a", "Constant"),
            make_node("b", "Constant"),
            make_node("s", "Sum"),
        ];
        let edges = vec![
            make_edge("b", "s", Some("Inputs[1]")),
            make_edge("a", "s", Some("Inputs[0]")),
        ];
        let graph = EvalGraph::from_raw(nodes, edges, None).unwrap();
        let s = graph.idx_of("s").unwrap();
        let ri = &graph.node(s).inputs;
        assert_eq!(ri.array_inputs.len(), 2);
        assert_eq!(ri.array_inputs[0] as usize, graph.idx_of("a").unwrap());
        assert_eq!(ri.array_inputs[1] as usize, graph.idx_of("b").unwrap());
    }

    #[test]
    fn duplicate_connection_rejected() {
        let nodes = vec![
            make_node("a", "Constant"),
            make_node("b", "Constant"),
            make_node("n", "Abs"),
        ];
        let edges = vec![make_edge("a", "n", None), make_edge("b", "n", Some("Input"))];
        let err = EvalGraph::from_raw(nodes, edges, None).unwrap_err();
        assert_eq!(
            err,
            GraphError::DuplicateConnection {
                node: "n".into(),
                port: "Input".into(),
            }
        );
    }

    #[test]
    fn unknown_node_in_edge_rejected() {
        let nodes = vec![make_node("a", "Abs")];
        let edges = vec![make_edge("ghost", "a", None)];
        let err = EvalGraph::from_raw(nodes, edges, None).unwrap_err();
        assert_eq!(err, GraphError::UnknownNode("ghost".into()));
    }

    #[test]
    fn unknown_port_rejected() {
        let nodes = vec![make_node("a", "Constant"), make_node("b", "Abs")];
        let edges = vec![make_edge("a", "b", Some("Sideways"))];
        assert!(matches!(
            EvalGraph::from_raw(nodes, edges, None),
            Err(GraphError::UnknownPort { .. })
        ));
    }

    #[test]
    fn undeclared_port_rejected() {
        let nodes = vec![make_node("a", "Constant"), make_node("b", "Constant")];
        let edges = vec![make_edge("a", "b", Some("Factor"))];
        assert_eq!(
            EvalGraph::from_raw(nodes, edges, Some("b")).unwrap_err(),
            GraphError::UnknownPort {
                node: "b".into(),
                port: "Factor".into(),
            }
        );

        let nodes = vec![make_node("a", "Constant"), make_node("s", "Sum")];
        let edges = vec![make_edge("a", "s", Some("Input"))];
        assert!(matches!(
            EvalGraph::from_raw(nodes, edges, None),
            Err(GraphError::UnknownPort { .. })
        ));

        let nodes = vec![make_node("a", "Constant"), make_node("n", "Abs")];
        let edges = vec![make_edge("a", "n", Some("Inputs[0]"))];
        assert!(matches!(
            EvalGraph::from_raw(nodes, edges, None),
            Err(GraphError::UnknownPort { .. })
        ));
    }

    #[test]
    fn stray_injected_source_is_rejected() {
        let nodes = vec![make_node("poly", "VectorInput"), make_node("c", "Constant")];
        let edges = vec![make_edge("poly", "c", Some("Vector"))];
        assert!(matches!(
            EvalGraph::from_raw(nodes, edges, Some("c")),
            Err(GraphError::UnknownPort { .. })
        ));
    }

    #[test]
    fn duplicate_node_id_rejected() {
        let nodes = vec![make_node("a", "Constant"), make_node("a", "Abs")];
        assert_eq!(
            EvalGraph::from_raw(nodes, vec![], None).unwrap_err(),
            GraphError::DuplicateNode("a".into())
        );
    }

    #[test]
    fn unknown_type_rejected() {
        let nodes = vec![make_node("x", "UnknownType")];
        assert!(matches!(
            EvalGraph::from_raw(nodes, vec![], None),
            Err(GraphError::UnknownNodeType { .. })
        ));
    }

    #[test]
    fn cycle_rejected() {
        let nodes = vec![
            make_node("a", "Abs"),
            make_node("b", "Abs"),
            make_node("c", "Constant"),
        ];
        let edges = vec![make_edge("a", "b", None), make_edge("b", "a", None)];
        assert!(matches!(
            EvalGraph::from_raw(nodes, edges, Some("c")),
            Err(GraphError::Cycle(_))
        ));
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let nodes = vec![
            make_node("src", "SimplexNoise"),
            make_node("l", "Abs"),
            make_node("r", "Invert"),
            make_node("join", "Add"),
        ];
        let edges = vec![
            make_edge("src", "l", None),
            make_edge("src", "r", None),
            make_edge("l", "join", Some("InputA")),
            make_edge("r", "join", Some("InputB")),
        ];
        let graph = EvalGraph::from_raw(nodes, edges, None).unwrap();
        assert_eq!(graph.node(graph.root_idx).id, "join");
    }

    #[test]
    fn local_contribution_is_clamped() {
        let mut node = make_node("a", "Abs");
        node.data
            .fields
            .insert("Contribution".into(), serde_json::json!(3.5));
        let graph = EvalGraph::from_raw(vec![node], vec![], None).unwrap();
        assert_eq!(graph.node(0).contribution, 1.0);
    }

    #[test]
    fn external_requirements_follow_reachability() {
        let nodes = vec![
            make_node("mask", "MaskInput"),
            make_node("poly", "VectorInput"),
            make_node("noise", "SimplexNoise"),
            make_node("deform", "VectorDeform"),
        ];
        let edges = vec![
            make_edge("poly", "deform", Some("Vector")),
            make_edge("noise", "deform", Some("Deformation")),
        ];
        let graph = EvalGraph::from_raw(nodes, edges, Some("deform")).unwrap();
        let req = graph.requires_external_inputs(graph.root_idx);
        assert_eq!(
            req,
            InputRequirements {
                vector: true,
                mask: false,
            }
        );
    }

    #[test]
    fn deserialize_from_json() {
        let json = r#"[
            {"id": "c", "data": {"type": "Constant", "fields": {"Value": 42}}}
        ]"#;
        let nodes: Vec<GraphNode> = serde_json::from_str(json).unwrap();
        assert_eq!(nodes[0].id, "c");
        assert_eq!(nodes[0].data.kind.as_deref(), Some("Constant"));
        assert_eq!(
            nodes[0].data.fields.get("Value").and_then(|v| v.as_f64()),
            Some(42.0)
        );
    }
}
