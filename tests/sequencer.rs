//! Integration tests for graph sequencing and script generation.

use codeforge::error::SequencingError;
use codeforge::loader::script_engine;
use codeforge::pipeline::{
    DependencyGraphSequencer, InMemoryOperatorRegistry, OperatorSignature, PipelineEdge,
    PipelineGraph, PipelineNode, ScriptFormat, ScriptGenerator,
};
use serde_json::json;
use tempfile::TempDir;

fn ids(nodes: &[PipelineNode]) -> Vec<&str> {
    nodes.iter().map(|n| n.id.as_str()).collect()
}

fn position(order: &[PipelineNode], id: &str) -> usize {
    order.iter().position(|n| n.id == id).unwrap()
}

#[test]
fn test_chain_is_ordered_from_edges() {
    let nodes = vec![
        PipelineNode::new("C", "Writer"),
        PipelineNode::new("A", "Reader"),
        PipelineNode::new("B", "Filter"),
    ];
    let edges = vec![PipelineEdge::new("A", "B"), PipelineEdge::new("B", "C")];

    let order = DependencyGraphSequencer::new().sequence(&nodes, &edges).unwrap();
    assert_eq!(ids(&order), vec!["A", "B", "C"]);
}

#[test]
fn test_every_edge_is_respected() {
    let nodes: Vec<PipelineNode> = ["e", "d", "c", "b", "a", "f"]
        .iter()
        .map(|id| PipelineNode::new(*id, "Op"))
        .collect();
    let edges = vec![
        PipelineEdge::new("a", "c"),
        PipelineEdge::new("b", "c"),
        PipelineEdge::new("c", "d"),
        PipelineEdge::new("a", "e"),
        PipelineEdge::new("e", "d"),
        PipelineEdge::new("d", "f"),
    ];

    let order = DependencyGraphSequencer::new().sequence(&nodes, &edges).unwrap();
    assert_eq!(order.len(), nodes.len());
    for edge in &edges {
        assert!(
            position(&order, &edge.source) < position(&order, &edge.target),
            "{} must precede {}",
            edge.source,
            edge.target
        );
    }
}

#[test]
fn test_depends_on_merges_with_edges() {
    let nodes = vec![
        PipelineNode::new("load", "Reader"),
        PipelineNode::new("score", "Scorer").with_dependency("clean"),
        PipelineNode::new("clean", "Filter"),
    ];
    let edges = vec![PipelineEdge::new("load", "clean")];

    let order = DependencyGraphSequencer::new().sequence(&nodes, &edges).unwrap();
    assert_eq!(ids(&order), vec!["load", "clean", "score"]);
}

#[test]
fn test_ordering_is_deterministic() {
    let nodes: Vec<PipelineNode> = ["x", "y", "z", "w"]
        .iter()
        .map(|id| PipelineNode::new(*id, "Op"))
        .collect();
    let edges = vec![PipelineEdge::new("w", "x")];
    let sequencer = DependencyGraphSequencer::new();

    let first = sequencer.sequence(&nodes, &edges).unwrap();
    for _ in 0..10 {
        assert_eq!(sequencer.sequence(&nodes, &edges).unwrap(), first);
    }
}

#[test]
fn test_cycle_is_rejected() {
    let nodes = vec![
        PipelineNode::new("A", "Op"),
        PipelineNode::new("B", "Op"),
        PipelineNode::new("C", "Op"),
    ];
    let edges = vec![
        PipelineEdge::new("A", "B"),
        PipelineEdge::new("B", "C"),
        PipelineEdge::new("C", "A"),
    ];

    match DependencyGraphSequencer::new().sequence(&nodes, &edges) {
        Err(SequencingError::Cycle { members }) => {
            assert_eq!(members.len(), 3);
        }
        other => panic!("expected cycle, got {:?}", other),
    }
}

#[test]
fn test_dangling_edge_is_rejected() {
    let nodes = vec![PipelineNode::new("A", "Op")];
    let edges = vec![PipelineEdge::new("A", "ghost")];

    assert!(matches!(
        DependencyGraphSequencer::new().sequence(&nodes, &edges),
        Err(SequencingError::DanglingEdge { .. })
    ));
}

fn registry() -> InMemoryOperatorRegistry {
    InMemoryOperatorRegistry::new()
        .with(
            OperatorSignature::new("Reader")
                .with_init_param("path", json!(null))
                .with_run_param("limit", json!(100)),
        )
        .with(
            OperatorSignature::new("Rewriter")
                .with_init_param("llm_serving", json!(null))
                .with_init_param("style", json!("concise"))
                .with_run_param("input_key", json!("text")),
        )
}

fn graph() -> PipelineGraph {
    PipelineGraph {
        nodes: vec![
            PipelineNode::new("rewrite", "Rewriter")
                .with_init_param("style", json!("formal"))
                .with_dependency("read"),
            PipelineNode::new("read", "Reader").with_init_param("path", json!("in.jsonl")),
        ],
        edges: Vec::new(),
    }
}

#[test]
fn test_rhai_script_compiles_and_follows_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out/pipeline.rhai");
    let registry = registry();

    let ordered = DependencyGraphSequencer::new().sequence_graph(&graph()).unwrap();
    let format = ScriptGenerator::new(&registry).write(&ordered, &path).unwrap();
    assert_eq!(format, ScriptFormat::Rhai);

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("fn main(llm_serving, storage)"));
    assert!(text.contains(r#""style": "formal""#));
    assert!(text.contains(r#""llm_serving": llm_serving"#));
    assert!(text.trim_end().ends_with("main(llm_serving, storage)"));
    assert!(text.find("op_read").unwrap() < text.find("op_rewrite").unwrap());

    script_engine()
        .compile(&text)
        .unwrap_or_else(|e| panic!("generated script does not compile: {}\n{}", e, text));
}

#[test]
fn test_shell_script_is_executable_and_stable() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pipeline.sh");
    let registry = registry();
    let ordered = DependencyGraphSequencer::new().sequence_graph(&graph()).unwrap();
    let generator = ScriptGenerator::new(&registry);

    assert_eq!(generator.write(&ordered, &path).unwrap(), ScriptFormat::Shell);
    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("#!/bin/sh"));
    assert_eq!(text, generator.generate(&ordered, ScriptFormat::Shell));

    let status = std::process::Command::new("sh")
        .arg("-n")
        .arg(&path)
        .status()
        .unwrap();
    assert!(status.success());
}

#[test]
fn test_graph_file_round_trip_from_yaml() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("graph.yaml");
    std::fs::write(
        &path,
        r#"
nodes:
  - id: b
    name: Filter
    depends_on: [a]
  - id: a
    name: Reader
    init_params:
      path: data.jsonl
edges: []
"#,
    )
    .unwrap();

    let graph = PipelineGraph::from_file(&path).unwrap();
    let order = DependencyGraphSequencer::new().sequence_graph(&graph).unwrap();
    assert_eq!(ids(&order), vec!["a", "b"]);
    assert_eq!(order[0].init_params["path"], json!("data.jsonl"));
}
