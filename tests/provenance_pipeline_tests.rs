//! Integration tests for trace-driven provenance construction

use capmap::builder::ProvenanceBuilder;
use capmap::provenance::DerefKind;
use capmap::{AnalysisConfig, NodeId, NodeOrigin, ProvenanceAnalysis, TraceEvent, VmMapEntry};

/// A small program: a root capability, a bounded child stored to memory
/// and reloaded into another register, then dereferenced and freed
const TRACE: &str = r#"[
    {"cycles": 10, "pc": 4096, "kind": {"type": "root",
        "dst": {"type": "capability", "reg": 1,
                "value": {"base": 0, "length": 1048576, "permissions": 15}}}},
    {"cycles": 20, "pc": 4100, "kind": {"type": "derive", "op": "set_bounds", "src": 1,
        "dst": {"type": "capability", "reg": 2,
                "value": {"base": 65536, "length": 256, "permissions": 12}}}},
    {"cycles": 30, "pc": 4104, "kind": {"type": "memory", "access": "store", "cap_reg": 1,
        "address": 131072, "is_capability": true, "value_reg": 2}},
    {"cycles": 40, "pc": 4108, "kind": {"type": "memory", "access": "load", "cap_reg": 1,
        "address": 131072, "is_capability": true, "value_reg": 5}},
    {"cycles": 50, "pc": 4112, "kind": {"type": "memory", "access": "load", "cap_reg": 5,
        "address": 65544}},
    {"cycles": 60, "pc": 4116, "kind": {"type": "free", "cap_reg": 5}}
]"#;

fn events() -> Vec<TraceEvent> {
    serde_json::from_str(TRACE).unwrap()
}

#[test]
fn test_trace_deserializes() {
    let events = events();
    assert_eq!(events.len(), 6);
    assert_eq!(events[0].cycles, 10);
    assert!(!events[0].is_kernel);
}

#[test]
fn test_reloaded_capability_keeps_its_provenance() {
    let mut builder = ProvenanceBuilder::default();
    builder.consume(&events()).unwrap();

    // $c5 was loaded from the slot $c2 was stored to
    assert_eq!(builder.register(5), Some(NodeId(1)));

    let (graph, _, stats) = builder.finish();
    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.parents(NodeId(1)), &[NodeId(0)]);
    assert_eq!(stats.derefs, 3);

    let child = graph.node(NodeId(1)).unwrap();
    assert_eq!(child.origin, NodeOrigin::SetBounds);
    assert_eq!(child.stores.get(&30), Some(&vec![131072]));
    assert_eq!(child.deref_log.len(), 1);
    assert_eq!(child.deref_log[0].address, 65544);
    assert_eq!(child.deref_log[0].kind, DerefKind::Load);
    assert_eq!(child.cap.t_alloc, 20);
    assert_eq!(child.cap.t_free, 60);

    let root = graph.node(NodeId(0)).unwrap();
    let times: Vec<i64> = root.deref_log.iter().map(|d| d.time).collect();
    assert_eq!(times, vec![30, 40]);
}

#[test]
fn test_invalid_operand_is_skipped() {
    let mut events = events();
    events.insert(
        1,
        serde_json::from_str(
            r#"{"cycles": 15, "pc": 4098, "kind": {"type": "root",
                "dst": {"type": "register", "reg": 3, "value": 7}}}"#,
        )
        .unwrap(),
    );

    let result = ProvenanceAnalysis::default().run(&events, &[]).unwrap();
    let summary = result.summary();
    assert_eq!(summary.skipped_events, 1);
    assert_eq!(summary.vertices, 2);
    assert_eq!(summary.events, 7);
}

#[test]
fn test_overflowed_capability_stays_in_graph() {
    let events: Vec<TraceEvent> = serde_json::from_str(
        r#"[
        {"cycles": 1, "pc": 0, "kind": {"type": "root",
            "dst": {"type": "capability", "reg": 0,
                    "value": {"base": 18446744073709551600, "length": 256}}}},
        {"cycles": 2, "pc": 4, "kind": {"type": "root",
            "dst": {"type": "capability", "reg": 1,
                    "value": {"base": 4096, "length": 4096}}}}
    ]"#,
    )
    .unwrap();

    let result = ProvenanceAnalysis::default().run(&events, &[]).unwrap();
    assert_eq!(result.summary().vertices, 2);
    assert_eq!(result.summary().overflowed, 1);
    let coords = result.node_coordinates().unwrap();
    assert_eq!(coords.len(), 1);
    assert_eq!(coords[0].node, NodeId(1));
}

#[test]
fn test_mmap_released_by_descendant_munmap() {
    let events: Vec<TraceEvent> = serde_json::from_str(
        r#"[
        {"cycles": 1, "pc": 0, "kind": {"type": "root",
            "dst": {"type": "capability", "reg": 0, "value": {"base": 0, "length": 1048576}}}},
        {"cycles": 5, "pc": 4, "kind": {"type": "syscall", "call": "mmap", "src": 0,
            "result": {"type": "capability", "reg": 3, "value": {"base": 262144, "length": 8192}}}},
        {"cycles": 8, "pc": 8, "kind": {"type": "derive", "op": "and_perm", "src": 3,
            "dst": {"type": "capability", "reg": 4, "value": {"base": 262144, "length": 8192}}}},
        {"cycles": 12, "pc": 12, "kind": {"type": "syscall", "call": "munmap", "src": 4,
            "result": {"type": "capability", "reg": 4, "value": {"base": 262144, "length": 8192}}}}
    ]"#,
    )
    .unwrap();

    let result = ProvenanceAnalysis::default().run(&events, &[]).unwrap();
    let graph = result.graph();
    let mmap = graph.node(NodeId(1)).unwrap();
    assert_eq!(mmap.origin, NodeOrigin::SysMmap);
    assert_eq!(mmap.cap.t_free, 12);
    assert_eq!(graph.descendants(NodeId(1)), vec![NodeId(2), NodeId(3)]);
    assert_eq!(result.summary().closed_mappings, 1);
}

#[test]
fn test_large_vmmap_region_keeps_its_edges() {
    let vmmap = vec![VmMapEntry::new(0x800000, 0x808000, "rw-", "")];
    let config = AnalysisConfig {
        address_limit: 1 << 32,
        ..AnalysisConfig::default()
    };
    let split = ProvenanceAnalysis::new(config.clone()).run(&[], &vmmap).unwrap();
    assert!(split.omit_ranges().contains(&(0x801000, 0x807000)));

    let whole = ProvenanceAnalysis::new(AnalysisConfig {
        split_large_capabilities: false,
        ..config
    })
    .run(&[], &vmmap)
    .unwrap();
    assert_eq!(whole.omit_ranges(), &[(0, 0x800000), (0x808000, 1 << 32)]);
}

#[test]
fn test_vmmap_region_survives_collapse() {
    let vmmap: Vec<VmMapEntry> = serde_json::from_str(
        r#"[{"start": 8388608, "end": 8396800, "perms": "r-x", "path": "/usr/bin/prog"}]"#,
    )
    .unwrap();
    let config = AnalysisConfig {
        address_limit: 1 << 32,
        ..AnalysisConfig::default()
    };
    let result = ProvenanceAnalysis::new(config).run(&events(), &vmmap).unwrap();

    let collapse = result.collapse();
    let start = collapse.forward_address(8388608).unwrap();
    let end = collapse.forward_address(8396800).unwrap();
    assert!((end - start - 8192.0).abs() < 1e-6);
    assert_eq!(vmmap[0].label(), "r-x prog");
}
