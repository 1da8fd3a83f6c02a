//! End-to-end scheduling through the `Leaf` API.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use horus_core::{ClusterId, HorusPacket, LeafConfig, MessageKind, NodeId, INVALID_ID, INVALID_LEN};
use horus_leaf::{
    ClusterSpec, Decision, Egress, Leaf, LeafError, LeafSettings, RangeAction, RangeTableKind,
    RangeTables, Register, ScriptedSampler,
};

const CLUSTER: ClusterId = ClusterId(0);
const LEAF_ID: NodeId = NodeId(100);
const X: NodeId = NodeId(10);
const Y: NodeId = NodeId(11);
const CLIENT: NodeId = NodeId(200);

fn egress(port: u16, host: u8) -> Egress {
    Egress {
        port,
        address: SocketAddr::from(([10, 0, 0, host], 1234)),
    }
}

fn settings() -> LeafSettings {
    LeafSettings {
        leaf_id: LEAF_ID,
        max_workers_per_cluster: 64,
        probe_timeout: Duration::from_millis(100),
    }
}

fn spec(idle: &[u16]) -> ClusterSpec {
    (0..4u16)
        .fold(ClusterSpec::new(CLUSTER, 2, 4), |spec, id| {
            spec.with_node(NodeId(id), egress(148, id as u8 + 1))
        })
        .with_node(X, egress(132, 10))
        .with_node(Y, egress(132, 11))
        .with_spines([X.0, Y.0])
        .with_idle_workers(idle.iter().copied())
}

fn leaf_with(idle: &[u16], script: &[u16]) -> Leaf {
    let script = script.to_vec();
    let leaf = Leaf::new(settings(), RangeTables::default())
        .with_sampler_factory(move |_| ScriptedSampler::new(script.clone()));
    leaf.provision_cluster(spec(idle)).unwrap();
    leaf
}

fn packet(kind: MessageKind, src: NodeId) -> HorusPacket {
    HorusPacket::new(kind, CLUSTER).from_node(src)
}

fn reg(leaf: &Leaf, register: Register, index: usize) -> i32 {
    leaf.read_register(CLUSTER, register, index).unwrap().unwrap()
}

#[test]
fn four_idle_workers_then_shortest_of_two() {
    let leaf = leaf_with(&[0, 1, 2, 3], &[1, 2, 1, 2]);
    let now = Instant::now();

    let mut order = Vec::new();
    for task in 0..4 {
        let before = reg(&leaf, Register::IdleCount, 0);
        let handled = leaf
            .handle(packet(MessageKind::NewTask, CLIENT).with_task(task), now)
            .unwrap();
        order.push(handled.decision.unwrap().worker().0);
        assert_eq!(reg(&leaf, Register::IdleCount, 0), before - 1);
    }
    assert_eq!(order, vec![3, 2, 1, 0]);
    assert_eq!(reg(&leaf, Register::AggregateQueueLen, 0), 0);

    let fifth = leaf.handle(packet(MessageKind::NewTask, CLIENT), now).unwrap();
    assert_eq!(
        fifth.decision,
        Some(Decision::Sampled {
            worker: NodeId(1),
            candidates: [(NodeId(1), 0), (NodeId(2), 0)],
        })
    );
    assert_eq!(reg(&leaf, Register::AggregateQueueLen, 0), 2);
    assert_eq!(reg(&leaf, Register::QueueLen1, 1), 1);
    assert_eq!(reg(&leaf, Register::QueueLen2, 1), 1);

    let sixth = leaf.handle(packet(MessageKind::NewTask, CLIENT), now).unwrap();
    assert_eq!(sixth.decision.unwrap().worker(), NodeId(2));
}

#[test]
fn idle_link_picks_spine_with_shorter_idle_list() {
    let leaf = leaf_with(&[], &[0, 1]);
    let now = Instant::now();

    let pushed = leaf
        .handle(packet(MessageKind::TaskDoneIdle, NodeId(2)), now)
        .unwrap();
    assert_eq!(pushed.outbound[0].packet.kind, MessageKind::ProbeIdleQueue);
    assert_eq!(pushed.outbound[0].packet.dst, X);

    leaf.handle(packet(MessageKind::ProbeIdleResponse, X).with_qlen(1), now)
        .unwrap();
    assert_eq!(reg(&leaf, Register::ProbedSpineId, 0), i32::from(X.0));
    assert_eq!(reg(&leaf, Register::ProbedSpineIdleLen, 0), 1);

    let linked = leaf
        .handle(packet(MessageKind::ProbeIdleResponse, Y).with_qlen(4), now)
        .unwrap();
    assert_eq!(linked.outbound[0].packet.kind, MessageKind::IdleSignal);
    assert_eq!(linked.outbound[0].packet.dst, X);
    assert_eq!(linked.outbound[0].egress, egress(132, 10));

    assert_eq!(reg(&leaf, Register::LinkedIqSpine, 0), i32::from(X.0));
    assert_eq!(reg(&leaf, Register::ProbedSpineId, 0), i32::from(INVALID_ID));
    assert_eq!(reg(&leaf, Register::ProbedSpineIdleLen, 0), i32::from(INVALID_LEN));
}

#[test]
fn sq_link_lifecycle() {
    let leaf = leaf_with(&[], &[3, 3]);
    let now = Instant::now();

    let init = leaf.handle(packet(MessageKind::ScanQueue, Y), now).unwrap();
    assert_eq!(init.outbound.len(), 1);
    assert_eq!(init.outbound[0].packet.kind, MessageKind::QueueSignalInit);
    assert_eq!(init.outbound[0].packet.qlen, 0);
    assert_eq!(reg(&leaf, Register::LinkedSqSpine, 0), i32::from(Y.0));

    leaf.handle(packet(MessageKind::NewTask, CLIENT), now).unwrap();
    let done = leaf.handle(packet(MessageKind::TaskDone, NodeId(3)), now).unwrap();
    assert_eq!(done.outbound.len(), 1);
    assert_eq!(done.outbound[0].packet.kind, MessageKind::QueueSignalUpdate);
    assert_eq!(done.outbound[0].packet.dst, Y);

    leaf.handle(packet(MessageKind::QueueRemove, X), now).unwrap();
    assert_eq!(reg(&leaf, Register::LinkedSqSpine, 0), i32::from(Y.0));
    leaf.handle(packet(MessageKind::QueueRemove, Y), now).unwrap();
    assert_eq!(reg(&leaf, Register::LinkedSqSpine, 0), i32::from(INVALID_ID));

    let silent = leaf.handle(packet(MessageKind::NewTask, CLIENT), now).unwrap();
    assert_eq!(silent.outbound.len(), 1);
}

#[test]
fn unanswered_probe_expires_on_tick() {
    let leaf = leaf_with(&[], &[1, 0]);
    let start = Instant::now();
    leaf.handle(packet(MessageKind::TaskDoneIdle, NodeId(0)), start)
        .unwrap();

    let retry = leaf.tick(start + Duration::from_millis(200));
    assert_eq!(retry.len(), 1);
    assert_eq!(retry[0].packet.dst, X);

    let snapshot = leaf.snapshot(CLUSTER).unwrap();
    assert_eq!(snapshot.stats.probes_expired, 1);
    assert_eq!(snapshot.stats.probes_sent, 2);
}

#[test]
fn unknown_cluster_is_rejected() {
    let leaf = leaf_with(&[], &[]);
    let stray = HorusPacket::new(MessageKind::NewTask, ClusterId(9));
    assert!(matches!(
        leaf.handle(stray, Instant::now()),
        Err(LeafError::UnknownCluster(ClusterId(9)))
    ));
}

#[test]
fn duplicate_provisioning_is_rejected() {
    let leaf = leaf_with(&[], &[]);
    assert!(matches!(
        leaf.provision_cluster(spec(&[])),
        Err(LeafError::AlreadyProvisioned(CLUSTER))
    ));
}

#[test]
fn shrinking_worker_count_drops_idle_workers() {
    let leaf = leaf_with(&[0, 1, 2, 3], &[]);
    let dropped = leaf.set_num_valid_local_workers(CLUSTER, 2).unwrap();
    assert_eq!(dropped, vec![NodeId(2), NodeId(3)]);
    assert_eq!(reg(&leaf, Register::IdleCount, 0), 2);

    assert!(matches!(
        leaf.set_num_valid_local_workers(CLUSTER, 8),
        Err(LeafError::UnknownDestination { node: NodeId(4), .. })
    ));
    assert!(leaf.set_num_valid_local_workers(CLUSTER, 0).is_err());
}

#[test]
fn range_entries_in_use_cannot_be_removed() {
    let leaf = leaf_with(&[], &[]);
    assert!(matches!(
        leaf.remove_range(RangeTableKind::Workers, 4),
        Err(LeafError::RangeInUse { count: 4, cluster: CLUSTER, .. })
    ));
    assert_eq!(
        leaf.remove_range(RangeTableKind::Workers, 8).unwrap(),
        Some(RangeAction { width_bits: 3 })
    );
    assert!(matches!(
        leaf.provision_cluster(
            (0..8u16).fold(ClusterSpec::new(ClusterId(1), 2, 8), |spec, id| {
                spec.with_node(NodeId(id), egress(148, 1))
            })
        ),
        Err(LeafError::UnprovisionedRange { count: 8, .. })
    ));

    leaf.install_range(RangeTableKind::Workers, 8, RangeAction { width_bits: 3 })
        .unwrap();
    assert!(leaf
        .install_range(RangeTableKind::Workers, 8, RangeAction { width_bits: 2 })
        .is_err());
}

#[test]
fn link_registers_can_be_provisioned() {
    let leaf = leaf_with(&[], &[]);
    leaf.set_linked_sq_spine(CLUSTER, Some(X)).unwrap();
    leaf.set_linked_idle_spine(CLUSTER, Some(Y)).unwrap();
    assert_eq!(reg(&leaf, Register::LinkedSqSpine, 0), i32::from(X.0));
    assert_eq!(reg(&leaf, Register::LinkedIqSpine, 0), i32::from(Y.0));

    assert!(leaf.set_linked_sq_spine(CLUSTER, Some(NodeId(77))).is_err());
    assert!(matches!(
        leaf.set_linked_idle_spine(CLUSTER, Some(NodeId::INVALID)),
        Err(LeafError::ReservedId(INVALID_ID))
    ));

    leaf.set_linked_sq_spine(CLUSTER, None).unwrap();
    assert_eq!(reg(&leaf, Register::LinkedSqSpine, 0), i32::from(INVALID_ID));
}

#[test]
fn register_reads_outside_range_are_none() {
    let leaf = leaf_with(&[1], &[]);
    assert_eq!(reg(&leaf, Register::IdleList, 0), 1);
    assert_eq!(leaf.read_register(CLUSTER, Register::IdleList, 1).unwrap(), None);
    assert_eq!(leaf.read_register(CLUSTER, Register::QueueLen1, 64).unwrap(), None);
}

#[test]
fn scaffold_config_provisions() {
    let config = LeafConfig::scaffold(100);
    let leaf = Leaf::from_config(&config).unwrap();
    assert_eq!(leaf.cluster_ids(), vec![ClusterId(0)]);

    let snapshot = leaf.snapshot(ClusterId(0)).unwrap();
    assert_eq!(snapshot.idle_count, 4);
    assert_eq!(snapshot.workers.len(), 4);
    assert_eq!(snapshot.linked_iq_spine, INVALID_ID);

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["probe_phase"], "idle");
    assert_eq!(json["idle_list"], serde_json::json!([0, 1, 2, 3]));
}

#[test]
fn removed_cluster_stops_handling() {
    let leaf = leaf_with(&[], &[]);
    leaf.remove_cluster(CLUSTER).unwrap();
    assert!(leaf.cluster_ids().is_empty());
    assert!(leaf.snapshot(CLUSTER).is_err());
}

#[test]
fn coarse_qlen_unit_keeps_aggregate_exact() {
    let leaf = Leaf::new(settings(), RangeTables::default());
    let spec = ClusterSpec::new(ClusterId(9), u8::MAX, 1)
        .with_node(NodeId(0), egress(148, 1))
        .with_node(X, egress(132, 10))
        .with_linked_sq_spine(X.0);
    leaf.provision_cluster(spec).unwrap();

    let now = Instant::now();
    let mut last_report = None;
    for _ in 0..300 {
        let handled = leaf
            .handle(HorusPacket::new(MessageKind::NewTask, ClusterId(9)).from_node(CLIENT), now)
            .unwrap();
        last_report = handled.outbound.last().map(|out| out.packet.qlen);
    }

    let snapshot = leaf.snapshot(ClusterId(9)).unwrap();
    assert_eq!(snapshot.total_queue_len(), 300);
    assert_eq!(snapshot.aggregate_queue_len, 300 * 255);
    assert_eq!(last_report, Some(0x7E));

    for _ in 0..299 {
        leaf.handle(HorusPacket::new(MessageKind::TaskDone, ClusterId(9)).from_node(NodeId(0)), now)
            .unwrap();
    }
    let snapshot = leaf.snapshot(ClusterId(9)).unwrap();
    assert_eq!(snapshot.total_queue_len(), 1);
    assert_eq!(snapshot.aggregate_queue_len, 255);
}
