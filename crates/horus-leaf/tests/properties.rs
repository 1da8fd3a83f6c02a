//! Property tests: random event sequences against one cluster.

use std::net::SocketAddr;
use std::time::Instant;

use proptest::prelude::*;

use horus_core::{ClusterId, HorusPacket, MessageKind, NodeId};
use horus_leaf::{
    ClusterSpec, Decision, Egress, Leaf, LeafSettings, RangeTables, RngSampler,
};

const CLUSTER: ClusterId = ClusterId(3);
const WORKERS: u16 = 8;
const QLEN_UNIT: u8 = 2;

#[derive(Debug, Clone)]
enum Event {
    NewTask,
    NewTaskRandom,
    TaskDone(u16),
    TaskDoneIdle(u16),
}

fn event() -> impl Strategy<Value = Event> {
    prop_oneof![
        3 => Just(Event::NewTask),
        1 => Just(Event::NewTaskRandom),
        3 => (0..WORKERS).prop_map(Event::TaskDone),
        1 => (0..WORKERS).prop_map(Event::TaskDoneIdle),
    ]
}

fn leaf(seed: u64, idle: &[u16]) -> Leaf {
    let egress = Egress {
        port: 148,
        address: SocketAddr::from(([10, 0, 0, 1], 1234)),
    };
    let spec = (0..WORKERS)
        .fold(ClusterSpec::new(CLUSTER, QLEN_UNIT, WORKERS), |spec, id| {
            spec.with_node(NodeId(id), egress)
        })
        .with_node(NodeId(20), egress)
        .with_node(NodeId(21), egress)
        .with_spines([20, 21])
        .with_idle_workers(idle.iter().copied());

    let leaf = Leaf::new(LeafSettings::default(), RangeTables::default())
        .with_sampler_factory(move |_| RngSampler::seeded(seed));
    leaf.provision_cluster(spec).unwrap();
    leaf
}

fn to_packet(event: &Event) -> HorusPacket {
    let (kind, src) = match *event {
        Event::NewTask => (MessageKind::NewTask, NodeId(500)),
        Event::NewTaskRandom => (MessageKind::NewTaskRandom, NodeId(500)),
        Event::TaskDone(w) => (MessageKind::TaskDone, NodeId(w)),
        Event::TaskDoneIdle(w) => (MessageKind::TaskDoneIdle, NodeId(w)),
    };
    HorusPacket::new(kind, CLUSTER).from_node(src)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn aggregate_matches_tracked_tasks(
        seed in any::<u64>(),
        events in prop::collection::vec(event(), 0..150),
    ) {
        let leaf = leaf(seed, &[]);
        let now = Instant::now();

        for event in &events {
            leaf.handle(to_packet(event), now).unwrap();

            let snapshot = leaf.snapshot(CLUSTER).unwrap();
            prop_assert!(snapshot.mirrors_consistent());
            prop_assert_eq!(
                i128::from(snapshot.aggregate_queue_len),
                i128::from(QLEN_UNIT) * i128::from(snapshot.total_queue_len())
            );
            for worker in &snapshot.workers {
                prop_assert!(i32::from(worker.queue_len[0]) + i32::from(worker.deferred[0]) >= 0);
            }
        }
    }

    #[test]
    fn idle_first_then_shorter_of_two(
        seed in any::<u64>(),
        idle in prop::sample::subsequence((0..WORKERS).collect::<Vec<_>>(), 0..=WORKERS as usize)
            .prop_shuffle(),
        events in prop::collection::vec(event(), 0..100),
    ) {
        let leaf = leaf(seed, &idle);
        let now = Instant::now();

        for event in &events {
            let before = leaf.snapshot(CLUSTER).unwrap();
            let handled = leaf.handle(to_packet(event), now).unwrap();

            if !matches!(event, Event::NewTask) {
                continue;
            }
            match handled.decision {
                Some(Decision::Idle { worker }) => {
                    prop_assert_eq!(Some(&worker), before.idle_list.last());
                    let after = leaf.snapshot(CLUSTER).unwrap();
                    prop_assert_eq!(after.idle_count, before.idle_count - 1);
                }
                Some(Decision::Sampled { worker, candidates }) => {
                    prop_assert_eq!(before.idle_count, 0);
                    let [(first, first_len), (second, second_len)] = candidates;
                    prop_assert!(worker == first || worker == second);
                    let (chosen, other) = if worker == first {
                        (first_len, second_len)
                    } else {
                        (second_len, first_len)
                    };
                    prop_assert!(chosen <= other);
                }
                other => prop_assert!(false, "unexpected decision {:?}", other),
            }
        }
    }
}
