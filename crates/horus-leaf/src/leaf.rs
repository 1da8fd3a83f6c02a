//! Leaf — the set of virtual clusters served by one switch.
//!
//! The leaf routes each packet to its cluster and processes it under that
//! cluster's lock, so events for one cluster are serialized while clusters
//! proceed independently. The range tables are shared by all clusters; a
//! cluster keeps the actions it resolved at provisioning time.
//!
//! Lock order is ranges, then the cluster map, then a cluster.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use horus_core::config::{LeafConfig, LeafSection};
use horus_core::{ClusterId, HorusPacket, NodeId, SpineId, WorkerId, INVALID_ID};

use crate::cluster::{ClusterInit, ClusterState, Handled, Outbound};
use crate::directory::Egress;
use crate::error::{LeafError, LeafResult};
use crate::provision::ClusterSpec;
use crate::range::{RangeAction, RangeTable, RangeTableKind, RangeTables};
use crate::sampler::{IndexSampler, RngSampler};
use crate::snapshot::{ClusterSnapshot, Register};

/// Builds the sampler a newly provisioned cluster draws from.
pub type SamplerFactory = Box<dyn Fn(ClusterId) -> Box<dyn IndexSampler> + Send + Sync>;

/// Leaf-wide parameters shared by every cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafSettings {
    /// Source id on packets the leaf originates.
    pub leaf_id: NodeId,
    pub max_workers_per_cluster: u16,
    pub probe_timeout: Duration,
}

impl LeafSettings {
    pub fn from_section(section: &LeafSection) -> Self {
        Self {
            leaf_id: NodeId(section.id),
            max_workers_per_cluster: section.max_workers_per_cluster,
            probe_timeout: Duration::from_millis(section.probe_timeout_ms),
        }
    }
}

impl Default for LeafSettings {
    fn default() -> Self {
        Self {
            leaf_id: NodeId(0),
            max_workers_per_cluster: 1000,
            probe_timeout: Duration::from_millis(500),
        }
    }
}

pub struct Leaf {
    settings: LeafSettings,
    ranges: RwLock<RangeTables>,
    clusters: RwLock<HashMap<ClusterId, Arc<Mutex<ClusterState>>>>,
    sampler_factory: SamplerFactory,
}

impl Leaf {
    /// A leaf with no clusters whose samplers are seeded from entropy.
    pub fn new(settings: LeafSettings, ranges: RangeTables) -> Self {
        Self {
            settings,
            ranges: RwLock::new(ranges),
            clusters: RwLock::new(HashMap::new()),
            sampler_factory: Box::new(|_: ClusterId| -> Box<dyn IndexSampler> {
                Box::new(RngSampler::from_entropy())
            }),
        }
    }

    /// Replace the sampler factory. Affects clusters provisioned afterwards.
    pub fn with_sampler_factory<F, S>(mut self, factory: F) -> Self
    where
        F: Fn(ClusterId) -> S + Send + Sync + 'static,
        S: IndexSampler + 'static,
    {
        self.sampler_factory = Box::new(move |cluster: ClusterId| -> Box<dyn IndexSampler> {
            Box::new(factory(cluster))
        });
        self
    }

    /// Build a leaf and provision every cluster in the config.
    pub fn from_config(config: &LeafConfig) -> LeafResult<Self> {
        let ranges = match &config.ranges {
            Some(tables) => RangeTables {
                workers: RangeTable::from_config(RangeTableKind::Workers, &tables.workers)?,
                spines: RangeTable::from_config(RangeTableKind::Spines, &tables.spines)?,
            },
            None => RangeTables::default(),
        };

        let mut leaf = Self::new(LeafSettings::from_section(&config.leaf), ranges);
        if let Some(seed) = config.leaf.seed {
            leaf = leaf.with_sampler_factory(move |cluster: ClusterId| {
                RngSampler::seeded(seed.wrapping_add(u64::from(cluster.0)))
            });
        }

        for cluster in &config.clusters {
            leaf.provision_cluster(ClusterSpec::from_config(cluster))?;
        }
        Ok(leaf)
    }

    pub fn settings(&self) -> LeafSettings {
        self.settings
    }

    /// Validate `spec` and bring the cluster up.
    pub fn provision_cluster(&self, spec: ClusterSpec) -> LeafResult<()> {
        let ranges = self.ranges.read().expect("ranges lock");
        let (directory, worker_range, spine_range) =
            spec.validate(self.settings.max_workers_per_cluster, &ranges)?;

        let mut clusters = self.clusters.write().expect("clusters lock");
        if clusters.contains_key(&spec.id) {
            return Err(LeafError::AlreadyProvisioned(spec.id));
        }

        let state = ClusterState::new(ClusterInit {
            id: spec.id,
            leaf_id: self.settings.leaf_id,
            qlen_unit: spec.qlen_unit,
            max_workers: self.settings.max_workers_per_cluster,
            num_valid_local_workers: spec.num_valid_local_workers,
            num_valid_upstream_spines: spec.num_valid_upstream_spines,
            worker_range,
            spine_range,
            directory,
            spines: spec.spines,
            idle_workers: spec.idle_workers,
            linked_idle_spine: spec.linked_idle_spine,
            linked_sq_spine: spec.linked_sq_spine,
            probe_timeout: self.settings.probe_timeout,
            sampler: (self.sampler_factory)(spec.id),
        });

        info!(
            cluster = %spec.id,
            workers = spec.num_valid_local_workers,
            spines = spec.num_valid_upstream_spines,
            idle = state.idle_count(),
            "cluster provisioned"
        );
        clusters.insert(spec.id, Arc::new(Mutex::new(state)));
        Ok(())
    }

    /// Drop a cluster and all of its state.
    pub fn remove_cluster(&self, cluster: ClusterId) -> LeafResult<()> {
        let removed = self.clusters.write().expect("clusters lock").remove(&cluster);
        if removed.is_none() {
            return Err(LeafError::UnknownCluster(cluster));
        }
        info!(%cluster, "cluster removed");
        Ok(())
    }

    pub fn cluster_ids(&self) -> Vec<ClusterId> {
        let mut ids: Vec<_> = self
            .clusters
            .read()
            .expect("clusters lock")
            .keys()
            .copied()
            .collect();
        ids.sort();
        ids
    }

    fn cluster(&self, cluster: ClusterId) -> LeafResult<Arc<Mutex<ClusterState>>> {
        self.clusters
            .read()
            .expect("clusters lock")
            .get(&cluster)
            .cloned()
            .ok_or(LeafError::UnknownCluster(cluster))
    }

    fn with_cluster<T>(
        &self,
        cluster: ClusterId,
        f: impl FnOnce(&mut ClusterState) -> LeafResult<T>,
    ) -> LeafResult<T> {
        let slot = self.cluster(cluster)?;
        let mut state = slot.lock().expect("cluster lock");
        f(&mut state)
    }

    // ── Data plane ─────────────────────────────────────────────────

    /// Process one inbound packet in its cluster.
    pub fn handle(&self, packet: HorusPacket, now: Instant) -> LeafResult<Handled> {
        if packet.kind.is_spine_bound() {
            return Err(LeafError::Misrouted(packet.kind));
        }
        self.with_cluster(packet.cluster, |state| state.handle(packet, now))
    }

    /// Run periodic housekeeping on every cluster.
    pub fn tick(&self, now: Instant) -> Vec<Outbound> {
        let slots: Vec<_> = self
            .clusters
            .read()
            .expect("clusters lock")
            .values()
            .cloned()
            .collect();
        slots
            .iter()
            .flat_map(|slot| slot.lock().expect("cluster lock").tick(now))
            .collect()
    }

    // ── Reads ──────────────────────────────────────────────────────

    pub fn snapshot(&self, cluster: ClusterId) -> LeafResult<ClusterSnapshot> {
        self.with_cluster(cluster, |state| Ok(ClusterSnapshot::capture(state)))
    }

    /// Snapshots of every cluster, ordered by id.
    pub fn snapshots(&self) -> Vec<ClusterSnapshot> {
        self.cluster_ids()
            .into_iter()
            .filter_map(|id| self.snapshot(id).ok())
            .collect()
    }

    /// Read one register. `Ok(None)` when `index` is out of range for an
    /// indexed register.
    pub fn read_register(
        &self,
        cluster: ClusterId,
        register: Register,
        index: usize,
    ) -> LeafResult<Option<i32>> {
        self.with_cluster(cluster, |state| Ok(register.read(state, index)))
    }

    // ── Provisioning updates ───────────────────────────────────────

    /// Insert or replace a directory entry. Returns the previous entry.
    pub fn upsert_node(
        &self,
        cluster: ClusterId,
        node: NodeId,
        egress: Egress,
    ) -> LeafResult<Option<Egress>> {
        reject_sentinel(node)?;
        self.with_cluster(cluster, |state| {
            let previous = state.directory.upsert(node, egress);
            debug!(%cluster, %node, port = egress.port, "directory entry written");
            Ok(previous)
        })
    }

    /// Change the valid worker count. Idle workers outside the new range are
    /// dropped and returned.
    pub fn set_num_valid_local_workers(
        &self,
        cluster: ClusterId,
        count: u16,
    ) -> LeafResult<Vec<WorkerId>> {
        let ranges = self.ranges.read().expect("ranges lock");
        let max = self.settings.max_workers_per_cluster;
        self.with_cluster(cluster, |state| {
            if count == 0 || count > max {
                return Err(LeafError::Provisioning {
                    cluster,
                    reason: format!("valid worker count {count} outside 1..={max}"),
                });
            }
            let range = ranges.workers.resolve(count)?;
            for worker in (0..count).map(NodeId) {
                state.directory.resolve(cluster, worker)?;
            }

            state.num_valid_local_workers = count;
            state.worker_range = range;
            let dropped = state.idle.resize(count);
            if !dropped.is_empty() {
                warn!(%cluster, ?dropped, "idle workers dropped by smaller worker count");
            }
            info!(%cluster, count, "valid worker count updated");
            Ok(dropped)
        })
    }

    /// Replace the upstream spine list; the valid count becomes its length.
    pub fn set_upstream_spines(&self, cluster: ClusterId, spines: Vec<SpineId>) -> LeafResult<()> {
        let ranges = self.ranges.read().expect("ranges lock");
        self.with_cluster(cluster, |state| {
            let count = u16::try_from(spines.len()).map_err(|_| LeafError::Provisioning {
                cluster,
                reason: format!("{} spines listed", spines.len()),
            })?;
            let range = if count == 0 {
                None
            } else {
                Some(ranges.spines.resolve(count)?)
            };
            for &spine in &spines {
                reject_sentinel(spine)?;
                state.directory.resolve(cluster, spine)?;
            }

            state.spines = spines;
            state.num_valid_upstream_spines = count;
            state.spine_range = range;
            info!(%cluster, count, "upstream spines updated");
            Ok(())
        })
    }

    pub fn set_qlen_unit(&self, cluster: ClusterId, unit: u8) -> LeafResult<()> {
        self.with_cluster(cluster, |state| {
            state.queues.set_qlen_unit(unit);
            Ok(())
        })
    }

    pub fn set_linked_idle_spine(
        &self,
        cluster: ClusterId,
        spine: Option<SpineId>,
    ) -> LeafResult<()> {
        self.with_cluster(cluster, |state| {
            if let Some(spine) = spine {
                reject_sentinel(spine)?;
                state.directory.resolve(cluster, spine)?;
            }
            state.idle_link.set_linked(spine);
            Ok(())
        })
    }

    pub fn set_linked_sq_spine(&self, cluster: ClusterId, spine: Option<SpineId>) -> LeafResult<()> {
        self.with_cluster(cluster, |state| {
            match spine {
                Some(spine) => {
                    reject_sentinel(spine)?;
                    state.directory.resolve(cluster, spine)?;
                    state.sq_link.on_scan(spine);
                }
                None => {
                    if let Some(linked) = state.sq_link.linked() {
                        state.sq_link.on_remove(linked);
                    }
                }
            }
            Ok(())
        })
    }

    // ── Range tables ───────────────────────────────────────────────

    pub fn install_range(
        &self,
        kind: RangeTableKind,
        count: u16,
        action: RangeAction,
    ) -> LeafResult<Option<RangeAction>> {
        let previous = self
            .ranges
            .write()
            .expect("ranges lock")
            .table_mut(kind)
            .install(count, action)?;
        debug!(table = %kind, count, width_bits = action.width_bits, "range entry installed");
        Ok(previous)
    }

    /// Remove a range entry. Fails while any cluster samples with it.
    pub fn remove_range(&self, kind: RangeTableKind, count: u16) -> LeafResult<Option<RangeAction>> {
        let mut ranges = self.ranges.write().expect("ranges lock");
        let clusters = self.clusters.read().expect("clusters lock");
        for (id, slot) in clusters.iter() {
            let state = slot.lock().expect("cluster lock");
            let in_use = match kind {
                RangeTableKind::Workers => state.num_valid_local_workers == count,
                RangeTableKind::Spines => state.num_valid_upstream_spines == count,
            };
            if in_use {
                return Err(LeafError::RangeInUse {
                    table: kind,
                    count,
                    cluster: *id,
                });
            }
        }
        Ok(ranges.table_mut(kind).remove(count))
    }
}

fn reject_sentinel(node: NodeId) -> LeafResult<()> {
    if node.is_invalid() {
        return Err(LeafError::ReservedId(INVALID_ID));
    }
    Ok(())
}
