//! Prometheus text exposition format.
//!
//! Renders cluster snapshots for scraping. Every series carries a
//! `cluster` label; per-worker series add `worker`.

use std::fmt::Write;

use horus_core::INVALID_ID;
use horus_leaf::ClusterSnapshot;

fn header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

/// Render snapshots into Prometheus text format.
pub fn render_prometheus(snapshots: &[ClusterSnapshot]) -> String {
    let mut out = String::new();

    header(&mut out, "horus_idle_workers", "Workers on the idle stack.", "gauge");
    for s in snapshots {
        let _ = writeln!(out, "horus_idle_workers{{cluster=\"{}\"}} {}", s.cluster, s.idle_count);
    }

    header(
        &mut out,
        "horus_aggregate_queue_len",
        "Aggregate backlog in qlen units.",
        "gauge",
    );
    for s in snapshots {
        let _ = writeln!(
            out,
            "horus_aggregate_queue_len{{cluster=\"{}\"}} {}",
            s.cluster, s.aggregate_queue_len
        );
    }

    header(&mut out, "horus_idle_link_up", "1 when an idle link is held.", "gauge");
    for s in snapshots {
        let _ = writeln!(
            out,
            "horus_idle_link_up{{cluster=\"{}\"}} {}",
            s.cluster,
            u8::from(s.linked_iq_spine != INVALID_ID)
        );
    }

    header(&mut out, "horus_sq_link_up", "1 when an SQ link is held.", "gauge");
    for s in snapshots {
        let _ = writeln!(
            out,
            "horus_sq_link_up{{cluster=\"{}\"}} {}",
            s.cluster,
            u8::from(s.linked_sq_spine != INVALID_ID)
        );
    }

    header(
        &mut out,
        "horus_worker_queue_len",
        "Tracked outstanding tasks per worker.",
        "gauge",
    );
    for s in snapshots {
        for w in &s.workers {
            let _ = writeln!(
                out,
                "horus_worker_queue_len{{cluster=\"{}\",worker=\"{}\"}} {}",
                s.cluster,
                w.id,
                i32::from(w.queue_len[0]) + i32::from(w.deferred[0])
            );
        }
    }

    header(
        &mut out,
        "horus_tasks_dispatched_total",
        "Tasks placed, by dispatch path.",
        "counter",
    );
    for s in snapshots {
        for (path, count) in [
            ("idle", s.stats.dispatched_idle),
            ("sampled", s.stats.dispatched_sampled),
            ("random", s.stats.dispatched_random),
        ] {
            let _ = writeln!(
                out,
                "horus_tasks_dispatched_total{{cluster=\"{}\",path=\"{path}\"}} {count}",
                s.cluster
            );
        }
    }

    let counters = [
        ("horus_task_completions_total", "Task completions received."),
        ("horus_idle_completions_total", "Completions that left the worker idle."),
        ("horus_probes_sent_total", "Idle-queue probes sent to spines."),
        ("horus_probes_expired_total", "Probe rounds abandoned on timeout."),
        ("horus_queue_signals_total", "Backlog reports sent to the SQ spine."),
    ];
    for (name, help) in counters {
        header(&mut out, name, help, "counter");
        for s in snapshots {
            let value = match name {
                "horus_task_completions_total" => s.stats.completions,
                "horus_idle_completions_total" => s.stats.idle_completions,
                "horus_probes_sent_total" => s.stats.probes_sent,
                "horus_probes_expired_total" => s.stats.probes_expired,
                _ => s.stats.queue_signals,
            };
            let _ = writeln!(out, "{name}{{cluster=\"{}\"}} {value}", s.cluster);
        }
    }

    out
}
