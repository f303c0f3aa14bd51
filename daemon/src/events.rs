//! Event pipeline
//!
//! Bridges the classifier's record stream to the correlation engine: one
//! reader task per CPU pulls raw records off the perf array into an
//! internal queue, the dispatch loop decodes, filters and correlates them,
//! and a periodic sweep task prunes flows that never completed. Everything
//! stops on cancellation, after which the probe is closed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use aya::maps::perf::AsyncPerfEventArrayBuffer;
use aya::maps::MapData;
use aya::util::online_cpus;
use bytes::BytesMut;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use flowlat_common::constants::{RECORD_LEN, SWEEP_INTERVAL_SECS};

use crate::engine;
use crate::flowtable::FlowTable;
use crate::loader::Probe;
use crate::packet::PacketMetadata;
use crate::types::{FlowObservation, UserFilter};

/// Records buffered between the readers and the dispatch loop
const RECORD_QUEUE_DEPTH: usize = 256;

/// Per-reader scratch buffers for one perf read batch
const READ_BATCH: usize = 10;

/// Drive one probe run until cancellation
///
/// Attaches the probe, starts the sweep and the per-CPU readers, runs the
/// dispatch loop, and closes the probe when the token fires. Teardown is
/// attempted even when setup fails partway; the run error, or else the
/// first teardown error, is returned.
pub async fn run(
    ctx: CancellationToken,
    mut probe: Probe,
    table: Arc<FlowTable>,
    filter: UserFilter,
) -> Result<()> {
    tokio::spawn(sweep_loop(Arc::clone(&table), ctx.clone()));

    if let Err(e) = probe.attach() {
        if let Err(close_err) = probe.close() {
            warn!("teardown after failed attach: {close_err:#}");
        }
        return Err(e);
    }

    let run_result = dispatch(&ctx, &mut probe, &table, &filter).await;

    info!("Shutting down the probe");
    let close_result = probe.close();
    run_result.and(close_result)
}

async fn dispatch(
    ctx: &CancellationToken,
    probe: &mut Probe,
    table: &Arc<FlowTable>,
    filter: &UserFilter,
) -> Result<()> {
    let mut events = probe.take_event_array()?;

    let (tx, mut rx) = mpsc::channel::<BytesMut>(RECORD_QUEUE_DEPTH);

    let cpus = online_cpus()
        .map_err(|(msg, err)| anyhow::anyhow!("Failed listing online CPUs: {msg}: {err}"))?;
    info!("Spawning record readers for {} CPUs", cpus.len());
    for cpu_id in cpus {
        let buf = events
            .open(cpu_id, None)
            .with_context(|| format!("Failed opening perf buffer for CPU {cpu_id}"))?;
        tokio::spawn(read_records(buf, tx.clone(), ctx.clone(), cpu_id));
    }
    drop(tx);

    loop {
        tokio::select! {
            _ = ctx.cancelled() => {
                debug!("cancellation observed, stopping dispatch");
                return Ok(());
            }
            record = rx.recv() => {
                // None means every reader is gone: the kernel stream closed
                let Some(record) = record else { return Ok(()) };
                if let Some(observation) = handle_record(&record, filter, table) {
                    println!("{observation}");
                }
            }
        }
    }
}

/// Decode → filter → correlate one raw record
///
/// Undecodable records are logged and dropped; filtered-out and
/// non-completing records yield nothing.
pub fn handle_record(
    buf: &[u8],
    filter: &UserFilter,
    table: &FlowTable,
) -> Option<FlowObservation> {
    let pkt = match PacketMetadata::decode(buf) {
        Ok(pkt) => pkt,
        Err(e) => {
            warn!("Could not decode record ({} bytes): {e}", buf.len());
            return None;
        }
    };

    if !filter.matches(&pkt) {
        return None;
    }

    engine::observe(&pkt, table)
}

/// Reader loop for one CPU's perf buffer
///
/// Forwards every raw record to the dispatch queue. Exits on cancellation,
/// when the dispatch side is gone, or when the kernel stream closes or
/// errors; its termination never blocks process shutdown.
async fn read_records(
    mut buf: AsyncPerfEventArrayBuffer<MapData>,
    tx: mpsc::Sender<BytesMut>,
    ctx: CancellationToken,
    cpu_id: u32,
) {
    let mut buffers = (0..READ_BATCH)
        .map(|_| BytesMut::with_capacity(RECORD_LEN))
        .collect::<Vec<_>>();

    loop {
        tokio::select! {
            _ = ctx.cancelled() => return,
            events = buf.read_events(&mut buffers) => {
                let events = match events {
                    Ok(events) => events,
                    Err(e) => {
                        warn!("Record stream closed for CPU {cpu_id}: {e}");
                        return;
                    }
                };

                if events.lost > 0 {
                    debug!("lost {} records on CPU {cpu_id}", events.lost);
                }

                for buf in buffers.iter_mut().take(events.read) {
                    if tx.send(buf.split()).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// Periodic staleness sweep, independent of record traffic
async fn sweep_loop(table: Arc<FlowTable>, ctx: CancellationToken) {
    let mut ticker = interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // Consume the immediate first tick; the table is empty at startup
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ctx.cancelled() => return,
            _ = ticker.tick() => {
                table.prune();
                debug!("flow table sweep complete, {} open flows", table.entries());
            }
        }
    }
}
