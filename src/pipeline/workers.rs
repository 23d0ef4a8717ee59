//! # Pipeline Workers
//!
//! Region worker pool. Regions are queued on a channel; each worker opens its
//! own handle on the evidence and its own staging directory, and all workers
//! append to the same catalog.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use tracing::{debug, warn};

use crate::carve::ArtifactStore;
use crate::catalog::Catalog;
use crate::evidence;
use crate::partition::CarveRegion;
use crate::scanner::{SignatureScanner, SignatureSet};

use super::StopFlags;
use super::engine::{CarveSettings, RegionReport, carve_region};

pub struct SharedScan {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub signatures: Arc<SignatureSet>,
    pub scanner: Arc<dyn SignatureScanner>,
    pub catalog: Arc<Catalog>,
    pub chunk_size: u64,
    pub lookahead_block: usize,
    pub stop: StopFlags,
}

/// Job containing one region to carve
pub struct RegionJob {
    pub index: usize,
    pub region: CarveRegion,
}

type RegionResult = (usize, Result<RegionReport>);

/// Carve every region and return the results in region order.
pub fn run_region_workers(
    shared: Arc<SharedScan>,
    regions: Vec<CarveRegion>,
    workers: usize,
) -> Vec<Result<RegionReport>> {
    let total = regions.len();
    if total == 0 {
        return Vec::new();
    }
    let worker_count = workers.max(1).min(total);
    debug!("carving {total} regions with {worker_count} workers");

    let (job_tx, job_rx) = bounded::<RegionJob>(total);
    let (result_tx, result_rx) = unbounded::<RegionResult>();
    for (index, region) in regions.into_iter().enumerate() {
        // capacity equals the job count, so this never blocks
        if job_tx.send(RegionJob { index, region }).is_err() {
            break;
        }
    }
    drop(job_tx);

    let handles = spawn_region_workers(worker_count, shared, job_rx, result_tx);
    for handle in handles {
        if handle.join().is_err() {
            warn!("region worker panicked");
        }
    }

    let mut slots: Vec<Option<Result<RegionReport>>> = (0..total).map(|_| None).collect();
    for (index, result) in result_rx.try_iter() {
        if let Some(slot) = slots.get_mut(index) {
            *slot = Some(result);
        }
    }
    slots
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| Err(anyhow!("region worker exited without a result"))))
        .collect()
}

/// Spawn region carving worker threads
pub fn spawn_region_workers(
    workers: usize,
    shared: Arc<SharedScan>,
    rx: Receiver<RegionJob>,
    result_tx: Sender<RegionResult>,
) -> Vec<thread::JoinHandle<()>> {
    let mut handles = Vec::new();

    for worker in 0..workers.max(1) {
        let shared = shared.clone();
        let rx = rx.clone();
        let result_tx = result_tx.clone();

        handles.push(thread::spawn(move || {
            let label = format!("worker-{worker}");
            let setup = open_worker(&shared, &label);
            let (mut source, store) = match setup {
                Ok(parts) => parts,
                Err(err) => {
                    shared.stop.halt.store(true, Ordering::Relaxed);
                    let message = format!("{err:#}");
                    for job in rx {
                        let _ = result_tx.send((job.index, Err(anyhow!("{message}"))));
                    }
                    return;
                }
            };

            let settings = CarveSettings {
                signatures: &shared.signatures,
                scanner: shared.scanner.as_ref(),
                catalog: &shared.catalog,
                chunk_size: shared.chunk_size,
                lookahead_block: shared.lookahead_block,
                stop: &shared.stop,
            };

            for job in rx {
                let result = carve_region(&mut source, &job.region, &store, &settings);
                if result.is_err() {
                    shared.stop.halt.store(true, Ordering::Relaxed);
                }
                if let Err(err) = result_tx.send((job.index, result)) {
                    warn!("result channel closed while sending region result: {err}");
                    break;
                }
            }
            source.close();
            store.release();
        }));
    }

    handles
}

fn open_worker(shared: &SharedScan, label: &str) -> Result<(evidence::ByteSource, ArtifactStore)> {
    let source = evidence::open_source(&shared.input)
        .with_context(|| format!("{label}: open evidence {}", shared.input.display()))?;
    let store = ArtifactStore::open(&shared.output_dir, label)
        .with_context(|| format!("{label}: create staging directory"))?;
    Ok((source, store))
}
