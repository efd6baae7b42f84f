//! Off-thread tile decoder pool.
//!
//! The render thread enqueues decode jobs with a dispatch priority; a fixed
//! pool of worker threads fetches the source, decodes it, and cuts per-LOD
//! tile bitmaps. Results travel back over per-job oneshot channels with
//! owned bitmaps; queued-but-not-started work can be cancelled, in-flight
//! work cannot.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use model::{ImageId, Lod, TileBitmap};

mod fetch;
mod queue;
mod tiling;

pub use fetch::FetchStatsSnapshot;
pub use tiling::{compute_tile_grid, decode_image_tiles, TileGrid};

use fetch::FetchStats;
use queue::JobQueue;

const WORKER_IDLE_POLL: Duration = Duration::from_millis(50);
const STATUS_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    Fetch(String),
    Decode(String),
    Cancelled,
    Disposed,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Fetch(message) => write!(formatter, "tile fetch failed: {message}"),
            DecodeError::Decode(message) => write!(formatter, "tile decode failed: {message}"),
            DecodeError::Cancelled => write!(formatter, "tile decode cancelled"),
            DecodeError::Disposed => write!(formatter, "tile decoder pool disposed"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Inbound worker message: what to load and for whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeRequest {
    pub url: String,
    pub image_id: ImageId,
    pub lod: Lod,
    pub job_id: u64,
}

/// One cut tile. Edge tiles carry a smaller world footprint than the full
/// tile world size; their bitmap is still `tile_size²`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTile {
    pub tile_x: u32,
    pub tile_y: u32,
    pub world_w: f64,
    pub world_h: f64,
    pub bitmap: TileBitmap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImageTiles {
    pub image_id: ImageId,
    pub lod: Lod,
    pub image_w: u32,
    pub image_h: u32,
    pub world_w: f64,
    pub world_h: f64,
    pub tile_world_size: f64,
    pub tiles_x: u32,
    pub tiles_y: u32,
    pub tiles: Vec<DecodedTile>,
}

pub type DecodeResult = Result<DecodedImageTiles, DecodeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    Fetching,
    Decoding,
}

/// Progress event; only the terminal result on the ticket completes a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeStatus {
    pub job_id: u64,
    pub image_id: ImageId,
    pub lod: Lod,
    pub stage: DecodeStage,
}

/// Oneshot handle for a queued decode job. The coordinator polls it in the
/// frame prologue; nothing blocks the frame on it.
#[derive(Debug)]
pub struct DecodeTicket {
    job_id: u64,
    image_id: ImageId,
    lod: Lod,
    receiver: Receiver<DecodeResult>,
}

impl DecodeTicket {
    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    pub fn image_id(&self) -> ImageId {
        self.image_id
    }

    pub fn lod(&self) -> Lod {
        self.lod
    }

    pub fn try_result(&self) -> Option<DecodeResult> {
        self.receiver.try_recv().ok()
    }

    pub fn wait_result(&self, timeout: Duration) -> Option<DecodeResult> {
        self.receiver.recv_timeout(timeout).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileDecodePoolConfig {
    pub workers: usize,
    pub tile_size: u32,
    pub base_world_size: f64,
}

impl Default for TileDecodePoolConfig {
    fn default() -> Self {
        Self {
            workers: model::POOL_SIZE,
            tile_size: model::TILE_SIZE,
            base_world_size: model::BASE_WORLD_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolCreateError {
    ZeroWorkers,
    ZeroTileSize,
    InvalidBaseWorldSize,
}

impl std::fmt::Display for PoolCreateError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolCreateError::ZeroWorkers => {
                write!(formatter, "decoder pool needs at least one worker")
            }
            PoolCreateError::ZeroTileSize => write!(formatter, "tile size must be at least 1"),
            PoolCreateError::InvalidBaseWorldSize => {
                write!(formatter, "base world size must be finite and positive")
            }
        }
    }
}

impl std::error::Error for PoolCreateError {}

#[derive(Debug)]
struct PoolShared {
    queue: Mutex<JobQueue>,
    stop_requested: AtomicBool,
    stats: FetchStats,
}

/// Fixed pool of named decoder threads fed from a priority queue.
pub struct TileDecodePool {
    shared: Arc<PoolShared>,
    next_job_id: AtomicU64,
    wake_sender: Sender<()>,
    status_receiver: Receiver<DecodeStatus>,
    workers: Vec<std::thread::JoinHandle<()>>,
}

impl TileDecodePool {
    pub fn start(config: TileDecodePoolConfig) -> Result<Self, PoolCreateError> {
        if config.workers == 0 {
            return Err(PoolCreateError::ZeroWorkers);
        }
        if config.tile_size == 0 {
            return Err(PoolCreateError::ZeroTileSize);
        }
        if !config.base_world_size.is_finite() || config.base_world_size <= 0.0 {
            return Err(PoolCreateError::InvalidBaseWorldSize);
        }

        let shared = Arc::new(PoolShared {
            queue: Mutex::new(JobQueue::default()),
            stop_requested: AtomicBool::new(false),
            stats: FetchStats::default(),
        });
        let (wake_sender, wake_receiver) = bounded::<()>(config.workers * 2);
        let (status_sender, status_receiver) = bounded(STATUS_CHANNEL_CAPACITY);

        let mut workers = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let worker_shared = Arc::clone(&shared);
            let worker_wake = wake_receiver.clone();
            let worker_status = status_sender.clone();
            let tile_size = config.tile_size;
            let base_world_size = config.base_world_size;
            let handle = std::thread::Builder::new()
                .name(format!("tile_decoder_{index}"))
                .spawn(move || {
                    worker_loop(
                        worker_shared,
                        worker_wake,
                        worker_status,
                        tile_size,
                        base_world_size,
                    )
                })
                .expect("spawn tile decoder thread");
            workers.push(handle);
        }

        Ok(Self {
            shared,
            next_job_id: AtomicU64::new(0),
            wake_sender,
            status_receiver,
            workers,
        })
    }

    /// Queues a decode job. Higher `priority` dispatches first; equal
    /// priorities dispatch in FIFO order. The returned ticket completes with
    /// the decoded tiles or a `DecodeError`.
    pub fn load_image_tiles(
        &self,
        url: &str,
        image_id: ImageId,
        lod: Lod,
        priority: f64,
    ) -> DecodeTicket {
        let job_id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        let (completion, receiver) = bounded(1);

        if self.shared.stop_requested.load(Ordering::Acquire) {
            let _ = completion.send(Err(DecodeError::Disposed));
        } else {
            let request = DecodeRequest {
                url: url.to_owned(),
                image_id,
                lod,
                job_id,
            };
            self.shared
                .queue
                .lock()
                .expect("decode job queue lock poisoned")
                .push(request, priority, completion);
            // Lost wakeups are recovered by the workers' idle poll.
            let _ = self.wake_sender.try_send(());
        }

        DecodeTicket {
            job_id,
            image_id,
            lod,
            receiver,
        }
    }

    /// Rejects queued-but-not-started jobs for `image_id` whose LOD is
    /// strictly below `below_lod` with `Cancelled`. In-flight jobs finish.
    pub fn cancel_pending(&self, image_id: ImageId, below_lod: Lod) {
        let removed = self
            .shared
            .queue
            .lock()
            .expect("decode job queue lock poisoned")
            .remove_below(image_id, below_lod);
        for job in removed {
            let _ = job.completion.send(Err(DecodeError::Cancelled));
        }
    }

    /// Rejects every queued job with `Disposed` and joins the workers.
    pub fn dispose(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.shared.stop_requested.store(true, Ordering::Release);
        let drained = self
            .shared
            .queue
            .lock()
            .expect("decode job queue lock poisoned")
            .drain_all();
        for job in drained {
            let _ = job.completion.send(Err(DecodeError::Disposed));
        }
        for _ in 0..self.workers.len() {
            let _ = self.wake_sender.try_send(());
        }
        for handle in self.workers.drain(..) {
            handle.join().expect("join tile decoder thread");
        }
    }

    pub fn pending_count(&self) -> usize {
        self.shared
            .queue
            .lock()
            .expect("decode job queue lock poisoned")
            .len()
    }

    pub fn fetch_stats(&self) -> FetchStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Drains buffered progress events. Lossy by design; terminal results
    /// only ever arrive on tickets.
    pub fn drain_status(&self) -> Vec<DecodeStatus> {
        self.status_receiver.try_iter().collect()
    }
}

impl Drop for TileDecodePool {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn worker_loop(
    shared: Arc<PoolShared>,
    wake_receiver: Receiver<()>,
    status_sender: Sender<DecodeStatus>,
    tile_size: u32,
    base_world_size: f64,
) {
    let client = fetch::build_client();
    loop {
        if shared.stop_requested.load(Ordering::Acquire) {
            return;
        }
        let job = shared
            .queue
            .lock()
            .expect("decode job queue lock poisoned")
            .pop();
        let Some(job) = job else {
            match wake_receiver.recv_timeout(WORKER_IDLE_POLL) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return,
            }
        };

        let result = run_job(
            &shared,
            &client,
            &status_sender,
            &job.request,
            tile_size,
            base_world_size,
        );
        // The caller may have dropped its ticket; discarding is fine.
        let _ = job.completion.send(result);
    }
}

fn run_job(
    shared: &PoolShared,
    client: &Result<reqwest::blocking::Client, DecodeError>,
    status_sender: &Sender<DecodeStatus>,
    request: &DecodeRequest,
    tile_size: u32,
    base_world_size: f64,
) -> DecodeResult {
    let _ = status_sender.try_send(DecodeStatus {
        job_id: request.job_id,
        image_id: request.image_id,
        lod: request.lod,
        stage: DecodeStage::Fetching,
    });
    let client = client.as_ref().map_err(|error| error.clone())?;
    let bytes = fetch::fetch_source_bytes(client, &request.url, &shared.stats)?;

    let _ = status_sender.try_send(DecodeStatus {
        job_id: request.job_id,
        image_id: request.image_id,
        lod: request.lod,
        stage: DecodeStage::Decoding,
    });
    tiling::decode_image_tiles(
        &bytes,
        request.image_id,
        request.lod,
        tile_size,
        base_world_size,
    )
}

/// Builds a ticket with a hand-held completion sender, so stores can be
/// tested without spinning up a worker pool.
#[cfg(feature = "test-helpers")]
pub fn test_ticket(image_id: ImageId, lod: Lod) -> (DecodeTicket, Sender<DecodeResult>) {
    let (sender, receiver) = bounded(1);
    (
        DecodeTicket {
            job_id: 0,
            image_id,
            lod,
            receiver,
        },
        sender,
    )
}
