use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crossbeam_channel::Sender;
use model::{ImageId, Lod};

use crate::{DecodeRequest, DecodeResult};

/// One queued decode task: the request, its dispatch priority, and the
/// oneshot the result lands on.
#[derive(Debug)]
pub(crate) struct QueuedJob {
    pub request: DecodeRequest,
    pub priority: f64,
    seq: u64,
    pub completion: Sender<DecodeResult>,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then FIFO (lower sequence first).
        self.priority
            .partial_cmp(&other.priority)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority queue of pending decode tasks with an `image_id → queued count`
/// secondary index so cancellation sweeps skip images with nothing queued.
#[derive(Debug, Default)]
pub(crate) struct JobQueue {
    heap: BinaryHeap<QueuedJob>,
    queued_by_image: HashMap<ImageId, u32>,
    next_seq: u64,
}

impl JobQueue {
    pub fn push(&mut self, request: DecodeRequest, priority: f64, completion: Sender<DecodeResult>) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.checked_add(1).expect("job sequence overflow");
        *self.queued_by_image.entry(request.image_id).or_insert(0) += 1;
        self.heap.push(QueuedJob {
            request,
            priority,
            seq,
            completion,
        });
    }

    pub fn pop(&mut self) -> Option<QueuedJob> {
        let job = self.heap.pop()?;
        self.note_removed(job.request.image_id);
        Some(job)
    }

    /// Removes queued tasks for `image_id` with LOD strictly below
    /// `below_lod` and returns them for rejection.
    pub fn remove_below(&mut self, image_id: ImageId, below_lod: Lod) -> Vec<QueuedJob> {
        match self.queued_by_image.get(&image_id) {
            None => return Vec::new(),
            Some(0) => return Vec::new(),
            Some(_) => {}
        }
        let mut kept = BinaryHeap::with_capacity(self.heap.len());
        let mut removed = Vec::new();
        for job in self.heap.drain() {
            if job.request.image_id == image_id && job.request.lod < below_lod {
                removed.push(job);
            } else {
                kept.push(job);
            }
        }
        self.heap = kept;
        for job in &removed {
            self.note_removed(job.request.image_id);
        }
        removed
    }

    pub fn drain_all(&mut self) -> Vec<QueuedJob> {
        let drained: Vec<QueuedJob> = self.heap.drain().collect();
        self.queued_by_image.clear();
        drained
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    fn note_removed(&mut self, image_id: ImageId) {
        let count = self
            .queued_by_image
            .get_mut(&image_id)
            .expect("queued image must have an index entry");
        *count = count
            .checked_sub(1)
            .expect("queued image count underflow");
        if *count == 0 {
            self.queued_by_image.remove(&image_id);
        }
    }
}
