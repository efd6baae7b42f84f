//! Slotted, layered tile atlas: deterministic slot allocation (C1 of the
//! pipeline) and the CPU-side atlas manager (C2) that queues pixel uploads
//! and stages draw instances. The wgpu backend lives behind the `atlas-gpu`
//! feature so everything else stays headless-testable.

mod allocator;
mod manager;

#[cfg(feature = "atlas-gpu")]
pub mod gpu;

pub use allocator::SlotAllocator;
pub use manager::{AtlasManager, InstanceRecord, PendingUpload};
