//! Data models shared by the sync engine.

pub mod envelope;
pub mod file;
pub mod power;
pub mod server;
pub mod status;

pub use envelope::{Item, ListEnvelope, ListMeta, Pagination, SingleEnvelope};
pub use file::FileEntry;
pub use power::PowerSignal;
pub use server::{
    Allocation, NetworkCounters, ResourceSample, ResourceUsage, ServerData, ServerIdentity,
    ServerRelationships, StatsPayload,
};
pub use status::ServerStatus;
