//! Application services for the streaming-catalog adapter.

pub mod cache;
pub mod indexer;
pub mod metadata;
pub mod mount_client;
pub mod nntp;
pub mod nzb;
pub mod orchestrator;
pub mod planner;
pub mod ranker;
pub mod release_parser;
pub mod stream_proxy;
pub mod triage;

pub use cache::{MountHandleCache, ResponseCache, VerifiedNzbCache};
pub use indexer::IndexerManager;
pub use metadata::MetadataClient;
pub use mount_client::{MountClient, MountError, PlaybackTarget};
pub use nntp::{NntpPool, NntpPoolConfig, NntpPoolRegistry};
pub use orchestrator::{verify_playback_signature, Orchestrator, StreamEntry, StreamRequest};
pub use stream_proxy::{FallbackKind, StreamProxy};
pub use triage::{TriageConfig, TriageReport, TriageRunner};
