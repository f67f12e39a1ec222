//! Loop playback: assets, per-track runtime state, crossfade scheduling,
//! the lookahead driver and the transport that ties them together.

pub mod assets;
pub mod driver;
pub mod scheduler;
pub mod track;
pub mod transport;

pub use assets::{AssetLoader, AssetStore, TrackDescriptor};
pub use driver::{LookaheadDriver, SchedulerChain, SharedRegistry};
pub use scheduler::{CrossfadeScheduler, Repetition};
pub use track::{TrackRegistry, TrackRuntime, TrackSnapshot};
pub use transport::{ResetOptions, Transport, TransportStatus};
