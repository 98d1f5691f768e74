//! GPS position recorder: bounded backlog with cached trip statistics,
//! throttled persistence and upload, and a recording state machine driven
//! by commands.

pub mod backlog;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod format;
pub mod observer;
pub mod sample;
pub mod source;
pub mod statistics;
pub mod storage;
pub mod throttle;
pub mod upload;

pub use backlog::Backlog;
pub use config::{TrackerConfig, UploadConfig};
pub use coordinator::{Collaborators, Command, RecordingState, TrackingCoordinator};
pub use error::{CodecError, Result, TrackerError};
pub use observer::{BacklogObserver, BacklogUpdate, ChannelObserver, LogObserver, WatchObserver};
pub use sample::Sample;
pub use source::{PositionSource, SimulatedSource, SourceEvent, UpdateParams};
pub use statistics::{Statistics, StatisticsEngine};
pub use storage::{BlobStore, FileBlobStore, MemoryBlobStore, RecorderState};
pub use throttle::{Clock, ManualClock, SystemClock, ThrottleGate};
pub use upload::{
    transport_for, DirectoryTransport, HttpTransport, NullTransport, TransportBuilder,
    UploadTransport,
};
