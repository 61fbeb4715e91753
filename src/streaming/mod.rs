//! Chunked bidirectional transfer pipeline.
//!
//! Four concurrent parts around one duplex channel:
//!
//! ```text
//!  +-------------+     +-----------+   outbound   +--------+
//!  | ChunkSource | --> |  Uplink   | -----------> |        |
//!  |  (file)     |     | (send)    |              |  peer  |
//!  +-------------+     +-----------+              |        |
//!  +-------------+     +-----------+   inbound    |        |
//!  | Aggregator  | <-- | Downlink  | <----------- |        |
//!  | (render)    |  1  | (receive) |              +--------+
//!  +-------------+     +-----------+
//! ```
//!
//! The Downlink -> Aggregator handoff holds a single value, so a slow
//! renderer stalls the receive loop instead of dropping progress.
//! [`SessionCoordinator`] starts the tasks and joins all of them.

pub mod channel;
pub mod downlink;
pub mod pipeline;
pub mod progress;
pub mod protocol;
pub mod source;
pub mod uplink;

pub use channel::{
    progress_channel, Chunk, DuplexChannel, InboundMessage, MessageSink, MessageSource,
    OutboundMessage, TransferMetadata, MAX_CHUNK_SIZE, PROGRESS_CHANNEL_SIZE,
};

pub use downlink::{DownlinkStats, ProgressDownlink};
pub use pipeline::{resolve_metadata, SessionConfig, SessionCoordinator, SessionReport};
pub use progress::{
    Phase, ProgressAggregator, ProgressOutcome, ProgressSink, ProgressState, TerminalSink,
    WriterSink, BAR_WIDTH,
};
pub use source::ChunkSource;
pub use uplink::{TransferUplink, UplinkConfig, UplinkStats};

pub use protocol::{
    read_frame, write_frame, ChunkFlags, ChunkFrame, MessageType, ProgressFrame, MAX_FRAME_SIZE,
};
