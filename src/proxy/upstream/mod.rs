pub mod client;
pub mod delta;

pub use client::UpstreamClient;
pub use delta::{
    DeltaStream, SseDeltaParser, UpstreamDelta, UpstreamToolCall, UpstreamUnaryResponse,
    UpstreamUsage,
};
