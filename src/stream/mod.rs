//! Multi-stream plumbing: spreading outbound probes over a stream range and
//! filtering/reassembling inbound traffic back down to payloads

pub mod inbound;
pub mod outbound;
pub mod range;

pub use inbound::{CompletionGuard, FragmentReassembler, InboundStreamingDecoder, StreamRangeFilter};
pub use outbound::{OutboundStreamingEncoder, RoundRobinStreamSelector};
pub use range::StreamRange;
