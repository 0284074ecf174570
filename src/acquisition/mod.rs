//! Trace data acquisition
//!
//! Wire decoding, routing to site buffers and the TCP trace export client.

pub mod router;
pub mod tcp;
pub mod tracebuf;

pub use router::{BufferRouter, RouteStats, RoutedRun, RoutingError};
pub use tcp::{ReconnectPolicy, TraceClient, TransportError};
pub use tracebuf::{
    decode_message, detect_byte_order, ByteOrder, DecodeError, DecodedRun, RunChunk, SampleWidth,
    TraceBufBuilder, WireDecoder, MAX_TRACEBUF_SIZE,
};
