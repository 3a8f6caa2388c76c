//! Async RPC call layer.
//!
//! Calls are sequences of typed parts: request headers, messages and an end
//! marker one way; response headers, messages and a final status the other.
//! This crate provides:
//! * [`client`]: the four call shapes, backed by write-once result cells and message streams
//! * [`server`]: routing of inbound calls to user handler functions
//! * [`interceptor`]: ordered middleware on both sides of a call
//! * [`transport`]: the byte-level seam a wire transport plugs into
//! * [`local`]: an in-process transport for tests and embedding

// Only the integration tests install a subscriber.
#[cfg(test)]
use tracing_subscriber as _;

pub mod cell;
pub mod client;
pub mod codec;
pub mod error;
pub mod interceptor;
pub mod local;
pub mod metadata;
pub mod options;
pub mod part;
pub mod server;
pub mod status;
pub mod stream;
pub mod transport;
pub mod user_info;

pub use cell::{ResultCell, StatusCell};
pub use client::{BidirectionalStreamingCall, CallSetup, Client, ClientStreamingCall, RequestSender, ServerStreamingCall, UnaryCall};
pub use codec::{Codec, CodecPair, JsonCodec};
pub use error::{Error, Result};
pub use interceptor::{ClientInterceptors, Context, HeaderInjector, Interceptor, InterceptorChain, PartLogger, ServerInterceptors};
pub use local::LocalChannel;
pub use metadata::{Compression, MessageMetadata, Metadata};
pub use options::{CallOptions, ServerConfig};
pub use part::{RequestPart, ResponsePart};
pub use server::{ResponseStreamWriter, Route, Server, ServerCallContext, ServiceProvider, ServiceRouter};
pub use status::{Code, Status};
pub use stream::{MessageStream, StreamSender, message_stream};
pub use transport::{CallType, Channel};
pub use user_info::UserInfo;
