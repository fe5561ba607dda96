pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod files;
pub mod http_client;
pub mod model;
pub mod normalizer;
pub mod resources;
pub mod sse;
pub mod stream;
pub mod telemetry;
#[cfg(test)]
pub mod test_util;
pub mod workflow;

pub use client::DifyClient;
pub use config::{ConfigOverride, ConnectorCfg, DifyConfig};
pub use error::{CoreResult, DifyError};
pub use stream::{Completion, EventSink, StreamSummary};
