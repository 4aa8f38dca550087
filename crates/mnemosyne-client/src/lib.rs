//! mnemosyne client - typed gRPC client for the mnemosyne session service.
//!
//! This crate provides:
//! - A validated session token type and its wire/metadata codec
//! - Call context propagation of the session token, deadline and cancellation
//! - A session facade with retry, backoff and a closed error taxonomy
//!
//! # Example
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::time::Duration;
//!
//! use mnemosyne_client::{CallContext, ClientConfig, SessionClient};
//!
//! #[tokio::main]
//! async fn main() -> mnemosyne_client::Result<()> {
//!     let client = SessionClient::connect(&ClientConfig::default()).await?;
//!     let ctx = CallContext::new().with_timeout(Duration::from_secs(2));
//!
//!     let bag = HashMap::from([("lang".to_string(), "en".to_string())]);
//!     let token = client.create(&ctx, bag).await?;
//!     let session = client.get(&ctx, &token).await?;
//!     assert_eq!(session.value("lang"), Some("en"));
//!
//!     client.delete(&ctx, &token).await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod package;
pub mod retry;
pub mod session;
pub mod token;
pub mod transport;

/// Generated protobuf code for the `mnemosynerpc` gRPC API.
#[allow(clippy::similar_names)]
#[allow(clippy::doc_markdown)]
#[allow(clippy::derive_partial_eq_without_eq)]
pub mod proto {
    tonic::include_proto!("mnemosynerpc");
}

pub use client::SessionClient;
pub use config::{BagPolicy, ClientConfig, ConfigError, RetryConfig};
pub use context::{CallContext, Interruption, SessionInterceptor};
pub use error::{ClientError, Failure, Operation, Result, SessionError, SessionResult};
pub use package::{PACKAGE, PackageInfo};
pub use retry::{RetryEvent, RetryPolicy, RetryState, TerminalReason};
pub use session::{DeleteQuery, ListQuery, NewSession, SessionRecord};
pub use token::SessionToken;
pub use transport::{GrpcTransport, SessionTransport, TransportError, TransportErrorKind};
