//! # dgramlink
//!
//! Client-side UDP session transport with an onion-style middleware
//! pipeline.
//!
//! A [`Client`] announces itself to a peer with `"ClientHello <port>"`,
//! keeps the session alive with periodic re-announcements, and decodes
//! every inbound base64 datagram into a token sequence that is threaded
//! through an ordered chain of registered [`Stage`]s. Each stage can
//! inspect or mutate the message, await the rest of the chain through its
//! [`Next`] continuation, short-circuit by skipping it, or fail.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use dgramlink::{Client, MessageContext, Next, Result, SessionConfig, Stage};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Stage for Echo {
//!     async fn handle(&self, ctx: &mut MessageContext, mut next: Next<'_>) -> Result<()> {
//!         if ctx.content.first().map(String::as_str) == Some("ping") {
//!             ctx.handle.send("pong").await?;
//!         }
//!         next.run(ctx).await
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut client = Client::new(SessionConfig::default());
//!     client.use_stage(Echo);
//!
//!     let info = client.init().await?;
//!     println!("session up: {} -> {}", info.local_addr, info.peer_addr);
//!
//!     tokio::signal::ctrl_c().await?;
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Guarantees and limits
//!
//! - Stages run strictly in registration order per message; different
//!   messages may interleave.
//! - One best-effort send per datagram; no retransmission, no ordering
//!   across the transport.
//! - A failed pipeline run is always surfaced — by default through
//!   `tracing`, or through the sink set with
//!   [`Client::on_pipeline_error`].

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod message;
pub mod pipeline;

pub use client::{Client, ConnectInfo, ConnectionState};
pub use config::SessionConfig;
pub use error::{Error, Result};
pub use message::{MessageContext, SessionHandle};
pub use pipeline::{from_fn, FnStage, Next, Stage};
