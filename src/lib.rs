//! # srop
//!
//! A small capability-oriented RPC runtime. An endpoint hosts a collection
//! of objects behind numeric ids; peers exchange length-framed requests and
//! responses over any reliable bidirectional byte stream. Operations are
//! typed messages identified by a globally unique 64-bit code; bodies are
//! opaque octet strings whose interpretation is fixed by that code.
//!
//! Every endpoint exposes a bootstrap object at id 0 — the only object a
//! peer can reach without first being told an id. Objects hand out further
//! ids and are destroyed by *clunking* them (a term borrowed from 9p).
//!
//! ## Architecture
//!
//! - [`wire`] — length-prefixed little-endian frames with a maximum-length
//!   guard.
//! - [`message`] — the [`Message`](message::Message) trait and per-endpoint
//!   [`Registry`](message::Registry) mapping type codes to constructors.
//! - [`messages`] — the standard catalogue (`Ok`, `Clunk`, `ObjectRef`, …)
//!   with frozen type codes.
//! - [`object`] — the [`Object`](object::Object) contract and the
//!   per-connection object table.
//! - [`server`] — the per-connection server: bounded-concurrency dispatch,
//!   single-shot respond capabilities, tracked background work, graceful
//!   drain on shutdown.
//! - [`client`] — request/reply correlation by request id.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use srop::{Client, ClientOptions, ConnServer, ConnServerOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     let stream = tokio::net::TcpStream::connect("127.0.0.1:4444").await.unwrap();
//!     let client = Client::new(stream, ClientOptions::new());
//!
//!     let reply = client
//!         .send(srop::BOOTSTRAP_OBJECT_ID, &MakeGreeter { name: "bob".into() })
//!         .await
//!         .unwrap();
//!     let greeter = reply.downcast::<srop::messages::ObjectRef>().unwrap();
//!
//!     client.send(greeter.id, &Hello { from: "client".into() }).await.unwrap();
//!     client.send(greeter.id, &srop::messages::Clunk).await.unwrap();
//!     client.close().await;
//! }
//! ```

pub mod client;
pub mod error;
pub mod message;
pub mod messages;
pub mod object;
pub mod server;
pub mod wire;

pub use client::{Client, ClientOptions, Reply};
pub use error::{Result, SropError};
pub use message::{Message, Registry};
pub use object::{BoxFuture, Object, BOOTSTRAP_OBJECT_ID};
pub use server::{ConnServer, ConnServerOptions, Responder};
