//! Client side: sends requests and correlates replies.
//!
//! A [`Client`] owns the peer-facing half of a connection. Each send
//! allocates a request id, installs a single-shot rendezvous slot, writes
//! the request frame under a write lock, and parks until the reader task
//! delivers the matching response. Replies arrive in whatever order the
//! server finishes them; correlation is purely by request id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{Result, SropError};
use crate::message::{Message, Registry};
use crate::messages::standard_registry;
use crate::server::DEFAULT_MAX_MESSAGE_SIZE;
use crate::wire::{self, Request, Response};

/// Configuration for a [`Client`].
pub struct ClientOptions {
    registry: Arc<Registry>,
    max_message_size: u64,
}

impl ClientOptions {
    /// Options with the standard registry and default message size bound.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(standard_registry()),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Use `registry` to decode replies.
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = registry;
        self
    }

    /// Bound the body length of frames in either direction.
    pub fn max_message_size(mut self, max: u64) -> Self {
        self.max_message_size = max;
        self
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// A reply returned by [`Client::send`].
///
/// Registered response types are decoded through the registry; anything else
/// is surfaced raw so callers can probe types the registry does not know.
#[derive(Debug)]
pub enum Reply {
    /// The response type was registered; the decoded message.
    Decoded(Box<dyn Message>),
    /// The response type was not registered; the raw frame contents.
    Raw {
        response_type: u64,
        response_data: Bytes,
    },
}

impl Reply {
    /// The reply's wire type code.
    pub fn response_type(&self) -> u64 {
        match self {
            Reply::Decoded(msg) => msg.type_code(),
            Reply::Raw { response_type, .. } => *response_type,
        }
    }

    /// Downcast a decoded reply to a concrete message type.
    pub fn downcast<T: Message>(self) -> Option<Box<T>> {
        match self {
            Reply::Decoded(msg) => msg.downcast(),
            Reply::Raw { .. } => None,
        }
    }

    /// Borrowing variant of [`Reply::downcast`].
    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        match self {
            Reply::Decoded(msg) => msg.downcast_ref(),
            Reply::Raw { .. } => None,
        }
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Why the connection stopped being usable. A plain close and a peer
/// protocol violation surface as different errors to callers.
#[derive(Clone)]
enum CloseCause {
    Closed,
    Protocol(String),
}

struct ClientInner {
    registry: Arc<Registry>,
    max_message_size: u64,
    next_request_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Response>>>,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    shutdown: CancellationToken,
    close_cause: Mutex<Option<CloseCause>>,
}

impl ClientInner {
    /// Record why the connection died (first cause wins), cancel, and wake
    /// every pending rendezvous.
    fn fail(&self, cause: CloseCause) {
        {
            let mut recorded = self.close_cause.lock().expect("close cause lock poisoned");
            if recorded.is_none() {
                *recorded = Some(cause);
            }
        }
        self.shutdown.cancel();

        let drained: Vec<_> = self
            .pending
            .lock()
            .expect("pending map lock poisoned")
            .drain()
            .collect();
        // Dropping the senders wakes the waiters with RecvError.
        drop(drained);
    }

    /// The error woken waiters and later sends should see.
    fn close_error(&self) -> SropError {
        match self
            .close_cause
            .lock()
            .expect("close cause lock poisoned")
            .as_ref()
        {
            Some(CloseCause::Protocol(reason)) => SropError::Protocol(reason.clone()),
            _ => SropError::ConnectionClosed,
        }
    }
}

/// Client half of a connection: correlates replies to outstanding requests.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Take ownership of `transport` and spawn the reply reader task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<T>(transport: T, options: ClientOptions) -> Client
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (rd, wr) = tokio::io::split(transport);

        let inner = Arc::new(ClientInner {
            registry: options.registry,
            max_message_size: options.max_message_size,
            next_request_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            writer: tokio::sync::Mutex::new(Some(Box::new(wr))),
            shutdown: CancellationToken::new(),
            close_cause: Mutex::new(None),
        });

        tokio::spawn(read_loop(rd, inner.clone()));

        Client { inner }
    }

    /// Send `msg` to the object at `object_id` and block until its reply
    /// arrives. The reply is decoded through the registry when its type is
    /// registered.
    pub async fn send(&self, object_id: u64, msg: &dyn Message) -> Result<Reply> {
        self.send_raw(object_id, msg.type_code(), Bytes::from(msg.marshal()))
            .await
    }

    /// Send a raw type code and body without client-side marshalling; the
    /// reply is still decoded through the registry.
    pub async fn send_raw(&self, object_id: u64, message_type: u64, data: Bytes) -> Result<Reply> {
        let response = self.send_frame(object_id, message_type, data).await?;
        self.decode_reply(response)
    }

    /// Send a raw type code and body and return the raw response frame.
    pub async fn send_frame(
        &self,
        object_id: u64,
        message_type: u64,
        data: Bytes,
    ) -> Result<Response> {
        let inner = &self.inner;

        if inner.shutdown.is_cancelled() {
            return Err(inner.close_error());
        }
        if data.len() as u64 > inner.max_message_size {
            return Err(SropError::FrameTooLarge {
                len: data.len() as u64,
                max: inner.max_message_size,
            });
        }

        let request_id = inner.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        inner
            .pending
            .lock()
            .expect("pending map lock poisoned")
            .insert(request_id, tx);

        // Teardown may have drained the pending map between the first check
        // and the insert; a slot installed after that would never be woken.
        if inner.shutdown.is_cancelled() {
            self.abandon(request_id);
            return Err(inner.close_error());
        }

        let request = Request {
            object_id,
            request_id,
            message_type,
            message_data: data,
        };

        {
            let mut guard = inner.writer.lock().await;
            let writer = match guard.as_mut() {
                Some(writer) => writer,
                None => {
                    self.abandon(request_id);
                    return Err(inner.close_error());
                }
            };
            if let Err(err) = wire::write_request(writer, &request).await {
                self.abandon(request_id);
                inner.shutdown.cancel();
                return Err(err);
            }
        }

        match rx.await {
            Ok(response) => Ok(response),
            Err(_) => Err(inner.close_error()),
        }
    }

    /// Close the transport. Every pending rendezvous is woken with a
    /// connection-closed error, and subsequent sends fail immediately.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            if let Err(err) = writer.shutdown().await {
                debug!(error = %err, "error shutting down transport write half");
            }
        }
        self.inner.fail(CloseCause::Closed);
    }

    fn abandon(&self, request_id: u64) {
        self.inner
            .pending
            .lock()
            .expect("pending map lock poisoned")
            .remove(&request_id);
    }

    fn decode_reply(&self, response: Response) -> Result<Reply> {
        match self.inner.registry.construct(response.response_type) {
            Some(mut msg) => {
                if !msg.unmarshal(&response.response_data) {
                    warn!(
                        response_type = response.response_type,
                        request_id = response.request_id,
                        "failed to unmarshal reply body"
                    );
                    return Err(SropError::Unmarshal {
                        type_code: response.response_type,
                    });
                }
                Ok(Reply::Decoded(msg))
            }
            None => Ok(Reply::Raw {
                response_type: response.response_type,
                response_data: response.response_data,
            }),
        }
    }
}

/// Reply reader: delivers each response to the rendezvous slot matching its
/// request id. An unmatched id is a protocol error that tears the client
/// down; every waiter and later send then sees [`SropError::Protocol`].
async fn read_loop<R>(mut rd: R, inner: Arc<ClientInner>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    loop {
        let response = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            read = wire::read_response(&mut rd, inner.max_message_size) => match read {
                Ok(Some(response)) => response,
                Ok(None) => {
                    debug!("server closed the connection");
                    break;
                }
                Err(err) => {
                    error!(error = %err, "failed to read response frame");
                    break;
                }
            },
        };

        let slot = inner
            .pending
            .lock()
            .expect("pending map lock poisoned")
            .remove(&response.request_id);

        match slot {
            Some(tx) => {
                // The waiter may have given up; nothing to do then.
                let _ = tx.send(response);
            }
            None => {
                error!(
                    request_id = response.request_id,
                    "response does not match any outstanding request"
                );
                inner.fail(CloseCause::Protocol(format!(
                    "response for unknown request id {}",
                    response.request_id
                )));
                return;
            }
        }
    }

    inner.fail(CloseCause::Closed);
}
