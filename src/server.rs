//! The per-connection server engine.
//!
//! A [`ConnServer`] owns one side of a byte stream. It reads request frames,
//! admits them under a concurrency cap, dispatches each to the owning object
//! and writes back exactly one response per accepted request. Responses are
//! fed through a dedicated writer task so frames appear on the wire
//! atomically, in some total order, never interleaved.
//!
//! ```text
//! transport ─► read loop ─► admission semaphore ─► handler tasks ─┐
//!                                                                 ▼
//! transport ◄───────────── writer task ◄──────── response channel ┘
//! ```
//!
//! Shutdown (external [`ConnServer::shutdown`], peer close, or a transport
//! error) stops the read loop, fires the handlers' cancellation token,
//! drains every handler and background task, clunks every surviving object
//! in descending id order, flushes the writer, and only then lets
//! [`ConnServer::wait`] return.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

use crate::message::{Message, Registry};
use crate::messages::{standard_registry, NoSuchObject, UnexpectedMessage, TYPE_MESSAGE_TOO_LARGE};
use crate::object::{Object, ObjectTable};
use crate::wire::{self, Response};

/// Default admission cap on concurrently-handled requests.
pub const DEFAULT_MAX_OUTSTANDING_REQUESTS: usize = 256;

/// Default bound on frame body length, in bytes (1 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: u64 = 1024 * 1024;

type BootstrapFn = Box<dyn FnOnce(&ConnServer) -> Arc<dyn Object> + Send>;

/// Configuration for a [`ConnServer`].
pub struct ConnServerOptions {
    registry: Arc<Registry>,
    bootstrap: BootstrapFn,
    max_outstanding_requests: usize,
    max_message_size: u64,
}

impl ConnServerOptions {
    /// Create options with the given bootstrap constructor.
    ///
    /// The constructor runs once, before the first frame is served, and its
    /// object is installed at id 0. Defaults: the standard registry,
    /// [`DEFAULT_MAX_OUTSTANDING_REQUESTS`], [`DEFAULT_MAX_MESSAGE_SIZE`].
    pub fn new<F>(bootstrap: F) -> Self
    where
        F: FnOnce(&ConnServer) -> Arc<dyn Object> + Send + 'static,
    {
        Self {
            registry: Arc::new(standard_registry()),
            bootstrap: Box::new(bootstrap),
            max_outstanding_requests: DEFAULT_MAX_OUTSTANDING_REQUESTS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Use `registry` to decode incoming requests.
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = registry;
        self
    }

    /// Cap the number of concurrently-handled requests.
    pub fn max_outstanding_requests(mut self, max: usize) -> Self {
        self.max_outstanding_requests = max;
        self
    }

    /// Bound the body length of frames read from the peer.
    pub fn max_message_size(mut self, max: u64) -> Self {
        self.max_message_size = max;
        self
    }
}

/// Single-shot respond capability handed to object handlers.
///
/// Invoking it serialises the response frame, hands it to the writer task
/// and releases the request's admission slot. A second invocation is a
/// programmer error: it is logged and ignored. Dropping every clone without
/// responding releases the slot but writes nothing; the peer's waiter then
/// only resolves when the connection dies.
#[derive(Clone)]
pub struct Responder {
    inner: Arc<ResponderInner>,
}

struct ResponderInner {
    request_id: u64,
    max_message_size: u64,
    outbound: mpsc::UnboundedSender<Bytes>,
    responded: AtomicBool,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
}

impl Responder {
    fn new(
        request_id: u64,
        max_message_size: u64,
        outbound: mpsc::UnboundedSender<Bytes>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            inner: Arc::new(ResponderInner {
                request_id,
                max_message_size,
                outbound,
                responded: AtomicBool::new(false),
                permit: Mutex::new(Some(permit)),
            }),
        }
    }

    /// The id of the request this responder answers.
    pub fn request_id(&self) -> u64 {
        self.inner.request_id
    }

    /// Marshal `msg` and transmit it as the response for this request.
    pub fn respond(&self, msg: &dyn Message) {
        self.respond_raw(msg.type_code(), Bytes::from(msg.marshal()));
    }

    /// Transmit a raw type code and body as the response for this request.
    pub fn respond_raw(&self, response_type: u64, data: Bytes) {
        if self.inner.responded.swap(true, Ordering::AcqRel) {
            warn!(
                request_id = self.inner.request_id,
                "duplicate response for request, ignoring"
            );
            return;
        }

        let (response_type, data) = if data.len() as u64 > self.inner.max_message_size {
            warn!(
                request_id = self.inner.request_id,
                len = data.len(),
                max = self.inner.max_message_size,
                "response body exceeds the maximum message size, replying MessageTooLarge"
            );
            (TYPE_MESSAGE_TOO_LARGE, Bytes::new())
        } else {
            (response_type, data)
        };

        let frame = Response {
            request_id: self.inner.request_id,
            response_type,
            response_data: data,
        }
        .encode();

        if self.inner.outbound.send(Bytes::from(frame)).is_err() {
            debug!(
                request_id = self.inner.request_id,
                "connection closed before the response could be written"
            );
        }

        self.release_permit();
    }

    fn release_permit(&self) {
        self.inner
            .permit
            .lock()
            .expect("responder lock poisoned")
            .take();
    }
}

struct ServerInner {
    registry: Arc<Registry>,
    objects: ObjectTable,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    admission: Arc<Semaphore>,
    max_message_size: u64,
    done: watch::Receiver<bool>,
}

/// Handle to a running per-connection server.
///
/// Cheaply cloneable; handlers receive a clone to register further objects,
/// clunk ids and spawn tracked background work.
#[derive(Clone)]
pub struct ConnServer {
    inner: Arc<ServerInner>,
}

impl ConnServer {
    /// Start serving `transport`.
    ///
    /// Constructs the bootstrap object, installs it at id 0, and spawns the
    /// read loop and writer task. Must be called from within a Tokio
    /// runtime. The returned handle is live until [`ConnServer::wait`]
    /// resolves.
    pub fn start<T>(transport: T, options: ConnServerOptions) -> ConnServer
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (rd, wr) = tokio::io::split(transport);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = watch::channel(false);

        let server = ConnServer {
            inner: Arc::new(ServerInner {
                registry: options.registry,
                objects: ObjectTable::new(),
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                admission: Arc::new(Semaphore::new(options.max_outstanding_requests)),
                max_message_size: options.max_message_size,
                done: done_rx,
            }),
        };

        let bootstrap = (options.bootstrap)(&server);
        server.inner.objects.insert_bootstrap(bootstrap);

        let writer = tokio::spawn(write_loop(
            wr,
            out_rx,
            server.inner.shutdown.clone(),
        ));
        tokio::spawn(run(rd, server.clone(), out_tx, writer, done_tx));

        server
    }

    /// Insert `object` under a fresh id and return the id.
    pub fn register(&self, object: Arc<dyn Object>) -> u64 {
        let id = self.inner.objects.register(object);
        debug!(object_id = id, "object registered");
        id
    }

    /// Remove the object at `id` (if present) and invoke its clunk hook.
    ///
    /// Handlers already in flight for the id are unaffected; their responses
    /// are still transmitted.
    pub fn clunk(&self, id: u64) {
        if let Some(object) = self.inner.objects.remove(id) {
            debug!(object_id = id, "object clunked");
            object.clunk(self);
        }
    }

    /// Run `future` as tracked background work.
    ///
    /// Shutdown waits for tracked work to complete, so a handler that defers
    /// its respond must spawn through here rather than detaching a task that
    /// would escape the shutdown barrier.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.tracker.spawn(future);
    }

    /// Trigger connection shutdown.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Block until the connection has fully terminated: the read loop has
    /// stopped, every handler and background task has completed, every
    /// surviving object has been clunked, and all queued responses have been
    /// written (or the transport has errored).
    pub async fn wait(&self) {
        let mut done = self.inner.done.clone();
        let _ = done.wait_for(|finished| *finished).await;
    }
}

/// Read loop plus shutdown sequence. Owns the read half for its lifetime.
async fn run<R>(
    mut rd: R,
    server: ConnServer,
    out_tx: mpsc::UnboundedSender<Bytes>,
    writer: JoinHandle<()>,
    done: watch::Sender<bool>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let inner = &server.inner;

    loop {
        let request = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            read = wire::read_request(&mut rd, inner.max_message_size) => match read {
                Ok(Some(request)) => request,
                Ok(None) => {
                    debug!("peer closed the connection");
                    break;
                }
                Err(err) => {
                    error!(error = %err, "failed to read request frame");
                    break;
                }
            },
        };

        // Backpressure: hold off reading further requests until a slot frees.
        let permit = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            permit = inner.admission.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let respond = Responder::new(
            request.request_id,
            inner.max_message_size,
            out_tx.clone(),
            permit,
        );

        let object = match inner.objects.get(request.object_id) {
            Some(object) => object,
            None => {
                debug!(
                    object_id = request.object_id,
                    request_id = request.request_id,
                    "request for unknown object"
                );
                respond.respond(&NoSuchObject);
                continue;
            }
        };

        let token = inner.shutdown.clone();
        let handler_server = server.clone();

        match inner.registry.construct(request.message_type) {
            Some(mut msg) => {
                if !msg.unmarshal(&request.message_data) {
                    warn!(
                        message_type = request.message_type,
                        request_id = request.request_id,
                        "failed to unmarshal request body"
                    );
                    respond.respond(&UnexpectedMessage);
                    continue;
                }
                inner.tracker.spawn(async move {
                    object.message(token, handler_server, msg, respond).await;
                });
            }
            None => {
                let type_code = request.message_type;
                let data = request.message_data;
                inner.tracker.spawn(async move {
                    object
                        .unknown_message(token, handler_server, type_code, data, respond)
                        .await;
                });
            }
        }
    }

    drop(rd);
    inner.shutdown.cancel();

    inner.tracker.close();
    inner.tracker.wait().await;

    for (id, object) in inner.objects.drain_descending() {
        debug!(object_id = id, "clunking object at teardown");
        object.clunk(&server);
    }

    // All responders are gone; closing our sender lets the writer drain
    // whatever is still queued and exit.
    drop(out_tx);
    let _ = writer.await;

    let _ = done.send(true);
}

/// Dedicated writer task: the single point where response frames touch the
/// transport.
async fn write_loop<W>(
    mut wr: W,
    mut frames: mpsc::UnboundedReceiver<Bytes>,
    shutdown: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        if let Err(err) = wr.write_all(&frame).await {
            error!(error = %err, "failed to write response frame");
            shutdown.cancel();
            return;
        }
        if let Err(err) = wr.flush().await {
            error!(error = %err, "failed to flush transport");
            shutdown.cancel();
            return;
        }
    }
}
