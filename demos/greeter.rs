//! Greeter demo over TCP.
//!
//! One process plays both sides: a server hosting a greeter protocol and a
//! client that creates a greeter named bob, says hello, and destroys it.
//!
//! ```sh
//! cargo run --example greeter
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::info;

use srop::message::{marshal_json, unmarshal_json};
use srop::messages::{standard_registry, Clunk, ObjectRef, Ok as OkMsg, UnexpectedMessage};
use srop::object::BoxFuture;
use srop::{
    Client, ClientOptions, ConnServer, ConnServerOptions, Message, Object, Registry, Responder,
    BOOTSTRAP_OBJECT_ID,
};

// Randomly generated once; a type code globally identifies a message's
// purpose and body layout, so it must never change incompatibly.
const TYPE_MAKE_GREETER: u64 = 0x9685_d09c_b011_4f1f;
const TYPE_HELLO: u64 = 0xa79e_175d_c97e_d3ab;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct MakeGreeter {
    name: String,
}

impl Message for MakeGreeter {
    fn type_code(&self) -> u64 {
        TYPE_MAKE_GREETER
    }
    fn marshal(&self) -> Vec<u8> {
        marshal_json(self)
    }
    fn unmarshal(&mut self, data: &[u8]) -> bool {
        unmarshal_json(data, self)
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any> {
        self
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Hello {
    from: String,
}

impl Message for Hello {
    fn type_code(&self) -> u64 {
        TYPE_HELLO
    }
    fn marshal(&self) -> Vec<u8> {
        marshal_json(self)
    }
    fn unmarshal(&mut self, data: &[u8]) -> bool {
        unmarshal_json(data, self)
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any> {
        self
    }
}

/// Bootstrap object: mints greeters.
struct GreeterRoot;

impl Object for GreeterRoot {
    fn message(
        self: Arc<Self>,
        _shutdown: CancellationToken,
        server: ConnServer,
        msg: Box<dyn Message>,
        respond: Responder,
    ) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if let Some(make) = msg.downcast_ref::<MakeGreeter>() {
                let greeter = Arc::new(Greeter {
                    name: make.name.clone(),
                    self_id: AtomicU64::new(0),
                });
                let id = server.register(greeter.clone());
                greeter.self_id.store(id, Ordering::SeqCst);
                info!(greeter = %make.name, id, "created a greeter");
                respond.respond(&ObjectRef { id });
            } else {
                respond.respond(&UnexpectedMessage);
            }
        })
    }

    fn clunk(self: Arc<Self>, _server: &ConnServer) {
        info!("root object clunked");
    }
}

struct Greeter {
    name: String,
    self_id: AtomicU64,
}

impl Object for Greeter {
    fn message(
        self: Arc<Self>,
        _shutdown: CancellationToken,
        server: ConnServer,
        msg: Box<dyn Message>,
        respond: Responder,
    ) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if let Some(hello) = msg.downcast_ref::<Hello>() {
                info!(from = %hello.from, "greeting received, answering in one second");
                let from = self.name.clone();
                server.spawn(async move {
                    sleep(Duration::from_secs(1)).await;
                    respond.respond(&Hello { from });
                });
            } else if msg.downcast_ref::<Clunk>().is_some() {
                info!(id = self.self_id.load(Ordering::SeqCst), "destroying myself");
                server.clunk(self.self_id.load(Ordering::SeqCst));
                respond.respond(&OkMsg);
            } else {
                respond.respond(&UnexpectedMessage);
            }
        })
    }

    fn clunk(self: Arc<Self>, _server: &ConnServer) {
        info!(greeter = %self.name, "greeter clunked");
    }
}

fn greeter_registry() -> Arc<Registry> {
    let mut reg = standard_registry();
    reg.register_message(TYPE_MAKE_GREETER, || Box::<MakeGreeter>::default())
        .expect("fresh registry");
    reg.register_message(TYPE_HELLO, || Box::<Hello>::default())
        .expect("fresh registry");
    Arc::new(reg)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    info!(%addr, "greeter server listening");

    let registry = greeter_registry();
    let server_registry = registry.clone();
    let server_task = tokio::spawn(async move {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "connection accepted");
        let server = ConnServer::start(
            stream,
            ConnServerOptions::new(|_server: &ConnServer| Arc::new(GreeterRoot) as Arc<dyn Object>)
                .registry(server_registry),
        );
        server.wait().await;
        info!("server connection terminated");
        Result::<(), std::io::Error>::Ok(())
    });

    let stream = TcpStream::connect(addr).await?;
    let client = Client::new(stream, ClientOptions::new().registry(registry));

    info!("creating a new greeter named bob via the bootstrap object");
    let reply = client
        .send(
            BOOTSTRAP_OBJECT_ID,
            &MakeGreeter {
                name: "bob".to_string(),
            },
        )
        .await?;
    let greeter_id = reply
        .downcast::<ObjectRef>()
        .expect("bootstrap replies with an object ref")
        .id;

    info!(greeter_id, "saying hello to our new greeter");
    let reply = client
        .send(
            greeter_id,
            &Hello {
                from: "client".to_string(),
            },
        )
        .await?;
    let hello = reply.downcast::<Hello>().expect("greeter says hello back");
    info!(from = %hello.from, "got a reply");

    info!("destroying the greeter");
    let reply = client.send(greeter_id, &Clunk).await?;
    reply.downcast::<OkMsg>().expect("clunk is acknowledged");

    info!("closing the connection");
    client.close().await;

    server_task.await??;
    Ok(())
}
