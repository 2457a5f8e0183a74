//! Create-use-destroy lifecycle test using a small greeter protocol: the
//! bootstrap object mints greeter objects, a greeter says hello back, and a
//! `Clunk` message destroys it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::duplex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use srop::message::{marshal_json, unmarshal_json};
use srop::messages::{
    standard_registry, Clunk, NoSuchObject, ObjectRef, Ok as OkMsg, UnexpectedMessage,
};
use srop::object::BoxFuture;
use srop::{
    Client, ClientOptions, ConnServer, ConnServerOptions, Message, Object, Registry, Responder,
    BOOTSTRAP_OBJECT_ID,
};

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

/// Bootstrap object: answers `MakeGreeter` with a fresh greeter's id.
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
                // The greeter needs its own id to remove itself later.
                greeter.self_id.store(id, Ordering::SeqCst);
                respond.respond(&ObjectRef { id });
            } else {
                respond.respond(&UnexpectedMessage);
            }
        })
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
            if msg.downcast_ref::<Hello>().is_some() {
                // Say hello back a little later, through the task group so
                // shutdown drains the deferred respond.
                let from = self.name.clone();
                server.spawn(async move {
                    sleep(Duration::from_millis(50)).await;
                    respond.respond(&Hello { from });
                });
            } else if msg.downcast_ref::<Clunk>().is_some() {
                server.clunk(self.self_id.load(Ordering::SeqCst));
                respond.respond(&OkMsg);
            } else {
                respond.respond(&UnexpectedMessage);
            }
        })
    }
}

fn greeter_registry() -> Arc<Registry> {
    let mut reg = standard_registry();
    reg.register_message(TYPE_MAKE_GREETER, || Box::<MakeGreeter>::default())
        .unwrap();
    reg.register_message(TYPE_HELLO, || Box::<Hello>::default())
        .unwrap();
    Arc::new(reg)
}

#[tokio::test]
async fn test_create_use_destroy() {
    let (a, b) = duplex(64 * 1024);
    let reg = greeter_registry();

    let server = ConnServer::start(
        a,
        ConnServerOptions::new(|_server: &ConnServer| Arc::new(GreeterRoot) as Arc<dyn Object>)
            .registry(reg.clone()),
    );
    let client = Client::new(b, ClientOptions::new().registry(reg));

    // Create.
    let reply = client
        .send(
            BOOTSTRAP_OBJECT_ID,
            &MakeGreeter {
                name: "bob".to_string(),
            },
        )
        .await
        .unwrap();
    let greeter_id = reply.downcast::<ObjectRef>().unwrap().id;
    assert_ne!(greeter_id, BOOTSTRAP_OBJECT_ID);

    // Use.
    let reply = client
        .send(
            greeter_id,
            &Hello {
                from: "client".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(reply.downcast::<Hello>().unwrap().from, "bob");

    // Destroy.
    let reply = client.send(greeter_id, &Clunk).await.unwrap();
    assert!(reply.downcast_ref::<OkMsg>().is_some());

    // The capability is gone.
    let reply = client
        .send(
            greeter_id,
            &Hello {
                from: "client".to_string(),
            },
        )
        .await
        .unwrap();
    assert!(reply.downcast_ref::<NoSuchObject>().is_some());

    client.close().await;
    server.shutdown();
    server.wait().await;
}

#[tokio::test]
async fn test_each_greeter_gets_its_own_id() {
    let (a, b) = duplex(64 * 1024);
    let reg = greeter_registry();

    let server = ConnServer::start(
        a,
        ConnServerOptions::new(|_server: &ConnServer| Arc::new(GreeterRoot) as Arc<dyn Object>)
            .registry(reg.clone()),
    );
    let client = Client::new(b, ClientOptions::new().registry(reg));

    let mut ids = Vec::new();
    for name in ["alice", "bob", "carol"] {
        let reply = client
            .send(
                BOOTSTRAP_OBJECT_ID,
                &MakeGreeter {
                    name: name.to_string(),
                },
            )
            .await
            .unwrap();
        ids.push(reply.downcast::<ObjectRef>().unwrap().id);
    }

    // Monotone, never-reused ids.
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));

    // Each greeter answers with its own name.
    for (id, name) in ids.iter().zip(["alice", "bob", "carol"]) {
        let reply = client
            .send(
                *id,
                &Hello {
                    from: "client".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(reply.downcast::<Hello>().unwrap().from, name);
    }

    client.close().await;
    server.shutdown();
    server.wait().await;
}

#[tokio::test]
async fn test_greeter_rejects_unexpected_registered_message() {
    let (a, b) = duplex(64 * 1024);
    let reg = greeter_registry();

    let server = ConnServer::start(
        a,
        ConnServerOptions::new(|_server: &ConnServer| Arc::new(GreeterRoot) as Arc<dyn Object>)
            .registry(reg.clone()),
    );
    let client = Client::new(b, ClientOptions::new().registry(reg));

    let reply = client
        .send(
            BOOTSTRAP_OBJECT_ID,
            &MakeGreeter {
                name: "bob".to_string(),
            },
        )
        .await
        .unwrap();
    let greeter_id = reply.downcast::<ObjectRef>().unwrap().id;

    // A greeter has no use for MakeGreeter.
    let reply = client
        .send(
            greeter_id,
            &MakeGreeter {
                name: "eve".to_string(),
            },
        )
        .await
        .unwrap();
    assert!(reply.downcast_ref::<UnexpectedMessage>().is_some());

    // An unregistered type goes down the unknown-message default path.
    let reply = client
        .send_raw(greeter_id, 0xdead_beef, Bytes::new())
        .await
        .unwrap();
    assert!(reply.downcast_ref::<UnexpectedMessage>().is_some());

    client.close().await;
    server.shutdown();
    server.wait().await;
}
