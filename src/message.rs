//! The message trait and the per-endpoint type registry.
//!
//! A message carries a self-reported 64-bit type code and an opaque octet
//! body. Type codes are randomly generated once, published, and never
//! changed; the code globally identifies the message's purpose and layout,
//! so two endpoints that agree on a code agree on the body encoding.
//!
//! The [`Registry`] maps type codes to constructors producing fresh, empty
//! instances. It is built mutably during endpoint setup and then shared
//! (typically as `Arc<Registry>`) between a server and its clients. Nothing
//! in this crate keeps process-wide registry state.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, SropError};

/// A protocol message: a type code plus an opaque byte body.
///
/// `unmarshal` reports failure with `false`; a failure is a protocol error
/// handled by the endpoint, never a crash. `as_any`/`into_any` exist so
/// received messages can be downcast back to their concrete type.
pub trait Message: Send + Sync + fmt::Debug + 'static {
    /// The globally unique 64-bit code identifying this message type.
    fn type_code(&self) -> u64;

    /// Serialise the message body.
    fn marshal(&self) -> Vec<u8>;

    /// Populate the message from a body. Returns `false` on malformed input.
    fn unmarshal(&mut self, data: &[u8]) -> bool;

    /// Borrow as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Convert to boxed `Any` for owned downcasting.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl dyn Message {
    /// Downcast a borrowed message to a concrete type.
    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        self.as_any().downcast_ref()
    }

    /// Downcast an owned message to a concrete type.
    pub fn downcast<T: Message>(self: Box<Self>) -> Option<Box<T>> {
        self.into_any().downcast().ok()
    }
}

/// Marshal a message body as JSON.
///
/// Convenience for applications whose messages are plain data structs; the
/// core itself does not care how bodies are encoded.
pub fn marshal_json<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

/// Unmarshal a JSON message body into `value`, reporting failure as `false`.
pub fn unmarshal_json<T: DeserializeOwned>(data: &[u8], value: &mut T) -> bool {
    match serde_json::from_slice(data) {
        Ok(v) => {
            *value = v;
            true
        }
        Err(_) => false,
    }
}

type Constructor = Box<dyn Fn() -> Box<dyn Message> + Send + Sync>;

/// Mapping from message type code to a constructor for that type.
///
/// Built mutably, then frozen behind an `Arc` and shared by the endpoint's
/// server and client halves.
#[derive(Default)]
pub struct Registry {
    constructors: HashMap<u64, Constructor>,
}

impl Registry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for `type_code`.
    ///
    /// The constructor is probed once: the message it produces must report
    /// `type_code` itself. Re-registering the same code is idempotent when
    /// the constructor produces the same concrete type; registering a
    /// different type for an existing code is a configuration error.
    pub fn register_message<F>(&mut self, type_code: u64, constructor: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Message> + Send + Sync + 'static,
    {
        let probe = constructor();
        if probe.type_code() != type_code {
            return Err(SropError::TypeCodeMismatch {
                registered: type_code,
                reported: probe.type_code(),
            });
        }

        if let Some(existing) = self.constructors.get(&type_code) {
            if existing().as_any().type_id() != probe.as_any().type_id() {
                return Err(SropError::RegistryConflict { type_code });
            }
            return Ok(());
        }

        self.constructors.insert(type_code, Box::new(constructor));
        Ok(())
    }

    /// Construct a fresh, empty message for `type_code`, if registered.
    pub fn construct(&self, type_code: u64) -> Option<Box<dyn Message>> {
        self.constructors.get(&type_code).map(|ctor| ctor())
    }

    /// Whether a constructor is registered for `type_code`.
    pub fn contains(&self, type_code: u64) -> bool {
        self.constructors.contains_key(&type_code)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("registered", &self.constructors.len())
            .finish()
    }
}
