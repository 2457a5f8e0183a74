//! The standard message catalogue and its frozen type codes.
//!
//! These codes are part of the wire ABI: they were generated randomly once,
//! published, and must never change. Deployments identify a message purpose
//! and body layout by code alone.
//!
//! Body encodings: the acknowledgement and error messages have empty bodies
//! (any body on the wire is tolerated and ignored); [`ObjectRef`] carries
//! the object id as 8 bytes little-endian; [`UnexpectedError`] carries a
//! JSON object with a `description` field.

use std::any::Any;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::{marshal_json, unmarshal_json, Message, Registry};

/// Type code for [`Ok`].
pub const TYPE_OK: u64 = 0x8c8f_a11d_0a4e_9b79;
/// Type code for [`Clunk`].
pub const TYPE_CLUNK: u64 = 0x3f61_a0d2_b8c9_e517;
/// Type code for [`ObjectRef`].
pub const TYPE_OBJECT_REF: u64 = 0xd5f2_a9c0_4b7e_3861;
/// Type code for [`UnexpectedMessage`].
pub const TYPE_UNEXPECTED_MESSAGE: u64 = 0x1bd7_c44a_a339_0f28;
/// Type code for [`NoSuchObject`].
pub const TYPE_NO_SUCH_OBJECT: u64 = 0x64e0_fb59_c1a2_d8b3;
/// Type code for [`UnexpectedError`].
pub const TYPE_UNEXPECTED_ERROR: u64 = 0xa150_5aee_2c8b_4f09;
/// Type code for [`MessageTooLarge`].
pub const TYPE_MESSAGE_TOO_LARGE: u64 = 0x7b3c_e1f8_d409_2a6d;
/// Type code for [`Timeout`].
pub const TYPE_TIMEOUT: u64 = 0xe892_4cb6_075f_d13a;

macro_rules! empty_body_message {
    ($(#[$doc:meta])* $name:ident, $code:expr) => {
        $(#[$doc])*
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
        pub struct $name;

        impl Message for $name {
            fn type_code(&self) -> u64 {
                $code
            }
            fn marshal(&self) -> Vec<u8> {
                Vec::new()
            }
            fn unmarshal(&mut self, _data: &[u8]) -> bool {
                true
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
            fn into_any(self: Box<Self>) -> Box<dyn Any> {
                self
            }
        }
    };
}

empty_body_message!(
    /// Generic affirmative reply.
    Ok,
    TYPE_OK
);
empty_body_message!(
    /// Request that an object destroy itself. The name comes from the 9p
    /// protocol, where a capability is "clunked" when its holder is done
    /// with it.
    Clunk,
    TYPE_CLUNK
);
empty_body_message!(
    /// The recipient object did not expect this message.
    UnexpectedMessage,
    TYPE_UNEXPECTED_MESSAGE
);
empty_body_message!(
    /// The requested object id is not present on this connection.
    NoSuchObject,
    TYPE_NO_SUCH_OBJECT
);
empty_body_message!(
    /// A frame exceeded the endpoint's configured maximum message size.
    MessageTooLarge,
    TYPE_MESSAGE_TOO_LARGE
);
empty_body_message!(
    /// Reserved for application-level deadline handling; the core enforces
    /// no per-request deadline itself.
    Timeout,
    TYPE_TIMEOUT
);

/// Reply carrying the id of a newly created object.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ObjectRef {
    pub id: u64,
}

impl Message for ObjectRef {
    fn type_code(&self) -> u64 {
        TYPE_OBJECT_REF
    }
    fn marshal(&self) -> Vec<u8> {
        self.id.to_le_bytes().to_vec()
    }
    fn unmarshal(&mut self, data: &[u8]) -> bool {
        if data.len() != 8 {
            return false;
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(data);
        self.id = u64::from_le_bytes(bytes);
        true
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Generic handler failure, carrying a human-readable description.
///
/// Handlers translate application errors into protocol replies; this is the
/// fallback for faults with no more specific message.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnexpectedError {
    pub description: String,
}

impl Message for UnexpectedError {
    fn type_code(&self) -> u64 {
        TYPE_UNEXPECTED_ERROR
    }
    fn marshal(&self) -> Vec<u8> {
        marshal_json(self)
    }
    fn unmarshal(&mut self, data: &[u8]) -> bool {
        unmarshal_json(data, self)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Register the standard messages and errors into `registry`.
pub fn register_standard_messages(registry: &mut Registry) -> Result<()> {
    registry.register_message(TYPE_OK, || Box::new(Ok))?;
    registry.register_message(TYPE_CLUNK, || Box::new(Clunk))?;
    registry.register_message(TYPE_OBJECT_REF, || Box::<ObjectRef>::default())?;
    registry.register_message(TYPE_UNEXPECTED_MESSAGE, || Box::new(UnexpectedMessage))?;
    registry.register_message(TYPE_NO_SUCH_OBJECT, || Box::new(NoSuchObject))?;
    registry.register_message(TYPE_UNEXPECTED_ERROR, || Box::<UnexpectedError>::default())?;
    registry.register_message(TYPE_MESSAGE_TOO_LARGE, || Box::new(MessageTooLarge))?;
    registry.register_message(TYPE_TIMEOUT, || Box::new(Timeout))
}

/// A fresh registry pre-populated with the standard messages.
pub fn standard_registry() -> Registry {
    let mut registry = Registry::new();
    register_standard_messages(&mut registry)
        .expect("standard messages cannot conflict in an empty registry");
    registry
}
