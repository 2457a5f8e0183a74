//! Wire protocol: frame layout and stream codec.
//!
//! The protocol is a stream of independent length-prefixed frames. Requests
//! and responses share the byte stream, one kind in each direction. All
//! integers are fixed-width little-endian.

mod codec;
mod frame;

pub use codec::{read_request, read_response, write_request, write_response};
pub use frame::{Request, Response, REQUEST_HEADER_SIZE, RESPONSE_HEADER_SIZE};
