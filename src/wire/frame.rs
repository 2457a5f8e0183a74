//! Request and response frame structs.
//!
//! Frame layouts (all fields u64 little-endian):
//!
//! ```text
//! Request:  | object_id | request_id | message_type | data_len | message_data... |
//! Response: | request_id | response_type | data_len | response_data...           |
//! ```
//!
//! Bodies are opaque octet strings; their interpretation is determined by
//! the message type code. Uses `bytes::Bytes` for cheap body sharing.

use bytes::Bytes;

/// Size of the fixed request header (four u64 fields).
pub const REQUEST_HEADER_SIZE: usize = 32;

/// Size of the fixed response header (three u64 fields).
pub const RESPONSE_HEADER_SIZE: usize = 24;

/// A single request frame.
///
/// `object_id` addresses an object on the receiving endpoint; id 0 is the
/// bootstrap object. `request_id` is chosen by the sender and must be unique
/// among that sender's in-flight requests on the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub object_id: u64,
    pub request_id: u64,
    pub message_type: u64,
    pub message_data: Bytes,
}

impl Request {
    /// Encode the frame into a contiguous byte vector.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(REQUEST_HEADER_SIZE + self.message_data.len());
        buf.extend_from_slice(&self.object_id.to_le_bytes());
        buf.extend_from_slice(&self.request_id.to_le_bytes());
        buf.extend_from_slice(&self.message_type.to_le_bytes());
        buf.extend_from_slice(&(self.message_data.len() as u64).to_le_bytes());
        buf.extend_from_slice(&self.message_data);
        buf
    }
}

/// A single response frame, matching exactly one prior request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub request_id: u64,
    pub response_type: u64,
    pub response_data: Bytes,
}

impl Response {
    /// Encode the frame into a contiguous byte vector.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RESPONSE_HEADER_SIZE + self.response_data.len());
        buf.extend_from_slice(&self.request_id.to_le_bytes());
        buf.extend_from_slice(&self.response_type.to_le_bytes());
        buf.extend_from_slice(&(self.response_data.len() as u64).to_le_bytes());
        buf.extend_from_slice(&self.response_data);
        buf
    }
}
