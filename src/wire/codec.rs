//! Stream codec: reading and writing frames on an async byte stream.
//!
//! Both read paths take a `max_len` bound on the body length. A frame that
//! declares a longer body fails with [`SropError::FrameTooLarge`] before any
//! body byte is consumed; the stream is desynchronised at that point and the
//! connection must close. EOF before the first header byte is a clean close
//! (`Ok(None)`); EOF anywhere inside a frame is [`SropError::Truncated`].

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::frame::{Request, Response, REQUEST_HEADER_SIZE, RESPONSE_HEADER_SIZE};
use crate::error::{Result, SropError};

/// Read one request frame. `Ok(None)` means the peer closed cleanly.
pub async fn read_request<R>(r: &mut R, max_len: u64) -> Result<Option<Request>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; REQUEST_HEADER_SIZE];
    if !read_header(r, &mut header).await? {
        return Ok(None);
    }

    let object_id = u64::from_le_bytes(header[0..8].try_into().expect("slice is 8 bytes"));
    let request_id = u64::from_le_bytes(header[8..16].try_into().expect("slice is 8 bytes"));
    let message_type = u64::from_le_bytes(header[16..24].try_into().expect("slice is 8 bytes"));
    let data_len = u64::from_le_bytes(header[24..32].try_into().expect("slice is 8 bytes"));

    let message_data = read_body(r, data_len, max_len).await?;

    Ok(Some(Request {
        object_id,
        request_id,
        message_type,
        message_data,
    }))
}

/// Read one response frame. `Ok(None)` means the peer closed cleanly.
pub async fn read_response<R>(r: &mut R, max_len: u64) -> Result<Option<Response>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; RESPONSE_HEADER_SIZE];
    if !read_header(r, &mut header).await? {
        return Ok(None);
    }

    let request_id = u64::from_le_bytes(header[0..8].try_into().expect("slice is 8 bytes"));
    let response_type = u64::from_le_bytes(header[8..16].try_into().expect("slice is 8 bytes"));
    let data_len = u64::from_le_bytes(header[16..24].try_into().expect("slice is 8 bytes"));

    let response_data = read_body(r, data_len, max_len).await?;

    Ok(Some(Response {
        request_id,
        response_type,
        response_data,
    }))
}

/// Write one request frame.
pub async fn write_request<W>(w: &mut W, req: &Request) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    w.write_all(&req.encode()).await?;
    w.flush().await?;
    Ok(())
}

/// Write one response frame.
pub async fn write_response<W>(w: &mut W, resp: &Response) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    w.write_all(&resp.encode()).await?;
    w.flush().await?;
    Ok(())
}

/// Fill `header` from the stream.
///
/// Returns `Ok(false)` on EOF at the frame boundary; EOF after at least one
/// header byte is a truncation error.
async fn read_header<R>(r: &mut R, header: &mut [u8]) -> Result<bool>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < header.len() {
        let n = r.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(SropError::Truncated);
        }
        filled += n;
    }
    Ok(true)
}

/// Validate `data_len` against `max_len`, then read the body.
async fn read_body<R>(r: &mut R, data_len: u64, max_len: u64) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    if data_len > max_len {
        return Err(SropError::FrameTooLarge {
            len: data_len,
            max: max_len,
        });
    }
    let len = usize::try_from(data_len).map_err(|_| SropError::FrameTooLarge {
        len: data_len,
        max: max_len,
    })?;

    let mut body = vec![0u8; len];
    r.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            SropError::Truncated
        } else {
            SropError::Io(e)
        }
    })?;
    Ok(Bytes::from(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_request_read_write_roundtrip() {
        let r1 = Request {
            object_id: 123,
            request_id: 456,
            message_type: 789,
            message_data: Bytes::from_static(&[10, 11, 12]),
        };

        let mut buf = Cursor::new(Vec::new());
        write_request(&mut buf, &r1).await.unwrap();

        let bytes = buf.into_inner();
        let r2 = read_request(&mut bytes.as_slice(), 9999)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(r1, r2);
    }

    #[tokio::test]
    async fn test_response_read_write_roundtrip() {
        let r1 = Response {
            request_id: 123,
            response_type: 456,
            response_data: Bytes::from_static(&[7, 8, 9]),
        };

        let mut buf = Cursor::new(Vec::new());
        write_response(&mut buf, &r1).await.unwrap();

        let bytes = buf.into_inner();
        let r2 = read_response(&mut bytes.as_slice(), 9999)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(r1, r2);
    }

    #[tokio::test]
    async fn test_empty_body_roundtrip() {
        let r1 = Request {
            object_id: 0,
            request_id: 1,
            message_type: 2,
            message_data: Bytes::new(),
        };

        let bytes = r1.encode();
        let r2 = read_request(&mut bytes.as_slice(), 0).await.unwrap().unwrap();
        assert_eq!(r1, r2);
    }

    #[tokio::test]
    async fn test_clean_eof_is_none() {
        let empty: &[u8] = &[];
        let got = read_request(&mut &*empty, 100).await.unwrap();
        assert!(got.is_none());

        let got = read_response(&mut &*empty, 100).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_eof_mid_header_is_truncated() {
        let r = Request {
            object_id: 1,
            request_id: 2,
            message_type: 3,
            message_data: Bytes::from_static(b"body"),
        };
        let bytes = r.encode();

        let partial = &bytes[..REQUEST_HEADER_SIZE - 5];
        let err = read_request(&mut &*partial, 100).await.unwrap_err();
        assert!(matches!(err, SropError::Truncated));
    }

    #[tokio::test]
    async fn test_eof_mid_body_is_truncated() {
        let r = Response {
            request_id: 1,
            response_type: 2,
            response_data: Bytes::from_static(b"long body here"),
        };
        let bytes = r.encode();

        let partial = &bytes[..bytes.len() - 3];
        let err = read_response(&mut &*partial, 100).await.unwrap_err();
        assert!(matches!(err, SropError::Truncated));
    }

    #[tokio::test]
    async fn test_oversize_body_rejected_before_read() {
        let r = Request {
            object_id: 1,
            request_id: 2,
            message_type: 3,
            message_data: Bytes::from(vec![0u8; 64]),
        };
        // Only the header: the body must not be needed for the error.
        let bytes = r.encode()[..REQUEST_HEADER_SIZE].to_vec();

        let err = read_request(&mut bytes.as_slice(), 63).await.unwrap_err();
        match err {
            SropError::FrameTooLarge { len, max } => {
                assert_eq!(len, 64);
                assert_eq!(max, 63);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_body_at_exactly_max_is_accepted() {
        let r = Response {
            request_id: 1,
            response_type: 2,
            response_data: Bytes::from(vec![0xAB; 64]),
        };
        let bytes = r.encode();

        let got = read_response(&mut bytes.as_slice(), 64)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.response_data.len(), 64);
    }

    #[tokio::test]
    async fn test_back_to_back_frames() {
        let a = Request {
            object_id: 1,
            request_id: 10,
            message_type: 100,
            message_data: Bytes::from_static(b"first"),
        };
        let b = Request {
            object_id: 2,
            request_id: 20,
            message_type: 200,
            message_data: Bytes::from_static(b"second"),
        };

        let mut bytes = a.encode();
        bytes.extend_from_slice(&b.encode());

        let mut rd = bytes.as_slice();
        let got_a = read_request(&mut rd, 100).await.unwrap().unwrap();
        let got_b = read_request(&mut rd, 100).await.unwrap().unwrap();
        assert_eq!(got_a, a);
        assert_eq!(got_b, b);
        assert!(read_request(&mut rd, 100).await.unwrap().is_none());
    }
}
