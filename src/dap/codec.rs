//! DAP wire framing
//!
//! Every message is a JSON body behind HTTP-style headers:
//! ```text
//! Content-Length: <byte-length>\r\n
//! \r\n
//! <JSON body>
//! ```

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::common::{Error, Result};

/// Largest body accepted from the host
const MAX_BODY: usize = 16 * 1024 * 1024;

/// Read one message body
///
/// Returns `Ok(None)` when the stream ends cleanly between messages.
pub async fn read_message<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<String>> {
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            if saw_header {
                return Err(Error::Protocol("stream ended inside message headers".to_string()));
            }
            return Ok(None);
        }

        if line == "\r\n" || line == "\n" {
            if !saw_header {
                continue;
            }
            break;
        }
        saw_header = true;

        // Content-Type and friends are ignored
        if let Some(value) = line.trim().strip_prefix("Content-Length:") {
            let value = value.trim();
            content_length = Some(value.parse().map_err(|_| {
                Error::Protocol(format!("invalid Content-Length: {value}"))
            })?);
        }
    }

    let len = content_length
        .ok_or_else(|| Error::Protocol("missing Content-Length header".to_string()))?;
    if len > MAX_BODY {
        return Err(Error::Protocol(format!("Content-Length too large: {len} bytes")));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    String::from_utf8(body)
        .map(Some)
        .map_err(|e| Error::Protocol(format!("invalid UTF-8 in message body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    fn frame(json: &str) -> Vec<u8> {
        format!("Content-Length: {}\r\n\r\n{json}", json.len()).into_bytes()
    }

    #[tokio::test]
    async fn test_read_message_with_extra_headers() {
        let data = b"Content-Length: 13\r\nContent-Type: application/json\r\n\r\n{\"test\":true}";
        let mut reader = BufReader::new(Cursor::new(data.to_vec()));

        let body = read_message(&mut reader).await.unwrap();
        assert_eq!(body.as_deref(), Some("{\"test\":true}"));
        assert!(read_message(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_back_to_back_messages() {
        let mut data = frame(r#"{"seq":1}"#);
        data.extend(frame(r#"{"seq":2}"#));
        let mut reader = BufReader::new(Cursor::new(data));

        assert_eq!(read_message(&mut reader).await.unwrap().unwrap(), r#"{"seq":1}"#);
        assert_eq!(read_message(&mut reader).await.unwrap().unwrap(), r#"{"seq":2}"#);
        assert!(read_message(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_length_is_rejected() {
        let data = b"Content-Type: application/json\r\n\r\n{}";
        let mut reader = BufReader::new(Cursor::new(data.to_vec()));
        assert!(matches!(read_message(&mut reader).await, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_truncated_body_is_an_error() {
        let data = b"Content-Length: 50\r\n\r\n{\"seq\":1}";
        let mut reader = BufReader::new(Cursor::new(data.to_vec()));
        assert!(matches!(read_message(&mut reader).await, Err(Error::Io(_))));
    }
}
