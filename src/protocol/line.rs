//! Incremental Line Framing
//!
//! TCP is a stream: a read may deliver half a line or several lines at once.
//! [`next_line`] pulls one complete `\n`-terminated line off the front of a
//! buffer, if there is one.
//!
//! The contract mirrors an incremental parser:
//! - `Ok(Some(line))` - a complete line was removed from the buffer
//! - `Ok(None)` - no newline yet, read more data
//! - `Err(LineError)` - the peer violated the framing rules

use bytes::BytesMut;
use thiserror::Error;

/// Maximum length of a single line, terminator excluded (64 KB)
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Errors that can occur while framing lines.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LineError {
    /// A line grew past the limit without a terminator
    #[error("line too long: {size} bytes (max: {max})")]
    TooLong { size: usize, max: usize },
}

/// Removes the next complete line from `buffer`.
///
/// The trailing `\n` (and a `\r` before it) are stripped. Bytes that are not
/// valid UTF-8 are replaced rather than rejected.
pub fn next_line(buffer: &mut BytesMut) -> Result<Option<String>, LineError> {
    match buffer.iter().position(|&b| b == b'\n') {
        Some(pos) => {
            if pos > MAX_LINE_LENGTH {
                return Err(LineError::TooLong {
                    size: pos,
                    max: MAX_LINE_LENGTH,
                });
            }

            let raw = buffer.split_to(pos + 1);
            let mut line = &raw[..pos];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            Ok(Some(String::from_utf8_lossy(line).into_owned()))
        }
        None if buffer.len() > MAX_LINE_LENGTH => Err(LineError::TooLong {
            size: buffer.len(),
            max: MAX_LINE_LENGTH,
        }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_line() {
        let mut buf = BytesMut::from(&b"GET orange\n"[..]);
        assert_eq!(next_line(&mut buf), Ok(Some("GET orange".to_string())));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_line_needs_more_data() {
        let mut buf = BytesMut::from(&b"GET ora"[..]);
        assert_eq!(next_line(&mut buf), Ok(None));
        assert_eq!(&buf[..], b"GET ora");

        buf.extend_from_slice(b"nge\n");
        assert_eq!(next_line(&mut buf), Ok(Some("GET orange".to_string())));
    }

    #[test]
    fn test_multiple_lines_in_one_read() {
        let mut buf = BytesMut::from(&b"tea\r\nsecret\nSET a b 1\n"[..]);
        assert_eq!(next_line(&mut buf), Ok(Some("tea".to_string())));
        assert_eq!(next_line(&mut buf), Ok(Some("secret".to_string())));
        assert_eq!(next_line(&mut buf), Ok(Some("SET a b 1".to_string())));
        assert_eq!(next_line(&mut buf), Ok(None));
    }

    #[test]
    fn test_empty_line() {
        let mut buf = BytesMut::from(&b"\n"[..]);
        assert_eq!(next_line(&mut buf), Ok(Some(String::new())));
    }

    #[test]
    fn test_line_too_long() {
        let mut buf = BytesMut::from(vec![b'a'; MAX_LINE_LENGTH + 1].as_slice());
        assert!(matches!(next_line(&mut buf), Err(LineError::TooLong { .. })));

        let mut data = vec![b'a'; MAX_LINE_LENGTH + 10];
        data.push(b'\n');
        let mut buf = BytesMut::from(data.as_slice());
        assert!(matches!(next_line(&mut buf), Err(LineError::TooLong { .. })));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut buf = BytesMut::from(&b"GET \xff\n"[..]);
        assert_eq!(next_line(&mut buf), Ok(Some("GET \u{fffd}".to_string())));
    }
}
