use bytes::{Buf, Bytes, BytesMut};
use std::io;

/// A command line as carried through dispatch, the AOF and cluster relays:
/// the command name followed by its raw arguments.
pub type CmdLine = Vec<Vec<u8>>;

/// A single RESP value, used both for replies going out and commands coming in.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// `+OK\r\n`
    Simple(String),
    /// `-ERR message\r\n`
    Error(String),
    /// `:1000\r\n`
    Integer(i64),
    /// `$6\r\nfoobar\r\n`, or `$-1\r\n` when `None`
    Bulk(Option<Bytes>),
    /// `*2\r\n...`, or `*-1\r\n` when `None`
    Array(Option<Vec<Reply>>),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Simple("OK".to_string())
    }

    pub fn simple(s: impl Into<String>) -> Self {
        Reply::Simple(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        Reply::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        Reply::Integer(n)
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(Some(data.into()))
    }

    pub fn null_bulk() -> Self {
        Reply::Bulk(None)
    }

    pub fn array(items: Vec<Reply>) -> Self {
        Reply::Array(Some(items))
    }

    /// Build the multi-bulk form of a command line. Every persisted AOF entry
    /// and every relayed cluster command goes through here.
    pub fn multi_bulk(line: &[Vec<u8>]) -> Self {
        Reply::Array(Some(
            line.iter()
                .map(|arg| Reply::Bulk(Some(Bytes::copy_from_slice(arg))))
                .collect(),
        ))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Interpret this value as raw bytes, for command-argument handling.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Reply::Bulk(Some(data)) => Some(data),
            Reply::Simple(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Flatten a parsed multi-bulk back into a command line.
    /// Returns `None` when the value is not an array of string-like frames.
    pub fn into_cmd_line(self) -> Option<CmdLine> {
        match self {
            Reply::Array(Some(items)) => items
                .into_iter()
                .map(|item| match item {
                    Reply::Bulk(Some(data)) => Some(data.to_vec()),
                    Reply::Simple(s) => Some(s.into_bytes()),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_to(&mut buf);
        buf
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Simple(s) => {
                buf.push(b'+');
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            Reply::Error(s) => {
                buf.push(b'-');
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            Reply::Integer(n) => {
                buf.push(b':');
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            Reply::Bulk(None) => buf.extend_from_slice(b"$-1\r\n"),
            Reply::Bulk(Some(data)) => {
                buf.push(b'$');
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
                buf.extend_from_slice(data);
                buf.extend_from_slice(b"\r\n");
            }
            Reply::Array(None) => buf.extend_from_slice(b"*-1\r\n"),
            Reply::Array(Some(items)) => {
                buf.push(b'*');
                buf.extend_from_slice(items.len().to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
                for item in items {
                    item.write_to(buf);
                }
            }
        }
    }
}

const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
const MAX_ARRAY_LEN: i64 = 1024 * 1024;
const MAX_INLINE_LEN: usize = 64 * 1024;

/// Streaming RESP parser.
///
/// Call [`RespParser::parse`] repeatedly as bytes arrive; it consumes complete
/// frames from the buffer and returns `Ok(None)` until one is available.
/// Lines that do not begin with a RESP type byte are treated as inline
/// commands and split on spaces.
pub struct RespParser;

impl RespParser {
    pub fn parse(buf: &mut BytesMut) -> Result<Option<Reply>, RespError> {
        if buf.is_empty() {
            return Ok(None);
        }
        match buf[0] {
            b'+' | b'-' | b':' | b'$' | b'*' => Self::parse_frame(buf),
            _ => Self::parse_inline(buf),
        }
    }

    fn parse_frame(buf: &mut BytesMut) -> Result<Option<Reply>, RespError> {
        if buf.is_empty() {
            return Ok(None);
        }
        match buf[0] {
            b'+' => Ok(Self::take_line(buf, 1).map(Reply::Simple)),
            b'-' => Ok(Self::take_line(buf, 1).map(Reply::Error)),
            b':' => match Self::take_line(buf, 1) {
                Some(line) => {
                    let n = line
                        .parse::<i64>()
                        .map_err(|_| RespError::Protocol(format!(":{line}")))?;
                    Ok(Some(Reply::Integer(n)))
                }
                None => Ok(None),
            },
            b'$' => Self::parse_bulk(buf),
            b'*' => Self::parse_array(buf),
            other => Err(RespError::UnexpectedByte(other)),
        }
    }

    /// Consume one CRLF-terminated line starting at `skip`, without the
    /// terminator. Returns `None` when the line is still incomplete.
    fn take_line(buf: &mut BytesMut, skip: usize) -> Option<String> {
        let end = find_crlf(buf, skip)?;
        let line = String::from_utf8_lossy(&buf[skip..end]).into_owned();
        buf.advance(end + 2);
        Some(line)
    }

    fn parse_inline(buf: &mut BytesMut) -> Result<Option<Reply>, RespError> {
        let end = match find_crlf(buf, 0) {
            Some(pos) => pos,
            None => {
                if buf.len() > MAX_INLINE_LEN {
                    return Err(RespError::Protocol("too big inline request".into()));
                }
                return Ok(None);
            }
        };
        let line = buf[..end].to_vec();
        buf.advance(end + 2);

        let items: Vec<Reply> = line
            .split(|b| *b == b' ')
            .filter(|part| !part.is_empty())
            .map(|part| Reply::Bulk(Some(Bytes::copy_from_slice(part))))
            .collect();
        // An empty line parses to an empty array; the handler skips it.
        Ok(Some(Reply::Array(Some(items))))
    }

    fn parse_bulk(buf: &mut BytesMut) -> Result<Option<Reply>, RespError> {
        let header_end = match find_crlf(buf, 1) {
            Some(pos) => pos,
            None => return Ok(None),
        };
        let len = parse_len(&buf[1..header_end])?;

        if len == -1 {
            buf.advance(header_end + 2);
            return Ok(Some(Reply::Bulk(None)));
        }
        if len < -1 || len > MAX_BULK_LEN {
            return Err(RespError::Protocol(format!("invalid bulk length {len}")));
        }

        let len = len as usize;
        let total = header_end + 2 + len + 2;
        if buf.len() < total {
            return Ok(None);
        }
        if &buf[header_end + 2 + len..total] != b"\r\n" {
            return Err(RespError::Protocol("bad bulk string terminator".into()));
        }

        let data = Bytes::copy_from_slice(&buf[header_end + 2..header_end + 2 + len]);
        buf.advance(total);
        Ok(Some(Reply::Bulk(Some(data))))
    }

    fn parse_array(buf: &mut BytesMut) -> Result<Option<Reply>, RespError> {
        let header_end = match find_crlf(buf, 1) {
            Some(pos) => pos,
            None => return Ok(None),
        };
        let count = parse_len(&buf[1..header_end])?;

        if count < 0 {
            buf.advance(header_end + 2);
            return Ok(Some(Reply::Array(None)));
        }
        if count > MAX_ARRAY_LEN {
            return Err(RespError::Protocol(format!(
                "invalid multibulk length {count}"
            )));
        }

        // Elements may be incomplete; keep the original bytes so the whole
        // array can be retried on the next read.
        let saved = buf.clone();
        buf.advance(header_end + 2);

        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            match Self::parse_frame(buf)? {
                Some(item) => items.push(item),
                None => {
                    *buf = saved;
                    return Ok(None);
                }
            }
        }
        Ok(Some(Reply::Array(Some(items))))
    }
}

fn find_crlf(buf: &[u8], start: usize) -> Option<usize> {
    if buf.len() < start + 2 {
        return None;
    }
    (start..buf.len() - 1).find(|&i| buf[i] == b'\r' && buf[i + 1] == b'\n')
}

fn parse_len(raw: &[u8]) -> Result<i64, RespError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| RespError::Protocol(String::from_utf8_lossy(raw).into_owned()))
}

#[derive(Debug, thiserror::Error)]
pub enum RespError {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Protocol error: unexpected byte '{}'", *.0 as char)]
    UnexpectedByte(u8),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
