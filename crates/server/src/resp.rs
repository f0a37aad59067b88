//! RESP2 request parsing and reply encoding.
//!
//! Requests arrive either as multi-bulk arrays (`*2\r\n$3\r\nGET\r\n$2\r\nd1\r\n`)
//! or inline (`GET d1\r\n`). Inline arguments are split on whitespace; quoting
//! is not supported.
use std::borrow::Cow;
use std::io::{self, BufRead, Read, Write};
use thiserror::Error;

/// Longest accepted inline command or header line.
pub const MAX_INLINE_LEN: usize = 64 * 1024;
/// Most arguments in one multi-bulk request.
pub const MAX_ARGS: usize = 1024;
/// Longest accepted bulk argument.
pub const MAX_BULK_LEN: usize = 512 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("line longer than {} bytes", MAX_INLINE_LEN)]
    LineTooLong,

    #[error("invalid multibulk length")]
    InvalidMultibulkLength,

    #[error("invalid bulk length")]
    InvalidBulkLength,

    #[error("expected '$', got '{}'", char::from(*.0))]
    ExpectedBulk(u8),

    #[error("bulk string not terminated by CRLF")]
    MissingCrlf,
}

/// Reads the next non-empty command.
///
/// Returns `Ok(None)` when the peer closes the stream between commands.
pub fn read_command<R: BufRead>(r: &mut R) -> Result<Option<Vec<Vec<u8>>>, ProtocolError> {
    let mut line = Vec::new();
    loop {
        line.clear();
        if !read_line(r, &mut line)? {
            return Ok(None);
        }
        let args = match line.first() {
            Some(b'*') => read_multibulk(r, &line[1..])?,
            _ => line
                .split(|b| b.is_ascii_whitespace())
                .filter(|arg| !arg.is_empty())
                .map(<[u8]>::to_vec)
                .collect(),
        };
        if !args.is_empty() {
            return Ok(Some(args));
        }
    }
}

/// Reads one `\n`-terminated line into `buf` without its line ending.
/// Returns `false` on a clean end of stream.
fn read_line<R: BufRead>(r: &mut R, buf: &mut Vec<u8>) -> Result<bool, ProtocolError> {
    let n = (&mut *r).take(MAX_INLINE_LEN as u64 + 1).read_until(b'\n', buf)?;
    if n == 0 {
        return Ok(false);
    }
    if buf.last() != Some(&b'\n') {
        return Err(if buf.len() > MAX_INLINE_LEN {
            ProtocolError::LineTooLong
        } else {
            ProtocolError::UnexpectedEof
        });
    }
    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(true)
}

fn parse_len(raw: &[u8]) -> Option<i64> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}

fn read_multibulk<R: BufRead>(r: &mut R, header: &[u8]) -> Result<Vec<Vec<u8>>, ProtocolError> {
    let count = parse_len(header).ok_or(ProtocolError::InvalidMultibulkLength)?;
    if count <= 0 {
        return Ok(Vec::new());
    }
    if count as u64 > MAX_ARGS as u64 {
        return Err(ProtocolError::InvalidMultibulkLength);
    }

    let mut args = Vec::with_capacity(count as usize);
    let mut line = Vec::new();
    for _ in 0..count {
        line.clear();
        if !read_line(r, &mut line)? {
            return Err(ProtocolError::UnexpectedEof);
        }
        match line.first() {
            Some(b'$') => {}
            Some(&other) => return Err(ProtocolError::ExpectedBulk(other)),
            None => return Err(ProtocolError::ExpectedBulk(b'\n')),
        }
        let len = parse_len(&line[1..])
            .filter(|&n| n >= 0 && n as u64 <= MAX_BULK_LEN as u64)
            .ok_or(ProtocolError::InvalidBulkLength)? as usize;

        let mut arg = vec![0u8; len + 2];
        r.read_exact(&mut arg).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => ProtocolError::UnexpectedEof,
            _ => ProtocolError::Io(e),
        })?;
        if !arg.ends_with(b"\r\n") {
            return Err(ProtocolError::MissingCrlf);
        }
        arg.truncate(len);
        args.push(arg);
    }
    Ok(args)
}

/// A RESP2 reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Simple(Cow<'static, str>),
    /// Full error line, conventionally starting with an error code such as `ERR`.
    Error(String),
    Integer(i64),
    Bulk(Vec<u8>),
    Null,
    Array(Vec<Reply>),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Simple(Cow::Borrowed("OK"))
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Reply::Error(msg.into())
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        match self {
            Reply::Simple(s) => write!(w, "+{s}\r\n"),
            // Error text must stay on one line.
            Reply::Error(msg) => write!(w, "-{}\r\n", msg.replace(['\r', '\n'], " ")),
            Reply::Integer(n) => write!(w, ":{n}\r\n"),
            Reply::Bulk(data) => {
                write!(w, "${}\r\n", data.len())?;
                w.write_all(data)?;
                w.write_all(b"\r\n")
            }
            Reply::Null => w.write_all(b"$-1\r\n"),
            Reply::Array(items) => {
                write!(w, "*{}\r\n", items.len())?;
                for item in items {
                    item.write_to(w)?;
                }
                Ok(())
            }
        }
    }
}
