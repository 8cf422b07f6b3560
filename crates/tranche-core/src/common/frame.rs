//! Line-oriented framing shared by callers, the master and workers.
//!
//! A frame is two newline-terminated lines:
//!
//! ```text
//! cmd: <verb>
//!  body: <json-payload>
//! ```
//!
//! The encoder always emits exactly `cmd: {verb}\n body: {payload}\n`. The
//! decoder is lenient about surrounding whitespace, a trailing `\r` and blank
//! lines between frames, but insists on the `cmd:` and `body:` prefixes.

use crate::common::{
    error::{Error, Result},
    types::Command,
};
use bytes::{Buf, BufMut, BytesMut};
use core::fmt;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

const CMD_PREFIX: &str = "cmd:";
const BODY_PREFIX: &str = "body:";

/// Default upper bound for a single frame, in bytes.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// One `cmd:` / `body:` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub cmd: String,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command, body: impl Into<String>) -> Self {
        Self {
            cmd: command.as_str().to_string(),
            body: body.into(),
        }
    }

    /// Builds a frame whose body is the compact JSON encoding of `payload`.
    pub fn json<T: Serialize>(command: Command, payload: &T) -> Result<Self> {
        let body = serde_json::to_string(payload).map_err(|e| Error::encode(&e))?;
        Ok(Self::new(command, body))
    }

    /// Parses the verb of this frame.
    pub fn command(&self) -> Result<Command> {
        self.cmd.parse()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmd: {}\n body: {}\n", self.cmd, self.body)
    }
}

/// What a request handler writes back to its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A formatted success frame.
    Frame(Frame),
    /// A plain, single-line error message.
    Error(String),
}

impl From<Frame> for Reply {
    fn from(frame: Frame) -> Self {
        Self::Frame(frame)
    }
}

impl From<Error> for Reply {
    fn from(err: Error) -> Self {
        Self::Error(err.to_string())
    }
}

/// [`Decoder`]/[`Encoder`] for [`Frame`]s over any byte stream.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_bytes: usize,
}

impl FrameCodec {
    pub const fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }

    fn too_large(&self, len: usize) -> Error {
        Error::FrameTooLarge {
            len,
            max: self.max_frame_bytes,
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        // Drop blank lines left between frames.
        while let Some(end) = find_newline(src, 0) {
            if !src[..end].iter().all(u8::is_ascii_whitespace) {
                break;
            }
            src.advance(end + 1);
        }

        let Some(cmd_end) = find_newline(src, 0) else {
            return self.wait_for_more(src);
        };
        let Some(body_end) = find_newline(src, cmd_end + 1) else {
            return self.wait_for_more(src);
        };

        let frame_len = body_end + 1;
        if frame_len > self.max_frame_bytes {
            return Err(self.too_large(frame_len));
        }

        let raw = src.split_to(frame_len);
        let cmd = field(&raw[..cmd_end], CMD_PREFIX)?;
        let body = field(&raw[cmd_end + 1..body_end], BODY_PREFIX)?;

        Ok(Some(Frame { cmd, body }))
    }
}

impl FrameCodec {
    fn wait_for_more(&self, src: &BytesMut) -> Result<Option<Frame>> {
        if src.len() > self.max_frame_bytes {
            return Err(self.too_large(src.len()));
        }
        Ok(None)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        if frame.cmd.contains('\n') || frame.body.contains('\n') {
            return Err(Error::MalformedFrame {
                reason: "embedded newline".to_string(),
            });
        }

        let len = frame.cmd.len() + frame.body.len() + 14;
        if len > self.max_frame_bytes {
            return Err(self.too_large(len));
        }

        dst.reserve(len);
        dst.put_slice(b"cmd: ");
        dst.put_slice(frame.cmd.as_bytes());
        dst.put_slice(b"\n body: ");
        dst.put_slice(frame.body.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

impl Encoder<Reply> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, reply: Reply, dst: &mut BytesMut) -> Result<()> {
        match reply {
            Reply::Frame(frame) => self.encode(frame, dst),
            Reply::Error(message) => {
                let line = message.replace(['\r', '\n'], " ");
                dst.reserve(line.len() + 1);
                dst.put_slice(line.as_bytes());
                dst.put_u8(b'\n');
                Ok(())
            }
        }
    }
}

fn find_newline(src: &[u8], from: usize) -> Option<usize> {
    src.get(from..)?
        .iter()
        .position(|b| *b == b'\n')
        .map(|i| from + i)
}

fn field(line: &[u8], prefix: &str) -> Result<String> {
    let line = core::str::from_utf8(line).map_err(|e| Error::MalformedFrame {
        reason: e.to_string(),
    })?;
    let value = line
        .trim()
        .strip_prefix(prefix)
        .ok_or_else(|| Error::MalformedFrame {
            reason: format!("expected `{prefix}` line, got {:?}", line.trim()),
        })?;
    Ok(value.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(frame: Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        FrameCodec::default().encode(frame, &mut buf).unwrap();
        buf
    }

    #[test]
    fn encodes_the_exact_wire_layout() {
        let buf = encode(Frame::new(Command::Start, r#"{"pointer":0}"#));
        assert_eq!(&buf[..], b"cmd: start\n body: {\"pointer\":0}\n");
    }

    #[test]
    fn display_matches_encoder() {
        let frame = Frame::new(Command::Cancel, "{}");
        assert_eq!(frame.to_string().as_bytes(), &encode(frame)[..]);
    }

    #[test]
    fn decodes_a_complete_frame() {
        let mut buf = BytesMut::from(&b"cmd: get\n body: {\"cors\":1}\n"[..]);
        let frame = FrameCodec::default().decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.cmd, "get");
        assert_eq!(frame.body, r#"{"cors":1}"#);
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_the_body_line() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&b"cmd: start\n body: {\"ha"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"sh\":\"x\"}\n");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.body, r#"{"hash":"x"}"#);
    }

    #[test]
    fn decodes_back_to_back_frames() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&b"cmd: cancel\n body: {}\n\r\ncmd: get\r\n body: {}\r\n"[..]);

        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.command().unwrap(), Command::Cancel);
        assert_eq!(second.command().unwrap(), Command::Get);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn rejects_missing_prefixes() {
        let mut buf = BytesMut::from(&b"get\n{}\n"[..]);
        assert!(matches!(
            FrameCodec::default().decode(&mut buf),
            Err(Error::MalformedFrame { .. })
        ));
    }

    #[test]
    fn rejects_oversized_input() {
        let mut codec = FrameCodec::new(16);
        let mut buf = BytesMut::from(&b"cmd: start\n body: {\"hash\""[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(Error::FrameTooLarge { max: 16, .. })
        ));
    }

    #[test]
    fn refuses_to_encode_newlines() {
        let mut buf = BytesMut::new();
        let err = FrameCodec::default()
            .encode(Frame::new(Command::Start, "a\nb"), &mut buf)
            .unwrap_err();
        assert!(matches!(err, Error::MalformedFrame { .. }));
    }

    #[test]
    fn error_replies_are_single_lines() {
        let mut buf = BytesMut::new();
        FrameCodec::default()
            .encode(Reply::Error("bad\nthing".to_string()), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], b"bad thing\n");
    }
}
