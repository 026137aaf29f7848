//! Outbound frames and their byte layouts.
//!
//! Frames are encoded the moment they are built and pushed onto the
//! connection's send queue as [`Bytes`]; nothing keeps a frame object
//! around after that. Every length prefix is a big-endian `u32`.
//!
//! ```text
//! Login:       u8 2 | u32 len | username | u32 len | password | i64 session_id
//! Command:     u8 0 | payload (UTF-8 text or raw script bytes)
//! UploadFile:  u8 1 | u32 len | name | u32 len | contents
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::KdshError;
use crate::message::Opcode;

// ── LoginRequest ─────────────────────────────────────────────────

/// Credentials and the session to resume.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub session_id: i64,
}

impl LoginRequest {
    pub fn new(username: impl Into<String>, password: impl Into<String>, session_id: i64) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            session_id,
        }
    }
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("session_id", &self.session_id)
            .finish()
    }
}

// ── UploadFile ───────────────────────────────────────────────────

/// A local file pushed to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub contents: Bytes,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, contents: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
        }
    }
}

// ── Frame ────────────────────────────────────────────────────────

/// Every message the client can send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Login(LoginRequest),
    Command(Bytes),
    UploadFile(UploadFile),
}

impl Frame {
    /// A text command typed by the user.
    pub fn command(text: &str) -> Self {
        Frame::Command(Bytes::copy_from_slice(text.as_bytes()))
    }

    /// The raw contents of a script file, sent like a command.
    pub fn script(contents: impl Into<Bytes>) -> Self {
        Frame::Command(contents.into())
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Frame::Login(_) => Opcode::Login,
            Frame::Command(_) => Opcode::Command,
            Frame::UploadFile(_) => Opcode::UploadFile,
        }
    }

    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Frame::Login(req) => 4 + req.username.len() + 4 + req.password.len() + 8,
            Frame::Command(payload) => payload.len(),
            Frame::UploadFile(file) => 4 + file.name.len() + 4 + file.contents.len(),
        }
    }

    pub fn to_bytes(&self) -> Result<Bytes, KdshError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.opcode() as u8);
        match self {
            Frame::Login(req) => {
                put_prefixed(&mut buf, req.username.as_bytes())?;
                put_prefixed(&mut buf, req.password.as_bytes())?;
                buf.put_i64(req.session_id);
            }
            Frame::Command(payload) => buf.put_slice(payload),
            Frame::UploadFile(file) => {
                put_prefixed(&mut buf, file.name.as_bytes())?;
                put_prefixed(&mut buf, &file.contents)?;
            }
        }
        Ok(buf.freeze())
    }

    /// Parse a frame as the server would see it.
    ///
    /// `bytes` must hold exactly one frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KdshError> {
        let mut cursor = bytes;
        if !cursor.has_remaining() {
            return Err(KdshError::ProtocolDecode("empty frame".into()));
        }

        let frame = match Opcode::try_from(cursor.get_u8())? {
            Opcode::Command => {
                let payload = Bytes::copy_from_slice(cursor);
                cursor = &[];
                Frame::Command(payload)
            }
            Opcode::Login => {
                let username = take_string(&mut cursor, "username")?;
                let password = take_string(&mut cursor, "password")?;
                if cursor.remaining() < 8 {
                    return Err(KdshError::ProtocolDecode("login frame missing session id".into()));
                }
                let session_id = cursor.get_i64();
                Frame::Login(LoginRequest {
                    username,
                    password,
                    session_id,
                })
            }
            Opcode::UploadFile => {
                let name = take_string(&mut cursor, "file name")?;
                let contents = Bytes::copy_from_slice(take_prefixed(&mut cursor, "file contents")?);
                Frame::UploadFile(UploadFile { name, contents })
            }
        };

        if cursor.has_remaining() {
            return Err(KdshError::ProtocolDecode(format!(
                "{} trailing bytes after {} frame",
                cursor.remaining(),
                frame.opcode()
            )));
        }
        Ok(frame)
    }
}

fn put_prefixed(buf: &mut BytesMut, field: &[u8]) -> Result<(), KdshError> {
    let len = u32::try_from(field.len()).map_err(|_| KdshError::PayloadTooLarge {
        size: field.len() as u64,
        max: u32::MAX as u64,
    })?;
    buf.put_u32(len);
    buf.put_slice(field);
    Ok(())
}

fn take_prefixed<'a>(cursor: &mut &'a [u8], what: &str) -> Result<&'a [u8], KdshError> {
    if cursor.remaining() < 4 {
        return Err(KdshError::ProtocolDecode(format!("{what} length is truncated")));
    }
    let len = cursor.get_u32() as usize;
    if cursor.remaining() < len {
        return Err(KdshError::ProtocolDecode(format!(
            "{what} declares {len} bytes but only {} remain",
            cursor.remaining()
        )));
    }
    let (field, rest) = cursor.split_at(len);
    *cursor = rest;
    Ok(field)
}

fn take_string(cursor: &mut &[u8], what: &str) -> Result<String, KdshError> {
    let raw = take_prefixed(cursor, what)?;
    String::from_utf8(raw.to_vec()).map_err(|e| KdshError::ProtocolDecode(format!("{what}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_layout() {
        let frame = Frame::Login(LoginRequest::new("alice", "pw", 7));
        let bytes = frame.to_bytes().unwrap();

        let mut expected = vec![2u8];
        expected.extend_from_slice(&5u32.to_be_bytes());
        expected.extend_from_slice(b"alice");
        expected.extend_from_slice(&2u32.to_be_bytes());
        expected.extend_from_slice(b"pw");
        expected.extend_from_slice(&7i64.to_be_bytes());

        assert_eq!(&bytes[..], &expected[..]);
        assert_eq!(bytes.len(), frame.encoded_len());
    }

    #[test]
    fn login_roundtrip() {
        let cases = [
            LoginRequest::new("alice", "", 0),
            LoginRequest::new("bob", "s3cr3t", -1),
            LoginRequest::new("ユーザー", "pässwörd", i64::MAX),
            LoginRequest::new("", "", i64::MIN),
        ];
        for req in cases {
            let frame = Frame::Login(req.clone());
            let decoded = Frame::from_bytes(&frame.to_bytes().unwrap()).unwrap();
            assert_eq!(decoded, Frame::Login(req));
        }
    }

    #[test]
    fn command_layout() {
        let bytes = Frame::command("select * from t;\n").to_bytes().unwrap();
        assert_eq!(bytes[0], 0);
        assert_eq!(&bytes[1..], b"select * from t;\n");
    }

    #[test]
    fn script_keeps_raw_bytes() {
        let raw = vec![0xFF, 0x00, b';', 0x80];
        let bytes = Frame::script(raw.clone()).to_bytes().unwrap();
        assert_eq!(bytes[0], Opcode::Command as u8);
        assert_eq!(&bytes[1..], &raw[..]);
    }

    #[test]
    fn upload_roundtrip() {
        for len in [0usize, 1, 255, 70_000] {
            let contents: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let frame = Frame::UploadFile(UploadFile::new("data.bin", contents.clone()));
            let bytes = frame.to_bytes().unwrap();
            assert_eq!(bytes.len(), 1 + 4 + 8 + 4 + len);

            match Frame::from_bytes(&bytes).unwrap() {
                Frame::UploadFile(file) => {
                    assert_eq!(file.name, "data.bin");
                    assert_eq!(&file.contents[..], &contents[..]);
                }
                other => panic!("expected UploadFile, got {other:?}"),
            }
        }
    }

    #[test]
    fn rejects_truncated_upload() {
        let bytes = Frame::UploadFile(UploadFile::new("a", vec![1, 2, 3]))
            .to_bytes()
            .unwrap();
        assert!(Frame::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut bytes = Frame::Login(LoginRequest::new("a", "b", 1))
            .to_bytes()
            .unwrap()
            .to_vec();
        bytes.push(0);
        assert!(Frame::from_bytes(&bytes).is_err());
    }

    #[test]
    fn rejects_unknown_opcode() {
        assert!(matches!(
            Frame::from_bytes(&[9, 1, 2]),
            Err(KdshError::UnknownVariant { .. })
        ));
        assert!(Frame::from_bytes(&[]).is_err());
    }

    #[test]
    fn debug_hides_password() {
        let text = format!("{:?}", LoginRequest::new("alice", "hunter2", 0));
        assert!(!text.contains("hunter2"));
    }
}
