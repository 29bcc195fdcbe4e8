//! RFC 977 NNTP command/response framing.
//!
//! This crate knows nothing about connection pooling or TLS; it only speaks
//! the wire protocol: build a command line, read a status line, read a
//! dot-stuffed multi-line body. The NNTP pool in the backend crate owns the
//! socket and the pooling policy.

mod response;
mod yenc;

pub use response::{Response, StatusCode};
pub use yenc::{decode_yenc, YencError};

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

#[derive(Error, Debug)]
pub enum NntpError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("malformed status line: {0}")]
    MalformedStatus(String),
    #[error("article not found")]
    ArticleMissing,
    #[error("authentication rejected")]
    AuthRejected,
}

/// A single request/response round trip over an already-connected
/// transport. Generic over the stream so the pool can share this framing
/// code between plaintext and TLS-wrapped sockets.
pub struct NntpConnection<R, W> {
    reader: BufReader<R>,
    writer: W,
}

impl<R, W> NntpConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(read_half: R, write_half: W) -> Self {
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    /// Reads the server's greeting line (200/201) right after connecting.
    pub async fn read_greeting(&mut self) -> Result<Response, NntpError> {
        self.read_status_line().await
    }

    pub async fn authinfo_user(&mut self, user: &str) -> Result<Response, NntpError> {
        self.send_command(&format!("AUTHINFO USER {user}")).await
    }

    pub async fn authinfo_pass(&mut self, pass: &str) -> Result<Response, NntpError> {
        self.send_command(&format!("AUTHINFO PASS {pass}")).await
    }

    /// STAT <message-id>: confirms article existence without transferring it.
    pub async fn stat(&mut self, message_id: &str) -> Result<bool, NntpError> {
        let resp = self.send_command(&format!("STAT {message_id}")).await?;
        match resp.code {
            StatusCode::ArticleExists223 => Ok(true),
            StatusCode::NoSuchArticle430 => Ok(false),
            other => Err(NntpError::MalformedStatus(format!(
                "unexpected STAT response {:?}: {}",
                other, resp.text
            ))),
        }
    }

    /// BODY <message-id>: returns the raw (still yEnc-encoded) article body.
    pub async fn body(&mut self, message_id: &str) -> Result<Vec<u8>, NntpError> {
        let resp = self.send_command(&format!("BODY {message_id}")).await?;
        match resp.code {
            StatusCode::ArticleExists223 | StatusCode::BodyFollows222 => {
                self.read_dot_terminated_body().await
            }
            StatusCode::NoSuchArticle430 => Err(NntpError::ArticleMissing),
            other => Err(NntpError::MalformedStatus(format!(
                "unexpected BODY response {:?}: {}",
                other, resp.text
            ))),
        }
    }

    pub async fn quit(&mut self) -> Result<(), NntpError> {
        let _ = self.send_command("QUIT").await;
        Ok(())
    }

    async fn send_command(&mut self, line: &str) -> Result<Response, NntpError> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        self.read_status_line().await
    }

    async fn read_status_line(&mut self) -> Result<Response, NntpError> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(NntpError::ConnectionClosed);
        }
        Response::parse(line.trim_end())
            .ok_or_else(|| NntpError::MalformedStatus(line.trim_end().to_string()))
    }

    async fn read_dot_terminated_body(&mut self) -> Result<Vec<u8>, NntpError> {
        let mut out = BytesMut::new();
        loop {
            let mut line = Vec::new();
            let n = self.reader.read_until(b'\n', &mut line).await?;
            if n == 0 {
                return Err(NntpError::ConnectionClosed);
            }
            if line == b".\r\n" || line == b".\n" {
                break;
            }
            // byte-stuffing: a line starting with ".." is unescaped to "."
            if line.starts_with(b"..") {
                out.extend_from_slice(&line[1..]);
            } else {
                out.extend_from_slice(&line);
            }
        }
        Ok(out.to_vec())
    }
}

impl<R, W> std::fmt::Debug for NntpConnection<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NntpConnection").finish_non_exhaustive()
    }
}

/// True for transport-level errors that mean the connection must be dropped
/// from the pool rather than reused.
pub fn is_transport_error(err: &NntpError) -> bool {
    matches!(
        err,
        NntpError::Io(_) | NntpError::ConnectionClosed | NntpError::MalformedStatus(_)
    )
}
