//! Per-connection protocol engine.
//!
//! Multiplexes ASCII command framing with fixed-length payload framing on
//! one buffered byte source, without losing a byte across the boundary.
//! Replies are strictly FIFO within a connection: a command's full reply,
//! prompt included, is flushed before the next command line is read.

use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use thiserror::Error;

use crate::config::Limits;
use crate::listing;
use crate::path;
use crate::server::proto::{self, ClientError, Command, Reply};
use crate::store::{RevisionRef, Store};

/// Transport-fatal failures. These terminate the connection without an
/// acknowledgment; recoverable conditions travel as `ClientError` replies
/// instead.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("command line exceeds {max_line_bytes} bytes")]
    LineTooLong { max_line_bytes: usize },
}

/// Wraps a TCP stream into a buffered engine and drives it to completion.
pub fn serve(stream: TcpStream, store: Arc<Store>, limits: Limits) -> Result<(), SessionError> {
    stream.set_nodelay(true)?;
    let reader = BufReader::new(stream.try_clone()?);
    let writer = BufWriter::new(stream);
    Session::new(reader, writer, store, limits).run()
}

/// The engine itself, generic over its byte source and sink so scripted
/// buffers can stand in for sockets.
pub struct Session<R, W> {
    reader: R,
    writer: W,
    store: Arc<Store>,
    limits: Limits,
}

impl<R: BufRead, W: Write> Session<R, W> {
    pub fn new(reader: R, writer: W, store: Arc<Store>, limits: Limits) -> Self {
        Self {
            reader,
            writer,
            store,
            limits,
        }
    }

    /// Drives the prompt/command cycle until the client disconnects.
    pub fn run(&mut self) -> Result<(), SessionError> {
        self.writer.write_all(proto::READY)?;
        self.writer.flush()?;

        let mut line = Vec::new();
        loop {
            line.clear();
            if !self.read_command_line(&mut line)? {
                return Ok(());
            }
            let text = String::from_utf8_lossy(&line);
            let reply = match proto::parse_command(&text) {
                // Blank line: stay in the same prompt cycle, no reply.
                Ok(None) => continue,
                Ok(Some(command)) => self.dispatch(command)?,
                Err(err) => Reply::Err(err),
            };
            reply.write_to(&mut self.writer)?;
            self.writer.flush()?;
        }
    }

    /// Reads one `\n`-terminated command line, stripping the terminator
    /// and an optional preceding `\r`. Returns false on EOF; bytes left
    /// dangling without a terminator also count as a disconnect.
    fn read_command_line(&mut self, line: &mut Vec<u8>) -> Result<bool, SessionError> {
        let max = self.limits.max_line_bytes;
        let n = (&mut self.reader)
            .take(max as u64 + 1)
            .read_until(b'\n', line)?;
        if n == 0 {
            return Ok(false);
        }
        if line.last() != Some(&b'\n') {
            if line.len() > max {
                return Err(SessionError::LineTooLong {
                    max_line_bytes: max,
                });
            }
            return Ok(false);
        }
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(true)
    }

    fn dispatch(&mut self, command: Command) -> Result<Reply, SessionError> {
        match command {
            Command::Put { path, length } => self.handle_put(&path, &length),
            Command::Get { path, revision } => Ok(self.handle_get(&path, revision.as_deref())),
            Command::List { dir } => Ok(self.handle_list(&dir)),
            Command::Help => Ok(Reply::Help),
        }
    }

    /// PUT checks the header before touching the body: an illegal name or
    /// length leaves the declared payload unread, so a client must wait
    /// for the reply before transmitting it.
    fn handle_put(&mut self, raw_path: &str, raw_length: &str) -> Result<Reply, SessionError> {
        if !path::is_legal_file_path(raw_path) {
            return Ok(Reply::Err(ClientError::IllegalFileName));
        }
        let Some(length) = parse_length(raw_length, self.limits.max_payload_bytes) else {
            return Ok(Reply::Err(ClientError::InvalidLength));
        };

        let mut payload = vec![0u8; length];
        self.reader.read_exact(&mut payload)?;

        if !proto::is_text_payload(&payload) {
            return Ok(Reply::Err(ClientError::TextFilesOnly));
        }

        let key = path::normalize_key(raw_path);
        let revision = self.store.put(&key, payload);
        tracing::debug!(key = %key, revision, "stored revision");
        Ok(Reply::Stored { revision })
    }

    fn handle_get(&self, raw_path: &str, revision: Option<&str>) -> Reply {
        let key = path::normalize_key(raw_path);
        let which = match revision.map(path::parse_revision_token) {
            None => RevisionRef::Latest,
            Some(Some(n)) => RevisionRef::Numbered(n),
            // An unparseable token reads as a revision no file has, which
            // keeps the missing-file error ahead of the revision error.
            Some(None) => RevisionRef::Numbered(0),
        };
        match self.store.get(&key, which) {
            Ok(contents) => Reply::Contents(contents),
            Err(err) => Reply::Err(err.into()),
        }
    }

    fn handle_list(&self, dir: &str) -> Reply {
        Reply::Listing(listing::project(&self.store.snapshot(), dir))
    }
}

/// A length is valid if it parses as a non-negative decimal and fits the
/// payload cap; an oversized declaration is refused before any body read.
fn parse_length(token: &str, max_payload_bytes: usize) -> Option<usize> {
    let length = token.parse::<u64>().ok()?;
    if length > max_payload_bytes as u64 {
        return None;
    }
    Some(length as usize)
}
