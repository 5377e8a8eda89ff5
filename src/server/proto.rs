//! Command grammar and reply rendering.
//!
//! Commands arrive as whitespace-split tokens on one line; replies are
//! line-framed except for GET bodies, which are raw bytes bounded by the
//! declared length. Every reply ends with the `READY` prompt.

use std::io::{self, Write};

use thiserror::Error;

use crate::listing::ListEntry;
use crate::store::{LookupError, Revision};

/// Prompt emitted on connect and after every reply.
pub const READY: &[u8] = b"READY\n";

const HELP_TEXT: &str = "usage: HELP|GET|PUT|LIST";

/// One parsed client command. Argument tokens stay raw so the engine can
/// apply semantic checks in protocol order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Put { path: String, length: String },
    Get { path: String, revision: Option<String> },
    List { dir: String },
    Help,
}

/// Recoverable protocol failures. `Display` is the exact wire message.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("usage: PUT file length")]
    PutUsage,
    #[error("usage: GET file [revision]")]
    GetUsage,
    #[error("usage: LIST dir")]
    ListUsage,
    #[error("illegal file name")]
    IllegalFileName,
    #[error("invalid length")]
    InvalidLength,
    #[error("text files only")]
    TextFilesOnly,
    #[error("no such file")]
    NoSuchFile,
    #[error("no such revision")]
    NoSuchRevision,
    #[error("illegal method: {0}")]
    IllegalMethod(String),
}

impl From<LookupError> for ClientError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::NoSuchFile => ClientError::NoSuchFile,
            LookupError::NoSuchRevision => ClientError::NoSuchRevision,
        }
    }
}

/// Splits one command line into a command. `Ok(None)` is a blank line,
/// skipped without a reply. The verb is case-folded to select the method;
/// unknown verbs surface folded in the error message.
pub fn parse_command(line: &str) -> Result<Option<Command>, ClientError> {
    let mut tokens = line.split_whitespace();
    let Some(verb) = tokens.next() else {
        return Ok(None);
    };
    let verb = verb.to_ascii_uppercase();
    let args: Vec<&str> = tokens.collect();

    match verb.as_str() {
        "PUT" => {
            if args.len() != 2 {
                return Err(ClientError::PutUsage);
            }
            Ok(Some(Command::Put {
                path: args[0].to_owned(),
                length: args[1].to_owned(),
            }))
        }
        "GET" => {
            if args.is_empty() {
                return Err(ClientError::GetUsage);
            }
            Ok(Some(Command::Get {
                path: args[0].to_owned(),
                revision: args.get(1).map(|token| (*token).to_owned()),
            }))
        }
        "LIST" => {
            if args.len() != 1 {
                return Err(ClientError::ListUsage);
            }
            Ok(Some(Command::List {
                dir: args[0].to_owned(),
            }))
        }
        "HELP" => Ok(Some(Command::Help)),
        _ => Err(ClientError::IllegalMethod(verb)),
    }
}

/// Accepts payloads that are valid UTF-8 with no control bytes other than
/// tab, newline, and carriage return. DEL (0x7F) is rejected too.
pub fn is_text_payload(bytes: &[u8]) -> bool {
    if std::str::from_utf8(bytes).is_err() {
        return false;
    }
    bytes
        .iter()
        .all(|&b| matches!(b, b'\t' | b'\n' | b'\r') || (b >= 0x20 && b != 0x7f))
}

/// One full server reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Stored { revision: u64 },
    Contents(Revision),
    Listing(Vec<ListEntry>),
    Help,
    Err(ClientError),
}

impl Reply {
    /// Writes the reply plus the trailing `READY` prompt. GET bodies are
    /// emitted raw, with no delimiter between content and prompt.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        match self {
            Reply::Stored { revision } => writeln!(writer, "OK r{revision}")?,
            Reply::Contents(revision) => {
                writeln!(writer, "OK {}", revision.len())?;
                writer.write_all(revision.as_bytes())?;
            }
            Reply::Listing(entries) => {
                writeln!(writer, "OK {}", entries.len())?;
                for entry in entries {
                    writeln!(writer, "{} {}", entry.name, entry.kind)?;
                }
            }
            Reply::Help => writeln!(writer, "OK {HELP_TEXT}")?,
            Reply::Err(err) => writeln!(writer, "ERR {err}")?,
        }
        writer.write_all(READY)
    }
}
