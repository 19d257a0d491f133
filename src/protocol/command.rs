use crate::error::{DispatchError, Result};
use crate::scheduler::{CommitId, RunnerId};

pub(crate) const RESULTS_PREFIX: &[u8] = b"results:";

/// Reply a runner gives to accept a `runtest` request
pub const ACCEPT: &str = "OK";
/// Reply a runner gives to a `ping`
pub const PONG: &str = "pong";

/// A command received on the dispatcher's socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Status,
    Register(RunnerId),
    Dispatch(CommitId),
    Results { commit: CommitId, payload: Vec<u8> },
}

impl Request {
    /// Wire form of this request, as a client sends it
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Request::Status => b"status".to_vec(),
            Request::Register(runner) => format!("register:{}", runner).into_bytes(),
            Request::Dispatch(commit) => format!("dispatch:{}", commit).into_bytes(),
            Request::Results { commit, payload } => {
                let mut bytes = format!("results:{}:{}:", commit, payload.len()).into_bytes();
                bytes.extend_from_slice(payload);
                bytes
            }
        }
    }
}

/// Parse a text command of the form `word[:rest]`.
///
/// `results` is not handled here since its payload is length-prefixed and
/// may span several reads; see [`crate::protocol::codec::read_request`].
pub fn parse_request(text: &str) -> Result<Request> {
    let text = text.trim();
    let invalid = || DispatchError::InvalidCommand(text.to_string());

    let (word, rest) = match text.split_once(':') {
        Some((word, rest)) => (word, Some(rest)),
        None => (text, None),
    };

    match (word, rest) {
        ("status", _) => Ok(Request::Status),
        ("register", Some(addr)) => {
            let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
            if host.is_empty() || host.contains(char::is_whitespace) {
                return Err(invalid());
            }
            let port: u16 = port.parse().map_err(|_| invalid())?;
            Ok(Request::Register(RunnerId::new(host, port)))
        }
        ("dispatch", Some(commit)) => CommitId::parse(commit)
            .map(Request::Dispatch)
            .ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

/// Header of a `results:<commit>:<len>:` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResultsHeader {
    pub commit: CommitId,
    pub len: usize,
    /// Offset of the first payload byte in the buffer the header was parsed from
    pub payload_start: usize,
}

impl ResultsHeader {
    /// Parse the header from a buffer starting with `results:`.
    /// Returns None while the buffer does not yet hold the whole header.
    pub fn parse(buf: &[u8]) -> Result<Option<Self>> {
        let invalid = || DispatchError::InvalidCommand(String::from_utf8_lossy(buf).into_owned());

        let rest = buf.strip_prefix(RESULTS_PREFIX).ok_or_else(invalid)?;
        let Some(commit_end) = rest.iter().position(|&b| b == b':') else {
            return Ok(None);
        };
        let after_commit = &rest[commit_end + 1..];
        let Some(len_end) = after_commit.iter().position(|&b| b == b':') else {
            return Ok(None);
        };

        let commit = std::str::from_utf8(&rest[..commit_end])
            .ok()
            .and_then(CommitId::parse)
            .ok_or_else(invalid)?;
        let len = std::str::from_utf8(&after_commit[..len_end])
            .ok()
            .and_then(|s| s.trim().parse::<usize>().ok())
            .ok_or_else(invalid)?;

        Ok(Some(Self {
            commit,
            len,
            payload_start: RESULTS_PREFIX.len() + commit_end + 1 + len_end + 1,
        }))
    }
}

/// Reply written back on the dispatcher's socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Ok,
    NoRunners,
    InvalidCommand,
    StaleResult,
    StoreFailed,
}

impl Reply {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reply::Ok => "OK",
            Reply::NoRunners => "No runners are registered",
            Reply::InvalidCommand => "Invalid command",
            Reply::StaleResult => "Stale result",
            Reply::StoreFailed => "Failed to store results",
        }
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request the dispatcher sends to a runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerCommand {
    RunTest(CommitId),
    Ping,
}

impl RunnerCommand {
    pub fn encode(&self) -> String {
        match self {
            RunnerCommand::RunTest(commit) => format!("runtest:{}", commit),
            RunnerCommand::Ping => "ping".to_string(),
        }
    }
}
