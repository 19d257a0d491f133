//! Line-oriented text protocol spoken over TCP.
//!
//! Every exchange is one connection carrying one command and one reply:
//!
//! - **Dispatcher commands**: `status`, `register:<host>:<port>`,
//!   `dispatch:<commit>`, `results:<commit>:<len>:<payload>`
//! - **Runner commands**: `runtest:<commit>` (answered `OK` to accept) and
//!   `ping` (answered `pong`)
//!
//! # Components
//!
//! - [`command`]: request/reply types and text parsing
//! - [`codec`]: reading a full request off a stream, including multi-read
//!   results payloads
//! - [`client`]: the connect-send-read helper and [`RunnerClient`]

pub mod client;
pub mod codec;
pub mod command;

pub use client::{communicate, RunnerClient};
pub use codec::{read_request, write_reply};
pub use command::{parse_request, Reply, Request, RunnerCommand};
