//! # Server - CohortKV Query Server
//!
//! Serves membership lookups from a read-only store over a subset of the
//! Redis protocol (RESP2), so `redis-cli` and any Redis client library can
//! query it.
//!
//! ```text
//! client ──TCP──> accept loop ──spawn──> connection thread
//!                                          read_command ─> Command::parse
//!                                          QueryHandler::execute ─> Reply
//! ```
//!
//! | Command         | Reply                                   |
//! |-----------------|-----------------------------------------|
//! | `PING [msg]`    | `+PONG`, or `msg` as a bulk string      |
//! | `GET <device>`  | array of campaign ids, or null          |
//! | `QUIT`          | `+OK`, then the connection closes       |
//!
//! Every `GET` runs in its own read transaction, so lookups never wait on
//! each other. The store is opened with a shared lock: `cohortkv get`,
//! `stats` and other servers can read the same file concurrently, while
//! `load` and `update` need it to themselves.
mod handler;
mod resp;
mod server;

pub use handler::{Command, QueryHandler};
pub use resp::{read_command, ProtocolError, Reply, MAX_ARGS, MAX_BULK_LEN, MAX_INLINE_LEN};
pub use server::{QueryServer, ShutdownHandle};
