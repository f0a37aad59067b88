use metrics::MetricsSink;
use std::sync::Arc;
use std::time::Instant;
use store::ReadOnlyStore;

use crate::resp::Reply;

/// A parsed request. Command names are case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping(Option<Vec<u8>>),
    Get(Vec<u8>),
    Quit,
}

impl Command {
    /// Parses raw arguments. Unknown commands and wrong arities come back as
    /// the error reply to send.
    pub fn parse(args: &[Vec<u8>]) -> Result<Self, Reply> {
        let Some((name, rest)) = args.split_first() else {
            return Err(Reply::error("ERR empty command"));
        };
        match (name.as_slice(), rest) {
            (b"PING", []) => Ok(Command::Ping(None)),
            (b"PING", [msg]) => Ok(Command::Ping(Some(msg.clone()))),
            (b"GET", [device]) => Ok(Command::Get(device.clone())),
            (b"QUIT", _) => Ok(Command::Quit),
            (b"PING", _) | (b"GET", _) => Err(wrong_arity(name)),
            _ => Err(Reply::error(format!(
                "ERR unknown command '{}'",
                String::from_utf8_lossy(name)
            ))),
        }
    }
}

fn wrong_arity(name: &[u8]) -> Reply {
    Reply::error(format!(
        "ERR wrong number of arguments for '{}' command",
        String::from_utf8_lossy(name)
    ))
}

/// Executes commands against a read-only store. Shared by every connection.
pub struct QueryHandler {
    store: Arc<ReadOnlyStore>,
    metrics: Arc<dyn MetricsSink>,
}

impl QueryHandler {
    pub fn new(store: Arc<ReadOnlyStore>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { store, metrics }
    }

    pub fn store(&self) -> &ReadOnlyStore {
        &self.store
    }

    pub fn execute(&self, command: Command) -> Reply {
        match command {
            Command::Ping(None) => Reply::Simple("PONG".into()),
            Command::Ping(Some(msg)) => Reply::Bulk(msg),
            Command::Get(device) => self.get(&device),
            Command::Quit => Reply::ok(),
        }
    }

    /// Looks up one device. Timed from the start of the read transaction to
    /// the end of decoding, failures included.
    pub fn get(&self, device: &[u8]) -> Reply {
        let started = Instant::now();
        let reply = match self.store.get(device) {
            Ok(None) => Reply::Null,
            Ok(Some(raw)) => match codec::decode(&raw) {
                Ok(set) => Reply::Array(set.iter().map(|c| Reply::Integer(i64::from(c))).collect()),
                Err(e) => {
                    tracing::warn!(device = %String::from_utf8_lossy(device), error = %e, "corrupt record");
                    Reply::error(format!("ERR corrupt record: {e}"))
                }
            },
            Err(e) => {
                tracing::error!(error = %format_args!("{e:#}"), "store read failed");
                Reply::error(format!("ERR store error: {e:#}"))
            }
        };
        self.metrics.observe_query_latency(started.elapsed());
        reply
    }
}
