/// Group commit: `batch()` folds concurrent write closures into one commit.
///
/// Each caller enqueues its closure and then tries to become the leader. The
/// leader drains up to `max_batch_size` pending calls, runs them all in one
/// write transaction and reports the result to every caller. Callers that
/// are not the leader wait for their result; if it has not arrived within
/// `max_batch_delay` they try to lead the next round themselves, so pending
/// calls never depend on one particular thread.
///
/// If any closure in a round fails, the round is rolled back and every call
/// is re-run in its own transaction. Only the failing caller sees an error.
use anyhow::{anyhow, Result};
use crossbeam_channel::{RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::{BatchOptions, RecordWriter, Store};

type BatchFn = Box<dyn Fn(&mut RecordWriter<'_>) -> Result<()> + Send>;

struct PendingCall {
    f: BatchFn,
    done: Sender<Result<()>>,
}

#[derive(Default)]
struct Queue {
    calls: Vec<PendingCall>,
    leader: bool,
}

pub(crate) struct Batcher {
    queue: Mutex<Queue>,
    options: BatchOptions,
}

/// Clears the leader flag when the round ends, including by panic.
struct LeaderGuard<'a> {
    batcher: &'a Batcher,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        self.batcher.queue.lock().leader = false;
    }
}

impl Batcher {
    pub(crate) fn new(options: BatchOptions) -> Self {
        Self {
            queue: Mutex::new(Queue::default()),
            options,
        }
    }

    pub(crate) fn options(&self) -> BatchOptions {
        self.options
    }

    pub(crate) fn pending(&self) -> usize {
        self.queue.lock().calls.len()
    }

    fn push(&self, call: PendingCall) {
        self.queue.lock().calls.push(call);
    }

    /// Claims leadership and the next round of calls, or `None` if another
    /// thread leads or nothing is pending.
    fn try_lead(&self) -> Option<(LeaderGuard<'_>, Vec<PendingCall>)> {
        let mut queue = self.queue.lock();
        if queue.leader || queue.calls.is_empty() {
            return None;
        }
        queue.leader = true;
        let take = queue.calls.len().min(self.options.max_batch_size);
        let round = queue.calls.drain(..take).collect();
        Some((LeaderGuard { batcher: self }, round))
    }
}

impl Store {
    /// Runs `f` in a write transaction that may be shared with other
    /// concurrent `batch` callers.
    ///
    /// `f` can be called more than once (see the module docs), so it must
    /// not have side effects outside the writer. The call returns once the
    /// transaction containing `f` has committed or failed.
    ///
    /// # Errors
    ///
    /// Returns `f`'s own error, or the storage error that failed the commit.
    pub fn batch<F>(&self, f: F) -> Result<()>
    where
        F: Fn(&mut RecordWriter<'_>) -> Result<()> + Send + 'static,
    {
        let (done, result) = crossbeam_channel::bounded(1);
        self.batcher.push(PendingCall {
            f: Box::new(f),
            done,
        });

        loop {
            if let Some((_guard, round)) = self.batcher.try_lead() {
                self.run_round(round);
            }
            match result.recv_timeout(self.batcher.options.max_batch_delay) {
                Ok(outcome) => return outcome,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(anyhow!("batch round was dropped before completing"))
                }
            }
        }
    }

    fn run_round(&self, round: Vec<PendingCall>) {
        let size = round.len();
        let outcome = self.update(|w| {
            for call in &round {
                (call.f)(w)?;
            }
            Ok(())
        });

        match outcome {
            Ok(()) => {
                tracing::trace!(calls = size, "batch round committed");
                for call in round {
                    let _ = call.done.send(Ok(()));
                }
            }
            Err(e) if size == 1 => {
                if let Some(call) = round.into_iter().next() {
                    let _ = call.done.send(Err(e));
                }
            }
            Err(e) => {
                tracing::debug!(calls = size, error = %e, "batch round failed, retrying calls one by one");
                for call in round {
                    let outcome = self.update(|w| (call.f)(w));
                    let _ = call.done.send(outcome);
                }
            }
        }
    }
}
