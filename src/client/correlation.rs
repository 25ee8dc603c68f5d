//! Request/response correlation.
//!
//! Every correlated request registers a handler under its nonce. The handler runs at
//! most once: with the matching reply when one arrives, or with `None` when the request
//! outlives its timeout. Deadlines live in a single ordered set swept by one task
//! ([`CorrelationTable::run_expiry`]) instead of one timer per request.
//!
//! Each entry is tagged with the connection session it was sent on. A reply arriving
//! on any other session is dropped, leaving the entry to its timeout.
use std::{
    collections::{BTreeSet, HashMap},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use log::{debug, trace};
use tokio::{
    sync::{Notify, oneshot},
    time::{Instant, sleep_until},
};

use crate::protocol::{Envelope, Nonce};

/// Invoked with the reply, or with `None` on timeout.
pub type Handler = Box<dyn FnOnce(Option<Envelope>) + Send>;

struct Pending {
    handler: Handler,
    deadline: Instant,
    session: u64,
}

#[derive(Default)]
struct Entries {
    pending: HashMap<Nonce, Pending>,
    deadlines: BTreeSet<(Instant, Nonce)>,
}

pub struct CorrelationTable {
    entries: Mutex<Entries>,
    wake: Notify,
    timeout: Duration,
}

impl CorrelationTable {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            wake: Notify::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `handler` under `nonce` for a request sent on `session`, due to expire
    /// one timeout from now. A handler already registered under the same nonce is
    /// replaced and never runs.
    pub fn register(&self, nonce: Nonce, session: u64, handler: Handler) {
        let deadline = Instant::now() + self.timeout;
        {
            let mut entries = self.entries();
            if let Some(old) = entries.pending.remove(&nonce) {
                entries.deadlines.remove(&(old.deadline, nonce.clone()));
            }
            entries.deadlines.insert((deadline, nonce.clone()));
            entries.pending.insert(
                nonce,
                Pending {
                    handler,
                    deadline,
                    session,
                },
            );
        }
        self.wake.notify_one();
    }

    /// Registers a handler that forwards the outcome to the returned receiver.
    pub fn register_waiter(
        &self,
        nonce: Nonce,
        session: u64,
    ) -> oneshot::Receiver<Option<Envelope>> {
        let (tx, rx) = oneshot::channel();
        self.register(
            nonce,
            session,
            Box::new(move |outcome| {
                let _ = tx.send(outcome);
            }),
        );
        rx
    }

    /// Hands `envelope`, received on `session`, to the handler waiting on `nonce`.
    /// Returns `false` (and drops the envelope) when nothing is waiting, e.g. the request
    /// already timed out, or when the request was sent on another session.
    pub fn deliver(&self, nonce: &Nonce, session: u64, envelope: Envelope) -> bool {
        let pending = {
            let mut entries = self.entries();
            match entries.pending.get(nonce).map(|pending| pending.session) {
                None => None,
                Some(sent_on) if sent_on != session => {
                    debug!("dropping reply for {nonce}: sent on session {sent_on}, received on {session}");
                    return false;
                }
                Some(_) => {
                    let pending = entries.pending.remove(nonce);
                    if let Some(pending) = &pending {
                        entries.deadlines.remove(&(pending.deadline, nonce.clone()));
                    }
                    pending
                }
            }
        };

        match pending {
            Some(pending) => {
                (pending.handler)(Some(envelope));
                true
            }
            None => {
                debug!("dropping reply for unknown nonce {nonce}");
                false
            }
        }
    }

    /// Removes an entry without running its handler.
    pub fn forget(&self, nonce: &Nonce) -> bool {
        let mut entries = self.entries();
        match entries.pending.remove(nonce) {
            Some(pending) => {
                entries.deadlines.remove(&(pending.deadline, nonce.clone()));
                true
            }
            None => false,
        }
    }

    /// Resolves every entry whose deadline is at or before `now` with `None`.
    pub fn expire(&self, now: Instant) -> usize {
        let expired = {
            let mut entries = self.entries();
            let mut expired = Vec::new();
            while let Some((deadline, _)) = entries.deadlines.first() {
                if *deadline > now {
                    break;
                }
                let Some((_, nonce)) = entries.deadlines.pop_first() else {
                    break;
                };
                if let Some(pending) = entries.pending.remove(&nonce) {
                    expired.push((nonce, pending.handler));
                }
            }
            expired
        };

        let count = expired.len();
        for (nonce, handler) in expired {
            trace!("request {nonce} timed out");
            handler(None);
        }
        count
    }

    /// Resolves every entry with `None`, regardless of deadline.
    pub fn drain(&self) -> usize {
        let drained: Vec<_> = {
            let mut entries = self.entries();
            entries.deadlines.clear();
            entries.pending.drain().collect()
        };

        let count = drained.len();
        for (_, pending) in drained {
            (pending.handler)(None);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.entries()
            .deadlines
            .first()
            .map(|(deadline, _)| *deadline)
    }

    /// Sweeps expired entries until the task is aborted.
    pub async fn run_expiry(&self) {
        loop {
            match self.next_deadline() {
                Some(deadline) => {
                    tokio::select! {
                        _ = sleep_until(deadline) => {}
                        _ = self.wake.notified() => continue,
                    }
                }
                None => {
                    self.wake.notified().await;
                    continue;
                }
            }

            let evicted = self.expire(Instant::now());
            if evicted > 0 {
                debug!("evicted {evicted} timed out requests");
            }
        }
    }
}
