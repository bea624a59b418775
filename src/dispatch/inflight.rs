use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct Entry {
    generation: u64,
    token: CancellationToken,
}

/// In-flight completion requests keyed by conversation id.
///
/// Starting a request for a conversation supersedes any earlier one for the
/// same id; superseded results are dropped by the caller.
#[derive(Clone, Default)]
pub struct InFlight {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    next_generation: Arc<AtomicU64>,
}

#[derive(Debug, Clone)]
pub struct InFlightTicket {
    conversation_id: String,
    generation: u64,
    token: CancellationToken,
}

impl InFlightTicket {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn begin(&self, conversation_id: &str) -> InFlightTicket {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();
        let previous = self.entries().insert(
            conversation_id.to_string(),
            Entry {
                generation,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            debug!(conversation_id, "Superseding in-flight request");
            previous.token.cancel();
        }
        InFlightTicket {
            conversation_id: conversation_id.to_string(),
            generation,
            token,
        }
    }

    /// Cancels the request running for `conversation_id`, if any.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        match self.entries().remove(conversation_id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, entry) in self.entries().drain() {
            entry.token.cancel();
        }
    }

    pub fn is_current(&self, ticket: &InFlightTicket) -> bool {
        self.entries()
            .get(&ticket.conversation_id)
            .is_some_and(|e| e.generation == ticket.generation)
    }

    /// Releases the ticket. Returns `false` when it was superseded or
    /// cancelled, meaning its result must be discarded.
    pub fn finish(&self, ticket: &InFlightTicket) -> bool {
        let mut entries = self.entries();
        let current = entries
            .get(&ticket.conversation_id)
            .is_some_and(|e| e.generation == ticket.generation);
        if current {
            entries.remove(&ticket.conversation_id);
        }
        current && !ticket.token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_request_supersedes_older_one() {
        let inflight = InFlight::new();
        let first = inflight.begin("chat-1");
        let second = inflight.begin("chat-1");

        assert!(first.token().is_cancelled());
        assert!(!inflight.is_current(&first));
        assert!(!inflight.finish(&first));
        assert!(inflight.finish(&second));
    }

    #[test]
    fn different_conversations_do_not_interfere() {
        let inflight = InFlight::new();
        let a = inflight.begin("a");
        let b = inflight.begin("b");

        assert!(inflight.finish(&a));
        assert!(inflight.finish(&b));
    }

    #[test]
    fn cancel_marks_ticket_stale() {
        let inflight = InFlight::new();
        let ticket = inflight.begin("a");

        assert!(inflight.cancel("a"));
        assert!(ticket.token().is_cancelled());
        assert!(!inflight.finish(&ticket));
        assert!(!inflight.cancel("a"));
    }

    #[test]
    fn cancel_all_clears_everything() {
        let inflight = InFlight::new();
        let a = inflight.begin("a");
        let b = inflight.begin("b");
        inflight.cancel_all();

        assert!(a.token().is_cancelled() && b.token().is_cancelled());
        assert!(!inflight.is_current(&a));
    }
}
