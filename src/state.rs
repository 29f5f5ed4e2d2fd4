//! The single authoritative conversation state plus its subscription fanout.
//!
//! Every other component reads this state and requests transitions; none of
//! them mutate it directly. Transitions are unconditional on purpose: the
//! orchestrator owns legality, and watchdogs must be able to force-correct a
//! stuck state without this container getting in the way.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::log_debug;

/// What the assistant is currently doing with the shared audio devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistantState {
    Idle,
    Listening,
    Processing,
    Speaking,
    Alert,
}

impl AssistantState {
    pub fn label(self) -> &'static str {
        match self {
            AssistantState::Idle => "idle",
            AssistantState::Listening => "listening",
            AssistantState::Processing => "processing",
            AssistantState::Speaking => "speaking",
            AssistantState::Alert => "alert",
        }
    }

    /// Busy states own an exclusive audio resource; nothing else may start one.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            AssistantState::Listening | AssistantState::Processing | AssistantState::Speaking
        )
    }
}

/// Transition notification delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub current: AssistantState,
    pub previous: AssistantState,
}

pub type SubscriptionId = u64;

/// Receiving end of a state subscription. Drained cooperatively by whoever
/// holds it; delivery order matches transition order.
pub struct StateSubscription {
    pub id: SubscriptionId,
    changes: Receiver<StateChange>,
}

impl StateSubscription {
    pub fn try_next(&self) -> Option<StateChange> {
        self.changes.try_recv().ok()
    }
}

/// Owner of the conversation state.
pub struct StateStore {
    current: AssistantState,
    subscribers: Vec<(SubscriptionId, Sender<StateChange>)>,
    next_id: SubscriptionId,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            current: AssistantState::Idle,
            subscribers: Vec::new(),
            next_id: 0,
        }
    }

    pub fn get(&self) -> AssistantState {
        self.current
    }

    /// Unconditional transition. No-op sets are swallowed so subscribers only
    /// ever observe real changes.
    pub fn set(&mut self, next: AssistantState) {
        let previous = self.current;
        if previous == next {
            return;
        }
        self.current = next;
        log_debug(&format!("state {} -> {}", previous.label(), next.label()));
        tracing::debug!(from = previous.label(), to = next.label(), "state change");
        let change = StateChange {
            current: next,
            previous,
        };
        // Dropped receivers are pruned as a side effect of the failed send.
        self.subscribers.retain(|(_, tx)| tx.send(change).is_ok());
    }

    pub fn subscribe(&mut self) -> StateSubscription {
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = unbounded();
        self.subscribers.push((id, tx));
        StateSubscription { id, changes: rx }
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.retain(|(sub_id, _)| *sub_id != id);
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
