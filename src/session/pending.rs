//! In-flight request tracking and the suspend/resume buffer.
//!
//! Two pieces of bookkeeping drive the replay/discard decisions around
//! agent reattachment:
//!
//! - [`PendingCommands`] correlates outstanding calls (by call id) to the
//!   method and exact serialized payload that produced them.
//! - [`SuspendQueue`] holds commands submitted while the session is
//!   suspended, in strict FIFO order, until a resume flushes them.

// ============================================================================
// Imports
// ============================================================================

use std::collections::{BTreeMap, VecDeque};

use crate::identifiers::CallId;

// ============================================================================
// WaitingMessage
// ============================================================================

/// A command forwarded to the agent and awaiting its response.
#[derive(Debug, Clone)]
pub(crate) struct WaitingMessage {
    /// Method name, kept for reattach reclassification.
    pub method: String,
    /// Exact serialized command payload, kept for replay.
    pub message: Vec<u8>,
}

// ============================================================================
// SuspendedMessage
// ============================================================================

/// A command queued while the session is suspended.
#[derive(Debug, Clone)]
pub(crate) struct SuspendedMessage {
    pub call_id: CallId,
    pub method: String,
    pub message: Vec<u8>,
}

// ============================================================================
// PendingCommands
// ============================================================================

/// Correlates outstanding call ids to their originating commands.
///
/// Keyed on an ordered map: call ids are issued monotonically, so ascending
/// iteration reproduces submission order, which reattachment relies on when
/// replaying or reclassifying in-flight commands.
#[derive(Debug, Default)]
pub(crate) struct PendingCommands {
    map: BTreeMap<CallId, WaitingMessage>,
}

impl PendingCommands {
    /// Records a command as in-flight.
    pub fn insert(&mut self, call_id: CallId, method: impl Into<String>, message: Vec<u8>) {
        self.map.insert(
            call_id,
            WaitingMessage {
                method: method.into(),
                message,
            },
        );
    }

    /// Removes the record for a completed call. Best effort: removing an
    /// unknown id is not an error.
    pub fn remove(&mut self, call_id: CallId) {
        self.map.remove(&call_id);
    }

    /// Iterates records in submission (call id) order.
    pub fn iter(&self) -> impl Iterator<Item = (CallId, &WaitingMessage)> {
        self.map.iter().map(|(id, msg)| (*id, msg))
    }

    /// Removes and returns all records in submission order.
    pub fn drain_ordered(&mut self) -> Vec<(CallId, WaitingMessage)> {
        std::mem::take(&mut self.map).into_iter().collect()
    }

    /// Returns the number of outstanding calls.
    pub fn len(&self) -> usize {
        self.map.len()
    }
}

// ============================================================================
// SuspendQueue
// ============================================================================

/// FIFO buffer of commands held back while the session is suspended.
#[derive(Debug, Default)]
pub(crate) struct SuspendQueue {
    queue: VecDeque<SuspendedMessage>,
}

impl SuspendQueue {
    /// Appends a command, preserving insertion order.
    pub fn push_back(&mut self, message: SuspendedMessage) {
        self.queue.push_back(message);
    }

    /// Inserts a batch at the front of the queue, keeping the batch's own
    /// order ahead of everything already buffered.
    ///
    /// Used on reattach: in-flight commands that survive the navigation are
    /// requeued ahead of commands buffered after the suspend.
    pub fn requeue_front(&mut self, batch: Vec<SuspendedMessage>) {
        for message in batch.into_iter().rev() {
            self.queue.push_front(message);
        }
    }

    /// Removes and returns all buffered commands in FIFO order.
    pub fn drain(&mut self) -> Vec<SuspendedMessage> {
        self.queue.drain(..).collect()
    }

    /// Returns the number of buffered commands.
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn suspended(id: i32, method: &str) -> SuspendedMessage {
        SuspendedMessage {
            call_id: CallId::new(id),
            method: method.to_string(),
            message: method.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_pending_iterates_in_submission_order() {
        let mut pending = PendingCommands::default();
        pending.insert(CallId::new(5), "c", vec![]);
        pending.insert(CallId::new(1), "a", vec![]);
        pending.insert(CallId::new(3), "b", vec![]);

        let order: Vec<i32> = pending.iter().map(|(id, _)| id.value()).collect();
        assert_eq!(order, vec![1, 3, 5]);
    }

    #[test]
    fn test_pending_remove_is_best_effort() {
        let mut pending = PendingCommands::default();
        pending.insert(CallId::new(1), "a", vec![]);
        pending.remove(CallId::new(99));
        assert_eq!(pending.len(), 1);
        pending.remove(CallId::new(1));
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn test_suspend_queue_fifo() {
        let mut queue = SuspendQueue::default();
        queue.push_back(suspended(1, "c1"));
        queue.push_back(suspended(2, "c2"));
        queue.push_back(suspended(3, "c3"));

        let order: Vec<i32> = queue.drain().iter().map(|m| m.call_id.value()).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_requeue_front_keeps_batch_order() {
        let mut queue = SuspendQueue::default();
        queue.push_back(suspended(10, "later"));
        queue.requeue_front(vec![suspended(1, "a"), suspended(2, "b")]);

        let order: Vec<i32> = queue.drain().iter().map(|m| m.call_id.value()).collect();
        assert_eq!(order, vec![1, 2, 10]);
    }
}
