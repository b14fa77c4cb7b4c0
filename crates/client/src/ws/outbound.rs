//! Frames held back until the session is connected and authenticated.

use std::collections::VecDeque;

use homelink_shared::MessageId;

use crate::error::{Result, SessionError};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct QueuedFrame {
    pub id: MessageId,
    /// A caller is waiting on this id in the correlation table.
    pub correlated: bool,
    pub text: String,
}

/// Bounded FIFO. A full queue rejects the newcomer; queued frames are never
/// dropped or reordered to make room.
pub(crate) struct OutboundQueue {
    frames: VecDeque<QueuedFrame>,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            capacity,
        }
    }

    pub fn push(&mut self, frame: QueuedFrame) -> Result<()> {
        if self.frames.len() >= self.capacity {
            return Err(SessionError::QueueFull(self.frames.len()));
        }
        self.frames.push_back(frame);
        Ok(())
    }

    /// Put back a frame that could not be written, keeping its place in line.
    pub fn push_front(&mut self, frame: QueuedFrame) {
        self.frames.push_front(frame);
    }

    pub fn pop(&mut self) -> Option<QueuedFrame> {
        self.frames.pop_front()
    }

    pub fn remove(&mut self, id: MessageId) -> bool {
        let before = self.frames.len();
        self.frames.retain(|frame| frame.id != id);
        before != self.frames.len()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: MessageId) -> QueuedFrame {
        QueuedFrame {
            id,
            correlated: true,
            text: format!("{{\"id\":{}}}", id),
        }
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = OutboundQueue::new(8);
        for id in 1..=3 {
            queue.push(frame(id)).unwrap();
        }
        let order: Vec<_> = std::iter::from_fn(|| queue.pop()).map(|f| f.id).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_full_queue_rejects_newest() {
        let mut queue = OutboundQueue::new(2);
        queue.push(frame(1)).unwrap();
        queue.push(frame(2)).unwrap();
        assert_eq!(queue.push(frame(3)), Err(SessionError::QueueFull(2)));
        assert_eq!(queue.pop().map(|f| f.id), Some(1));
    }

    #[test]
    fn test_push_front_and_remove() {
        let mut queue = OutboundQueue::new(4);
        queue.push(frame(2)).unwrap();
        queue.push(frame(3)).unwrap();
        queue.push_front(frame(1));
        assert!(queue.remove(2));
        assert!(!queue.remove(2));
        let order: Vec<_> = std::iter::from_fn(|| queue.pop()).map(|f| f.id).collect();
        assert_eq!(order, vec![1, 3]);
        assert!(queue.is_empty());
    }
}
