use std::collections::VecDeque;

use lobby_core::messages::ChatMessage;

/// Bounded FIFO of recent broadcast messages, oldest first.
pub struct ChatHistory {
    max: usize,
    entries: VecDeque<ChatMessage>,
}

impl ChatHistory {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            entries: VecDeque::with_capacity(max.min(1024)),
        }
    }

    /// Push a message, evicting the oldest entry on overflow.
    pub fn append(&mut self, message: ChatMessage) {
        if self.max == 0 {
            return;
        }
        self.entries.push_back(message);
        if self.entries.len() > self.max {
            let _ = self.entries.pop_front();
        }
    }

    /// Full ordered copy, used on connect and on replay requests.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max(&self) -> usize {
        self.max
    }
}
