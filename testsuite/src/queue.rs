use std::collections::VecDeque;

use tycho_testsuite_abi::{Address, Params};

use crate::message::{Message, MessageId};

/// Pending internal messages in creation order.
#[derive(Debug, Default)]
pub struct MessageQueue {
    messages: VecDeque<Message>,
}

impl MessageQueue {
    pub fn push(&mut self, message: Message) {
        debug_assert!(
            self.messages.back().is_none_or(|last| last.id < message.id),
            "queue must stay ordered by id"
        );
        self.messages.push_back(message);
    }

    pub fn front(&self) -> Option<&Message> {
        self.messages.front()
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn pop(&mut self) -> Option<Message> {
        self.messages.pop_front()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Total value carried by pending messages.
    /// Sum of queued values, `None` on overflow.
    pub fn in_flight_value(&self) -> Option<u128> {
        self.messages
            .iter()
            .try_fold(0u128, |total, m| total.checked_add(m.value.into_inner()))
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

/// Decoded external outbound event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub message_id: MessageId,
    pub src: Address,
    pub name: String,
    pub fields: Params,
    pub created_at: u32,
}

/// Events in emission order.
#[derive(Debug, Default)]
pub struct EventLog {
    events: VecDeque<Event>,
}

impl EventLog {
    pub fn push(&mut self, event: Event) {
        self.events.push_back(event);
    }

    pub fn front(&self) -> Option<&Event> {
        self.events.front()
    }

    pub fn pop(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn drain(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
