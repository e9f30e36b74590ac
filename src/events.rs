//! Typed event publishing with token-keyed unsubscribe
//!
//! Downstream readers (GUI view models, derived caches) register a callback
//! and get back an opaque token they can later use to unsubscribe. One
//! publisher per event kind; no global bus.

use std::fmt;

/// Handle returned by [`Publisher::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

pub struct Publisher<T> {
    next_token: u64,
    subscribers: Vec<(u64, Box<dyn Fn(&T)>)>,
}

impl<T> Publisher<T> {
    pub fn new() -> Self {
        Publisher {
            next_token: 0,
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe<F: Fn(&T) + 'static>(&mut self, callback: F) -> SubscriptionToken {
        let token = self.next_token;
        self.next_token += 1;
        self.subscribers.push((token, Box::new(callback)));
        SubscriptionToken(token)
    }

    /// Returns false if the token was already unsubscribed
    pub fn unsubscribe(&mut self, token: SubscriptionToken) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(t, _)| *t != token.0);
        self.subscribers.len() != before
    }

    pub fn emit(&self, event: &T) {
        for (_, callback) in &self.subscribers {
            callback(event);
        }
    }
}

impl<T> Default for Publisher<T> {
    fn default() -> Self {
        Publisher::new()
    }
}

impl<T> fmt::Debug for Publisher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
