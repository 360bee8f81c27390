//! Ordered delivery of context → controller messages

use pinbox_core::Event;
use tokio::sync::mpsc::UnboundedSender;

/// Sender that holds messages back until the instantiation that produced
/// them has announced itself with `postInit`.
#[derive(Debug)]
pub struct Outbox {
    tx: UnboundedSender<Event>,
    held: Option<Vec<Event>>,
}

impl Outbox {
    /// A held outbox. Nothing is delivered until [`Outbox::open`].
    pub fn held(tx: UnboundedSender<Event>) -> Self {
        Self {
            tx,
            held: Some(Vec::new()),
        }
    }

    pub fn post(&mut self, event: Event) {
        match &mut self.held {
            Some(held) => held.push(event),
            None => self.send(event),
        }
    }

    /// Deliver `first`, then everything held, then stop holding.
    pub fn open(&mut self, first: Event) {
        self.send(first);
        for event in self.held.take().unwrap_or_default() {
            self.send(event);
        }
    }

    /// Deliver `event` ahead of anything held. Used for failures reported
    /// before the instantiation could be announced.
    pub fn send(&self, event: Event) {
        tracing::trace!(kind = event.kind(), "event posted");
        if self.tx.send(event).is_err() {
            tracing::debug!("controller dropped; event discarded");
        }
    }

    /// Drop anything still held.
    pub fn discard(&mut self) -> usize {
        self.held.as_mut().map_or(0, |held| held.drain(..).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_held_events_follow_opening_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut outbox = Outbox::held(tx);

        outbox.post(Event::Print { text: "early".into() });
        assert!(rx.try_recv().is_err());

        outbox.open(Event::Alert { text: "first".into() });
        outbox.post(Event::Print { text: "late".into() });

        let kinds: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| match e {
                Event::Print { text } | Event::Alert { text } => text,
                other => other.kind().to_string(),
            })
            .collect();
        assert_eq!(kinds, ["first", "early", "late"]);
    }

    #[test]
    fn test_discard_drops_held() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut outbox = Outbox::held(tx);
        outbox.post(Event::Print { text: "x".into() });

        assert_eq!(outbox.discard(), 1);
        outbox.send(Event::Error { details: "boom".into() });
        assert!(matches!(rx.try_recv(), Ok(Event::Error { .. })));
        assert!(rx.try_recv().is_err());
    }
}
