//! Callback registry
//!
//! Guest function pointers are indices into the module's indirect function
//! table. Registration resolves the index once into a host-owned callable
//! and hands the module a registration id; from then on the host only deals
//! in ids. Ids are never reused, so a stale id can be told apart from a
//! live one.

use crate::surface::Handle;
use pinbox_core::time::TickClock;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u32);

impl CallbackId {
    pub fn from_raw(raw: u32) -> CallbackId {
        CallbackId(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cb{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    Listener { target: Handle, event: String },
    AnimationFrame,
    Timeout { deadline: Instant },
}

#[derive(Debug)]
struct Registration<F> {
    table_index: u32,
    func: F,
    trigger: Trigger,
}

/// What woke a one-shot callback.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Due {
    AnimationFrame,
    Timeout,
}

#[derive(Debug)]
pub struct Fired<F> {
    pub id: CallbackId,
    pub func: F,
    pub due: Due,
}

/// Registered callbacks, generic over the callable so the scheduling rules
/// can be exercised without an engine.
#[derive(Debug)]
pub struct CallbackRegistry<F> {
    entries: BTreeMap<CallbackId, Registration<F>>,
    next: u32,
    frames: TickClock,
}

impl<F: Clone> CallbackRegistry<F> {
    pub fn new(frame_interval: Duration, now: Instant) -> Self {
        Self {
            entries: BTreeMap::new(),
            next: 1,
            frames: TickClock::new(frame_interval, now),
        }
    }

    fn insert(&mut self, table_index: u32, func: F, trigger: Trigger) -> CallbackId {
        let id = CallbackId(self.next);
        self.next = self.next.saturating_add(1);
        self.entries.insert(
            id,
            Registration {
                table_index,
                func,
                trigger,
            },
        );
        tracing::trace!(id = %id, table_index, "callback registered");
        id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn add_listener(&mut self, target: Handle, event: &str, table_index: u32, func: F) -> CallbackId {
        let trigger = Trigger::Listener {
            target,
            event: event.to_string(),
        };
        self.insert(table_index, func, trigger)
    }

    /// Remove the first listener matching target, event and table index.
    pub fn remove_listener(&mut self, target: Handle, event: &str, table_index: u32) -> Option<CallbackId> {
        let id = self.entries.iter().find_map(|(id, reg)| match &reg.trigger {
            Trigger::Listener { target: t, event: e }
                if *t == target && e == event && reg.table_index == table_index =>
            {
                Some(*id)
            }
            _ => None,
        })?;
        self.entries.remove(&id);
        Some(id)
    }

    pub fn request_frame(&mut self, table_index: u32, func: F) -> CallbackId {
        self.insert(table_index, func, Trigger::AnimationFrame)
    }

    pub fn set_timeout(&mut self, table_index: u32, func: F, delay: Duration, now: Instant) -> CallbackId {
        self.insert(table_index, func, Trigger::Timeout { deadline: now + delay })
    }

    /// Explicit unregistration. Returns false for an id that is not live.
    pub fn unregister(&mut self, id: CallbackId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// The callable behind a live id.
    pub fn resolve(&self, id: CallbackId) -> Option<F> {
        self.entries.get(&id).map(|reg| reg.func.clone())
    }

    pub fn trigger(&self, id: CallbackId) -> Option<&Trigger> {
        self.entries.get(&id).map(|reg| &reg.trigger)
    }

    /// Listener ids for `event` on `target`, in registration order.
    pub fn listeners(&self, target: Handle, event: &str) -> Vec<CallbackId> {
        self.entries
            .iter()
            .filter(|(_, reg)| {
                matches!(&reg.trigger, Trigger::Listener { target: t, event: e } if *t == target && e == event)
            })
            .map(|(id, _)| *id)
            .collect()
    }

    /// Handles that have at least one listener registered on them.
    pub fn listener_targets(&self) -> impl Iterator<Item = Handle> + '_ {
        self.entries.values().filter_map(|reg| match &reg.trigger {
            Trigger::Listener { target, .. } => Some(*target),
            _ => None,
        })
    }

    fn has_frames(&self) -> bool {
        self.entries
            .values()
            .any(|reg| reg.trigger == Trigger::AnimationFrame)
    }

    /// Earliest moment a one-shot callback becomes due.
    pub fn next_deadline(&self) -> Option<Instant> {
        let timeouts = self.entries.values().filter_map(|reg| match reg.trigger {
            Trigger::Timeout { deadline } => Some(deadline),
            _ => None,
        });
        let frame = self.has_frames().then(|| self.frames.next_deadline());
        timeouts.chain(frame).min()
    }

    /// Remove and return every one-shot callback due at `now`.
    ///
    /// Animation frames fire together on the frame tick; timeouts fire in
    /// deadline order after them.
    pub fn take_due(&mut self, now: Instant) -> Vec<Fired<F>> {
        let frame_due = self.has_frames() && self.frames.poll(now);
        let mut due: Vec<(Instant, CallbackId, Due)> = self
            .entries
            .iter()
            .filter_map(|(id, reg)| match reg.trigger {
                Trigger::AnimationFrame if frame_due => Some((now, *id, Due::AnimationFrame)),
                Trigger::Timeout { deadline } if deadline <= now => Some((deadline, *id, Due::Timeout)),
                _ => None,
            })
            .collect();
        due.sort_by_key(|(at, id, kind)| (*kind == Due::Timeout, *at, *id));

        due.into_iter()
            .filter_map(|(_, id, due)| {
                self.entries.remove(&id).map(|reg| Fired {
                    id,
                    func: reg.func,
                    due,
                })
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: Duration = Duration::from_millis(16);

    fn registry(now: Instant) -> CallbackRegistry<&'static str> {
        CallbackRegistry::new(FRAME, now)
    }

    #[test]
    fn test_ids_are_not_reused() {
        let now = Instant::now();
        let mut reg = registry(now);

        let a = reg.request_frame(4, "a");
        assert!(reg.unregister(a));
        let b = reg.request_frame(4, "b");

        assert_ne!(a, b);
        assert!(reg.resolve(a).is_none());
        assert!(!reg.unregister(a));
    }

    #[test]
    fn test_listeners_in_registration_order() {
        let now = Instant::now();
        let mut reg = registry(now);
        let first = reg.add_listener(Handle::WINDOW, "click", 1, "first");
        reg.add_listener(Handle::BODY, "click", 1, "other target");
        let second = reg.add_listener(Handle::WINDOW, "click", 2, "second");
        reg.add_listener(Handle::WINDOW, "keydown", 1, "other event");

        assert_eq!(reg.listeners(Handle::WINDOW, "click"), vec![first, second]);
    }

    #[test]
    fn test_listener_targets_skip_timers() {
        let now = Instant::now();
        let mut reg = registry(now);
        let target = Handle::from_raw(40);
        reg.add_listener(target, "pointerdown", 1, "down");
        reg.request_frame(2, "frame");
        reg.set_timeout(3, "later", FRAME, now);

        assert_eq!(reg.listener_targets().collect::<Vec<_>>(), vec![target]);
    }

    #[test]
    fn test_remove_listener_matches_table_index() {
        let now = Instant::now();
        let mut reg = registry(now);
        reg.add_listener(Handle::WINDOW, "click", 1, "one");
        let two = reg.add_listener(Handle::WINDOW, "click", 2, "two");

        assert_eq!(reg.remove_listener(Handle::WINDOW, "click", 2), Some(two));
        assert_eq!(reg.remove_listener(Handle::WINDOW, "click", 2), None);
        assert_eq!(reg.listeners(Handle::WINDOW, "click").len(), 1);
    }

    #[test]
    fn test_timeouts_fire_once_in_deadline_order() {
        let now = Instant::now();
        let mut reg = registry(now);
        reg.set_timeout(1, "late", Duration::from_millis(30), now);
        reg.set_timeout(1, "early", Duration::from_millis(10), now);

        assert_eq!(reg.next_deadline(), Some(now + Duration::from_millis(10)));
        assert!(reg.take_due(now + Duration::from_millis(5)).is_empty());

        let fired = reg.take_due(now + Duration::from_millis(40));
        let names: Vec<_> = fired.iter().map(|f| f.func).collect();
        assert_eq!(names, ["early", "late"]);
        assert!(reg.take_due(now + Duration::from_millis(80)).is_empty());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_frames_wait_for_tick() {
        let now = Instant::now();
        let mut reg = registry(now);
        assert_eq!(reg.next_deadline(), None);

        reg.request_frame(3, "frame");
        assert_eq!(reg.next_deadline(), Some(now + FRAME));
        assert!(reg.take_due(now).is_empty());

        let fired = reg.take_due(now + FRAME);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].due, Due::AnimationFrame);
        assert_eq!(reg.next_deadline(), None);
    }

    #[test]
    fn test_listeners_survive_firing() {
        let now = Instant::now();
        let mut reg = registry(now);
        let id = reg.add_listener(Handle::WINDOW, "click", 1, "l");
        reg.set_timeout(1, "t", Duration::ZERO, now);

        reg.take_due(now);
        assert_eq!(reg.resolve(id), Some("l"));
    }
}
