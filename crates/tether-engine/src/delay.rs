//! Delayed callbacks declared by the view.
//!
//! A delay is identified by where it is declared, so re-rendering the same
//! element keeps the running timer. Once fired it stays spent until the
//! element disappears from a render.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tether_core::ids::ElementId;
use tether_core::path::Path;

use crate::view::Handler;

#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct DelayKey {
    pub anchor: Option<ElementId>,
    pub relative: Path,
    /// Position among the delays declared on the same element.
    pub index: u32,
}

pub struct DelayEntry<S> {
    pub key: DelayKey,
    pub after: Duration,
    pub handler: Handler<S>,
}

enum SlotState {
    Waiting(CancellationToken),
    Fired,
}

struct Slot<S> {
    state: SlotState,
    handler: Handler<S>,
}

pub(crate) struct DelayScheduler<S> {
    slots: HashMap<DelayKey, Slot<S>>,
    fired_tx: mpsc::UnboundedSender<DelayKey>,
    cancel: CancellationToken,
}

impl<S> DelayScheduler<S> {
    /// Timers send their key on `fired_tx` when they elapse. All timers stop
    /// when `cancel` does.
    pub fn new(fired_tx: mpsc::UnboundedSender<DelayKey>, cancel: CancellationToken) -> Self {
        Self {
            slots: HashMap::new(),
            fired_tx,
            cancel,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Reconcile running timers with the delays of a new render.
    pub fn sync(&mut self, entries: Vec<DelayEntry<S>>) {
        let mut next = HashMap::with_capacity(entries.len());
        for entry in entries {
            let slot = match self.slots.remove(&entry.key) {
                Some(existing) => Slot {
                    state: existing.state,
                    handler: entry.handler,
                },
                None => Slot {
                    state: SlotState::Waiting(self.start(entry.key.clone(), entry.after)),
                    handler: entry.handler,
                },
            };
            next.insert(entry.key, slot);
        }
        for (_, gone) in self.slots.drain() {
            if let SlotState::Waiting(token) = gone.state {
                token.cancel();
            }
        }
        self.slots = next;
    }

    /// Mark `key` fired and return its handler, unless the delay was removed
    /// or already fired.
    pub fn fire(&mut self, key: &DelayKey) -> Option<Handler<S>> {
        let slot = self.slots.get_mut(key)?;
        match slot.state {
            SlotState::Waiting(_) => {
                slot.state = SlotState::Fired;
                Some(slot.handler.clone())
            }
            SlotState::Fired => None,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, slot) in self.slots.drain() {
            if let SlotState::Waiting(token) = slot.state {
                token.cancel();
            }
        }
    }

    fn start(&self, key: DelayKey, after: Duration) -> CancellationToken {
        let token = self.cancel.child_token();
        let stop = token.clone();
        let tx = self.fired_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = stop.cancelled() => {}
                _ = tokio::time::sleep(after) => {
                    let _ = tx.send(key);
                }
            }
        });
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Access;
    use crate::view::handler;

    fn entry(index: u32, secs: u64) -> DelayEntry<u32> {
        DelayEntry {
            key: DelayKey {
                anchor: None,
                relative: Path::from_indices(vec![0]),
                index,
            },
            after: Duration::from_secs(secs),
            handler: handler(|_: Access<u32>| async { Ok(()) }),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_once_after_duration() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut delays = DelayScheduler::new(tx, CancellationToken::new());
        delays.sync(vec![entry(0, 5)]);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(rx.try_recv().is_err());
        tokio::time::sleep(Duration::from_secs(2)).await;
        let key = rx.recv().await.unwrap();
        assert_eq!(key.index, 0);
        assert!(delays.fire(&key).is_some());
        assert!(delays.fire(&key).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn rerender_keeps_running_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut delays = DelayScheduler::new(tx, CancellationToken::new());
        delays.sync(vec![entry(0, 5)]);
        tokio::time::sleep(Duration::from_secs(3)).await;
        delays.sync(vec![entry(0, 5)]);
        tokio::time::sleep(Duration::from_secs(3)).await;
        // Original deadline, not restarted by the second render.
        assert!(rx.recv().await.is_some());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn removed_delay_is_cancelled() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut delays = DelayScheduler::new(tx, CancellationToken::new());
        delays.sync(vec![entry(0, 5), entry(1, 5)]);
        delays.sync(vec![entry(1, 5)]);
        assert_eq!(delays.len(), 1);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(rx.recv().await.map(|k| k.index), Some(1));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn session_cancel_stops_everything() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let mut delays = DelayScheduler::new(tx, cancel.clone());
        delays.sync(vec![entry(0, 1)]);
        cancel.cancel();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
        delays.cancel_all();
        assert_eq!(delays.len(), 0);
    }
}
