//! Single-fire synchronization gates for session workers.
//!
//! A [`Gate`] is a one-shot, all-or-nothing release point: every waiting
//! worker observes the release at once, and none can observe a partial
//! firing. The holder of the [`Trigger`] releases the gate exactly once.
//! If the trigger is dropped without firing — its owner failed before
//! reaching the release point — every waiter unblocks with
//! [`GateWait::Abandoned`] and can exit without ever starting its run.

use tokio::sync::watch;

/// Outcome of waiting on a [`Gate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateWait {
    /// The trigger fired; proceed with the run.
    Released,
    /// The trigger was dropped without firing; abort without running.
    Abandoned,
}

/// The firing half of a gate. Consumed on release.
#[derive(Debug)]
pub struct Trigger {
    tx: watch::Sender<bool>,
}

/// The waiting half of a gate. Cheap to clone; one per worker.
#[derive(Debug, Clone)]
pub struct Gate {
    rx: watch::Receiver<bool>,
}

/// Create a connected trigger/gate pair.
pub fn gate() -> (Trigger, Gate) {
    let (tx, rx) = watch::channel(false);
    (Trigger { tx }, Gate { rx })
}

impl Trigger {
    /// Fire the gate, releasing every current and future waiter.
    pub fn release(self) {
        // Receivers that have not yet observed the value still see it after
        // the sender drops.
        let _ = self.tx.send(true);
    }
}

impl Gate {
    /// Wait until the gate is released or abandoned.
    pub async fn wait(&mut self) -> GateWait {
        loop {
            if *self.rx.borrow_and_update() {
                return GateWait::Released;
            }
            if self.rx.changed().await.is_err() {
                // Sender gone; it may have fired right before dropping.
                return if *self.rx.borrow() {
                    GateWait::Released
                } else {
                    GateWait::Abandoned
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_release_wakes_all_waiters() {
        let (trigger, gate) = gate();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let mut g = gate.clone();
            handles.push(tokio::spawn(async move { g.wait().await }));
        }

        // Give the waiters a chance to park before firing.
        tokio::task::yield_now().await;
        trigger.release();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), GateWait::Released);
        }
    }

    #[tokio::test]
    async fn test_wait_after_release() {
        let (trigger, mut gate) = gate();
        trigger.release();
        assert_eq!(gate.wait().await, GateWait::Released);
        // Repeated waits keep observing the released state.
        assert_eq!(gate.wait().await, GateWait::Released);
    }

    #[tokio::test]
    async fn test_dropped_trigger_abandons_waiters() {
        let (trigger, gate) = gate();

        let mut g = gate.clone();
        let handle = tokio::spawn(async move { g.wait().await });

        tokio::task::yield_now().await;
        drop(trigger);

        assert_eq!(handle.await.unwrap(), GateWait::Abandoned);

        // Late waiters observe the same outcome.
        let mut late = gate.clone();
        assert_eq!(late.wait().await, GateWait::Abandoned);
    }
}
