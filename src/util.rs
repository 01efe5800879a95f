use crossbeam_channel::{Receiver, Sender};

/// Wake-up signal holding at most one pending permit.
///
/// Giving while a permit is pending is a no-op, so any number of gives
/// between two waits wake the waiter once.
#[derive(Clone, Debug)]
pub struct Signal {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl Signal {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(1);
        Self { tx, rx }
    }

    pub fn give(&self) {
        // Full means a permit is pending already.
        let _ = self.tx.try_send(());
    }

    /// Blocks until a permit is available and takes it.
    pub fn wait(&self) {
        // Cannot disconnect while `self` holds the sender.
        let _ = self.rx.recv();
    }

}
