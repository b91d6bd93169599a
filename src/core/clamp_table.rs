//! Process-wide mapping from local TCP source port to an outbound window
//! clamp, shared lock-free between every session and the packet
//! interceptor.
//!
//! The table is addressed by an integer in a small, dense range
//! (ephemeral TCP ports) and is read on every outbound packet, so it is a
//! fixed-size array of atomic cells rather than a hash map — the hot path
//! deserves an O(1) load with no hashing. A value of 0 means "no clamp".
//! Torn reads are acceptable: the only values a slot ever takes over its
//! lifecycle are `0` and one fixed `W`, and either is a safe verdict for
//! the packet path.

use std::sync::atomic::{AtomicU16, Ordering};

const SLOTS: usize = 1 << 16;

/// Lock-free port → window-cap table. Wait-free `get`/`set`, no
/// allocation after construction.
pub struct ClampTable {
    slots: Box<[AtomicU16; SLOTS]>,
}

impl ClampTable {
    pub fn new() -> Self {
        // `AtomicU16::new(0)` is `Copy`-free, so build the array element
        // by element rather than relying on a `Default` derive.
        let slots: Vec<AtomicU16> = (0..SLOTS).map(|_| AtomicU16::new(0)).collect();
        let slots: Box<[AtomicU16; SLOTS]> = slots
            .into_boxed_slice()
            .try_into()
            .unwrap_or_else(|_| unreachable!("exactly SLOTS elements were collected"));
        Self { slots }
    }

    /// Store `cap` (0 disables the clamp) at `port`.
    pub fn set(&self, port: u16, cap: u16) {
        self.slots[port as usize].store(cap, Ordering::Relaxed);
    }

    /// Load the current cap at `port`.
    pub fn get(&self, port: u16) -> u16 {
        self.slots[port as usize].load(Ordering::Relaxed)
    }

    /// Clear the slot at `port` back to 0 (no clamp).
    pub fn clear(&self, port: u16) {
        self.set(port, 0);
    }
}

impl Default for ClampTable {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that clears a session's clamp slot exactly once, on drop,
/// regardless of which path — forward pump, return pump, or an early
/// handshake error — ends the session first.
///
/// This is the ownership-hierarchy answer to "a scoped acquisition of the
/// clamp slot is mandatory": two independent tasks (forward and return
/// pumps) can end a session, so release must live above both of them,
/// which a `Drop` impl on a value owned by the session supervisor
/// guarantees.
pub struct ClampGuard {
    table: std::sync::Arc<ClampTable>,
    port: u16,
}

impl ClampGuard {
    /// Create the guard without installing a clamp (used when the target
    /// port isn't 443 — invariant I2 requires sessions to only ever touch
    /// their own port, and a session with no clamp still owns the slot
    /// for cleanup purposes).
    pub fn new(table: std::sync::Arc<ClampTable>, port: u16) -> Self {
        Self { table, port }
    }

    /// Install the configured window cap on this guard's port.
    pub fn install(&self, cap: u16) {
        self.table.set(self.port, cap);
    }
}

impl Drop for ClampGuard {
    fn drop(&mut self) {
        self.table.clear(self.port);
    }
}
