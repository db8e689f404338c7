// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! Fixed pool of request contexts.
//!
//! A request context is a fixed-size buffer plus metadata that carries data
//! between the interrupt-driven UART/USB layers and the main processing loop.
//! The pool replaces dynamic allocation: it is sized at build time, never
//! grows, and ownership moves between subsystems strictly by state tag.
//!
//! Corruption of the pool is not a recoverable condition.  Freeing a context
//! that is already free, or moving a context along an edge that is not part
//! of the ownership diagram, panics.  Continuing with a corrupted pool would
//! risk reuse of stale context contents across the protocol boundary.

use crate::error::Error;

/// Number of request contexts in the pool.
///
/// At least one per IN/IRQ endpoint plus a few for every OUT endpoint.
pub const NUM_RCTX: usize = 20;

/// Fixed payload size of every request context.
pub const RCTX_SIZE: usize = 348;

/// Owner tag of a request context.
///
/// At any instant exactly one subsystem may touch a context's buffer; the
/// state says which one.  The only legal movements are the edges checked by
/// [`Pool::set_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RctxState {
    /// Not owned by anyone, available for allocation.
    Free,
    /// The USB transport is filling it from an inbound (OUT) transfer.
    UsbRxBusy,
    /// Inbound transfer complete, queued for command dispatch.
    UsbRxPending,
    /// The protocol engine owns it and is composing outbound data.
    UartTxPending,
    /// Message complete, queued for transmission to the host.
    UsbTxPending,
    /// A physical USB transfer of this context is in flight.
    UsbTxBusy,
}

fn transition_allowed(old: RctxState, new: RctxState) -> bool {
    use RctxState::*;
    matches!(
        (old, new),
        (Free, UsbRxBusy)
            | (UsbRxBusy, UsbRxPending)
            | (UsbRxPending, Free)
            | (Free, UartTxPending)
            | (UartTxPending, UsbTxPending)
            | (UsbTxPending, UsbTxBusy)
            | (UsbTxBusy, Free)
    )
}

/// Opaque handle to a pool slot.
///
/// Handles are only ever produced by the pool itself, so a "free of a pointer
/// that does not belong to the pool" cannot be expressed; only double-free
/// remains as a runtime check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle(u8);

/// One request context: payload buffer plus transfer metadata.
///
/// A context is an affine resource: it moves between subsystems by state
/// tag and is never copied.
#[allow(missing_copy_implementations)]
pub struct Rctx {
    state: RctxState,
    /// Bytes of `data` currently in use.
    pub size: u16,
    /// Total expected length of a multi-chunk transfer.
    pub tot_len: u16,
    /// Read index into `data`.
    pub idx: u16,
    /// Endpoint address this context was handed to (owner link, set by the
    /// transport).
    pub ep: u8,
    /// Payload buffer.
    pub data: [u8; RCTX_SIZE],
}

impl Rctx {
    const INIT: Rctx = Rctx {
        state: RctxState::Free,
        size: 0,
        tot_len: 0,
        idx: 0,
        ep: 0,
        data: [0; RCTX_SIZE],
    };

    /// Current owner tag.
    pub fn state(&self) -> RctxState {
        self.state
    }

    /// The in-use portion of the payload buffer.
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.size)]
    }
}

impl core::fmt::Debug for Rctx {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Rctx")
            .field("state", &self.state)
            .field("size", &self.size)
            .field("tot_len", &self.tot_len)
            .field("idx", &self.idx)
            .field("ep", &self.ep)
            .finish()
    }
}

/// Statically sized pool of request contexts.
///
/// All methods require exclusive access; when the pool is shared with
/// interrupt handlers it must live inside an [`IrqShared`](crate::IrqShared)
/// so every scan and mutation happens inside an interrupt-masking critical
/// section.
#[derive(Debug)]
pub struct Pool {
    slots: [Rctx; NUM_RCTX],
}

impl Pool {
    /// An all-free pool, suitable for a `static`.
    pub const fn new() -> Self {
        Pool {
            slots: [Rctx::INIT; NUM_RCTX],
        }
    }

    /// Takes a free context out of the pool.
    ///
    /// `size` is the caller's capacity request and must not exceed
    /// [`RCTX_SIZE`].  `initial` is the owner taking the context and must be
    /// a direct successor of [`RctxState::Free`] in the ownership diagram.
    /// The context is returned zeroed with all metadata reset.
    pub fn allocate(&mut self, size: usize, initial: RctxState) -> Result<Handle, Error> {
        if size > RCTX_SIZE {
            warn!("context request too large ({} > {})", size, RCTX_SIZE);
            return Err(Error::OutOfMemory);
        }
        assert!(
            transition_allowed(RctxState::Free, initial),
            "illegal initial context state {:?}",
            initial
        );
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.state == RctxState::Free {
                *slot = Rctx::INIT;
                slot.state = initial;
                return Ok(Handle(i as u8));
            }
        }
        warn!("request context pool exhausted");
        Err(Error::OutOfMemory)
    }

    /// Returns a context to the pool.
    ///
    /// Legal from any allocated state so that failed submissions can release
    /// their context.  Freeing an already-free context panics.
    pub fn free(&mut self, handle: Handle) {
        let slot = &mut self.slots[usize::from(handle.0)];
        if slot.state == RctxState::Free {
            panic!("double free of request context {}", handle.0);
        }
        *slot = Rctx::INIT;
    }

    /// Moves a context along one edge of the ownership diagram.
    ///
    /// Panics on any transition that is not part of the diagram.
    pub fn set_state(&mut self, handle: Handle, new: RctxState) {
        let slot = &mut self.slots[usize::from(handle.0)];
        if !transition_allowed(slot.state, new) {
            panic!(
                "illegal request context transition {:?} -> {:?}",
                slot.state, new
            );
        }
        if new == RctxState::Free {
            *slot = Rctx::INIT;
        } else {
            slot.state = new;
        }
    }

    /// Finds the first context in state `old` and moves it to `new`.
    ///
    /// This is the rendezvous by which subsystems pick up work: the main loop
    /// claims composed messages with
    /// `find_get(UsbTxPending, UsbTxBusy)`-style calls without holding any
    /// reference across the hand-over.
    pub fn find_get(&mut self, old: RctxState, new: RctxState) -> Option<Handle> {
        assert!(
            transition_allowed(old, new),
            "illegal request context transition {:?} -> {:?}",
            old,
            new
        );
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.state == old {
                if new == RctxState::Free {
                    *slot = Rctx::INIT;
                } else {
                    slot.state = new;
                }
                return Some(Handle(i as u8));
            }
        }
        None
    }

    /// Finds a context in state `state` that no endpoint has adopted yet
    /// (owner link still zero).
    ///
    /// The transport uses this to pick up messages the protocol engine
    /// composed; endpoint address zero is the control endpoint and never
    /// carries buffered traffic.
    pub fn find_unassigned(&self, state: RctxState) -> Option<Handle> {
        self.slots
            .iter()
            .position(|s| s.state == state && s.ep == 0)
            .map(|i| Handle(i as u8))
    }

    /// Shared access to a context.
    pub fn get(&self, handle: Handle) -> &Rctx {
        &self.slots[usize::from(handle.0)]
    }

    /// Exclusive access to a context's buffer and metadata.
    pub fn get_mut(&mut self, handle: Handle) -> &mut Rctx {
        &mut self.slots[usize::from(handle.0)]
    }

    /// Number of free slots.
    pub fn free_slots(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == RctxState::Free)
            .count()
    }

    /// Occupancy map for diagnostics: one `X` (in use) or `_` (free) per
    /// slot.
    pub fn report(&self) -> heapless::String<NUM_RCTX> {
        let mut map = heapless::String::new();
        for slot in &self.slots {
            let c = if slot.state == RctxState::Free {
                '_'
            } else {
                'X'
            };
            // cannot fail, capacity equals slot count
            let _ = map.push(c);
        }
        map
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}
