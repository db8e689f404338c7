// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! Sharing the core between the main loop and interrupt handlers.
//!
//! There is a single hardware thread with preemptive interrupt handlers and
//! no scheduler, so mutual exclusion means masking interrupts for the
//! duration of the access.  [`IrqShared`] packages that as a
//! `critical-section` mutex with a closure API, so the mask is released on
//! every exit path.
//!
//! The ring buffer is the one exception: it is lock-free by construction and
//! shared directly, see [`RingBuffer`](crate::RingBuffer).

use core::cell::RefCell;

use critical_section::Mutex;

/// A resource shared between the main loop and interrupt handlers.
///
/// Typically holds the pool, the transport and the protocol engine of one
/// card slot:
///
/// ```ignore
/// static CORE: IrqShared<Option<CardemCore>> = IrqShared::new(None);
///
/// // main loop
/// CORE.with(|core| { /* poll, refill, dispatch */ });
///
/// // USB completion interrupt
/// CORE.with(|core| { /* deliver completion */ });
/// ```
pub struct IrqShared<T> {
    inner: Mutex<RefCell<T>>,
}

impl<T> IrqShared<T> {
    /// Wraps a value, suitable for a `static`.
    pub const fn new(value: T) -> Self {
        IrqShared {
            inner: Mutex::new(RefCell::new(value)),
        }
    }

    /// Runs `f` with exclusive access, interrupts masked.
    ///
    /// Keep the closure to pointer and flag bookkeeping; never spin in it,
    /// since pending completions cannot be delivered while it runs.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs)))
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for IrqShared<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("IrqShared(..)")
    }
}
