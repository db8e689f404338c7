// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! Single-producer/single-consumer byte ring.
//!
//! Decouples the UART receive interrupt (producer) from protocol processing
//! in the main loop (consumer).  Index updates use acquire/release atomics,
//! so no critical section is needed as long as exactly one context writes
//! and exactly one context reads.

use core::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};

use crate::error::Error;

/// Default ring capacity in bytes.
pub const RING_BUFLEN: usize = 1024;

/// Fixed-capacity circular byte queue.
///
/// `N` must be a power of two.  The read and write indices run free and are
/// reduced modulo `N` on access, which keeps "full" (`wr - rd == N`) and
/// "empty" (`wr == rd`) distinguishable.
pub struct RingBuffer<const N: usize> {
    buf: [AtomicU8; N],
    ird: AtomicUsize,
    iwr: AtomicUsize,
    overruns: AtomicU32,
}

impl<const N: usize> RingBuffer<N> {
    const CAPACITY_IS_POWER_OF_TWO: () = assert!(N.is_power_of_two());

    /// An empty ring, suitable for a `static`.
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let _ = Self::CAPACITY_IS_POWER_OF_TWO;
        const ZERO: AtomicU8 = AtomicU8::new(0);
        RingBuffer {
            buf: [ZERO; N],
            ird: AtomicUsize::new(0),
            iwr: AtomicUsize::new(0),
            overruns: AtomicU32::new(0),
        }
    }

    /// Appends a byte.  Producer side only.
    ///
    /// A write to a full ring drops the byte, counts an overrun and reports
    /// [`Error::BufferOverrun`]; it never overwrites queued data.
    pub fn write(&self, item: u8) -> Result<(), Error> {
        let wr = self.iwr.load(Ordering::Relaxed);
        let rd = self.ird.load(Ordering::Acquire);
        if wr.wrapping_sub(rd) >= N {
            self.overruns.fetch_add(1, Ordering::Relaxed);
            return Err(Error::BufferOverrun);
        }
        self.buf[wr & (N - 1)].store(item, Ordering::Relaxed);
        self.iwr.store(wr.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Removes and returns the oldest byte, or `None` when empty.  Consumer
    /// side only.
    pub fn read(&self) -> Option<u8> {
        let rd = self.ird.load(Ordering::Relaxed);
        let wr = self.iwr.load(Ordering::Acquire);
        if rd == wr {
            return None;
        }
        let item = self.buf[rd & (N - 1)].load(Ordering::Relaxed);
        self.ird.store(rd.wrapping_add(1), Ordering::Release);
        Some(item)
    }

    /// Returns the oldest byte without consuming it, or `None` when empty.
    /// Consumer side only.
    pub fn peek(&self) -> Option<u8> {
        let rd = self.ird.load(Ordering::Relaxed);
        let wr = self.iwr.load(Ordering::Acquire);
        if rd == wr {
            return None;
        }
        Some(self.buf[rd & (N - 1)].load(Ordering::Relaxed))
    }

    /// True if no byte is queued.
    pub fn is_empty(&self) -> bool {
        self.ird.load(Ordering::Acquire) == self.iwr.load(Ordering::Acquire)
    }

    /// True if a further [`write`](Self::write) would be dropped.
    pub fn is_full(&self) -> bool {
        self.iwr
            .load(Ordering::Acquire)
            .wrapping_sub(self.ird.load(Ordering::Acquire))
            >= N
    }

    /// Number of queued bytes.
    pub fn len(&self) -> usize {
        self.iwr
            .load(Ordering::Acquire)
            .wrapping_sub(self.ird.load(Ordering::Acquire))
    }

    /// Clears both indices.
    ///
    /// The producer must be quiesced; reset concurrent with a `write` loses
    /// the raced byte.
    pub fn reset(&self) {
        let wr = self.iwr.load(Ordering::Acquire);
        self.ird.store(wr, Ordering::Release);
    }

    /// Number of bytes dropped because the ring was full.
    pub fn overruns(&self) -> u32 {
        self.overruns.load(Ordering::Relaxed)
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> core::fmt::Debug for RingBuffer<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &N)
            .field("len", &self.len())
            .field("overruns", &self.overruns())
            .finish()
    }
}
