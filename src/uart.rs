// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! Card-side UART boundary.
//!
//! The hardware driver is an external collaborator reached through
//! [`CardUart`]; the receive interrupt feeds bytes into the core through
//! [`UartRx`].

use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

use crate::error::Error;
use crate::ringbuffer::RingBuffer;

bitflags! {
    /// Receive status bits latched by the UART for one character.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UartStatus: u32 {
        /// Receiver overrun.
        const OVERRUN = 1 << 0;
        /// Framing error.
        const FRAMING = 1 << 1;
        /// Parity error.
        const PARITY = 1 << 2;
        /// Receiver timeout.
        const TIMEOUT = 1 << 3;
        /// The reader signalled NACK on a transmitted character.
        const NACK = 1 << 4;
        /// Reserved error bit reported by some UART revisions.
        const RESERVED = 1 << 5;
    }
}

/// Direction the card UART is driven in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxTx {
    /// Receiver and transmitter disabled.
    Off,
    /// Receiving from the reader.
    Rx,
    /// Transmitting to the reader.
    Tx,
}

/// Card-side UART driver, implemented by the board layer.
pub trait CardUart {
    /// Reprograms the bit-timing register with a new F/D ratio.
    ///
    /// Implementations must disable the receiver, run the write-protection
    /// unlock sequence if the hardware requires one, write the ratio and
    /// re-enable receiver and timeout-start trigger.  Must be callable from
    /// interrupt context.  On error the previous setting stays in effect;
    /// a ratio is never applied partially.
    fn set_fd_ratio(&mut self, ratio: u16) -> Result<(), Error>;

    /// Queues one byte for transmission to the reader.
    fn tx(&mut self, byte: u8) -> Result<(), Error>;

    /// Switches the UART between receive, transmit and off.
    fn enable(&mut self, mode: RxTx);
}

/// Receive side of the UART interrupt boundary.
///
/// The interrupt handler performs exactly one status+data read per interrupt
/// and passes both here; everything below runs without locks.
pub struct UartRx<const N: usize> {
    ring: RingBuffer<N>,
    errors: AtomicU32,
}

impl<const N: usize> UartRx<N> {
    /// An empty receive path, suitable for a `static`.
    pub const fn new() -> Self {
        UartRx {
            ring: RingBuffer::new(),
            errors: AtomicU32::new(0),
        }
    }

    /// Feeds one received character and its status word.
    ///
    /// A clean character goes into the ring buffer (dropped and counted on
    /// overrun).  A character with any error bit set is dropped from
    /// protocol processing; its status bits are OR'd into a sticky word for
    /// diagnostics.
    pub fn on_irq(&self, status: UartStatus, byte: u8) {
        if status.is_empty() {
            if self.ring.write(byte).is_err() {
                warn!("rx ring overrun, byte {:02x} dropped", byte);
            }
        } else {
            self.errors.fetch_or(status.bits(), Ordering::Relaxed);
            debug!("rx error {:?}, byte {:02x} dropped", status, byte);
        }
    }

    /// The ring buffer the protocol engine consumes.
    pub fn ring(&self) -> &RingBuffer<N> {
        &self.ring
    }

    /// Reads and clears the sticky error word.
    pub fn take_errors(&self) -> UartStatus {
        UartStatus::from_bits_truncate(self.errors.swap(0, Ordering::Relaxed))
    }

    /// True if any error bit has been latched since the last
    /// [`take_errors`](Self::take_errors).
    pub fn has_errors(&self) -> bool {
        self.errors.load(Ordering::Relaxed) != 0
    }
}

impl<const N: usize> Default for UartRx<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> core::fmt::Debug for UartRx<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UartRx")
            .field("ring", &self.ring)
            .field("errors", &self.errors.load(Ordering::Relaxed))
            .finish()
    }
}
