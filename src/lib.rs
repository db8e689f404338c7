// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! Core of an ISO 7816-3 smart card emulator.
//!
//! This crate implements the protocol and transport heart of a card-emulator
//! firmware: it speaks ISO 7816-3 T=0 towards a card reader on one side and
//! a framed message protocol over USB bulk/interrupt endpoints towards a
//! host application on the other.  Board support (pins, clocks, USB
//! descriptors, the polling loop) stays outside and drives the core through
//! small trait boundaries.
//!
//! # Components
//!
//! - [`Pool`]: a fixed pool of request contexts, the only buffer currency in
//!   the system; ownership moves by state tag, never by pointer.
//! - [`RingBuffer`] and [`UartRx`]: the lock-free path from the UART receive
//!   interrupt into protocol processing.
//! - [`fidi`]: ISO 7816-3 Fi/Di tables and F/D ratio computation.
//! - [`CardEmulator`]: the byte-level T=0 state machine (ATR, procedure
//!   bytes, PTS, waiting time).
//! - [`UsbTransport`]: per-endpoint context queues with single-in-flight
//!   refill logic and the bounded inbound command dispatcher.
//! - [`IrqShared`]: the interrupt-masking wrapper the firmware uses to share
//!   all of the above between its main loop and interrupt handlers.
//!
//! # Data flow
//!
//! Bytes received from the reader travel from the UART interrupt through
//! [`UartRx`] into [`CardEmulator::poll_uart`], which composes framed
//! messages into request contexts; [`UsbTransport::collect_outbound`] adopts
//! them and the refill logic turns them into USB writes.  In the other
//! direction, completed USB reads are queued until
//! [`UsbTransport::process`] dispatches them to
//! [`CardEmulator::handle_usb_msg`], whose staged data the UART transmit
//! path drains one byte at a time via [`CardEmulator::get_tx_byte`].
//!
//! All state is volatile and rebuilt from reset defaults on each boot;
//! nothing here allocates.

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    non_ascii_idents,
    trivial_casts,
    unused,
    unused_qualifications,
    clippy::expect_used,
    clippy::unwrap_used
)]
#![deny(unsafe_code)]

#[macro_use]
extern crate delog;
generate_macros!();

mod card;
mod error;
pub mod fidi;
pub mod msg;
mod rctx;
mod ringbuffer;
mod sync;
mod timer;
mod transport;
mod uart;

pub use card::{CardEmulator, CardIo, MAX_ATR_LEN};
pub use error::Error;
pub use rctx::{Handle, Pool, Rctx, RctxState, NUM_RCTX, RCTX_SIZE};
pub use ringbuffer::{RingBuffer, RING_BUFLEN};
pub use sync::IrqShared;
pub use timer::{EtuTimer, DEFAULT_WTIME};
pub use transport::{
    Direction, TransferStatus, UsbDriver, UsbInterface, UsbTransport, MAX_DISPATCH_PER_POLL,
    MAX_ENDPOINTS,
};
pub use uart::{CardUart, RxTx, UartRx, UartStatus};
