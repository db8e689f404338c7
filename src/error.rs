// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

/// Non-fatal error conditions of the emulation core.
///
/// Invariant violations (double-free, illegal context state transitions) are
/// not represented here; they panic, see [`crate::rctx`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The request-context pool has no free slot, or the requested size
    /// exceeds the fixed block size.
    OutOfMemory,
    /// A byte arrived while the ring buffer was full and was dropped.
    BufferOverrun,
    /// The Fi/Di combination is reserved or yields a ratio outside the
    /// representable timing-register range.
    UnsupportedRatio,
    /// A framed message was too short or carried inconsistent lengths.
    MalformedMessage,
    /// A framed message carried a type outside the known enumeration.
    UnknownMessageType,
    /// The endpoint still has a physical transfer in flight.
    TransferBusy,
    /// The driver rejected a transfer submission.
    TransferFailed,
    /// The endpoint address is not registered with the transport.
    NoSuchEndpoint,
    /// The per-endpoint queue is at capacity.
    QueueFull,
    /// The supplied ATR does not fit the ISO 7816-3 maximum of 33 bytes.
    AtrTooLong,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let to_write = match self {
            Error::OutOfMemory => "Request context pool exhausted",
            Error::BufferOverrun => "Ring buffer full, byte dropped",
            Error::UnsupportedRatio => "Unsupported Fi/Di ratio",
            Error::MalformedMessage => "Malformed message frame",
            Error::UnknownMessageType => "Unknown message type",
            Error::TransferBusy => "Transfer already in flight",
            Error::TransferFailed => "Transfer submission failed",
            Error::NoSuchEndpoint => "Endpoint not registered",
            Error::QueueFull => "Endpoint queue full",
            Error::AtrTooLong => "ATR exceeds 33 bytes",
        };
        f.write_str(to_write)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
