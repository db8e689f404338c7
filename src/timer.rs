// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! Waiting-time / ETU timer boundary.

/// Default T=0 waiting time in etus (WI = 10, 960 * WI * D with D = 1).
pub const DEFAULT_WTIME: u16 = 9600;

/// Elementary-time-unit countdown timer, implemented by the board layer.
///
/// The timer wheel calls back into
/// [`CardEmulator::wtime_half_expired`](crate::CardEmulator::wtime_half_expired)
/// and [`CardEmulator::wtime_expired`](crate::CardEmulator::wtime_expired)
/// on the corresponding events.
pub trait EtuTimer {
    /// Programs the waiting time in etus and restarts the countdown.
    fn set_wtime(&mut self, wtime: u16);

    /// Reprograms the length of one etu in timer ticks, used after the F/D
    /// ratio changed.
    fn set_etu(&mut self, ticks: u16);
}
