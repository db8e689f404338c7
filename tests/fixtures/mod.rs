// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only
#![allow(unused)]

use std::cell::RefCell;
use std::rc::Rc;

use cardem::{CardUart, Error, EtuTimer, RxTx, UsbDriver};

pub const EP_INT: u8 = 0x83;
pub const EP_IN: u8 = 0x82;
pub const EP_OUT: u8 = 0x01;
pub const MPS: usize = 64;

#[derive(Debug, Default)]
pub struct UartState {
    pub ratio: Option<u16>,
    pub txed: Vec<u8>,
    pub mode: Option<RxTx>,
}

/// Records what the engine asks of the card UART.
#[derive(Debug, Default, Clone)]
pub struct FakeUart(pub Rc<RefCell<UartState>>);

impl CardUart for FakeUart {
    fn set_fd_ratio(&mut self, ratio: u16) -> Result<(), Error> {
        self.0.borrow_mut().ratio = Some(ratio);
        Ok(())
    }

    fn tx(&mut self, byte: u8) -> Result<(), Error> {
        self.0.borrow_mut().txed.push(byte);
        Ok(())
    }

    fn enable(&mut self, mode: RxTx) {
        self.0.borrow_mut().mode = Some(mode);
    }
}

#[derive(Debug, Default)]
pub struct TimerState {
    pub wtime: Option<u16>,
    pub etu: Option<u16>,
}

#[derive(Debug, Default, Clone)]
pub struct FakeTimer(pub Rc<RefCell<TimerState>>);

impl EtuTimer for FakeTimer {
    fn set_wtime(&mut self, wtime: u16) {
        self.0.borrow_mut().wtime = Some(wtime);
    }

    fn set_etu(&mut self, ticks: u16) {
        self.0.borrow_mut().etu = Some(ticks);
    }
}

#[derive(Debug, Default)]
pub struct DriverState {
    pub writes: Vec<(u8, Vec<u8>)>,
    pub reads: Vec<(u8, usize)>,
}

/// Records transfer submissions like the device controller would.
#[derive(Debug, Default, Clone)]
pub struct FakeDriver(pub Rc<RefCell<DriverState>>);

impl UsbDriver for FakeDriver {
    fn submit_write(&mut self, ep: u8, data: &[u8]) -> Result<(), Error> {
        self.0.borrow_mut().writes.push((ep, data.to_vec()));
        Ok(())
    }

    fn submit_read(&mut self, ep: u8, len: usize) -> Result<(), Error> {
        self.0.borrow_mut().reads.push((ep, len));
        Ok(())
    }

    fn max_packet_size(&self, _ep: u8) -> usize {
        MPS
    }
}
