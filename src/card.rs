// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! ISO 7816-3 card-side protocol engine.
//!
//! The engine is driven entirely by byte-at-a-time events: card I/O signal
//! changes ([`CardEmulator::io_statechg`]), characters received from the
//! reader ([`CardEmulator::process_rx_byte`]) and the transmitter asking for
//! the next character ([`CardEmulator::get_tx_byte`]).  Data crosses to the
//! host as framed messages composed into pool-allocated request contexts;
//! data from the host arrives as dispatched messages
//! ([`CardEmulator::handle_usb_msg`]).

use heapless::Vec;
use hex_literal::hex;

use crate::error::Error;
use crate::fidi;
use crate::msg::{DataBody, DataFlags, MsgHdr, MsgType, PtsBody, StatusBody, StatusFlags, MSG_HDR_LEN};
use crate::rctx::{Handle, Pool, RctxState, RCTX_SIZE};
use crate::timer::{EtuTimer, DEFAULT_WTIME};
use crate::uart::{CardUart, RxTx, UartRx};

/// ISO 7816-3 maximum ATR length.
pub const MAX_ATR_LEN: usize = 33;

/// ATR returned until the host configures one: T=0, two historical bytes.
const DEFAULT_ATR: [u8; 4] = hex!("3b 02 14 50");

/// Fi/Di index byte selecting the mandatory default parameters (372 / 1).
const DEFAULT_FIDI: u8 = 0x11;

/// T=0 NULL procedure byte, requests more waiting time from the reader.
const NULL_BYTE: u8 = 0x60;

/// Initial character of a PTS request.
const PTSS: u8 = 0xff;

/// T=0 TPDU header length (CLA INS P1 P2 P3).
const TPDU_HDR_LEN: usize = 5;

/// Largest host payload queued for UART transmission: procedure byte,
/// 256 data bytes, status word.
const MAX_TX_STAGING: usize = 259;

/// Card I/O signals observed by the GPIO layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardIo {
    /// Card supply voltage.
    Vcc,
    /// Card clock.
    Clk,
    /// Reset line.
    Rst,
}

/// Top-level protocol state, advanced by I/O signal changes and byte events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Iso7816State {
    /// No supply voltage.
    WaitPower,
    /// Powered, clock not yet active.
    WaitClock,
    /// Powered and clocked, reset not yet asserted.
    WaitReset,
    /// Reader holds the card in reset.
    InReset,
    /// Reset released, ATR transmission in progress.
    InAtr,
    /// Idle, waiting for the first header byte (or PTSS).
    WaitTpdu,
    /// PTS negotiation in progress.
    InPts,
    /// TPDU exchange in progress, see [`TpduState`].
    InTpdu,
}

/// Sub-state of a TPDU exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TpduState {
    /// No exchange in progress.
    Idle,
    /// Collecting the 5-byte header.
    Header,
    /// Header forwarded, waiting for the host's procedure-byte decision.
    WaitPb,
    /// Receiving command data from the reader.
    Rx,
    /// Transmitting host-supplied data to the reader.
    Tx,
}

/// The card-emulation protocol engine.
///
/// Owns its hardware collaborators the way the rest of the crate owns
/// nothing: the UART and timer are reached through traits so the engine runs
/// unmodified on hardware and in tests.
pub struct CardEmulator<U: CardUart, T: EtuTimer> {
    uart: U,
    timer: T,

    state: Iso7816State,
    vcc: bool,
    clk: bool,
    rst: bool,

    atr: Vec<u8, MAX_ATR_LEN>,
    atr_idx: usize,

    fidi: u8,
    wtime: u16,

    tpdu: TpduState,
    hdr: [u8; TPDU_HDR_LEN],
    hdr_len: usize,

    /// Context collecting reader data during the Rx phase.
    rx_ctx: Option<Handle>,
    rx_count: usize,
    rx_expected: usize,

    /// Host-supplied bytes draining towards the reader.
    tx_buf: Vec<u8, MAX_TX_STAGING>,
    tx_idx: usize,
    tx_flags: DataFlags,

    pts_req: Vec<u8, 6>,
    pts_expected: usize,
    pts_resp_idx: usize,

    seq: u8,
    flags: StatusFlags,
}

impl<U: CardUart, T: EtuTimer> CardEmulator<U, T> {
    /// Creates an engine in the powered-off state.
    pub fn new(uart: U, timer: T) -> Self {
        let mut atr = Vec::new();
        // cannot fail, the default ATR is shorter than the buffer
        let _ = atr.extend_from_slice(&DEFAULT_ATR);
        Self {
            uart,
            timer,
            state: Iso7816State::WaitPower,
            vcc: false,
            clk: false,
            rst: false,
            atr,
            atr_idx: 0,
            fidi: DEFAULT_FIDI,
            wtime: DEFAULT_WTIME,
            tpdu: TpduState::Idle,
            hdr: [0; TPDU_HDR_LEN],
            hdr_len: 0,
            rx_ctx: None,
            rx_count: 0,
            rx_expected: 0,
            tx_buf: Vec::new(),
            tx_idx: 0,
            tx_flags: DataFlags::empty(),
            pts_req: Vec::new(),
            pts_expected: 0,
            pts_resp_idx: 0,
            seq: 0,
            flags: StatusFlags::empty(),
        }
    }

    /// Replaces the ATR replayed on the next card reset.
    pub fn set_atr(&mut self, atr: &[u8]) -> Result<(), Error> {
        if atr.is_empty() {
            return Err(Error::MalformedMessage);
        }
        self.atr = Vec::from_slice(atr).map_err(|_| Error::AtrTooLong)?;
        Ok(())
    }

    /// A card I/O signal changed level.
    ///
    /// RST going active forces the engine back into the reset state from any
    /// powered state; VCC loss resets everything to power-on defaults.
    pub fn io_statechg(&mut self, pool: &mut Pool, io: CardIo, active: bool) {
        trace!("io_statechg {:?} -> {}", io, active);
        match io {
            CardIo::Vcc => {
                self.vcc = active;
                if active {
                    if self.state == Iso7816State::WaitPower {
                        self.state = Iso7816State::WaitClock;
                    }
                } else {
                    self.reset_protocol(pool);
                    self.state = Iso7816State::WaitPower;
                    self.uart.enable(RxTx::Off);
                }
            }
            CardIo::Clk => {
                self.clk = active;
                if active {
                    if self.state == Iso7816State::WaitClock {
                        self.state = Iso7816State::WaitReset;
                    }
                } else if self.vcc && self.state != Iso7816State::WaitPower {
                    self.reset_protocol(pool);
                    self.state = Iso7816State::WaitClock;
                }
            }
            CardIo::Rst => {
                self.rst = active;
                if active {
                    if self.vcc && self.clk {
                        self.reset_protocol(pool);
                        self.state = Iso7816State::InReset;
                    }
                } else if self.state == Iso7816State::InReset {
                    // released from reset: replay the ATR
                    debug!("reset released, starting ATR");
                    self.atr_idx = 0;
                    self.state = Iso7816State::InAtr;
                    self.uart.enable(RxTx::Tx);
                    self.timer.set_wtime(self.wtime);
                }
            }
        }
    }

    /// Clears all per-session protocol state and reapplies default timing.
    fn reset_protocol(&mut self, pool: &mut Pool) {
        if let Some(h) = self.rx_ctx.take() {
            pool.free(h);
        }
        self.atr_idx = 0;
        self.tpdu = TpduState::Idle;
        self.hdr_len = 0;
        self.rx_count = 0;
        self.rx_expected = 0;
        self.tx_buf.clear();
        self.tx_idx = 0;
        self.tx_flags = DataFlags::empty();
        self.pts_req.clear();
        self.pts_expected = 0;
        self.pts_resp_idx = 0;
        self.wtime = DEFAULT_WTIME;
        self.update_fidi(DEFAULT_FIDI);
        self.timer.set_wtime(self.wtime);
    }

    /// Drains the receive ring buffer into the engine and folds UART
    /// diagnostics into the status flags.
    pub fn poll_uart<const N: usize>(&mut self, pool: &mut Pool, rx: &UartRx<N>) {
        if rx.has_errors() {
            let errors = rx.take_errors();
            debug!("uart errors latched: {:?}", errors);
            self.flags |= StatusFlags::UART_ERROR;
        }
        if rx.ring().overruns() > 0 {
            self.flags |= StatusFlags::RING_OVERRUN;
        }
        while let Some(byte) = rx.ring().read() {
            self.process_rx_byte(pool, byte);
        }
    }

    /// Processes a single byte received from the reader.
    pub fn process_rx_byte(&mut self, pool: &mut Pool, byte: u8) {
        match self.state {
            Iso7816State::WaitTpdu => {
                self.timer.set_wtime(self.wtime);
                if byte == PTSS {
                    self.state = Iso7816State::InPts;
                    self.pts_req.clear();
                    // cannot fail on an empty buffer
                    let _ = self.pts_req.push(byte);
                    self.pts_expected = 0;
                    self.pts_resp_idx = 0;
                } else {
                    self.state = Iso7816State::InTpdu;
                    self.tpdu = TpduState::Header;
                    self.hdr[0] = byte;
                    self.hdr_len = 1;
                }
            }
            Iso7816State::InTpdu => {
                self.timer.set_wtime(self.wtime);
                self.process_tpdu_byte(pool, byte);
            }
            Iso7816State::InPts => {
                self.timer.set_wtime(self.wtime);
                self.process_pts_byte(pool, byte);
            }
            _ => {
                // reception is not expected before the ATR went out
                debug!("byte {:02x} ignored in state {:?}", byte, self.state);
            }
        }
    }

    fn process_tpdu_byte(&mut self, pool: &mut Pool, byte: u8) {
        match self.tpdu {
            TpduState::Header => {
                self.hdr[self.hdr_len] = byte;
                self.hdr_len += 1;
                if self.hdr_len == TPDU_HDR_LEN {
                    debug!("TPDU header complete: {:02x?}", self.hdr);
                    let hdr = self.hdr;
                    match self.compose_data_msg(pool, DataFlags::TPDU_HDR, &hdr) {
                        Ok(_) => self.tpdu = TpduState::WaitPb,
                        Err(_) => {
                            // pool exhausted: drop the TPDU, the reader will
                            // retry after its waiting time
                            warn!("no context for TPDU header, dropping");
                            self.tpdu = TpduState::Idle;
                            self.state = Iso7816State::WaitTpdu;
                        }
                    }
                }
            }
            TpduState::Rx => self.process_rx_data_byte(pool, byte),
            TpduState::WaitPb | TpduState::Tx => {
                debug!("unexpected byte {:02x} in {:?}", byte, self.tpdu);
            }
            TpduState::Idle => {
                debug!("unexpected byte {:02x} outside TPDU", byte);
            }
        }
    }

    /// One byte of the data phase of an outgoing (reader to card) transfer.
    fn process_rx_data_byte(&mut self, pool: &mut Pool, byte: u8) {
        let handle = match self.rx_ctx {
            Some(h) => h,
            None => match pool.allocate(RCTX_SIZE, RctxState::UartTxPending) {
                Ok(h) => {
                    let remaining = self.rx_expected.saturating_sub(self.rx_count);
                    let rctx = pool.get_mut(h);
                    // reserve room for the message header and flags byte
                    rctx.size = (MSG_HDR_LEN + 1) as u16;
                    rctx.tot_len =
                        core::cmp::min(MSG_HDR_LEN + 1 + remaining, RCTX_SIZE) as u16;
                    self.rx_ctx = Some(h);
                    h
                }
                Err(_) => {
                    warn!("no context for data phase, byte {:02x} dropped", byte);
                    return;
                }
            },
        };

        let rctx = pool.get_mut(handle);
        rctx.data[usize::from(rctx.size)] = byte;
        rctx.size += 1;
        let chunk_full = rctx.size >= rctx.tot_len;
        self.rx_count += 1;

        if self.rx_count == self.rx_expected {
            self.flush_rx_ctx(pool, DataFlags::FINAL);
            self.tpdu = TpduState::WaitPb;
        } else if chunk_full {
            self.flush_rx_ctx(pool, DataFlags::empty());
        }
    }

    /// Completes the in-progress receive context and queues it for the host.
    fn flush_rx_ctx(&mut self, pool: &mut Pool, flags: DataFlags) {
        let Some(handle) = self.rx_ctx.take() else {
            return;
        };
        let seq = self.next_seq();
        let rctx = pool.get_mut(handle);
        let data_len = rctx.size - MSG_HDR_LEN as u16;
        let hdr = MsgHdr {
            msg_type: MsgType::DoRxData,
            seq_nr: seq,
            data_len,
        };
        // both writes cannot fail, the layout was reserved at allocation
        let _ = hdr.write_to(&mut rctx.data);
        rctx.data[MSG_HDR_LEN] = flags.bits();
        pool.set_state(handle, RctxState::UsbTxPending);
    }

    fn process_pts_byte(&mut self, pool: &mut Pool, byte: u8) {
        if self.pts_req.push(byte).is_err() {
            warn!("PTS request overflow, discarding");
            self.abort_pts();
            return;
        }
        if self.pts_req.len() == 2 {
            // PTS0 announces which of PTS1..PTS3 follow
            let pts0 = byte;
            self.pts_expected = 3 + (pts0 >> 4 & 0x7).count_ones() as usize;
        }
        if self.pts_expected == 0 || self.pts_req.len() < self.pts_expected {
            return;
        }

        // PCK makes the exclusive-or of the whole request zero
        if self.pts_req.iter().fold(0u8, |acc, b| acc ^ b) != 0 {
            warn!("PTS checksum error: {:02x?}", self.pts_req);
            self.abort_pts();
            return;
        }

        debug!("PTS request accepted: {:02x?}", self.pts_req);
        self.notify_pts(pool);
        // echo the full request back, accepting all parameters
        self.pts_resp_idx = 0;
        self.uart.enable(RxTx::Tx);
    }

    fn abort_pts(&mut self) {
        self.pts_req.clear();
        self.pts_expected = 0;
        self.state = Iso7816State::WaitTpdu;
        self.uart.enable(RxTx::Rx);
    }

    /// Tells the host about a concluded PTS negotiation.
    fn notify_pts(&mut self, pool: &mut Pool) {
        let mut body = PtsBody {
            pts_len: self.pts_req.len() as u8,
            req: [0; 6],
            resp: [0; 6],
        };
        body.req[..self.pts_req.len()].copy_from_slice(&self.pts_req);
        body.resp[..self.pts_req.len()].copy_from_slice(&self.pts_req);

        let seq = self.next_seq();
        let total = MSG_HDR_LEN + PtsBody::LEN;
        match pool.allocate(total, RctxState::UartTxPending) {
            Ok(h) => {
                let rctx = pool.get_mut(h);
                let hdr = MsgHdr {
                    msg_type: MsgType::DoPts,
                    seq_nr: seq,
                    data_len: PtsBody::LEN as u16,
                };
                let _ = hdr.write_to(&mut rctx.data);
                let _ = body.write_to(&mut rctx.data[MSG_HDR_LEN..]);
                rctx.size = total as u16;
                pool.set_state(h, RctxState::UsbTxPending);
            }
            Err(_) => {
                warn!("no context for PTS notification");
            }
        }
    }

    /// Returns the next byte to transmit to the reader, or `None` if the
    /// transmitter has nothing to send.
    pub fn get_tx_byte(&mut self) -> Option<u8> {
        match self.state {
            Iso7816State::InAtr => {
                let byte = *self.atr.get(self.atr_idx)?;
                self.atr_idx += 1;
                if self.atr_idx == self.atr.len() {
                    debug!("ATR complete");
                    self.state = Iso7816State::WaitTpdu;
                    self.uart.enable(RxTx::Rx);
                    self.timer.set_wtime(self.wtime);
                }
                Some(byte)
            }
            Iso7816State::InPts => {
                // the response is the echoed request
                if self.pts_expected == 0 || self.pts_req.len() < self.pts_expected {
                    return None;
                }
                let byte = *self.pts_req.get(self.pts_resp_idx)?;
                self.pts_resp_idx += 1;
                if self.pts_resp_idx == self.pts_req.len() {
                    self.finish_pts();
                }
                Some(byte)
            }
            Iso7816State::WaitTpdu | Iso7816State::InTpdu => {
                if self.tx_idx >= self.tx_buf.len() {
                    return None;
                }
                let byte = self.tx_buf[self.tx_idx];
                self.tx_idx += 1;
                if self.tx_idx == self.tx_buf.len() {
                    self.finish_tx_staging();
                }
                Some(byte)
            }
            _ => None,
        }
    }

    /// Applies the negotiated parameters once the PTS response went out.
    fn finish_pts(&mut self) {
        // PTS1 carries the new Fi/Di byte; without it the defaults stay
        if self.pts_req.len() > 2 && self.pts_req[1] & 0x10 != 0 {
            let fidi = self.pts_req[2];
            self.update_fidi(fidi);
        }
        self.pts_req.clear();
        self.pts_expected = 0;
        self.pts_resp_idx = 0;
        self.state = Iso7816State::WaitTpdu;
        self.uart.enable(RxTx::Rx);
        self.timer.set_wtime(self.wtime);
    }

    /// The staged host data drained completely; act on its disposition.
    fn finish_tx_staging(&mut self) {
        let flags = self.tx_flags;
        self.tx_buf.clear();
        self.tx_idx = 0;
        self.tx_flags = DataFlags::empty();

        if flags.contains(DataFlags::FINAL) {
            debug!("TPDU complete");
            self.tpdu = TpduState::Idle;
            self.state = Iso7816State::WaitTpdu;
            self.uart.enable(RxTx::Rx);
            self.timer.set_wtime(self.wtime);
        } else if flags.contains(DataFlags::PB_AND_RX) {
            // procedure byte sent, now receive the command data
            self.tpdu = TpduState::Rx;
            self.rx_count = 0;
            self.rx_expected = usize::from(self.hdr[4]);
            self.uart.enable(RxTx::Rx);
            self.timer.set_wtime(self.wtime);
        } else {
            // PB_AND_TX or no disposition: wait for more host data
            self.tpdu = TpduState::Tx;
        }
    }

    /// Dispatches one inbound host message and releases its context.
    pub fn handle_usb_msg(&mut self, pool: &mut Pool, handle: Handle) -> Result<(), Error> {
        let result = self.dispatch_usb_msg(pool, handle);
        pool.set_state(handle, RctxState::Free);
        if let Err(_err) = result {
            warn!("inbound message rejected: {:?}", _err);
        }
        result
    }

    fn dispatch_usb_msg(&mut self, pool: &mut Pool, handle: Handle) -> Result<(), Error> {
        let rctx = pool.get(handle);
        let (hdr, payload) = MsgHdr::parse(rctx.payload())?;
        trace!("inbound {:?}, {} bytes", hdr.msg_type, hdr.data_len);
        match hdr.msg_type {
            MsgType::DtTxData => {
                let body = DataBody::parse(payload)?;
                self.stage_tx_data(body)
            }
            MsgType::DtSetAtr => {
                let atr: Vec<u8, MAX_ATR_LEN> =
                    Vec::from_slice(payload).map_err(|_| Error::AtrTooLong)?;
                self.set_atr(&atr)
            }
            MsgType::DtGetStatus => self.compose_status(pool),
            // device-to-host types are not valid from the host
            MsgType::DoRxData | MsgType::DoStatus | MsgType::DoPts => {
                Err(Error::UnknownMessageType)
            }
        }
    }

    /// Queues host data for transmission to the reader.
    fn stage_tx_data(&mut self, body: DataBody<'_>) -> Result<(), Error> {
        if self.tx_idx < self.tx_buf.len() {
            // previous payload still draining; the host must wait for it
            warn!("tx data while {} bytes pending, dropped", self.tx_buf.len() - self.tx_idx);
            return Err(Error::TransferBusy);
        }
        self.tx_buf = Vec::from_slice(body.data).map_err(|_| Error::MalformedMessage)?;
        self.tx_idx = 0;
        self.tx_flags = body.flags;
        if self.state == Iso7816State::InTpdu {
            self.tpdu = TpduState::Tx;
        }
        if self.tx_buf.is_empty() {
            // flags-only message, apply the disposition immediately
            self.finish_tx_staging();
        } else {
            self.uart.enable(RxTx::Tx);
        }
        Ok(())
    }

    /// Composes a `DoStatus` report for the host.
    fn compose_status(&mut self, pool: &mut Pool) -> Result<(), Error> {
        let body = StatusBody {
            flags: self.status_flags(),
            fidi: self.fidi,
            wtime: self.wtime,
        };
        self.flags = StatusFlags::empty();

        let seq = self.next_seq();
        let total = MSG_HDR_LEN + StatusBody::LEN;
        let h = pool.allocate(total, RctxState::UartTxPending)?;
        let rctx = pool.get_mut(h);
        let hdr = MsgHdr {
            msg_type: MsgType::DoStatus,
            seq_nr: seq,
            data_len: StatusBody::LEN as u16,
        };
        let _ = hdr.write_to(&mut rctx.data);
        let _ = body.write_to(&mut rctx.data[MSG_HDR_LEN..]);
        rctx.size = total as u16;
        pool.set_state(h, RctxState::UsbTxPending);
        Ok(())
    }

    fn status_flags(&self) -> StatusFlags {
        let mut flags = self.flags;
        flags.set(StatusFlags::VCC_PRESENT, self.vcc);
        flags.set(StatusFlags::CLK_ACTIVE, self.clk);
        flags.set(StatusFlags::RESET_ACTIVE, self.rst);
        flags
    }

    /// Decodes a combined Fi/Di byte and reprograms UART and ETU timer.
    ///
    /// An unsupported ratio leaves the previous timing in effect.
    pub fn update_fidi(&mut self, fidi_byte: u8) {
        let (f, d) = fidi::split_fidi(fidi_byte);
        match fidi::compute_fd_ratio(f, d) {
            Ok(ratio) => match self.uart.set_fd_ratio(ratio) {
                Ok(()) => {
                    debug!("Fi/Di {:02x} applied, ratio {}", fidi_byte, ratio);
                    self.fidi = fidi_byte;
                    self.timer.set_etu(ratio);
                }
                Err(_) => {
                    warn!("uart rejected F/D ratio {}", ratio);
                }
            },
            Err(_) => {
                warn!("unsupported Fi({})/Di({}), timing unchanged", f, d);
            }
        }
    }

    /// Programs a new waiting time in etus.
    pub fn set_wtime(&mut self, wtime: u16) {
        self.wtime = wtime;
        self.timer.set_wtime(wtime);
    }

    /// Half the waiting time elapsed without a byte.
    ///
    /// If the card owes the reader a character but is blocked on the host,
    /// transmit a NULL procedure byte as a waiting-time extension and
    /// restart the countdown.
    pub fn wtime_half_expired(&mut self) {
        let blocked_on_host = self.state == Iso7816State::InTpdu
            && matches!(self.tpdu, TpduState::WaitPb | TpduState::Tx)
            && self.tx_idx >= self.tx_buf.len();
        if blocked_on_host {
            debug!("waiting time extension");
            self.uart.enable(RxTx::Tx);
            if self.uart.tx(NULL_BYTE).is_err() {
                warn!("failed to transmit NULL byte");
            }
            self.timer.set_wtime(self.wtime);
        }
    }

    /// The full waiting time elapsed without a byte.
    pub fn wtime_expired(&mut self) {
        debug!("waiting time expired in {:?}", self.state);
        self.flags |= StatusFlags::WTIME_EXPIRED;
    }

    fn next_seq(&mut self) -> u8 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        seq
    }

    /// Composes a `DoRxData` message from `data` and queues it for the host.
    fn compose_data_msg(
        &mut self,
        pool: &mut Pool,
        flags: DataFlags,
        data: &[u8],
    ) -> Result<Handle, Error> {
        let body = DataBody { flags, data };
        let total = MSG_HDR_LEN + body.len();
        let seq = self.next_seq();
        let h = pool.allocate(total, RctxState::UartTxPending)?;
        let rctx = pool.get_mut(h);
        let hdr = MsgHdr {
            msg_type: MsgType::DoRxData,
            seq_nr: seq,
            data_len: body.len() as u16,
        };
        let _ = hdr.write_to(&mut rctx.data);
        let _ = body.write_to(&mut rctx.data[MSG_HDR_LEN..]);
        rctx.size = total as u16;
        pool.set_state(h, RctxState::UsbTxPending);
        Ok(h)
    }
}

impl<U: CardUart, T: EtuTimer> core::fmt::Debug for CardEmulator<U, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CardEmulator")
            .field("state", &self.state)
            .field("tpdu", &self.tpdu)
            .field("fidi", &self.fidi)
            .field("wtime", &self.wtime)
            .finish()
    }
}
