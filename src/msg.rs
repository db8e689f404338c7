// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! Framed message protocol spoken over the USB bulk endpoints.
//!
//! Every message starts with a 4-byte header; the payload layout depends on
//! the message type.  Integers are little-endian on the wire.

use bitflags::bitflags;

use crate::error::Error;

/// Size of the common message header on the wire.
pub const MSG_HDR_LEN: usize = 4;

/// Closed enumeration of message types.
///
/// `Dt*` messages travel host to device, `Do*` messages device to host.
/// Unknown discriminants are rejected at the dispatch layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    /// Host hands the card data to transmit on the UART.
    DtTxData = 0,
    /// Host replaces the ATR sent on the next card reset.
    DtSetAtr = 1,
    /// Host asks for a `DoStatus` report.
    DtGetStatus = 2,
    /// Card-side data received from the reader.
    DoRxData = 3,
    /// Emulator status report.
    DoStatus = 4,
    /// A PTS negotiation took place.
    DoPts = 5,
}

impl TryFrom<u8> for MsgType {
    type Error = Error;

    fn try_from(val: u8) -> Result<Self, Error> {
        match val {
            0 => Ok(MsgType::DtTxData),
            1 => Ok(MsgType::DtSetAtr),
            2 => Ok(MsgType::DtGetStatus),
            3 => Ok(MsgType::DoRxData),
            4 => Ok(MsgType::DoStatus),
            5 => Ok(MsgType::DoPts),
            _ => Err(Error::UnknownMessageType),
        }
    }
}

bitflags! {
    /// Flags carried by `DtTxData` and `DoRxData` payloads.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DataFlags: u8 {
        /// Last chunk of the current TPDU.
        const FINAL = 1 << 0;
        /// The payload is a 5-byte T=0 TPDU header.
        const TPDU_HDR = 1 << 1;
        /// Procedure byte included; the card transmits afterwards.
        const PB_AND_TX = 1 << 2;
        /// Procedure byte included; the card keeps receiving afterwards.
        const PB_AND_RX = 1 << 3;
    }
}

bitflags! {
    /// Emulator condition bits reported in `DoStatus`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusFlags: u32 {
        /// Card supply voltage is applied.
        const VCC_PRESENT = 1 << 0;
        /// Card clock is running.
        const CLK_ACTIVE = 1 << 1;
        /// The reader holds the card in reset.
        const RESET_ACTIVE = 1 << 2;
        /// The waiting time elapsed without a byte.
        const WTIME_EXPIRED = 1 << 3;
        /// A UART reception error (framing/parity/overrun/timeout) occurred.
        const UART_ERROR = 1 << 4;
        /// The receive ring buffer dropped at least one byte.
        const RING_OVERRUN = 1 << 5;
    }
}

/// Common message header: `{msg_type, seq_nr, data_len}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHdr {
    /// Message type discriminant.
    pub msg_type: MsgType,
    /// Per-device monotonically increasing sequence number.
    pub seq_nr: u8,
    /// Payload length in bytes, not counting the header.
    pub data_len: u16,
}

impl MsgHdr {
    /// Serializes the header into the start of `buf`.
    pub fn write_to(&self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.len() < MSG_HDR_LEN {
            return Err(Error::MalformedMessage);
        }
        buf[0] = self.msg_type as u8;
        buf[1] = self.seq_nr;
        buf[2..4].copy_from_slice(&self.data_len.to_le_bytes());
        Ok(MSG_HDR_LEN)
    }

    /// Parses a header and returns it with the payload it frames.
    ///
    /// Bytes beyond `data_len` (bus padding) are ignored.
    pub fn parse(buf: &[u8]) -> Result<(MsgHdr, &[u8]), Error> {
        if buf.len() < MSG_HDR_LEN {
            return Err(Error::MalformedMessage);
        }
        let msg_type = MsgType::try_from(buf[0])?;
        let data_len = u16::from_le_bytes([buf[2], buf[3]]);
        let payload = buf[MSG_HDR_LEN..]
            .get(..usize::from(data_len))
            .ok_or(Error::MalformedMessage)?;
        Ok((
            MsgHdr {
                msg_type,
                seq_nr: buf[1],
                data_len,
            },
            payload,
        ))
    }
}

/// Body of `DtTxData` and `DoRxData`: one flags byte, then card data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataBody<'a> {
    /// Procedure-byte disposition of this chunk.
    pub flags: DataFlags,
    /// Raw card data.
    pub data: &'a [u8],
}

impl<'a> DataBody<'a> {
    /// Parses a data-message payload.  Undefined flag bits are rejected.
    pub fn parse(payload: &'a [u8]) -> Result<Self, Error> {
        let (&flags, data) = payload.split_first().ok_or(Error::MalformedMessage)?;
        let flags = DataFlags::from_bits(flags).ok_or(Error::MalformedMessage)?;
        Ok(DataBody { flags, data })
    }

    /// Serialized body length.
    pub fn len(&self) -> usize {
        1 + self.data.len()
    }

    /// True for an empty payload (flags only).
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Serializes the body into the start of `buf`.
    pub fn write_to(&self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.len() < self.len() {
            return Err(Error::MalformedMessage);
        }
        buf[0] = self.flags.bits();
        buf[1..self.len()].copy_from_slice(self.data);
        Ok(self.len())
    }
}

/// Body of `DoStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusBody {
    /// Condition bits.
    pub flags: StatusFlags,
    /// Fi/Di index byte currently programmed.
    pub fidi: u8,
    /// Waiting time in etus.
    pub wtime: u16,
}

impl StatusBody {
    /// Serialized body length.
    pub const LEN: usize = 7;

    /// Serializes the body into the start of `buf`.
    pub fn write_to(&self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.len() < Self::LEN {
            return Err(Error::MalformedMessage);
        }
        buf[0..4].copy_from_slice(&self.flags.bits().to_le_bytes());
        buf[4] = self.fidi;
        buf[5..7].copy_from_slice(&self.wtime.to_le_bytes());
        Ok(Self::LEN)
    }

    /// Parses a status body.
    pub fn parse(payload: &[u8]) -> Result<Self, Error> {
        if payload.len() < Self::LEN {
            return Err(Error::MalformedMessage);
        }
        let flags = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        Ok(StatusBody {
            flags: StatusFlags::from_bits_truncate(flags),
            fidi: payload[4],
            wtime: u16::from_le_bytes([payload[5], payload[6]]),
        })
    }
}

/// Body of `DoPts`: the request seen from the reader and the response sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtsBody {
    /// Number of valid bytes in `req` and `resp`.
    pub pts_len: u8,
    /// PTS request bytes (PTSS, PTS0, optional PTS1..PTS3, PCK).
    pub req: [u8; 6],
    /// PTS response bytes.
    pub resp: [u8; 6],
}

impl PtsBody {
    /// Serialized body length.
    pub const LEN: usize = 13;

    /// Serializes the body into the start of `buf`.
    pub fn write_to(&self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.len() < Self::LEN {
            return Err(Error::MalformedMessage);
        }
        buf[0] = self.pts_len;
        buf[1..7].copy_from_slice(&self.req);
        buf[7..13].copy_from_slice(&self.resp);
        Ok(Self::LEN)
    }
}
