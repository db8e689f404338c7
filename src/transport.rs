// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! Buffered USB endpoint transport.
//!
//! Multiplexes logical message queues onto a small number of physical
//! endpoints, keeping exactly one transfer in flight per endpoint at any
//! time.  The device controller driver is an external collaborator reached
//! through [`UsbDriver`]; it reports transfer completion back into
//! [`UsbTransport::complete_write`] / [`UsbTransport::complete_read`].

use heapless::Deque;

use crate::error::Error;
use crate::rctx::{Handle, Pool, RctxState, NUM_RCTX, RCTX_SIZE};

/// Upper bound on inbound contexts dispatched per [`UsbTransport::process`]
/// call, so the surrounding polling loop always returns to watchdog and
/// debug-command servicing.
pub const MAX_DISPATCH_PER_POLL: usize = 10;

/// Number of buffered endpoints the transport can manage.
pub const MAX_ENDPOINTS: usize = 8;

/// Transfer direction of a buffered endpoint, seen from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Device to host.
    In,
    /// Host to device.
    Out,
}

/// Completion status reported by the device controller driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// The transfer finished on the bus.
    Success,
    /// The transfer failed at the hardware level.
    Failed,
}

/// A logical USB interface: the endpoint triple it communicates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UsbInterface {
    /// Interrupt (notification) endpoint, device to host.
    pub ep_int: Option<u8>,
    /// Bulk IN endpoint, device to host.
    pub ep_in: Option<u8>,
    /// Bulk OUT endpoint, host to device.
    pub ep_out: Option<u8>,
}

/// Asynchronous transfer primitives of the USB device controller.
///
/// Both submissions return as soon as the transfer is queued with the
/// hardware; the glue layer delivers the completion to the transport from
/// the controller's interrupt.
pub trait UsbDriver {
    /// Starts a device-to-host transfer of `data`.
    fn submit_write(&mut self, ep: u8, data: &[u8]) -> Result<(), Error>;

    /// Starts a host-to-device transfer of up to `len` bytes.
    fn submit_read(&mut self, ep: u8, len: usize) -> Result<(), Error>;

    /// Maximum packet size of the endpoint.
    fn max_packet_size(&self, ep: u8) -> usize;
}

#[derive(Debug)]
struct BufferedEndpoint {
    ep: u8,
    dir: Direction,
    queue: Deque<Handle, NUM_RCTX>,
    /// Context whose physical transfer is on the wire, if any.
    busy: Option<Handle>,
    /// The in-flight transfer is the zero-length terminator of `busy`.
    zlp_pending: bool,
}

impl BufferedEndpoint {
    fn new(ep: u8, dir: Direction) -> Self {
        BufferedEndpoint {
            ep,
            dir,
            queue: Deque::new(),
            busy: None,
            zlp_pending: false,
        }
    }
}

/// Per-endpoint queues of request contexts plus the refill logic that keeps
/// one transfer in flight per endpoint.
pub struct UsbTransport<D: UsbDriver> {
    driver: D,
    endpoints: heapless::Vec<BufferedEndpoint, MAX_ENDPOINTS>,
}

impl<D: UsbDriver> UsbTransport<D> {
    /// Creates a transport with no endpoints registered.
    pub fn new(driver: D) -> Self {
        UsbTransport {
            driver,
            endpoints: heapless::Vec::new(),
        }
    }

    /// Registers a buffered endpoint.
    ///
    /// Endpoint address zero is the control endpoint and cannot carry
    /// buffered traffic.
    pub fn register(&mut self, ep: u8, dir: Direction) -> Result<(), Error> {
        assert!(ep != 0, "control endpoint cannot be buffered");
        assert!(
            self.ep_index(ep).is_err(),
            "endpoint {:#04x} registered twice",
            ep
        );
        self.endpoints
            .push(BufferedEndpoint::new(ep, dir))
            .map_err(|_| Error::QueueFull)
    }

    /// The wrapped driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Exclusive access to the wrapped driver.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    fn ep_index(&self, ep: u8) -> Result<usize, Error> {
        self.endpoints
            .iter()
            .position(|b| b.ep == ep)
            .ok_or(Error::NoSuchEndpoint)
    }

    /// Appends a composed message to an IN endpoint's queue and records the
    /// endpoint as the context's owner.
    pub fn enqueue(&mut self, pool: &mut Pool, ep: u8, handle: Handle) -> Result<(), Error> {
        let idx = self.ep_index(ep)?;
        pool.get_mut(handle).ep = ep;
        self.endpoints[idx]
            .queue
            .push_back(handle)
            .map_err(|_| Error::QueueFull)
    }

    /// Adopts every composed-but-unowned outbound context into `ep`'s queue.
    ///
    /// Returns the number of contexts adopted.
    pub fn collect_outbound(&mut self, pool: &mut Pool, ep: u8) -> Result<usize, Error> {
        let mut adopted = 0;
        while let Some(handle) = pool.find_unassigned(RctxState::UsbTxPending) {
            self.enqueue(pool, ep, handle)?;
            adopted += 1;
        }
        Ok(adopted)
    }

    /// Submits the next queued context on an IN endpoint, if it is idle.
    ///
    /// Returns `true` if a transfer was started.  A failed submission leaves
    /// the context at the head of the queue for the next poll cycle.
    pub fn refill_to_host(&mut self, pool: &mut Pool, ep: u8) -> Result<bool, Error> {
        let idx = self.ep_index(ep)?;
        if self.endpoints[idx].busy.is_some() {
            return Ok(false);
        }
        let Some(&handle) = self.endpoints[idx].queue.front() else {
            return Ok(false);
        };

        let rctx = pool.get(handle);
        // idx is the transmit offset; nonzero only after a partial transfer
        let pending = &rctx.data[usize::from(rctx.idx)..usize::from(rctx.size)];
        match self.driver.submit_write(ep, pending) {
            Ok(()) => {
                trace!("write of {} bytes started on EP {:#04x}", pending.len(), ep);
                let bep = &mut self.endpoints[idx];
                bep.queue.pop_front();
                bep.busy = Some(handle);
                pool.set_state(handle, RctxState::UsbTxBusy);
                Ok(true)
            }
            Err(_err) => {
                warn!("write submission on EP {:#04x} failed: {:?}", ep, _err);
                Ok(false)
            }
        }
    }

    /// A device-to-host transfer finished.
    ///
    /// A payload whose length is an exact multiple of the endpoint's maximum
    /// packet size is terminated with a zero-length transfer before the
    /// context is released, so the host detects the end of the transfer.
    pub fn complete_write(
        &mut self,
        pool: &mut Pool,
        ep: u8,
        status: TransferStatus,
        transferred: usize,
    ) -> Result<(), Error> {
        let idx = self.ep_index(ep)?;
        let Some(handle) = self.endpoints[idx].busy else {
            warn!("write completion on idle EP {:#04x}", ep);
            return Ok(());
        };
        trace!(
            "write completion on EP {:#04x}: {:?}, {} bytes",
            ep,
            status,
            transferred
        );

        if status == TransferStatus::Success && !self.endpoints[idx].zlp_pending {
            let len = usize::from(pool.get(handle).size);
            let mps = self.driver.max_packet_size(ep);
            if len > 0 && len % mps == 0 {
                match self.driver.submit_write(ep, &[]) {
                    Ok(()) => {
                        self.endpoints[idx].zlp_pending = true;
                        return Ok(());
                    }
                    Err(_err) => {
                        warn!("ZLP submission on EP {:#04x} failed: {:?}", ep, _err);
                    }
                }
            }
        }
        if status == TransferStatus::Failed {
            warn!("write on EP {:#04x} failed", ep);
        }

        let bep = &mut self.endpoints[idx];
        bep.busy = None;
        bep.zlp_pending = false;
        pool.set_state(handle, RctxState::Free);
        Ok(())
    }

    /// Starts a read into a fresh context on an OUT endpoint, if it is idle.
    ///
    /// An exhausted pool or a failed submission silently skips this poll
    /// cycle; a full pool simply delays future reads, which is the sole
    /// back-pressure mechanism towards the host.
    pub fn refill_from_host(&mut self, pool: &mut Pool, ep: u8) -> Result<bool, Error> {
        let idx = self.ep_index(ep)?;
        if self.endpoints[idx].busy.is_some() {
            return Ok(false);
        }
        let Ok(handle) = pool.allocate(RCTX_SIZE, RctxState::UsbRxBusy) else {
            trace!("no context for EP {:#04x} read, retrying next cycle", ep);
            return Ok(false);
        };
        pool.get_mut(handle).ep = ep;

        match self.driver.submit_read(ep, RCTX_SIZE) {
            Ok(()) => {
                self.endpoints[idx].busy = Some(handle);
                Ok(true)
            }
            Err(_err) => {
                warn!("read submission on EP {:#04x} failed: {:?}", ep, _err);
                pool.free(handle);
                Ok(false)
            }
        }
    }

    /// A host-to-device transfer finished; `data` is the received payload.
    pub fn complete_read(
        &mut self,
        pool: &mut Pool,
        ep: u8,
        status: TransferStatus,
        data: &[u8],
    ) -> Result<(), Error> {
        let idx = self.ep_index(ep)?;
        let Some(handle) = self.endpoints[idx].busy.take() else {
            warn!("read completion on idle EP {:#04x}", ep);
            return Ok(());
        };

        if status == TransferStatus::Failed {
            warn!("read on EP {:#04x} failed", ep);
            pool.free(handle);
            return Ok(());
        }
        if data.len() > RCTX_SIZE {
            warn!("read of {} bytes exceeds context size", data.len());
            pool.free(handle);
            return Err(Error::MalformedMessage);
        }

        let rctx = pool.get_mut(handle);
        rctx.data[..data.len()].copy_from_slice(data);
        rctx.size = data.len() as u16;
        pool.set_state(handle, RctxState::UsbRxPending);
        // cannot fail, the queue holds as many entries as the pool has slots
        let _ = self.endpoints[idx].queue.push_back(handle);
        Ok(())
    }

    /// One poll cycle for a logical interface.
    ///
    /// Refills the interrupt and IN endpoints first (device-to-host
    /// notifications and data take priority), then refills the OUT endpoint
    /// and dispatches at most [`MAX_DISPATCH_PER_POLL`] queued inbound
    /// contexts to `handler`.  The handler owns each dispatched context and
    /// must release it.
    pub fn process<F>(&mut self, pool: &mut Pool, interface: &UsbInterface, mut handler: F)
    where
        F: FnMut(&mut Pool, Handle),
    {
        if let Some(ep) = interface.ep_int {
            let _ = self.refill_to_host(pool, ep);
        }
        if let Some(ep) = interface.ep_in {
            let _ = self.refill_to_host(pool, ep);
        }
        if let Some(ep) = interface.ep_out {
            let _ = self.refill_from_host(pool, ep);
            let Ok(idx) = self.ep_index(ep) else {
                return;
            };
            for _ in 0..MAX_DISPATCH_PER_POLL {
                let Some(handle) = self.endpoints[idx].queue.pop_front() else {
                    break;
                };
                handler(pool, handle);
            }
        }
    }

    /// Frees every queued context of an endpoint.
    ///
    /// Refuses with [`Error::TransferBusy`] while a physical transfer is in
    /// flight; the caller retries from a context where the completion
    /// interrupt can run (teardown only, never on a hot path).  Returns the
    /// number of contexts freed.
    pub fn drain_queue(&mut self, pool: &mut Pool, ep: u8) -> Result<usize, Error> {
        let idx = self.ep_index(ep)?;
        if self.endpoints[idx].busy.is_some() {
            return Err(Error::TransferBusy);
        }
        let mut freed = 0;
        while let Some(handle) = self.endpoints[idx].queue.pop_front() {
            pool.free(handle);
            freed += 1;
        }
        Ok(freed)
    }

    /// Number of contexts queued on an endpoint.
    pub fn queue_len(&self, ep: u8) -> Result<usize, Error> {
        Ok(self.endpoints[self.ep_index(ep)?].queue.len())
    }

    /// True while a physical transfer is in flight on the endpoint.
    pub fn in_flight(&self, ep: u8) -> Result<bool, Error> {
        Ok(self.endpoints[self.ep_index(ep)?].busy.is_some())
    }

    /// Direction the endpoint was registered with.
    pub fn direction(&self, ep: u8) -> Result<Direction, Error> {
        Ok(self.endpoints[self.ep_index(ep)?].dir)
    }
}

impl<D: UsbDriver> core::fmt::Debug for UsbTransport<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UsbTransport")
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::vec::Vec;

    const EP_IN: u8 = 0x82;
    const EP_OUT: u8 = 0x01;
    const MPS: usize = 64;

    #[derive(Debug, Default)]
    struct DriverState {
        writes: Vec<(u8, Vec<u8>)>,
        reads: Vec<(u8, usize)>,
        fail_writes: bool,
        fail_reads: bool,
    }

    #[derive(Debug, Default, Clone)]
    struct FakeDriver(Rc<RefCell<DriverState>>);

    impl UsbDriver for FakeDriver {
        fn submit_write(&mut self, ep: u8, data: &[u8]) -> Result<(), Error> {
            let mut state = self.0.borrow_mut();
            if state.fail_writes {
                return Err(Error::TransferFailed);
            }
            state.writes.push((ep, data.to_vec()));
            Ok(())
        }

        fn submit_read(&mut self, ep: u8, len: usize) -> Result<(), Error> {
            let mut state = self.0.borrow_mut();
            if state.fail_reads {
                return Err(Error::TransferFailed);
            }
            state.reads.push((ep, len));
            Ok(())
        }

        fn max_packet_size(&self, _ep: u8) -> usize {
            MPS
        }
    }

    fn transport() -> (FakeDriver, UsbTransport<FakeDriver>) {
        let driver = FakeDriver::default();
        let mut transport = UsbTransport::new(driver.clone());
        transport.register(EP_IN, Direction::In).unwrap();
        transport.register(EP_OUT, Direction::Out).unwrap();
        (driver, transport)
    }

    fn composed(pool: &mut Pool, len: usize) -> Handle {
        let h = pool.allocate(len, RctxState::UartTxPending).unwrap();
        let rctx = pool.get_mut(h);
        for i in 0..len {
            rctx.data[i] = i as u8;
        }
        rctx.size = len as u16;
        pool.set_state(h, RctxState::UsbTxPending);
        h
    }

    #[test]
    fn one_transfer_in_flight_per_endpoint() {
        let (driver, mut transport) = transport();
        let mut pool = Pool::new();
        let first = composed(&mut pool, 10);
        let second = composed(&mut pool, 20);
        transport.enqueue(&mut pool, EP_IN, first).unwrap();
        transport.enqueue(&mut pool, EP_IN, second).unwrap();

        assert!(transport.refill_to_host(&mut pool, EP_IN).unwrap());
        // a second refill while busy is a no-op
        assert!(!transport.refill_to_host(&mut pool, EP_IN).unwrap());
        assert_eq!(driver.0.borrow().writes.len(), 1);
        assert_eq!(pool.get(first).state(), RctxState::UsbTxBusy);
        assert_eq!(pool.get(second).state(), RctxState::UsbTxPending);

        transport
            .complete_write(&mut pool, EP_IN, TransferStatus::Success, 10)
            .unwrap();
        assert_eq!(pool.get(first).state(), RctxState::Free);
        assert!(transport.refill_to_host(&mut pool, EP_IN).unwrap());
        assert_eq!(driver.0.borrow().writes.len(), 2);
    }

    #[test]
    fn fifo_order_within_endpoint() {
        let (driver, mut transport) = transport();
        let mut pool = Pool::new();
        for len in [3usize, 5, 7] {
            let h = composed(&mut pool, len);
            transport.enqueue(&mut pool, EP_IN, h).unwrap();
        }
        for expected in [3usize, 5, 7] {
            transport.refill_to_host(&mut pool, EP_IN).unwrap();
            transport
                .complete_write(&mut pool, EP_IN, TransferStatus::Success, expected)
                .unwrap();
        }
        let writes = &driver.0.borrow().writes;
        let lengths: Vec<usize> = writes.iter().map(|(_, d)| d.len()).collect();
        assert_eq!(lengths, [3, 5, 7]);
    }

    #[test]
    fn packet_aligned_write_is_followed_by_zlp() {
        let (driver, mut transport) = transport();
        let mut pool = Pool::new();
        let h = composed(&mut pool, 2 * MPS);
        transport.enqueue(&mut pool, EP_IN, h).unwrap();
        transport.refill_to_host(&mut pool, EP_IN).unwrap();

        transport
            .complete_write(&mut pool, EP_IN, TransferStatus::Success, 2 * MPS)
            .unwrap();
        // the context is only released once the ZLP went out
        assert_eq!(pool.get(h).state(), RctxState::UsbTxBusy);
        {
            let writes = &driver.0.borrow().writes;
            assert_eq!(writes.len(), 2);
            assert!(writes[1].1.is_empty());
        }

        transport
            .complete_write(&mut pool, EP_IN, TransferStatus::Success, 0)
            .unwrap();
        assert_eq!(pool.get(h).state(), RctxState::Free);
    }

    #[test]
    fn unaligned_write_has_no_zlp() {
        let (driver, mut transport) = transport();
        let mut pool = Pool::new();
        let h = composed(&mut pool, MPS + 1);
        transport.enqueue(&mut pool, EP_IN, h).unwrap();
        transport.refill_to_host(&mut pool, EP_IN).unwrap();
        transport
            .complete_write(&mut pool, EP_IN, TransferStatus::Success, MPS + 1)
            .unwrap();
        assert_eq!(driver.0.borrow().writes.len(), 1);
        assert_eq!(pool.get(h).state(), RctxState::Free);
    }

    #[test]
    fn failed_submission_keeps_context_queued() {
        let (driver, mut transport) = transport();
        let mut pool = Pool::new();
        let h = composed(&mut pool, 10);
        transport.enqueue(&mut pool, EP_IN, h).unwrap();

        driver.0.borrow_mut().fail_writes = true;
        assert!(!transport.refill_to_host(&mut pool, EP_IN).unwrap());
        assert_eq!(pool.get(h).state(), RctxState::UsbTxPending);
        assert_eq!(transport.queue_len(EP_IN).unwrap(), 1);

        // the next poll cycle retries
        driver.0.borrow_mut().fail_writes = false;
        assert!(transport.refill_to_host(&mut pool, EP_IN).unwrap());
        assert_eq!(pool.get(h).state(), RctxState::UsbTxBusy);
    }

    #[test]
    fn read_refill_and_completion() {
        let (driver, mut transport) = transport();
        let mut pool = Pool::new();
        assert!(transport.refill_from_host(&mut pool, EP_OUT).unwrap());
        assert!(!transport.refill_from_host(&mut pool, EP_OUT).unwrap());
        assert_eq!(driver.0.borrow().reads, [(EP_OUT, RCTX_SIZE)]);

        let payload = [0xa5u8; 12];
        transport
            .complete_read(&mut pool, EP_OUT, TransferStatus::Success, &payload)
            .unwrap();
        assert_eq!(transport.queue_len(EP_OUT).unwrap(), 1);

        // claim it the way the dispatcher would
        let interface = UsbInterface {
            ep_out: Some(EP_OUT),
            ..UsbInterface::default()
        };
        let mut seen = 0;
        transport.process(&mut pool, &interface, |pool, handle| {
            let rctx = pool.get(handle);
            assert_eq!(rctx.state(), RctxState::UsbRxPending);
            assert_eq!(rctx.ep, EP_OUT);
            assert_eq!(rctx.payload(), payload);
            seen += 1;
            pool.set_state(handle, RctxState::Free);
        });
        assert_eq!(seen, 1);
    }

    #[test]
    fn exhausted_pool_skips_read_cycle() {
        let (driver, mut transport) = transport();
        let mut pool = Pool::new();
        let mut handles = Vec::new();
        while let Ok(h) = pool.allocate(1, RctxState::UartTxPending) {
            handles.push(h);
        }
        assert!(!transport.refill_from_host(&mut pool, EP_OUT).unwrap());
        assert!(driver.0.borrow().reads.is_empty());

        // a freed context un-blocks the next cycle
        pool.free(handles.pop().unwrap());
        assert!(transport.refill_from_host(&mut pool, EP_OUT).unwrap());
    }

    #[test]
    fn failed_read_completion_frees_the_context() {
        let (_driver, mut transport) = transport();
        let mut pool = Pool::new();
        transport.refill_from_host(&mut pool, EP_OUT).unwrap();
        transport
            .complete_read(&mut pool, EP_OUT, TransferStatus::Failed, &[])
            .unwrap();
        assert_eq!(pool.free_slots(), NUM_RCTX);
        assert_eq!(transport.queue_len(EP_OUT).unwrap(), 0);
    }

    #[test]
    fn dispatch_is_bounded_per_poll() {
        let (_driver, mut transport) = transport();
        let mut pool = Pool::new();
        let interface = UsbInterface {
            ep_int: None,
            ep_in: Some(EP_IN),
            ep_out: Some(EP_OUT),
        };

        // queue more inbound contexts than one poll may dispatch
        for _ in 0..MAX_DISPATCH_PER_POLL + 2 {
            transport.refill_from_host(&mut pool, EP_OUT).unwrap();
            transport
                .complete_read(&mut pool, EP_OUT, TransferStatus::Success, &[0; 4])
                .unwrap();
        }

        let mut dispatched = 0;
        transport.process(&mut pool, &interface, |pool, handle| {
            dispatched += 1;
            pool.set_state(handle, RctxState::Free);
        });
        assert_eq!(dispatched, MAX_DISPATCH_PER_POLL);

        let mut dispatched = 0;
        transport.process(&mut pool, &interface, |pool, handle| {
            dispatched += 1;
            pool.set_state(handle, RctxState::Free);
        });
        // the next cycle picks up the remainder
        assert_eq!(dispatched, 2);
    }

    #[test]
    fn drain_refuses_while_in_flight() {
        let (_driver, mut transport) = transport();
        let mut pool = Pool::new();
        let h = composed(&mut pool, 10);
        transport.enqueue(&mut pool, EP_IN, h).unwrap();
        transport.refill_to_host(&mut pool, EP_IN).unwrap();

        let queued = composed(&mut pool, 5);
        transport.enqueue(&mut pool, EP_IN, queued).unwrap();
        assert_eq!(
            transport.drain_queue(&mut pool, EP_IN),
            Err(Error::TransferBusy)
        );

        transport
            .complete_write(&mut pool, EP_IN, TransferStatus::Success, 10)
            .unwrap();
        assert_eq!(transport.drain_queue(&mut pool, EP_IN), Ok(1));
        assert_eq!(pool.free_slots(), NUM_RCTX);
    }

    #[test]
    fn collect_outbound_adopts_unowned_contexts() {
        let (_driver, mut transport) = transport();
        let mut pool = Pool::new();
        composed(&mut pool, 4);
        composed(&mut pool, 8);
        assert_eq!(transport.collect_outbound(&mut pool, EP_IN).unwrap(), 2);
        assert_eq!(transport.queue_len(EP_IN).unwrap(), 2);
        // a second sweep finds nothing new
        assert_eq!(transport.collect_outbound(&mut pool, EP_IN).unwrap(), 0);
    }

    #[test]
    fn unknown_endpoint_is_rejected() {
        let (_driver, mut transport) = transport();
        let mut pool = Pool::new();
        assert_eq!(
            transport.refill_to_host(&mut pool, 0x7f),
            Err(Error::NoSuchEndpoint)
        );
        assert_eq!(transport.queue_len(0x7f), Err(Error::NoSuchEndpoint));
    }
}
