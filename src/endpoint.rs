//! Endpoint transaction engine
//!
//! The [`EndpointEngine`] answers IN, OUT and PING transactions for the data
//! endpoint (EP1, bulk IN and OUT) and the notify endpoint (EP2, interrupt
//! IN). The default control endpoint belongs to the transaction layer; the
//! engine only serves it descriptor bytes.
//!
//! # Design
//!
//! ## Packets and the cursor
//!
//! The engine never copies a packet. An IN packet is read straight out of the
//! TX buffer, starting at the TX tail, and an OUT packet is staged straight
//! into the RX buffer, starting at the RX head. The cursor counts the bytes
//! moved so far in the current packet. The tail (IN) or head (OUT) only moves
//! once the transaction succeeds, so an abandoned transaction leaves nothing
//! behind.
//!
//! ## IN packets
//!
//! A new IN packet is capped at the max packet size, and ends early if it
//! catches up with the TX head. If the host doesn't acknowledge the packet,
//! the engine freezes its length. The next attempt sends the same bytes again
//! with the same toggle, even if the application wrote more data since.
//!
//! A max-size packet never ends a transfer. After an acknowledged max-size
//! packet, the engine owes the host another packet. If no data is waiting,
//! that's a zero length packet.
//!
//! The application may hold back new packets while it fills the TX buffer.
//! While held, IN transactions are NAKed, unless there's a retransmission or
//! a zero length packet owed.
//!
//! ## OUT packets
//!
//! An OUT transaction is only accepted when the RX buffer has room for a max
//! size packet plus its two CRC bytes. Otherwise, it's NAKed. The CRC bytes
//! are staged with the payload, and dropped on commit. A packet with the
//! wrong toggle is a retry of a packet we already accepted; it's acknowledged
//! but not committed. At high speed, the engine answers NYET when an accepted
//! packet leaves no room for another one.

use crate::{
    config::Speed,
    descriptor::{DescriptorRange, DescriptorTable},
    ral,
    state::Pipes,
    transaction::{Halt, Input, Output, Response, Strobes},
};

/// Endpoints known to the engine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endpoint {
    /// EP0, handled by the transaction layer
    Control,
    /// EP1, bulk IN and OUT
    Data,
    /// EP2, interrupt IN
    Notify,
}

impl Endpoint {
    /// Returns the endpoint with this number, if it exists
    pub const fn from_number(number: u8) -> Option<Self> {
        match number {
            0 => Some(Endpoint::Control),
            1 => Some(Endpoint::Data),
            2 => Some(Endpoint::Notify),
            _ => None,
        }
    }
}

/// Engine states
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    /// Answering STALL until the transaction ends
    Stall,
    /// Answering NAK until the transaction ends
    Nak,
    /// An IN packet was picked, and is offered
    InStart,
    /// Sending IN payload bytes
    InSend,
    /// IN payload done, waiting for the handshake
    InDone,
    /// Receiving OUT payload bytes
    OutRecv,
    /// No room for an OUT packet
    OutNak,
}

/// OUT packets carry a two byte CRC after the payload
const CRC_LEN: usize = 2;

/// Arbitrates transactions for the data and notify endpoints
///
/// Tick the engine once per protocol clock tick, with everything the
/// transaction layer reports. The returned [`Output`] describes the engine's
/// state after the tick.
pub struct EndpointEngine<'a> {
    pipes: Pipes<'a>,
    descriptors: &'a DescriptorTable,
    state: EngineState,
    strobes: Strobes,
    /// Bytes moved in the current packet
    cursor: usize,
    /// Length cap of the current IN packet
    in_limit: usize,
    /// The last IN packet went out, but wasn't acknowledged
    unacked: bool,
    /// The last acknowledged IN packet was max size
    last_full: bool,
    /// The current OUT packet is too big, and will be dropped
    overrun: bool,
    in_toggle: bool,
    out_toggle: bool,
    halted: Halt,
    halt_set: Halt,
    halt_clear: Halt,
    configured: bool,
    speed: Speed,
}

impl<'a> EndpointEngine<'a> {
    /// Create an engine that moves data through `pipes`, and serves
    /// descriptors from `descriptors`
    pub fn new(pipes: Pipes<'a>, descriptors: &'a DescriptorTable) -> Self {
        EndpointEngine {
            pipes,
            descriptors,
            state: EngineState::Idle,
            strobes: Strobes::empty(),
            cursor: 0,
            in_limit: 0,
            unacked: false,
            last_full: false,
            overrun: false,
            in_toggle: false,
            out_toggle: false,
            halted: Halt::empty(),
            halt_set: Halt::empty(),
            halt_clear: Halt::empty(),
            configured: false,
            speed: Speed::Full,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Returns the endpoints that are currently halted
    pub fn halted(&self) -> Halt {
        self.halted
    }

    /// Returns the toggle for the next data IN packet (DATA1 is `true`)
    pub fn in_toggle(&self) -> bool {
        self.in_toggle
    }

    /// Returns the toggle expected on the next data OUT packet
    pub fn out_toggle(&self) -> bool {
        self.out_toggle
    }

    /// Find a descriptor for the control endpoint, at the current speed
    pub fn descriptor(&self, kind: u8, index: u8) -> DescriptorRange {
        self.descriptors.lookup(kind, index, self.speed)
    }

    /// Returns the bytes of a descriptor found with [`descriptor()`](Self::descriptor)
    pub fn descriptor_bytes(&self, range: DescriptorRange) -> &'a [u8] {
        self.descriptors.range(range)
    }

    /// Advance one tick
    pub fn tick(&mut self, input: &Input) -> Output {
        let rising = input.strobes.difference(self.strobes);
        self.strobes = input.strobes;
        self.halt_set |= input.halt_set;
        self.halt_clear |= input.halt_clear;
        self.speed = input.speed;

        if input.bus_reset {
            self.reset();
        } else {
            if input.configured != self.configured {
                self.configure(input.configured);
            }
            self.step(input, rising);
        }

        self.publish(input);
        self.output(input)
    }

    fn step(&mut self, input: &Input, rising: Strobes) {
        if matches!(self.state, EngineState::InStart | EngineState::InSend) {
            self.send(input);
        }
        match self.state {
            EngineState::Idle => self.idle(input, rising),
            EngineState::Stall | EngineState::Nak | EngineState::OutNak => {
                if !input.strobes.intersects(Strobes::TRANSACTION) {
                    self.state = EngineState::Idle;
                }
            }
            EngineState::InDone => self.finish_in(input),
            EngineState::OutRecv => self.receive(input),
            EngineState::InStart | EngineState::InSend => {}
        }
    }

    fn idle(&mut self, input: &Input, rising: Strobes) {
        self.apply_halts();
        if !self.configured {
            return;
        }
        match Endpoint::from_number(input.endpoint) {
            Some(Endpoint::Data) => {
                if rising.contains(Strobes::IN) {
                    self.start_in();
                } else if rising.contains(Strobes::OUT) {
                    self.start_out();
                } else if rising.contains(Strobes::PING) {
                    self.ping();
                }
            }
            Some(Endpoint::Notify) => {
                if rising.contains(Strobes::IN) {
                    // Nothing to notify
                    self.state = if self.halted.contains(Halt::NOTIFY_IN) {
                        EngineState::Stall
                    } else {
                        EngineState::Nak
                    };
                }
            }
            Some(Endpoint::Control) | None => {}
        }
    }

    /// Latch halt pulses, set before clear
    fn apply_halts(&mut self) {
        let set = core::mem::replace(&mut self.halt_set, Halt::empty());
        let clear = core::mem::replace(&mut self.halt_clear, Halt::empty());
        if !set.is_empty() {
            debug!("HALT {:#x}", set.bits());
            self.halted |= set;
        }
        if !clear.is_empty() {
            debug!("CLEAR HALT {:#x}", clear.bits());
            self.halted.remove(clear);
            if clear.contains(Halt::DATA_IN) {
                self.in_toggle = false;
            }
            if clear.contains(Halt::DATA_OUT) {
                self.out_toggle = false;
            }
        }
    }

    fn start_in(&mut self) {
        if self.halted.contains(Halt::DATA_IN) {
            trace!("EP1 IN STALL");
            self.state = EngineState::Stall;
            return;
        }

        let pending = self.pipes.tx.len();
        let held = self.pipes.registers.hold();
        if !self.unacked && !(self.last_full && pending == 0) && (held || pending == 0) {
            self.state = EngineState::Nak;
            return;
        }

        if self.unacked {
            trace!("EP1 IN RETRANSMIT {}", self.in_limit);
        } else if pending == 0 {
            trace!("EP1 IN ZLP");
            self.in_limit = 0;
        } else {
            self.in_limit = self.speed.max_packet_size();
        }
        self.cursor = 0;
        self.state = EngineState::InStart;
    }

    /// Returns the IN byte at the cursor, if the packet isn't over
    fn offer(&self) -> Option<u8> {
        if self.cursor < self.in_limit {
            self.pipes.tx.peek(self.cursor)
        } else {
            None
        }
    }

    fn send(&mut self, input: &Input) {
        if input.tx_ready && self.offer().is_some() {
            self.cursor += 1;
        }
        if self.offer().is_none() {
            // The whole packet was offered. Wait for the handshake.
            self.state = EngineState::InDone;
        } else if !input.strobes.contains(Strobes::IN) {
            // Abandoned mid-packet. Nothing moved, and a pending
            // retransmission is still pending.
            trace!("EP1 IN ABANDONED {}", self.cursor);
            self.cursor = 0;
            self.state = EngineState::Idle;
        } else {
            self.state = EngineState::InSend;
        }
    }

    fn finish_in(&mut self, input: &Input) {
        if input.strobes.contains(Strobes::FIN) {
            let sent = self.cursor;
            trace!("EP1 IN ACK {}", sent);
            self.pipes.tx.release(sent);
            self.in_toggle = !self.in_toggle;
            self.last_full = sent == self.speed.max_packet_size();
            self.unacked = false;
            self.cursor = 0;
            self.state = EngineState::Idle;
        } else if !input.strobes.contains(Strobes::IN) {
            trace!("EP1 IN NO ACK {}", self.cursor);
            self.in_limit = self.cursor;
            self.unacked = true;
            self.cursor = 0;
            self.state = EngineState::Idle;
        }
    }

    /// Spare RX room for a max size packet and its CRC
    fn out_room(&self) -> bool {
        self.pipes.rx.free() >= self.speed.max_packet_size() + CRC_LEN
    }

    fn start_out(&mut self) {
        self.state = if self.halted.contains(Halt::DATA_OUT) {
            trace!("EP1 OUT STALL");
            EngineState::Stall
        } else if self.out_room() {
            self.cursor = 0;
            self.overrun = false;
            EngineState::OutRecv
        } else {
            EngineState::OutNak
        };
    }

    fn ping(&mut self) {
        if self.halted.contains(Halt::DATA_OUT) {
            self.state = EngineState::Stall;
        } else if !self.out_room() {
            self.state = EngineState::Nak;
        }
        // Otherwise stay idle, which acknowledges the PING.
    }

    fn receive(&mut self, input: &Input) {
        if let Some(byte) = input.rx {
            let limit = self.speed.max_packet_size() + CRC_LEN;
            if self.cursor < limit && self.pipes.rx.stage(self.cursor, byte) {
                self.cursor += 1;
            } else if !self.overrun {
                warn!("EP1 OUT OVERRUN");
                self.overrun = true;
            }
        }

        if input.strobes.contains(Strobes::FIN) {
            if self.overrun || self.cursor < CRC_LEN {
                warn!("EP1 OUT DROPPED {}", self.cursor);
            } else if input.toggle != self.out_toggle {
                trace!("EP1 OUT DUPLICATE {}", self.cursor);
            } else {
                let received = self.cursor - CRC_LEN;
                trace!("EP1 OUT {}", received);
                self.pipes.rx.commit(received);
                self.out_toggle = !self.out_toggle;
            }
            self.cursor = 0;
            self.state = EngineState::Idle;
        } else if !input.strobes.contains(Strobes::OUT) {
            trace!("EP1 OUT ABANDONED {}", self.cursor);
            self.cursor = 0;
            self.state = EngineState::Idle;
        }
    }

    /// Predict NYET for the OUT packet in flight
    ///
    /// Only a packet that will commit can fill the buffer. Duplicates and
    /// overruns are acknowledged without NYET.
    fn no_room_after_commit(&self, input: &Input) -> bool {
        if self.overrun || input.toggle != self.out_toggle {
            return false;
        }
        let committed = self.cursor.saturating_sub(CRC_LEN);
        let free = self.pipes.rx.free().saturating_sub(committed);
        free < self.speed.max_packet_size() + CRC_LEN
    }

    fn reset(&mut self) {
        debug!("RESET");
        self.pipes.tx.discard();
        self.state = EngineState::Idle;
        self.cursor = 0;
        self.in_limit = 0;
        self.unacked = false;
        self.last_full = false;
        self.overrun = false;
        self.in_toggle = false;
        self.out_toggle = false;
        self.halted = Halt::empty();
        self.halt_set = Halt::empty();
        self.halt_clear = Halt::empty();
        self.configured = false;
    }

    fn configure(&mut self, configured: bool) {
        self.configured = configured;
        if configured {
            debug!("CONFIGURED");
            self.in_toggle = false;
            self.out_toggle = false;
            self.halted = Halt::empty();
        } else {
            debug!("UNCONFIGURED");
            self.cursor = 0;
            self.state = EngineState::Idle;
        }
    }

    fn publish(&self, input: &Input) {
        let online = self.configured && !input.suspended;
        ral::write_reg!(
            crate::status,
            self.pipes.registers,
            STATUS,
            HIGH_SPEED: (self.speed == Speed::High) as u32,
            SUSPENDED: input.suspended as u32,
            CONFIGURED: self.configured as u32,
            ONLINE: online as u32,
            HALTED: self.halted.bits() as u32
        );
    }

    fn output(&self, input: &Input) -> Output {
        let mut output = Output::none();
        match self.state {
            EngineState::Idle => {}
            EngineState::Stall => output.response = Response::STALL,
            EngineState::Nak | EngineState::OutNak => output.response = Response::NAK,
            EngineState::InStart | EngineState::InSend | EngineState::InDone => {
                output.response = Response::SEND;
                output.toggle = self.in_toggle;
                output.tx = self.offer().filter(|_| self.state != EngineState::InDone);
            }
            EngineState::OutRecv => {
                output.toggle = self.out_toggle;
                output.rx_ready = !self.overrun;
                if self.speed == Speed::High && self.no_room_after_commit(input) {
                    output.response = Response::NYET;
                }
            }
        }
        output
    }
}

#[cfg(test)]
mod test {
    use super::{EndpointEngine, EngineState};
    use crate::{
        config::{Config, Speed},
        descriptor::{self, DescriptorTable},
        state::{Serial, SerialState},
        transaction::{Halt, Input, Output, Response, Strobes},
    };
    use std::vec::Vec;
    use usb_device::device::UsbVidPid;

    const CRC: [u8; 2] = [0xA5, 0x5A];

    fn table() -> DescriptorTable {
        DescriptorTable::new(&Config::new(UsbVidPid(0x1d50, 0x6130))).unwrap()
    }

    #[derive(Debug)]
    struct Packet {
        response: Response,
        toggle: bool,
        data: Vec<u8>,
    }

    /// Plays the transaction layer
    struct Host<'a> {
        engine: EndpointEngine<'a>,
        base: Input,
        halt_set: Halt,
        halt_clear: Halt,
    }

    impl<'a> Host<'a> {
        fn new(engine: EndpointEngine<'a>, speed: Speed) -> Self {
            let mut host = Host {
                engine,
                base: Input::idle().speed(speed),
                halt_set: Halt::empty(),
                halt_clear: Halt::empty(),
            };
            host.idle();
            host
        }

        /// Build a token input, delivering pending halt pulses
        fn token(&mut self, endpoint: u8, strobes: Strobes) -> Input {
            let mut input = self.base.token(endpoint, strobes);
            input.halt_set = core::mem::replace(&mut self.halt_set, Halt::empty());
            input.halt_clear = core::mem::replace(&mut self.halt_clear, Halt::empty());
            input
        }

        fn idle(&mut self) {
            let input = self.token(0, Strobes::empty());
            self.engine.tick(&input);
            assert_eq!(self.engine.state(), EngineState::Idle);
        }

        fn bulk_in(&mut self, ack: bool) -> Packet {
            self.transfer_in(1, ack)
        }

        fn transfer_in(&mut self, endpoint: u8, ack: bool) -> Packet {
            let input = self.token(endpoint, Strobes::IN);
            let mut output = self.engine.tick(&input);
            let mut packet = Packet {
                response: output.response,
                toggle: output.toggle,
                data: Vec::new(),
            };
            if output.response.contains(Response::SEND) {
                while let Some(byte) = output.tx {
                    packet.data.push(byte);
                    let input = Input {
                        tx_ready: true,
                        ..self.token(endpoint, Strobes::IN)
                    };
                    output = self.engine.tick(&input);
                    assert_eq!(output.response, Response::SEND);
                    assert_eq!(output.toggle, packet.toggle);
                }
                if ack {
                    let input = self.token(endpoint, Strobes::IN | Strobes::FIN);
                    self.engine.tick(&input);
                }
            }
            self.idle();
            packet
        }

        /// Send `payload` and a CRC, returning the response seen at the end
        /// of the data
        fn bulk_out(&mut self, payload: &[u8], toggle: bool) -> Response {
            let token = Input {
                toggle,
                ..self.token(1, Strobes::OUT)
            };
            let output = self.engine.tick(&token);
            if output.response.intersects(Response::NAK | Response::STALL) {
                self.idle();
                return output.response;
            }
            assert!(output.rx_ready);
            assert_eq!(output.toggle, self.engine.out_toggle());
            let mut response = output.response;
            for &byte in payload.iter().chain(&CRC) {
                response = self
                    .engine
                    .tick(&Input {
                        rx: Some(byte),
                        ..token
                    })
                    .response;
            }
            self.engine.tick(&Input {
                strobes: Strobes::OUT | Strobes::FIN,
                ..token
            });
            self.idle();
            response
        }

        fn ping(&mut self) -> Response {
            let input = self.token(1, Strobes::PING);
            let response = self.engine.tick(&input).response;
            self.idle();
            response
        }
    }

    fn read_all(serial: &mut Serial) -> Vec<u8> {
        let mut data = Vec::new();
        while let Some(byte) = serial.read_byte() {
            data.push(byte);
        }
        data
    }

    #[test]
    fn scenario_hold_then_release() {
        let table = table();
        let state = SerialState::<256, 256>::new();
        let (mut serial, pipes) = state.split().unwrap();
        let mut host = Host::new(EndpointEngine::new(pipes, &table), Speed::Full);

        serial.set_hold(true);
        let payload: [u8; 10] = core::array::from_fn(|i| i as u8);
        assert_eq!(serial.write(&payload), Ok(10));
        assert_eq!(host.bulk_in(true).response, Response::NAK);
        serial.set_hold(false);

        let packet = host.bulk_in(true);
        assert_eq!(packet.response, Response::SEND);
        assert_eq!(packet.data, payload);
        assert!(!packet.toggle);

        // Short packet ended the transfer.
        for _ in 0..3 {
            assert_eq!(host.bulk_in(true).response, Response::NAK);
        }
    }

    #[test]
    fn scenario_two_packets() {
        let table = table();
        let state = SerialState::<256, 256>::new();
        let (mut serial, pipes) = state.split().unwrap();
        let mut host = Host::new(EndpointEngine::new(pipes, &table), Speed::Full);

        let payload: [u8; 70] = core::array::from_fn(|i| (i * 3) as u8);
        assert_eq!(serial.write(&payload), Ok(70));

        let first = host.bulk_in(true);
        assert_eq!(first.data, payload[..64]);
        assert!(!first.toggle);
        let second = host.bulk_in(true);
        assert_eq!(second.data, payload[64..]);
        assert!(second.toggle);
        assert_eq!(host.bulk_in(true).response, Response::NAK);
        assert_eq!(serial.tx_free(), 255);
    }

    #[test]
    fn full_packet_is_followed_by_zlp() {
        let table = table();
        let state = SerialState::<256, 256>::new();
        let (mut serial, pipes) = state.split().unwrap();
        let mut host = Host::new(EndpointEngine::new(pipes, &table), Speed::Full);

        serial.write(&[7; 128]).unwrap();
        assert_eq!(host.bulk_in(true).data.len(), 64);
        assert_eq!(host.bulk_in(true).data.len(), 64);
        let zlp = host.bulk_in(true);
        assert_eq!(zlp.response, Response::SEND);
        assert!(zlp.data.is_empty());
        assert!(!zlp.toggle);
        assert_eq!(host.bulk_in(true).response, Response::NAK);
    }

    #[test]
    fn zlp_is_not_held_back() {
        let table = table();
        let state = SerialState::<256, 256>::new();
        let (mut serial, pipes) = state.split().unwrap();
        let mut host = Host::new(EndpointEngine::new(pipes, &table), Speed::Full);

        serial.write(&[1; 64]).unwrap();
        assert_eq!(host.bulk_in(true).data.len(), 64);
        serial.set_hold(true);
        let zlp = host.bulk_in(true);
        assert_eq!(zlp.response, Response::SEND);
        assert!(zlp.data.is_empty());
    }

    #[test]
    fn retransmission_is_identical() {
        let table = table();
        let state = SerialState::<256, 256>::new();
        let (mut serial, pipes) = state.split().unwrap();
        let mut host = Host::new(EndpointEngine::new(pipes, &table), Speed::Full);

        serial.write(b"0123456789").unwrap();
        let lost = host.bulk_in(false);
        assert_eq!(lost.data, b"0123456789");

        // More data arrives, but the retry is the same packet.
        serial.write(b"abcdefghijklmnopqrst").unwrap();
        let retry = host.bulk_in(false);
        assert_eq!(retry.data, lost.data);
        assert_eq!(retry.toggle, lost.toggle);

        // Hold doesn't delay a retry.
        serial.set_hold(true);
        let retry = host.bulk_in(true);
        assert_eq!(retry.data, lost.data);
        assert_eq!(retry.toggle, lost.toggle);

        serial.set_hold(false);
        let next = host.bulk_in(true);
        assert_eq!(next.data, b"abcdefghijklmnopqrst");
        assert_ne!(next.toggle, lost.toggle);
    }

    #[test]
    fn lost_zlp_is_retransmitted() {
        let table = table();
        let state = SerialState::<256, 256>::new();
        let (mut serial, pipes) = state.split().unwrap();
        let mut host = Host::new(EndpointEngine::new(pipes, &table), Speed::Full);

        serial.write(&[2; 64]).unwrap();
        assert_eq!(host.bulk_in(true).data.len(), 64);
        assert!(host.bulk_in(false).data.is_empty());

        serial.write(b"tail").unwrap();
        let retry = host.bulk_in(true);
        assert_eq!(retry.response, Response::SEND);
        assert!(retry.data.is_empty());
        assert!(retry.toggle);
        assert_eq!(host.bulk_in(true).data, b"tail");
    }

    #[test]
    fn abandoned_in_rewinds() {
        let table = table();
        let state = SerialState::<256, 256>::new();
        let (mut serial, pipes) = state.split().unwrap();
        let mut host = Host::new(EndpointEngine::new(pipes, &table), Speed::Full);

        serial.write(b"hello").unwrap();
        let input = host.token(1, Strobes::IN);
        host.engine.tick(&input);
        host.engine.tick(&Input {
            tx_ready: true,
            ..input
        });
        host.engine.tick(&Input {
            tx_ready: true,
            ..input
        });
        // Token gone mid-packet
        host.idle();
        assert_eq!(serial.tx_free(), 255 - 5);

        let packet = host.bulk_in(true);
        assert_eq!(packet.data, b"hello");
        assert!(!packet.toggle);
    }

    #[test]
    fn out_accepts_new_and_rejects_duplicates() {
        let table = table();
        let state = SerialState::<256, 256>::new();
        let (mut serial, pipes) = state.split().unwrap();
        let mut host = Host::new(EndpointEngine::new(pipes, &table), Speed::Full);

        assert_eq!(host.bulk_out(b"first", false), Response::empty());
        assert!(host.engine.out_toggle());
        // The host missed our ACK, and resends.
        assert_eq!(host.bulk_out(b"first", false), Response::empty());
        assert_eq!(host.bulk_out(b"second", true), Response::empty());
        assert_eq!(read_all(&mut serial), b"firstsecond");
        assert!(!host.engine.out_toggle());
    }

    #[test]
    fn out_nak_when_full() {
        let table = table();
        let state = SerialState::<128, 16>::new();
        let (mut serial, pipes) = state.split().unwrap();
        let mut host = Host::new(EndpointEngine::new(pipes, &table), Speed::Full);

        assert_eq!(host.bulk_out(&[3; 64], false), Response::empty());
        assert_eq!(serial.rx_len(), 64);
        assert_eq!(host.bulk_out(&[4; 64], true), Response::NAK);
        assert_eq!(serial.rx_len(), 64);

        assert_eq!(read_all(&mut serial), [3; 64]);
        assert_eq!(host.bulk_out(&[4; 64], true), Response::empty());
        assert_eq!(read_all(&mut serial), [4; 64]);
    }

    #[test]
    fn abandoned_out_commits_nothing() {
        let table = table();
        let state = SerialState::<256, 16>::new();
        let (mut serial, pipes) = state.split().unwrap();
        let mut host = Host::new(EndpointEngine::new(pipes, &table), Speed::Full);

        let token = host.token(1, Strobes::OUT);
        host.engine.tick(&token);
        for byte in *b"junk" {
            host.engine.tick(&Input {
                rx: Some(byte),
                ..token
            });
        }
        host.idle();
        assert_eq!(serial.rx_len(), 0);
        assert!(!host.engine.out_toggle());

        assert_eq!(host.bulk_out(b"good", false), Response::empty());
        assert_eq!(read_all(&mut serial), b"good");
    }

    #[test]
    fn oversized_out_is_dropped() {
        let table = table();
        let state = SerialState::<256, 16>::new();
        let (mut serial, pipes) = state.split().unwrap();
        let mut host = Host::new(EndpointEngine::new(pipes, &table), Speed::Full);

        host.bulk_out(&[9; 65], false);
        assert_eq!(serial.rx_len(), 0);
        assert!(!host.engine.out_toggle());
    }

    #[test]
    fn halt_in_mid_transfer() {
        let table = table();
        let state = SerialState::<512, 512>::new();
        let (mut serial, pipes) = state.split().unwrap();
        let mut host = Host::new(EndpointEngine::new(pipes, &table), Speed::Full);

        serial.write(&[5; 200]).unwrap();
        assert!(!host.bulk_in(true).toggle);

        // The halt lands during the second packet, which the host never
        // acknowledges.
        let input = host.token(1, Strobes::IN);
        host.engine.tick(&input);
        host.engine.tick(&Input {
            tx_ready: true,
            halt_set: Halt::DATA_IN,
            ..input
        });
        let mut output = host.engine.tick(&input);
        while output.tx.is_some() {
            output = host.engine.tick(&Input {
                tx_ready: true,
                ..input
            });
        }
        host.idle();
        assert!(host.engine.in_toggle());

        assert_eq!(host.bulk_in(true).response, Response::STALL);
        assert_eq!(serial.status().halted, Halt::DATA_IN);
        assert_eq!(host.bulk_in(true).response, Response::STALL);

        host.halt_clear = Halt::DATA_IN;
        host.idle();
        assert!(host.engine.halted().is_empty());
        assert!(!host.engine.in_toggle());
        let packet = host.bulk_in(true);
        assert_eq!(packet.response, Response::SEND);
        assert!(!packet.toggle);
        assert_eq!(packet.data.len(), 64);
    }

    #[test]
    fn halt_out_stalls_out_and_ping() {
        let table = table();
        let state = SerialState::<1024, 16>::new();
        let (mut serial, pipes) = state.split().unwrap();
        let mut host = Host::new(EndpointEngine::new(pipes, &table), Speed::High);

        assert_eq!(host.bulk_out(b"x", false), Response::empty());
        assert!(host.engine.out_toggle());

        host.halt_set = Halt::DATA_OUT;
        host.idle();
        assert_eq!(host.bulk_out(b"y", true), Response::STALL);
        assert_eq!(host.ping(), Response::STALL);

        host.halt_clear = Halt::DATA_OUT;
        host.idle();
        assert!(!host.engine.out_toggle());
        assert_eq!(host.bulk_out(b"z", false), Response::empty());
        assert_eq!(read_all(&mut serial), b"xz");
    }

    #[test]
    fn set_then_clear_in_one_window() {
        let table = table();
        let state = SerialState::<64, 64>::new();
        let (_serial, pipes) = state.split().unwrap();
        let mut host = Host::new(EndpointEngine::new(pipes, &table), Speed::Full);

        host.halt_set = Halt::DATA_IN | Halt::NOTIFY_IN;
        host.halt_clear = Halt::DATA_IN;
        host.idle();
        assert_eq!(host.engine.halted(), Halt::NOTIFY_IN);
    }

    #[test]
    fn ping_and_nyet_at_high_speed() {
        let table = table();
        let state = SerialState::<1024, 16>::new();
        let (mut serial, pipes) = state.split().unwrap();
        let mut host = Host::new(EndpointEngine::new(pipes, &table), Speed::High);

        assert_eq!(host.ping(), Response::empty());
        // 1023 free, and this packet leaves 511.
        assert_eq!(host.bulk_out(&[6; 512], false), Response::NYET);
        assert_eq!(serial.rx_len(), 512);
        assert_eq!(host.ping(), Response::NAK);
        assert_eq!(host.bulk_out(&[7; 512], true), Response::NAK);

        assert_eq!(read_all(&mut serial).len(), 512);
        assert_eq!(host.ping(), Response::empty());
        // A short packet leaves plenty of room.
        assert_eq!(host.bulk_out(&[7; 8], true), Response::empty());
    }

    #[test]
    fn nyet_only_for_packets_that_commit() {
        let table = table();
        let state = SerialState::<2048, 16>::new();
        let (serial, pipes) = state.split().unwrap();
        let mut host = Host::new(EndpointEngine::new(pipes, &table), Speed::High);

        assert_eq!(host.bulk_out(&[1; 512], false), Response::empty());
        assert_eq!(host.bulk_out(&[2; 512], true), Response::empty());
        // The host missed our ACK, and resends. 1023 bytes stay free.
        assert_eq!(host.bulk_out(&[2; 512], true), Response::empty());
        assert_eq!(serial.rx_len(), 1024);
        // This one leaves 511.
        assert_eq!(host.bulk_out(&[3; 512], false), Response::NYET);
        assert_eq!(serial.rx_len(), 1536);
    }

    #[test]
    fn no_nyet_for_an_oversized_packet() {
        let table = table();
        let state = SerialState::<1024, 16>::new();
        let (serial, pipes) = state.split().unwrap();
        let mut host = Host::new(EndpointEngine::new(pipes, &table), Speed::High);

        assert_eq!(host.bulk_out(&[4; 600], false), Response::empty());
        assert_eq!(serial.rx_len(), 0);
        assert!(!host.engine.out_toggle());
    }

    #[test]
    fn no_nyet_at_full_speed() {
        let table = table();
        let state = SerialState::<128, 16>::new();
        let (_serial, pipes) = state.split().unwrap();
        let mut host = Host::new(EndpointEngine::new(pipes, &table), Speed::Full);
        assert_eq!(host.bulk_out(&[1; 64], false), Response::empty());
    }

    #[test]
    fn high_speed_packets() {
        let table = table();
        let state = SerialState::<16, 2048>::new();
        let (mut serial, pipes) = state.split().unwrap();
        let mut host = Host::new(EndpointEngine::new(pipes, &table), Speed::High);

        serial.write(&[8; 600]).unwrap();
        assert_eq!(host.bulk_in(true).data.len(), 512);
        assert_eq!(host.bulk_in(true).data.len(), 88);
        assert_eq!(host.bulk_in(true).response, Response::NAK);
    }

    #[test]
    fn notify_endpoint() {
        let table = table();
        let state = SerialState::<64, 64>::new();
        let (mut serial, pipes) = state.split().unwrap();
        let mut host = Host::new(EndpointEngine::new(pipes, &table), Speed::Full);

        serial.write(b"data").unwrap();
        assert_eq!(host.transfer_in(2, true).response, Response::NAK);
        host.halt_set = Halt::NOTIFY_IN;
        host.idle();
        assert_eq!(host.transfer_in(2, true).response, Response::STALL);
        // The data endpoint is unaffected.
        assert_eq!(host.bulk_in(true).data, b"data");
    }

    #[test]
    fn silent_while_unconfigured() {
        let table = table();
        let state = SerialState::<64, 64>::new();
        let (mut serial, pipes) = state.split().unwrap();
        let mut host = Host::new(EndpointEngine::new(pipes, &table), Speed::Full);
        host.base.configured = false;

        serial.write(b"data").unwrap();
        assert_eq!(host.bulk_in(true).response, Response::empty());
        let input = host.token(1, Strobes::OUT);
        assert_eq!(host.engine.tick(&input), Output::none());
        host.idle();
        assert_eq!(serial.tx_free(), 63 - 4);
        assert!(!serial.status().configured);
    }

    #[test]
    fn control_endpoint_is_ignored() {
        let table = table();
        let state = SerialState::<64, 64>::new();
        let (mut serial, pipes) = state.split().unwrap();
        let mut host = Host::new(EndpointEngine::new(pipes, &table), Speed::Full);

        serial.write(b"data").unwrap();
        for strobes in [Strobes::IN, Strobes::OUT, Strobes::SETUP, Strobes::PING] {
            let input = host.token(0, strobes);
            assert_eq!(host.engine.tick(&input).response, Response::empty());
            assert_eq!(host.engine.state(), EngineState::Idle);
            host.idle();
        }
    }

    #[test]
    fn bus_reset() {
        let table = table();
        let state = SerialState::<256, 256>::new();
        let (mut serial, pipes) = state.split().unwrap();
        let mut host = Host::new(EndpointEngine::new(pipes, &table), Speed::Full);

        assert_eq!(host.bulk_out(b"kept", false), Response::empty());
        serial.write(&[1; 100]).unwrap();
        assert_eq!(host.bulk_in(false).data.len(), 64);
        host.halt_set = Halt::NOTIFY_IN;
        host.idle();

        host.engine.tick(&Input {
            bus_reset: true,
            ..host.base
        });
        assert_eq!(serial.tx_free(), 255);
        assert!(host.engine.halted().is_empty());
        assert!(!host.engine.in_toggle());
        assert!(!host.engine.out_toggle());
        assert_eq!(read_all(&mut serial), b"kept");

        host.idle();
        assert_eq!(host.bulk_in(true).response, Response::NAK);
        serial.write(b"new").unwrap();
        let packet = host.bulk_in(true);
        assert_eq!(packet.data, b"new");
        assert!(!packet.toggle);
    }

    #[test]
    fn status_is_published() {
        let table = table();
        let state = SerialState::<64, 64>::new();
        let (serial, pipes) = state.split().unwrap();
        let mut host = Host::new(EndpointEngine::new(pipes, &table), Speed::High);

        let status = serial.status();
        assert_eq!(status.speed, Speed::High);
        assert!(status.configured);
        assert!(status.online);
        assert!(!status.suspended);

        host.base.suspended = true;
        host.idle();
        let status = serial.status();
        assert!(status.suspended);
        assert!(!status.online);
    }

    #[test]
    fn descriptors_follow_the_bus_speed() {
        let table = table();
        let state = SerialState::<64, 64>::new();
        let (_serial, pipes) = state.split().unwrap();
        let mut host = Host::new(EndpointEngine::new(pipes, &table), Speed::High);

        let range = host
            .engine
            .descriptor(descriptor::CONFIGURATION, 0);
        assert_eq!(range, table.lookup(descriptor::CONFIGURATION, 0, Speed::High));
        let other = host
            .engine
            .descriptor(descriptor::OTHER_SPEED_CONFIGURATION, 0);
        assert_eq!(
            host.engine.descriptor_bytes(other)[2..],
            table.get(descriptor::CONFIGURATION, 0, Speed::Full)[2..]
        );

        host.base = host.base.speed(Speed::Full);
        host.idle();
        assert_eq!(
            host.engine.descriptor(descriptor::CONFIGURATION, 0),
            table.lookup(descriptor::CONFIGURATION, 0, Speed::Full)
        );
        assert!(host.engine.descriptor(descriptor::STRING, 9).is_empty());
    }

    #[test]
    fn concurrent_application() {
        const TOTAL: usize = 5_000;
        let table = table();
        let state = SerialState::<64, 128>::new();
        let (mut serial, pipes) = state.split().unwrap();
        let mut host = Host::new(EndpointEngine::new(pipes, &table), Speed::Full);

        std::thread::scope(|scope| {
            scope.spawn(move || {
                let mut sent = 0usize;
                while sent < TOTAL {
                    if serial.write_byte(sent as u8) {
                        sent += 1;
                    }
                }
            });

            let mut received = Vec::new();
            let mut toggle = false;
            let mut attempt = 0usize;
            while received.len() < TOTAL {
                attempt += 1;
                // Drop every seventh handshake.
                let ack = attempt % 7 != 0;
                let packet = host.bulk_in(ack);
                if packet.response != Response::SEND {
                    continue;
                }
                assert_eq!(packet.toggle, toggle);
                assert!(packet.data.len() <= 64);
                if ack {
                    received.extend_from_slice(&packet.data);
                    toggle = !toggle;
                }
            }
            assert_eq!(received.len(), TOTAL);
            for (index, byte) in received.iter().enumerate() {
                assert_eq!(*byte, index as u8);
            }
        });
    }
}
