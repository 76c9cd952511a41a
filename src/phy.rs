//! Line codec: the device side of a USB transceiver, in software
//!
//! [`LineCodec`] turns raw differential samples into received bytes, and
//! bytes from the layer above into differential drive. It is ticked once per
//! master clock tick, at four times the bit rate.
//!
//! # Design
//!
//! ## Sampling
//!
//! Each line passes through a three stage shift register. A line's level
//! only changes when the last two synchronized samples agree, so single-tick
//! glitches never reach the decoder. See [`Sampler`].
//!
//! ## Clock recovery
//!
//! There's no PLL. A modulo-4 phase counter produces one strobe per bit, and
//! every J / K edge may nudge the counter by one tick, at most once per bit.
//! That keeps the strobe centered in the bit, even as the host's clock
//! drifts against ours. See [`BitClock`].
//!
//! ## Receive
//!
//! The idle bus is J. A K starts a packet: the codec confirms the K, then
//! tracks the alternating SYNC pattern up to its closing KK. From there,
//! every strobe decodes one NRZI bit (no transition is a one). After six
//! ones, the next bit is a stuffed zero and is dropped; a seventh one is a
//! stuffing violation. Bits are collected LSB first, and every eighth bit
//! pulses [`LineFlags::RX_VALID`] with the byte in [`LineOutput::rx_data`].
//! An SE0 ends the packet.
//!
//! Line violations only raise [`LineFlags::RX_ERROR`] for the tick. It's up
//! to the layer above to drop the packet.
//!
//! ## Transmit
//!
//! When the bus is idle and [`LineInput::tx`] holds a byte, the codec sends
//! SYNC, then pulls bytes one at a time. On the strobe where it needs the
//! next byte, it latches `tx` and pulses [`LineFlags::TX_READY`]. If `tx` is
//! `None` at that point, the packet ends: a pending stuff bit goes out first,
//! then two bits of SE0 and one bit of J.

mod clock;
mod sample;

pub use clock::BitClock;
pub use sample::{LineState, Sampler};

bitflags::bitflags! {
    /// Per-tick codec flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LineFlags : u8 {
        /// Receiving a packet, from the end of SYNC through EOP
        const RX_ACTIVE = 1 << 0;
        /// `rx_data` holds a received byte
        const RX_VALID = 1 << 1;
        /// Line violation on this tick
        const RX_ERROR = 1 << 2;
        /// Driving a packet, from SYNC through EOP
        const TX_ACTIVE = 1 << 3;
        /// The byte in `LineInput::tx` was taken
        const TX_READY = 1 << 4;
        /// SE0 held long enough to be a bus reset
        const BUS_RESET = 1 << 5;
    }
}

/// Codec inputs for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineInput {
    /// Raw D+ sample
    pub dp: bool,
    /// Raw D- sample
    pub dn: bool,
    /// The next byte to transmit, if any
    pub tx: Option<u8>,
    /// Drive SE0 while idle, signaling a disconnect
    pub detach: bool,
}

impl LineInput {
    /// An idle J bus with nothing to send
    pub const fn idle() -> Self {
        let (dp, dn) = LineState::J.pair();
        LineInput {
            dp,
            dn,
            tx: None,
            detach: false,
        }
    }

    pub const fn line(mut self, state: LineState) -> Self {
        let (dp, dn) = state.pair();
        self.dp = dp;
        self.dn = dn;
        self
    }
}

/// Codec outputs for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineOutput {
    pub flags: LineFlags,
    /// Valid when `flags` has [`LineFlags::RX_VALID`]
    pub rx_data: u8,
    /// D+ drive
    pub dp: bool,
    /// D- drive
    pub dn: bool,
    /// Output enable for `dp` and `dn`
    pub oe: bool,
}

impl LineOutput {
    /// Returns the driven state, or `None` when the outputs are disabled
    pub fn driven(&self) -> Option<LineState> {
        self.oe.then(|| LineState::from_pair(self.dp, self.dn))
    }
}

/// Codec states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecState {
    Idle,
    RxDetect,
    RxSyncJ,
    RxSyncK,
    RxActive,
    RxEop0,
    RxEop1,
    TxSync,
    TxActive,
    TxEopStuff,
    TxEop0,
    TxEop1,
    TxEop2,
    TxReset,
}

impl CodecState {
    fn is_receiving(self) -> bool {
        use CodecState::*;
        matches!(
            self,
            RxDetect | RxSyncJ | RxSyncK | RxActive | RxEop0 | RxEop1
        )
    }

    fn is_transmitting(self) -> bool {
        use CodecState::*;
        matches!(
            self,
            TxSync | TxActive | TxEopStuff | TxEop0 | TxEop1 | TxEop2
        )
    }
}

/// Ticks of continuous SE0 that signal a bus reset (30 bit times)
pub const RESET_TICKS: u16 = 30 * 4;

/// Longest run of ones before a stuffed zero
const MAX_ONES: u8 = 6;

/// SYNC bits sent, including the closing one
const SYNC_BITS: u8 = 8;

/// Alternations required before the closing KK of SYNC
///
/// Hubs may eat the first few SYNC bits, so don't require all of them.
const MIN_SYNC: u8 = 3;

/// Software USB transceiver
pub struct LineCodec {
    state: CodecState,
    sampler: Sampler,
    clock: BitClock,
    /// Filtered line state from the previous tick
    line: LineState,
    /// Last differential level received or driven
    level: LineState,
    /// What we put on the line, while transmitting
    drive: LineState,
    shift: u8,
    bits: u8,
    ones: u8,
    sync: u8,
    se0_ticks: u16,
}

impl LineCodec {
    pub const fn new() -> Self {
        LineCodec {
            state: CodecState::Idle,
            sampler: Sampler::new(),
            clock: BitClock::new(),
            line: LineState::J,
            level: LineState::J,
            drive: LineState::J,
            shift: 0,
            bits: 0,
            ones: 0,
            sync: 0,
            se0_ticks: 0,
        }
    }

    pub fn state(&self) -> CodecState {
        self.state
    }

    /// Advance one master clock tick
    pub fn tick(&mut self, input: &LineInput) -> LineOutput {
        let line = self.sampler.sample(input.dp, input.dn);
        let edge = line.is_differential() && self.line.is_differential() && line != self.line;
        self.line = line;
        let strobe = self.clock.tick(edge && self.state.is_receiving());

        let mut flags = LineFlags::empty();
        let mut rx_data = 0;

        if self.drives_line() {
            self.se0_ticks = 0;
        } else {
            self.watch_reset(line, &mut flags);
            if line == LineState::Se1 {
                flags |= LineFlags::RX_ERROR;
            }
        }

        match self.state {
            CodecState::Idle => self.idle(line, input),
            CodecState::TxReset => {
                if !input.detach {
                    debug!("PHY ATTACH");
                    self.state = CodecState::Idle;
                }
            }
            _ if !strobe => {}
            CodecState::RxDetect => {
                if line == LineState::K {
                    self.sync = 1;
                    self.state = CodecState::RxSyncJ;
                } else {
                    self.state = CodecState::Idle;
                }
            }
            CodecState::RxSyncJ => match line {
                LineState::J => {
                    self.sync = self.sync.saturating_add(1);
                    self.state = CodecState::RxSyncK;
                }
                LineState::K if self.sync >= MIN_SYNC => self.start_packet(),
                _ => self.sync_lost(),
            },
            CodecState::RxSyncK => {
                if line == LineState::K {
                    self.sync = self.sync.saturating_add(1);
                    self.state = CodecState::RxSyncJ;
                } else {
                    self.sync_lost();
                }
            }
            CodecState::RxActive => {
                if let Some(byte) = self.receive(line, &mut flags) {
                    flags |= LineFlags::RX_VALID;
                    rx_data = byte;
                }
            }
            CodecState::RxEop0 => match line {
                LineState::Se0 => self.state = CodecState::RxEop1,
                // Tolerate a one bit EOP
                LineState::J => self.state = CodecState::Idle,
                _ => {
                    warn!("PHY EOP VIOLATION");
                    flags |= LineFlags::RX_ERROR;
                    self.state = CodecState::Idle;
                }
            },
            CodecState::RxEop1 => {
                if !matches!(line, LineState::J | LineState::Se0) {
                    warn!("PHY EOP VIOLATION");
                    flags |= LineFlags::RX_ERROR;
                }
                self.state = CodecState::Idle;
            }
            CodecState::TxSync => {
                if self.sync < SYNC_BITS - 1 {
                    self.level = self.level.toggled();
                    self.sync = self.sync.saturating_add(1);
                } else {
                    // The closing one keeps the level.
                    self.ones = 1;
                    self.bits = 0;
                    self.state = CodecState::TxActive;
                }
                self.drive = self.level;
            }
            CodecState::TxActive => {
                if self.transmit(input.tx) {
                    flags |= LineFlags::TX_READY;
                }
            }
            CodecState::TxEopStuff => {
                self.drive = LineState::Se0;
                self.state = CodecState::TxEop0;
            }
            CodecState::TxEop0 => self.state = CodecState::TxEop1,
            CodecState::TxEop1 => {
                self.level = LineState::J;
                self.drive = LineState::J;
                self.state = CodecState::TxEop2;
            }
            CodecState::TxEop2 => self.state = CodecState::Idle,
        }

        if matches!(
            self.state,
            CodecState::RxActive | CodecState::RxEop0 | CodecState::RxEop1
        ) {
            flags |= LineFlags::RX_ACTIVE;
        }
        if self.state.is_transmitting() {
            flags |= LineFlags::TX_ACTIVE;
        }

        let oe = self.drives_line();
        let (dp, dn) = if oe { self.drive.pair() } else { (false, false) };
        LineOutput {
            flags,
            rx_data,
            dp,
            dn,
            oe,
        }
    }

    fn drives_line(&self) -> bool {
        self.state.is_transmitting() || self.state == CodecState::TxReset
    }

    fn watch_reset(&mut self, line: LineState, flags: &mut LineFlags) {
        if line != LineState::Se0 {
            self.se0_ticks = 0;
            return;
        }
        self.se0_ticks = self.se0_ticks.saturating_add(1);
        if self.se0_ticks == RESET_TICKS {
            debug!("PHY BUS RESET");
            *flags |= LineFlags::BUS_RESET;
        }
    }

    fn idle(&mut self, line: LineState, input: &LineInput) {
        if input.detach {
            debug!("PHY DETACH");
            self.drive = LineState::Se0;
            self.state = CodecState::TxReset;
        } else if line == LineState::K {
            self.clock.sync();
            self.state = CodecState::RxDetect;
        } else if input.tx.is_some() && line == LineState::J {
            // The first SYNC bit is a zero, so it leaves J right away.
            self.clock.restart();
            self.level = LineState::K;
            self.drive = LineState::K;
            self.sync = 1;
            self.state = CodecState::TxSync;
        }
    }

    fn sync_lost(&mut self) {
        trace!("PHY SYNC LOST {}", self.sync);
        self.state = CodecState::Idle;
    }

    fn start_packet(&mut self) {
        self.level = LineState::K;
        self.ones = 1;
        self.bits = 0;
        self.shift = 0;
        self.state = CodecState::RxActive;
    }

    /// Decode one bit, returning a byte when one completes
    fn receive(&mut self, line: LineState, flags: &mut LineFlags) -> Option<u8> {
        match line {
            LineState::Se0 => {
                if self.bits != 0 {
                    warn!("PHY PARTIAL BYTE {}", self.bits);
                    *flags |= LineFlags::RX_ERROR;
                }
                self.state = CodecState::RxEop0;
                None
            }
            // Already flagged
            LineState::Se1 => None,
            LineState::J | LineState::K => {
                let one = line == self.level;
                self.level = line;
                if self.ones == MAX_ONES {
                    self.ones = 0;
                    if one {
                        warn!("PHY STUFFING VIOLATION");
                        *flags |= LineFlags::RX_ERROR;
                    }
                    return None;
                }
                self.ones = if one { self.ones + 1 } else { 0 };
                self.shift = (self.shift >> 1) | ((one as u8) << 7);
                self.bits += 1;
                if self.bits == 8 {
                    self.bits = 0;
                    Some(self.shift)
                } else {
                    None
                }
            }
        }
    }

    /// Drive one bit, returning true when `tx` was latched
    fn transmit(&mut self, tx: Option<u8>) -> bool {
        let mut latched = false;
        if self.bits == 0 {
            match tx {
                Some(byte) => {
                    self.shift = byte;
                    self.bits = 8;
                    latched = true;
                }
                None if self.ones == MAX_ONES => {
                    self.level = self.level.toggled();
                    self.drive = self.level;
                    self.state = CodecState::TxEopStuff;
                    return false;
                }
                None => {
                    self.drive = LineState::Se0;
                    self.state = CodecState::TxEop0;
                    return false;
                }
            }
        }

        if self.ones == MAX_ONES {
            self.ones = 0;
            self.level = self.level.toggled();
        } else {
            let one = self.shift & 1 != 0;
            self.shift >>= 1;
            self.bits -= 1;
            if one {
                self.ones += 1;
            } else {
                self.ones = 0;
                self.level = self.level.toggled();
            }
        }
        self.drive = self.level;
        latched
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}
