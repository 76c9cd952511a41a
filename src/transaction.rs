//! Transaction-primitive interface
//!
//! Bus reset detection, packet CRC, token and handshake decoding, and the
//! default control endpoint live outside of this crate. They talk to the
//! [`EndpointEngine`](crate::endpoint::EndpointEngine) through the types in
//! this module, once per tick:
//!
//! - transaction strobes are levels, held for the duration of a transaction,
//! - [`Strobes::FIN`] pulses exactly once per successfully handshaked transaction,
//!   on the tick that the transaction ends,
//! - payload bytes move with a synchronous ready / valid handshake.
//!
//! The engine answers with an [`Output`] that is a pure function of its
//! state after the tick.

use crate::config::Speed;

bitflags::bitflags! {
    /// Transaction strobes from the token decoder
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Strobes : u8 {
        const IN = 1 << 0;
        const OUT = 1 << 1;
        const SETUP = 1 << 2;
        const PING = 1 << 3;
        /// Successful handshake
        const FIN = 1 << 4;
    }
}

impl Strobes {
    /// Strobes that mark an ongoing transaction
    pub const TRANSACTION: Strobes = Strobes::IN
        .union(Strobes::OUT)
        .union(Strobes::SETUP)
        .union(Strobes::PING);
}

bitflags::bitflags! {
    /// Responses driven by the engine
    ///
    /// No response to an OUT or PING means ACK.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Response : u8 {
        const NAK = 1 << 0;
        const STALL = 1 << 1;
        /// High speed only: accepted, but no room for another packet
        const NYET = 1 << 2;
        /// A DATA packet follows on the payload handshake
        const SEND = 1 << 3;
    }
}

bitflags::bitflags! {
    /// Halt state, per endpoint direction
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Halt : u8 {
        const DATA_OUT = 1 << 0;
        const DATA_IN = 1 << 1;
        const NOTIFY_IN = 1 << 2;
    }
}

/// Everything the collaborator drives into the engine for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Input {
    /// Endpoint number addressed by the current token
    pub endpoint: u8,
    pub strobes: Strobes,
    /// Toggle of the received DATA packet (DATA1 is `true`)
    pub toggle: bool,
    /// A payload byte for an OUT transaction
    pub rx: Option<u8>,
    /// The collaborator took the byte offered in the previous [`Output::tx`]
    pub tx_ready: bool,
    /// Halt-set pulses from the control endpoint
    pub halt_set: Halt,
    /// Halt-clear pulses from the control endpoint
    pub halt_clear: Halt,
    pub speed: Speed,
    pub configured: bool,
    pub suspended: bool,
    pub bus_reset: bool,
}

impl Input {
    /// A quiet, configured full-speed bus
    pub const fn idle() -> Self {
        Input {
            endpoint: 0,
            strobes: Strobes::empty(),
            toggle: false,
            rx: None,
            tx_ready: false,
            halt_set: Halt::empty(),
            halt_clear: Halt::empty(),
            speed: Speed::Full,
            configured: true,
            suspended: false,
            bus_reset: false,
        }
    }

    /// Assert `strobes` for `endpoint`
    pub const fn token(mut self, endpoint: u8, strobes: Strobes) -> Self {
        self.endpoint = endpoint;
        self.strobes = strobes;
        self
    }

    pub const fn speed(mut self, speed: Speed) -> Self {
        self.speed = speed;
        self
    }
}

/// Everything the engine drives back for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Output {
    pub response: Response,
    /// Toggle for the DATA packet being sent, or expected
    pub toggle: bool,
    /// The next IN payload byte, if any
    pub tx: Option<u8>,
    /// The engine accepts OUT payload bytes
    pub rx_ready: bool,
}

impl Output {
    pub const fn none() -> Self {
        Output {
            response: Response::empty(),
            toggle: false,
            tx: None,
            rx_ready: false,
        }
    }
}
