//! Status and control words shared by the two execution contexts
//!
//! `STATUS` is written only by the protocol context (the endpoint engine),
//! once per tick. `CONTROL` is written only by the application context.
//! Both are read through the RAL macros.

#![allow(non_snake_case, non_upper_case_globals)]

use crate::{config::Speed, ral, ral::AtomicRegister, transaction::Halt};

/// The shared register block
pub struct Registers {
    pub STATUS: AtomicRegister,
    pub CONTROL: AtomicRegister,
}

impl Registers {
    pub const fn new() -> Self {
        Registers {
            STATUS: AtomicRegister::new(0),
            CONTROL: AtomicRegister::new(0),
        }
    }

    /// Decode the status word
    pub fn status(&self) -> DeviceStatus {
        let (high_speed, suspended, configured, online, halted) = ral::read_reg!(
            crate::status,
            self,
            STATUS,
            HIGH_SPEED,
            SUSPENDED,
            CONFIGURED,
            ONLINE,
            HALTED
        );
        DeviceStatus {
            speed: if high_speed != 0 {
                Speed::High
            } else {
                Speed::Full
            },
            suspended: suspended != 0,
            configured: configured != 0,
            online: online != 0,
            halted: Halt::from_bits_truncate(halted as u8),
        }
    }

    /// Indicates if the application is holding back new IN packets
    pub fn hold(&self) -> bool {
        ral::read_reg!(crate::status, self, CONTROL, HOLD == 1)
    }

    pub fn set_hold(&self, hold: bool) {
        ral::modify_reg!(crate::status, self, CONTROL, HOLD: hold as u32);
    }
}

/// A snapshot of the device status outputs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceStatus {
    /// Negotiated bus speed
    pub speed: Speed,
    /// The bus is suspended
    pub suspended: bool,
    /// The host selected the configuration
    pub configured: bool,
    /// Configured and not suspended
    pub online: bool,
    /// Endpoints currently halted
    pub halted: Halt,
}

pub mod STATUS {
    pub mod HIGH_SPEED {
        pub const offset: u32 = 0;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod SUSPENDED {
        pub const offset: u32 = 1;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod CONFIGURED {
        pub const offset: u32 = 2;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod ONLINE {
        pub const offset: u32 = 3;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    /// Same bit order as [`Halt`](crate::transaction::Halt)
    pub mod HALTED {
        pub const offset: u32 = 8;
        pub const mask: u32 = 0b111 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
}

pub mod CONTROL {
    pub mod HOLD {
        pub const offset: u32 = 0;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
}

#[cfg(test)]
mod test {
    use super::Registers;
    use crate::{config::Speed, ral, transaction::Halt};

    #[test]
    fn status_fields() {
        let regs = Registers::new();
        ral::write_reg!(super, &regs, STATUS, HIGH_SPEED: 1, ONLINE: 1, HALTED: 0b101);
        assert_eq!(regs.STATUS.read(), 0b1001 | (0b101 << 8));

        let status = regs.status();
        assert_eq!(status.speed, Speed::High);
        assert!(status.online);
        assert!(!status.configured);
        assert!(!status.suspended);
        assert_eq!(status.halted, Halt::DATA_OUT | Halt::NOTIFY_IN);
    }

    #[test]
    fn halted_field_is_masked() {
        let regs = Registers::new();
        ral::write_reg!(super, &regs, STATUS, HALTED: u32::MAX);
        assert_eq!(regs.STATUS.read(), 0b111 << 8);
    }

    #[test]
    fn hold() {
        let regs = Registers::new();
        assert!(!regs.hold());
        regs.set_hold(true);
        assert!(regs.hold());
        assert_eq!(regs.CONTROL.read(), 1);
        regs.set_hold(false);
        assert!(!regs.hold());
    }
}
