//! Device configuration

use usb_device::device::UsbVidPid;

/// USB full / high speed setting.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Speed {
    /// Full speed, 12 Mbit/s.
    Full,
    /// High speed, 480 Mbit/s.
    ///
    /// A high-speed capable device still enumerates on a full
    /// speed host, so use this setting for the most flexibility.
    #[default]
    High,
}

impl Speed {
    /// Returns the bulk endpoint max packet size at this speed
    pub const fn max_packet_size(self) -> usize {
        match self {
            Speed::Full => 64,
            Speed::High => 512,
        }
    }

    /// Returns the other speed
    pub const fn other(self) -> Speed {
        match self {
            Speed::Full => Speed::High,
            Speed::High => Speed::Full,
        }
    }
}

/// Application strings reported in the string descriptors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Strings {
    pub manufacturer: &'static str,
    pub product: &'static str,
    pub serial: &'static str,
}

/// Static device configuration
///
/// Build one with [`new()`](Config::new) and the builder methods, then
/// hand it to [`DescriptorTable::new()`](crate::descriptor::DescriptorTable::new).
///
/// ```
/// use soft_usbd::{Config, Speed};
/// use usb_device::device::UsbVidPid;
///
/// const CONFIG: Config = Config::new(UsbVidPid(0x1d50, 0x6130))
///     .strings("Acme", "Serial bridge", "0001")
///     .max_power(100)
///     .max_speed(Speed::Full);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct Config {
    pub(crate) vid: u16,
    pub(crate) pid: u16,
    pub(crate) device_release: u16,
    pub(crate) strings: Option<Strings>,
    pub(crate) max_power_ma: u16,
    pub(crate) self_powered: bool,
    pub(crate) max_speed: Speed,
}

impl Config {
    /// Create a bus powered, high-speed capable configuration without strings
    pub const fn new(vid_pid: UsbVidPid) -> Self {
        Config {
            vid: vid_pid.0,
            pid: vid_pid.1,
            device_release: 0x0100,
            strings: None,
            max_power_ma: 100,
            self_powered: false,
            max_speed: Speed::High,
        }
    }

    /// Set the manufacturer, product and serial number strings
    ///
    /// Each string is limited to 126 UTF-16 code units.
    pub const fn strings(
        mut self,
        manufacturer: &'static str,
        product: &'static str,
        serial: &'static str,
    ) -> Self {
        self.strings = Some(Strings {
            manufacturer,
            product,
            serial,
        });
        self
    }

    /// Set the BCD device release number
    pub const fn device_release(mut self, bcd: u16) -> Self {
        self.device_release = bcd;
        self
    }

    /// Set the maximum bus current, in mA
    ///
    /// Saturates at 510 mA.
    pub const fn max_power(mut self, ma: u16) -> Self {
        self.max_power_ma = if ma > 510 { 510 } else { ma };
        self
    }

    pub const fn self_powered(mut self, self_powered: bool) -> Self {
        self.self_powered = self_powered;
        self
    }

    /// Set the fastest speed the device advertises
    ///
    /// A `Speed::Full` device carries no device qualifier and no
    /// other-speed configuration.
    pub const fn max_speed(mut self, speed: Speed) -> Self {
        self.max_speed = speed;
        self
    }

    /// Indicates if the device advertises high-speed operation
    pub const fn high_speed_capable(&self) -> bool {
        matches!(self.max_speed, Speed::High)
    }
}
