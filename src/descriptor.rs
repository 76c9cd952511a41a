//! USB descriptor table
//!
//! The table is built once from a [`Config`], and never changes. The control
//! endpoint asks for a descriptor by (type, index), and the table answers with
//! an (offset, length) range for the current bus speed. Unsupported requests
//! answer with a zero length.
//!
//! The two configuration descriptors differ only in their bulk packet sizes
//! and notify interval. An other-speed-configuration request at one speed is
//! the other speed's configuration descriptor with its type byte patched, and
//! the table holds that patched copy at a fixed offset.

use crate::config::{Config, Speed};
use usb_device::{endpoint::EndpointAddress, UsbDirection, UsbError};

pub use usb_device::descriptor::descriptor_type::{
    CONFIGURATION, DEVICE, ENDPOINT, INTERFACE, STRING,
};

pub const DEVICE_QUALIFIER: u8 = 6;
pub const OTHER_SPEED_CONFIGURATION: u8 = 7;

const CS_INTERFACE: u8 = 0x24;
const CLASS_CDC: u8 = 0x02;
const CLASS_CDC_DATA: u8 = 0x0A;
const CDC_SUBCLASS_ACM: u8 = 0x02;
const CDC_PROTOCOL_AT: u8 = 0x01;
const LANG_ID_EN_US: u16 = 0x0409;

pub const DEVICE_LEN: usize = 18;
pub const DEVICE_QUALIFIER_LEN: usize = 10;
pub const CONFIGURATION_LEN: usize = 67;
/// Maximum UTF-16 code units in a string descriptor
pub const MAX_STRING_CHARS: usize = 126;

/// Control endpoint max packet size, both speeds
pub const MAX_PACKET_SIZE_0: u8 = 64;
/// Notify endpoint max packet size
pub const NOTIFY_PACKET_SIZE: u16 = 16;

const STRING_COUNT: usize = 3;
const TABLE_CAPACITY: usize = DEVICE_LEN
    + DEVICE_QUALIFIER_LEN
    + 4 * CONFIGURATION_LEN
    + 4
    + STRING_COUNT * (2 + 2 * MAX_STRING_CHARS);

/// Data endpoint OUT address (EP1 OUT)
pub fn data_out() -> EndpointAddress {
    EndpointAddress::from_parts(1, UsbDirection::Out)
}

/// Data endpoint IN address (EP1 IN)
pub fn data_in() -> EndpointAddress {
    EndpointAddress::from_parts(1, UsbDirection::In)
}

/// Notify endpoint address (EP2 IN)
pub fn notify_in() -> EndpointAddress {
    EndpointAddress::from_parts(2, UsbDirection::In)
}

/// A descriptor's position in the table
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct DescriptorRange {
    pub offset: u16,
    pub len: u16,
}

impl DescriptorRange {
    /// The answer to an unsupported request
    pub const EMPTY: DescriptorRange = DescriptorRange { offset: 0, len: 0 };

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn end(&self) -> usize {
        self.offset as usize + self.len as usize
    }
}

const fn slot(speed: Speed) -> usize {
    match speed {
        Speed::Full => 0,
        Speed::High => 1,
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Layout {
    device: DescriptorRange,
    qualifier: DescriptorRange,
    /// Indexed by the speed the descriptor describes
    configuration: [DescriptorRange; 2],
    /// Indexed by the current speed
    other_speed: [DescriptorRange; 2],
    strings: [DescriptorRange; 1 + STRING_COUNT],
}

/// Immutable descriptor bytes, and the lookup into them
pub struct DescriptorTable {
    bytes: [u8; TABLE_CAPACITY],
    len: usize,
    layout: Layout,
}

impl DescriptorTable {
    /// Build the table for `config`
    ///
    /// Returns `BufferOverflow` if a string exceeds [`MAX_STRING_CHARS`].
    pub fn new(config: &Config) -> Result<Self, UsbError> {
        let mut table = DescriptorTable {
            bytes: [0; TABLE_CAPACITY],
            len: 0,
            layout: Layout::default(),
        };
        let high_speed = config.high_speed_capable();

        let mut writer = Writer::new(&mut table.bytes);
        table.layout.device = device(&mut writer, config)?;
        if high_speed {
            table.layout.qualifier = device_qualifier(&mut writer)?;
        }

        let full = configuration(&mut writer, config, Speed::Full)?;
        table.layout.configuration[slot(Speed::Full)] = full;
        if high_speed {
            let high = configuration(&mut writer, config, Speed::High)?;
            table.layout.configuration[slot(Speed::High)] = high;
            // Running at high speed, the other speed is full speed, and the
            // other way around.
            table.layout.other_speed[slot(Speed::High)] = writer.patched_copy(full)?;
            table.layout.other_speed[slot(Speed::Full)] = writer.patched_copy(high)?;
        }

        if let Some(strings) = config.strings {
            table.layout.strings[0] =
                writer.write(STRING, &LANG_ID_EN_US.to_le_bytes())?;
            let texts = [strings.manufacturer, strings.product, strings.serial];
            for (range, text) in table.layout.strings[1..].iter_mut().zip(texts) {
                *range = string(&mut writer, text)?;
            }
        }

        table.len = writer.position();
        debug!("DESCRIPTORS {} bytes", table.len);
        Ok(table)
    }

    /// Find the descriptor for (`kind`, `index`) at the current `speed`
    ///
    /// Returns [`DescriptorRange::EMPTY`] for anything the device doesn't
    /// support.
    pub fn lookup(&self, kind: u8, index: u8, speed: Speed) -> DescriptorRange {
        let layout = &self.layout;
        match (kind, index) {
            (DEVICE, 0) => layout.device,
            (CONFIGURATION, 0) => layout.configuration[slot(speed)],
            (STRING, index) => layout
                .strings
                .get(index as usize)
                .copied()
                .unwrap_or(DescriptorRange::EMPTY),
            (DEVICE_QUALIFIER, 0) => layout.qualifier,
            (OTHER_SPEED_CONFIGURATION, 0) => layout.other_speed[slot(speed)],
            _ => DescriptorRange::EMPTY,
        }
    }

    /// Returns the descriptor bytes for (`kind`, `index`) at `speed`
    pub fn get(&self, kind: u8, index: u8, speed: Speed) -> &[u8] {
        self.range(self.lookup(kind, index, speed))
    }

    /// Returns the bytes covered by `range`
    ///
    /// Ranges that fall outside of the table are empty.
    pub fn range(&self, range: DescriptorRange) -> &[u8] {
        self.as_bytes()
            .get(range.offset as usize..range.end())
            .unwrap_or(&[])
    }

    /// Read one table byte, for byte-serial readers
    ///
    /// Reads beyond the table return zero.
    pub fn byte(&self, offset: u16) -> u8 {
        self.as_bytes().get(offset as usize).copied().unwrap_or(0)
    }

    /// Returns the whole table
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

/// Sequential descriptor writer
///
/// Like `usb-device`'s descriptor writer, each descriptor is emitted as
/// length, type, then body.
struct Writer<'a> {
    buf: &'a mut [u8],
    position: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Writer { buf, position: 0 }
    }

    fn position(&self) -> usize {
        self.position
    }

    fn range_from(&self, start: usize) -> DescriptorRange {
        DescriptorRange {
            offset: start as u16,
            len: (self.position - start) as u16,
        }
    }

    fn write(&mut self, descriptor_type: u8, body: &[u8]) -> Result<DescriptorRange, UsbError> {
        let start = self.position;
        let length = body.len() + 2;
        if length > 255 {
            return Err(UsbError::BufferOverflow);
        }
        let dst = self
            .buf
            .get_mut(start..start + length)
            .ok_or(UsbError::BufferOverflow)?;
        dst[0] = length as u8;
        dst[1] = descriptor_type;
        dst[2..].copy_from_slice(body);
        self.position += length;
        Ok(self.range_from(start))
    }

    /// Copy an already written configuration, and patch its type to
    /// other-speed-configuration
    fn patched_copy(&mut self, source: DescriptorRange) -> Result<DescriptorRange, UsbError> {
        let start = self.position;
        let len = source.len as usize;
        if start + len > self.buf.len() {
            return Err(UsbError::BufferOverflow);
        }
        self.buf
            .copy_within(source.offset as usize..source.end(), start);
        self.buf[start + 1] = OTHER_SPEED_CONFIGURATION;
        self.position += len;
        Ok(self.range_from(start))
    }
}

fn device(writer: &mut Writer, config: &Config) -> Result<DescriptorRange, UsbError> {
    let [vid_lo, vid_hi] = config.vid.to_le_bytes();
    let [pid_lo, pid_hi] = config.pid.to_le_bytes();
    let [rel_lo, rel_hi] = config.device_release.to_le_bytes();
    let (manufacturer, product, serial) = if config.strings.is_some() {
        (1, 2, 3)
    } else {
        (0, 0, 0)
    };
    writer.write(
        DEVICE,
        &[
            0x00,
            0x02, // bcdUSB 2.00
            CLASS_CDC,
            0x00, // bDeviceSubClass
            0x00, // bDeviceProtocol
            MAX_PACKET_SIZE_0,
            vid_lo,
            vid_hi,
            pid_lo,
            pid_hi,
            rel_lo,
            rel_hi,
            manufacturer,
            product,
            serial,
            0x01, // bNumConfigurations
        ],
    )
}

fn device_qualifier(writer: &mut Writer) -> Result<DescriptorRange, UsbError> {
    writer.write(
        DEVICE_QUALIFIER,
        &[
            0x00,
            0x02, // bcdUSB 2.00
            CLASS_CDC,
            0x00,
            0x00,
            MAX_PACKET_SIZE_0,
            0x01, // bNumConfigurations
            0x00, // bReserved
        ],
    )
}

/// A CDC-ACM configuration: communication interface with one notify
/// endpoint, data interface with one bulk endpoint in each direction.
fn configuration(
    writer: &mut Writer,
    config: &Config,
    speed: Speed,
) -> Result<DescriptorRange, UsbError> {
    let start = writer.position();
    let [total_lo, total_hi] = (CONFIGURATION_LEN as u16).to_le_bytes();
    let attributes = 0x80 | ((config.self_powered as u8) << 6);
    writer.write(
        CONFIGURATION,
        &[
            total_lo,
            total_hi,
            0x02, // bNumInterfaces
            0x01, // bConfigurationValue
            0x00, // iConfiguration
            attributes,
            (config.max_power_ma / 2) as u8,
        ],
    )?;

    // Communication interface
    writer.write(
        INTERFACE,
        &[
            0x00, // bInterfaceNumber
            0x00, // bAlternateSetting
            0x01, // bNumEndpoints
            CLASS_CDC,
            CDC_SUBCLASS_ACM,
            CDC_PROTOCOL_AT,
            0x00,
        ],
    )?;
    // Header, CDC 1.10
    writer.write(CS_INTERFACE, &[0x00, 0x10, 0x01])?;
    // Call management: no capabilities, data interface 1
    writer.write(CS_INTERFACE, &[0x01, 0x00, 0x01])?;
    // ACM: line coding and control line state
    writer.write(CS_INTERFACE, &[0x02, 0x02])?;
    // Union: master 0, slave 1
    writer.write(CS_INTERFACE, &[0x06, 0x00, 0x01])?;
    let interval = match speed {
        Speed::Full => 0xFF,
        Speed::High => 0x10,
    };
    endpoint(writer, notify_in(), 0x03, NOTIFY_PACKET_SIZE, interval)?;

    // Data interface
    writer.write(
        INTERFACE,
        &[0x01, 0x00, 0x02, CLASS_CDC_DATA, 0x00, 0x00, 0x00],
    )?;
    let max_packet_size = speed.max_packet_size() as u16;
    endpoint(writer, data_out(), 0x02, max_packet_size, 0)?;
    endpoint(writer, data_in(), 0x02, max_packet_size, 0)?;

    let range = writer.range_from(start);
    debug_assert_eq!(range.len as usize, CONFIGURATION_LEN);
    Ok(range)
}

fn endpoint(
    writer: &mut Writer,
    address: EndpointAddress,
    attributes: u8,
    max_packet_size: u16,
    interval: u8,
) -> Result<DescriptorRange, UsbError> {
    let [mps_lo, mps_hi] = max_packet_size.to_le_bytes();
    writer.write(
        ENDPOINT,
        &[address.into(), attributes, mps_lo, mps_hi, interval],
    )
}

fn string(writer: &mut Writer, text: &str) -> Result<DescriptorRange, UsbError> {
    if text.encode_utf16().count() > MAX_STRING_CHARS {
        return Err(UsbError::BufferOverflow);
    }
    let mut body = [0u8; 2 * MAX_STRING_CHARS];
    let mut len = 0;
    for unit in text.encode_utf16() {
        body[len..len + 2].copy_from_slice(&unit.to_le_bytes());
        len += 2;
    }
    writer.write(STRING, &body[..len])
}
