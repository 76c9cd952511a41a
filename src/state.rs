//! Static state shared by the application and protocol contexts

use core::sync::atomic::{AtomicBool, Ordering};

use crate::{
    buffer::{Consumer, Producer, RingBuffer},
    status::{DeviceStatus, Registers},
};
use usb_device::UsbError;

/// Buffers and status shared by the two execution contexts.
///
/// Each device needs one `SerialState`. Allocate a `static` object, and split
/// it once into the application half ([`Serial`]) and the protocol half
/// ([`Pipes`]). Hand the pipes to the
/// [`EndpointEngine`](crate::endpoint::EndpointEngine).
///
/// ```
/// use soft_usbd::SerialState;
///
/// static STATE: SerialState<1024, 1024> = SerialState::new();
///
/// let (serial, pipes) = STATE.split().unwrap();
/// assert!(STATE.split().is_none());
/// ```
///
/// `RX` holds bytes from the host, `TX` holds bytes for the host. Both must
/// be powers of two. An OUT transaction is only accepted when the RX buffer
/// has room for a full packet plus its CRC, so `RX` should be at least 128
/// for a full speed device, and 1024 for a high speed device.
pub struct SerialState<const RX: usize, const TX: usize> {
    rx: RingBuffer<RX>,
    tx: RingBuffer<TX>,
    registers: Registers,
    taken: AtomicBool,
}

impl<const RX: usize, const TX: usize> SerialState<RX, TX> {
    pub const fn new() -> Self {
        Self {
            rx: RingBuffer::new(),
            tx: RingBuffer::new(),
            registers: Registers::new(),
            taken: AtomicBool::new(false),
        }
    }

    /// Acquire both halves.
    ///
    /// Returns `None` if the state was already split.
    pub fn split(&self) -> Option<(Serial<'_>, Pipes<'_>)> {
        if self.taken.swap(true, Ordering::SeqCst) {
            return None;
        }
        let (rx_producer, rx_consumer) = self.rx.split()?;
        let (tx_producer, tx_consumer) = self.tx.split()?;
        Some((
            Serial {
                rx: rx_consumer,
                tx: tx_producer,
                registers: &self.registers,
            },
            Pipes {
                rx: rx_producer,
                tx: tx_consumer,
                registers: &self.registers,
            },
        ))
    }
}

impl<const RX: usize, const TX: usize> Default for SerialState<RX, TX> {
    fn default() -> Self {
        Self::new()
    }
}

/// The protocol context's half of a [`SerialState`]
///
/// Owns the RX head and the TX tail.
pub struct Pipes<'a> {
    pub(crate) rx: Producer<'a>,
    pub(crate) tx: Consumer<'a>,
    pub(crate) registers: &'a Registers,
}

/// The application context's half of a [`SerialState`]
///
/// Owns the RX tail and the TX head. Reads return bytes received from the
/// host; writes queue bytes for the host.
pub struct Serial<'a> {
    rx: Consumer<'a>,
    tx: Producer<'a>,
    registers: &'a Registers,
}

impl Serial<'_> {
    /// Read received bytes into `buffer`
    ///
    /// Returns the number of bytes read, or `WouldBlock` if nothing is
    /// available.
    pub fn read(&mut self, buffer: &mut [u8]) -> Result<usize, UsbError> {
        if buffer.is_empty() {
            return Ok(0);
        }
        match self.rx.read(buffer) {
            0 => Err(UsbError::WouldBlock),
            read => Ok(read),
        }
    }

    /// Queue `buffer` for the host
    ///
    /// Returns the number of bytes queued, or `WouldBlock` if the transmit
    /// buffer is full.
    pub fn write(&mut self, buffer: &[u8]) -> Result<usize, UsbError> {
        if buffer.is_empty() {
            return Ok(0);
        }
        match self.tx.write(buffer) {
            0 => Err(UsbError::WouldBlock),
            written => Ok(written),
        }
    }

    /// Take one received byte, if valid
    pub fn read_byte(&mut self) -> Option<u8> {
        self.rx.pop()
    }

    /// Offer one byte for the host
    ///
    /// Returns `false` if the byte wasn't accepted.
    pub fn write_byte(&mut self, byte: u8) -> bool {
        self.tx.push(byte)
    }

    /// Returns the number of received bytes waiting to be read
    pub fn rx_len(&self) -> usize {
        self.rx.len()
    }

    /// Returns the number of bytes that can be queued right now
    pub fn tx_free(&self) -> usize {
        self.tx.free()
    }

    /// Hold back (`true`) or release (`false`) new IN packets
    ///
    /// While held, the device keeps answering NAK instead of starting a
    /// packet from a partially filled transmit buffer. Use it to batch a
    /// burst of writes into full packets. Retransmissions, and a zero length
    /// packet owed after a full packet, are not held back.
    pub fn set_hold(&mut self, hold: bool) {
        self.registers.set_hold(hold);
    }

    pub fn is_held(&self) -> bool {
        self.registers.hold()
    }

    /// Returns the latest device status
    pub fn status(&self) -> DeviceStatus {
        self.registers.status()
    }
}
