//! Byte-level serial access consumed by the protocol layers.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, trace};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::error::{Error, Result};

/// Baud rates the device side understands.
pub const SUPPORTED_BAUD_RATES: [u32; 8] = [
	1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200,
];

/// How long the RTS line is held asserted to reset the board.
pub const DETACH_PULSE: Duration = Duration::from_millis(100);

/// One byte in, one byte out, and control over the read timeout: this
/// is everything the protocol layers are allowed to assume about the
/// port. The detach pulse rides along because it lives on the same
/// piece of hardware, but it never touches the data lines.
pub trait SerialLine {
	/// Read one byte, blocking for at most the configured timeout.
	///
	/// Fails with [`Error::Timeout`] if no byte arrives in time and
	/// with [`Error::Io`] on any other transport problem.
	fn read_byte(&mut self) -> Result<u8>;

	/// Queue one byte for transmission.
	fn write_byte(&mut self, b: u8) -> Result<()>;

	/// Set the maximum blocking time for subsequent reads.
	fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

	/// Pulse the RTS modem-control line: assert, hold for
	/// [`DETACH_PULSE`], de-assert. The board wires RTS to its reset
	/// trigger and comes back up in DFU mode.
	fn pulse_detach(&mut self) -> Result<()>;
}

/// A [`SerialLine`] over a real serial port.
///
/// The settings in force right after [`open`] are saved so the line
/// can be put back into that state when the session ends, on every
/// exit path including a signal-driven one.
pub struct PortLine {
	port: Option<Box<dyn SerialPort>>,
	/// The read timeout configured at open, restored on close
	/// together with a released RTS line.
	initial_timeout: Duration,
}

impl PortLine {
	pub fn new(port: Box<dyn SerialPort>) -> Self {
		let initial_timeout = port.timeout();
		PortLine { port: Some(port), initial_timeout }
	}

	fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
		match self.port.as_mut() {
			Some(p) => Ok(p),
			None => Err(Error::Io(io::Error::new(
				io::ErrorKind::NotConnected,
				"serial port already closed",
			))),
		}
	}

	/// Put the line back the way [`open`] configured it (standard
	/// timeout, RTS released) and close the handle. Safe to call
	/// more than once; byte operations afterwards fail.
	pub fn restore_and_close(&mut self) -> Result<()> {
		if let Some(mut port) = self.port.take() {
			debug!("restoring line state and closing port");
			port.set_timeout(self.initial_timeout)?;
			port.write_request_to_send(false)?;
		}
		Ok(())
	}
}

impl Drop for PortLine {
	fn drop(&mut self) {
		let _ = self.restore_and_close();
	}
}

impl SerialLine for PortLine {
	fn read_byte(&mut self) -> Result<u8> {
		let mut buf = [0u8];
		match self.port()?.read(&mut buf) {
			Ok(1) => Ok(buf[0]),
			Ok(_) => Err(Error::Timeout),
			Err(ref e) if e.kind() == io::ErrorKind::TimedOut => {
				Err(Error::Timeout)
			}
			Err(e) => Err(Error::Io(e)),
		}
	}

	fn write_byte(&mut self, b: u8) -> Result<()> {
		self.port()?.write_all(&[b])?;
		Ok(())
	}

	fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
		trace!("set_timeout: {:?}", timeout);
		self.port()?.set_timeout(timeout)?;
		Ok(())
	}

	fn pulse_detach(&mut self) -> Result<()> {
		debug!("pulsing RTS for {:?}", DETACH_PULSE);
		let port = self.port()?;
		port.write_request_to_send(true)?;
		thread::sleep(DETACH_PULSE);
		port.write_request_to_send(false)?;
		Ok(())
	}
}

/// One open [`PortLine`] behind a clonable handle, so the interrupt
/// handler installed after open reaches the same port the protocol
/// stack is using. The core stays single-threaded; the handler is
/// the only other party and runs at most once.
#[derive(Clone)]
pub struct SharedPort {
	inner: Arc<Mutex<PortLine>>,
}

impl SharedPort {
	pub fn new(line: PortLine) -> Self {
		SharedPort { inner: Arc::new(Mutex::new(line)) }
	}

	fn lock(&self) -> MutexGuard<'_, PortLine> {
		/* A poisoned lock still holds the port; take it anyway */
		self.inner.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Restore the line and close the handle; see
	/// [`PortLine::restore_and_close`].
	pub fn restore_and_close(&self) -> Result<()> {
		self.lock().restore_and_close()
	}
}

impl SerialLine for SharedPort {
	fn read_byte(&mut self) -> Result<u8> {
		self.lock().read_byte()
	}

	fn write_byte(&mut self, b: u8) -> Result<()> {
		self.lock().write_byte(b)
	}

	fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
		self.lock().set_timeout(timeout)
	}

	fn pulse_detach(&mut self) -> Result<()> {
		self.lock().pulse_detach()
	}
}

/// Open `path` at `baud`: 8 data bits, no parity, one stop bit, no
/// flow control. The read timeout starts at 3 s; the protocol layers
/// adjust it as they go.
pub fn open(path: &str, baud: u32) -> Result<PortLine> {
	if !SUPPORTED_BAUD_RATES.contains(&baud) {
		return Err(Error::InvalidBaud(baud));
	}

	debug!("opening {} at {} baud", path, baud);
	let port = serialport::new(path, baud)
		.data_bits(DataBits::Eight)
		.parity(Parity::None)
		.stop_bits(StopBits::One)
		.flow_control(FlowControl::None)
		.timeout(Duration::from_millis(3000))
		.open()?;

	Ok(PortLine::new(port))
}
