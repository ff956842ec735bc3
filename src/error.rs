use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong between the host and the device.
#[derive(Debug, Error)]
pub enum Error {
	/// The port reported an OS-level error distinct from a timeout.
	#[error("serial I/O error: {0}")]
	Io(#[from] io::Error),

	/// Opening or configuring the serial port failed.
	#[error("serial port error: {0}")]
	Port(#[from] serialport::Error),

	/// The requested baud rate is not one the device side supports.
	#[error("unsupported baud rate {0}")]
	InvalidBaud(u32),

	/// A bounded read returned no byte.
	#[error("timed out waiting for a byte")]
	Timeout,

	/// The number of communication errors exceeded the retransmit
	/// budget of a single transfer.
	#[error("too many communication errors")]
	ExhaustedRetries,

	/// Sender and receiver lost sequence sync; the session is
	/// unrecoverable.
	#[error("transfer canceled: sequence numbers out of sync")]
	Canceled,

	/// The receive buffer cannot hold the next block.
	#[error("receive buffer too small for the next block")]
	BufferTooSmall,

	/// The device answered with a response type that does not match
	/// the issued request.
	#[error("unexpected response type {got:#010x} (expected {expected:#010x})")]
	UnexpectedResponse { expected: u32, got: u32 },

	/// The device answered with a type tag outside the protocol.
	#[error("unrecognized response type {0:#010x}")]
	UnknownResponse(u32),

	/// A response declared more payload than was actually received.
	#[error("response shorter than its declared payload")]
	ShortResponse,

	/// A payload is larger than its receiving buffer allows.
	#[error("payload length out of bounds")]
	LengthOverflow,

	/// The device reported a DFU error condition.
	#[error("device reported DFU error status {0:#04x}")]
	DeviceStatus(u8),
}
