//! The QDA request/response layer.
//!
//! QDA (the device-agent protocol) exposes a DFU-class command
//! surface over a serial tunnel. Every operation is one strict round
//! trip: the request is encoded into the shared exchange buffer and
//! shipped as a complete XMODEM package, then the response package is
//! collected into the same buffer, type-checked and unpacked. There
//! is no pipelining and no reentrancy.

pub mod packets;

use log::{debug, warn};

use crate::dfu::{DeviceDescriptor, DfuDescriptor, DfuStatus};
use crate::error::{Error, Result};
use crate::serial::SerialLine;
use crate::xmodem::Xmodem;

use packets::{tag, Request, Response};

/// Size of the exchange buffer shared by requests and responses.
/// Large enough for any QDA message plus framing.
pub const BUF_SIZE: usize = 8192;

/// The most data one download request can carry: the buffer minus the
/// type tag and the fixed part of the download payload.
pub const MAX_DNLOAD_LEN: usize = BUF_SIZE - 4 - 4;

/// How QDA packages move: one full send, one full receive, plus the
/// out-of-band detach line. The real implementation speaks XMODEM
/// over a serial port; tests substitute mocks.
pub trait Transport {
	/// Ship one request package.
	fn send(&mut self, data: &[u8]) -> Result<usize>;

	/// Collect one response package into `buf`, returning the number
	/// of bytes received. The transport may round the count up to a
	/// multiple of its block size; the codec consumes only what the
	/// response type declares.
	fn receive(&mut self, buf: &mut [u8]) -> Result<usize>;

	/// Reset the board into DFU mode without touching the data
	/// lines.
	fn detach(&mut self) -> Result<()>;
}

/// The production transport: XMODEM-CRC over a serial line.
pub struct XmodemTransport<L: SerialLine> {
	line: L,
	xmodem: Xmodem,
}

impl<L: SerialLine> XmodemTransport<L> {
	pub fn new(line: L) -> Self {
		XmodemTransport { line, xmodem: Xmodem::new() }
	}
}

impl<L: SerialLine> Transport for XmodemTransport<L> {
	fn send(&mut self, data: &[u8]) -> Result<usize> {
		self.xmodem.transmit(&mut self.line, data)
	}

	fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
		self.xmodem.receive(&mut self.line, buf)
	}

	fn detach(&mut self) -> Result<()> {
		self.line.pulse_detach()
	}
}

fn mismatch(expected: u32, got: &Response) -> Error {
	warn!(
		"expected response {:#010x}, device sent {:#010x}",
		expected,
		got.type_tag()
	);
	Error::UnexpectedResponse { expected, got: got.type_tag() }
}

/// A QDA session.
pub struct Qda<T: Transport> {
	transport: T,
	/// Exchange scratch, reused for the outgoing request and the
	/// incoming response of every round trip.
	buf: Box<[u8]>,
}

impl<T: Transport> Qda<T> {
	pub fn new(transport: T) -> Self {
		Qda {
			transport,
			buf: vec![0; BUF_SIZE].into_boxed_slice(),
		}
	}

	/// Tear down the session and hand back the transport.
	pub fn into_transport(self) -> T {
		self.transport
	}

	/// One request/response round trip through the shared buffer.
	fn exchange(&mut self, req: &Request<'_>) -> Result<Response> {
		let n = req.encode(&mut self.buf);
		debug!(
			"exchange: request {:#010x}, {} bytes",
			req.type_tag(),
			n
		);
		self.transport.send(&self.buf[.. n])?;
		let m = self.transport.receive(&mut self.buf)?;
		Response::decode(&self.buf[.. m])
	}

	fn expect_ack(&mut self, req: &Request<'_>) -> Result<()> {
		match self.exchange(req)? {
			Response::Ack => Ok(()),
			other => Err(mismatch(tag::ACK, &other)),
		}
	}

	/// Reset the device agent.
	pub fn reset(&mut self) -> Result<()> {
		self.expect_ack(&Request::Reset)
	}

	/// Query the device identity.
	pub fn device_descriptor(&mut self) -> Result<DeviceDescriptor> {
		match self.exchange(&Request::DevDesc)? {
			Response::DevDesc {
				id_vendor,
				id_product,
				bcd_device,
			} => Ok(DeviceDescriptor {
				vendor: id_vendor,
				product: id_product,
				bcd_device,
			}),
			other => {
				Err(mismatch(tag::DEV_DESC_RESP, &other))
			}
		}
	}

	/// Query the DFU functional descriptor.
	pub fn dfu_descriptor(&mut self) -> Result<DfuDescriptor> {
		match self.exchange(&Request::DfuDesc)? {
			Response::DfuDesc {
				num_alt_settings,
				bm_attributes,
				detach_timeout,
				transfer_size,
				bcd_dfu_ver,
			} => Ok(DfuDescriptor {
				num_alt_settings,
				bm_attributes,
				detach_timeout,
				transfer_size,
				bcd_dfu_version: bcd_dfu_ver,
			}),
			other => {
				Err(mismatch(tag::DFU_DESC_RESP, &other))
			}
		}
	}

	/// Select the alternate setting, i.e. which memory region the
	/// following transfers target.
	pub fn set_alt_setting(&mut self, alt: u8) -> Result<()> {
		self.expect_ack(&Request::SetAltSetting { alt })
	}

	/// Reset the board into DFU mode.
	///
	/// No QDA packet is exchanged: the transport pulses the
	/// hardware detach line instead.
	pub fn detach(&mut self) -> Result<()> {
		debug!("detach: pulsing reset line");
		self.transport.detach()
	}

	/// Write one firmware block to the device.
	pub fn download(
		&mut self,
		block_num: u16,
		data: &[u8],
	) -> Result<()> {
		if (data.len() > MAX_DNLOAD_LEN) {
			return Err(Error::LengthOverflow);
		}
		self.expect_ack(&Request::Dnload { block_num, data })
	}

	/// Read one firmware block from the device into `out`. The
	/// device is asked for at most `out.len()` bytes; the number
	/// actually written is returned, and a short count means the
	/// image is exhausted.
	pub fn upload(
		&mut self,
		block_num: u16,
		out: &mut [u8],
	) -> Result<usize> {
		let max_data_len =
			out.len().min(u16::MAX as usize) as u16;
		let req = Request::Upload { max_data_len, block_num };
		let data = match self.exchange(&req)? {
			Response::Upload { data } => data,
			other => {
				return Err(mismatch(
					tag::DFU_UPLOAD_RESP,
					&other,
				))
			}
		};
		if (data.len() > max_data_len as usize) {
			warn!(
				"upload: device sent {} bytes, asked for \
				 at most {}",
				data.len(),
				max_data_len
			);
			return Err(Error::LengthOverflow);
		}
		out[.. data.len()].copy_from_slice(&data);

		Ok(data.len())
	}

	/// Poll the device's DFU status triple.
	pub fn status(&mut self) -> Result<DfuStatus> {
		match self.exchange(&Request::GetStatus)? {
			Response::GetStatus {
				poll_timeout,
				status,
				state,
			} => Ok(DfuStatus { status, state, poll_timeout }),
			other => {
				Err(mismatch(tag::DFU_GETSTATUS_RESP, &other))
			}
		}
	}

	/// Clear an error condition, returning the device to dfuIDLE.
	pub fn clear_status(&mut self) -> Result<()> {
		self.expect_ack(&Request::ClrStatus)
	}

	/// Query the bare DFU state byte.
	pub fn state(&mut self) -> Result<u8> {
		match self.exchange(&Request::GetState)? {
			Response::GetState { state } => Ok(state),
			other => {
				Err(mismatch(tag::DFU_GETSTATE_RESP, &other))
			}
		}
	}

	/// Abort an ongoing transfer, returning the device to dfuIDLE.
	pub fn abort(&mut self) -> Result<()> {
		self.expect_ack(&Request::Abort)
	}
}
