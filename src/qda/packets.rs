//! The QDA wire format.
//!
//! A QDA packet is a 32-bit little-endian type tag followed by a
//! packed, type-determined payload. Requests and responses are
//! modelled as tagged variants with byte-exact encode/decode; nothing
//! here overlays structs on raw bytes.

use crate::error::{Error, Result};

/// Packet type tags. The high half identifies the agent, the low half
/// the operation; responses set bit 15.
pub mod tag {
	/* Host requests */
	pub const RESET: u32 = 0x4D55_0000;
	pub const DEV_DESC_REQ: u32 = 0x4D55_0005;
	pub const DFU_DESC_REQ: u32 = 0x4D55_01FF;
	pub const DFU_SET_ALT_SETTING: u32 = 0x4D55_01FE;
	/// Defined by the protocol but never sent: detach is performed
	/// out of band through the RTS line.
	pub const DFU_DETACH: u32 = 0x4D55_0100;
	pub const DFU_DNLOAD_REQ: u32 = 0x4D55_0101;
	pub const DFU_UPLOAD_REQ: u32 = 0x4D55_0102;
	pub const DFU_GETSTATUS_REQ: u32 = 0x4D55_0103;
	pub const DFU_CLRSTATUS: u32 = 0x4D55_0104;
	pub const DFU_GETSTATE_REQ: u32 = 0x4D55_0105;
	pub const DFU_ABORT: u32 = 0x4D55_0106;

	/* Device responses */
	pub const ATTACH: u32 = 0x4D55_8001;
	pub const DETACH: u32 = 0x4D55_8002;
	pub const ACK: u32 = 0x4D55_8003;
	pub const STALL: u32 = 0x4D55_8004;
	pub const DEV_DESC_RESP: u32 = 0x4D55_8005;
	pub const DFU_DESC_RESP: u32 = 0x4D55_81FF;
	pub const DFU_UPLOAD_RESP: u32 = 0x4D55_8102;
	pub const DFU_GETSTATUS_RESP: u32 = 0x4D55_8103;
	pub const DFU_GETSTATE_RESP: u32 = 0x4D55_8105;
}

/// A host-to-device request.
#[derive(Debug, Clone, Copy)]
pub enum Request<'a> {
	Reset,
	DevDesc,
	DfuDesc,
	SetAltSetting { alt: u8 },
	Dnload { block_num: u16, data: &'a [u8] },
	Upload { max_data_len: u16, block_num: u16 },
	GetStatus,
	ClrStatus,
	GetState,
	Abort,
}

impl Request<'_> {
	pub fn type_tag(&self) -> u32 {
		match self {
			Request::Reset => tag::RESET,
			Request::DevDesc => tag::DEV_DESC_REQ,
			Request::DfuDesc => tag::DFU_DESC_REQ,
			Request::SetAltSetting { .. } => {
				tag::DFU_SET_ALT_SETTING
			}
			Request::Dnload { .. } => tag::DFU_DNLOAD_REQ,
			Request::Upload { .. } => tag::DFU_UPLOAD_REQ,
			Request::GetStatus => tag::DFU_GETSTATUS_REQ,
			Request::ClrStatus => tag::DFU_CLRSTATUS,
			Request::GetState => tag::DFU_GETSTATE_REQ,
			Request::Abort => tag::DFU_ABORT,
		}
	}

	/// Serialize into `buf` and return the number of bytes written.
	///
	/// `buf` must be large enough for the tag plus the payload; the
	/// facade guarantees this by bounding download lengths before
	/// encoding.
	pub fn encode(&self, buf: &mut [u8]) -> usize {
		buf[0 .. 4].copy_from_slice(&self.type_tag().to_le_bytes());
		let mut n = 4;
		match *self {
			Request::SetAltSetting { alt } => {
				buf[n] = alt;
				n += 1;
			}
			Request::Dnload { block_num, data } => {
				let len = data.len() as u16;
				buf[n .. n + 2]
					.copy_from_slice(&len.to_le_bytes());
				buf[n + 2 .. n + 4].copy_from_slice(
					&block_num.to_le_bytes(),
				);
				n += 4;
				buf[n .. n + data.len()]
					.copy_from_slice(data);
				n += data.len();
			}
			Request::Upload { max_data_len, block_num } => {
				buf[n .. n + 2].copy_from_slice(
					&max_data_len.to_le_bytes(),
				);
				buf[n + 2 .. n + 4].copy_from_slice(
					&block_num.to_le_bytes(),
				);
				n += 4;
			}
			_ => (),
		}

		n
	}
}

/// A device-to-host response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
	Attach,
	Detach,
	Ack,
	Stall,
	DevDesc {
		id_vendor: u16,
		id_product: u16,
		bcd_device: u16,
	},
	DfuDesc {
		num_alt_settings: u8,
		bm_attributes: u8,
		detach_timeout: u16,
		transfer_size: u16,
		bcd_dfu_ver: u16,
	},
	Upload { data: Vec<u8> },
	GetStatus { poll_timeout: u32, status: u8, state: u8 },
	GetState { state: u8 },
}

impl Response {
	pub fn type_tag(&self) -> u32 {
		match self {
			Response::Attach => tag::ATTACH,
			Response::Detach => tag::DETACH,
			Response::Ack => tag::ACK,
			Response::Stall => tag::STALL,
			Response::DevDesc { .. } => tag::DEV_DESC_RESP,
			Response::DfuDesc { .. } => tag::DFU_DESC_RESP,
			Response::Upload { .. } => tag::DFU_UPLOAD_RESP,
			Response::GetStatus { .. } => {
				tag::DFU_GETSTATUS_RESP
			}
			Response::GetState { .. } => tag::DFU_GETSTATE_RESP,
		}
	}

	/// Deserialize a response from `buf`.
	///
	/// The transport pads transfers to a multiple of 128 bytes, so
	/// `buf` is usually longer than the message: exactly the layout
	/// the type tag declares is consumed and the rest is ignored. A
	/// payload that claims more bytes than `buf` holds is an error.
	pub fn decode(buf: &[u8]) -> Result<Response> {
		let mut r = Reader { buf, pos: 0 };

		let resp = match r.u32()? {
			tag::ATTACH => Response::Attach,
			tag::DETACH => Response::Detach,
			tag::ACK => Response::Ack,
			tag::STALL => Response::Stall,
			tag::DEV_DESC_RESP => Response::DevDesc {
				id_vendor: r.u16()?,
				id_product: r.u16()?,
				bcd_device: r.u16()?,
			},
			tag::DFU_DESC_RESP => Response::DfuDesc {
				num_alt_settings: r.u8()?,
				bm_attributes: r.u8()?,
				detach_timeout: r.u16()?,
				transfer_size: r.u16()?,
				bcd_dfu_ver: r.u16()?,
			},
			tag::DFU_UPLOAD_RESP => {
				let len = r.u16()? as usize;
				Response::Upload {
					data: r.bytes(len)?.to_vec(),
				}
			}
			tag::DFU_GETSTATUS_RESP => Response::GetStatus {
				poll_timeout: r.u32()?,
				status: r.u8()?,
				state: r.u8()?,
			},
			tag::DFU_GETSTATE_RESP => Response::GetState {
				state: r.u8()?,
			},
			other => {
				return (Err(Error::UnknownResponse(other)))
			}
		};

		Ok(resp)
	}
}

/// Little-endian field reader over a response buffer.
struct Reader<'a> {
	buf: &'a [u8],
	pos: usize,
}

impl<'a> Reader<'a> {
	fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
		if (self.buf.len() - self.pos < n) {
			return Err(Error::ShortResponse);
		}
		let b = &self.buf[self.pos .. self.pos + n];
		self.pos += n;
		Ok(b)
	}

	fn u8(&mut self) -> Result<u8> {
		Ok(self.bytes(1)?[0])
	}

	fn u16(&mut self) -> Result<u16> {
		let b = self.bytes(2)?;
		Ok(u16::from_le_bytes([b[0], b[1]]))
	}

	fn u32(&mut self) -> Result<u32> {
		let b = self.bytes(4)?;
		Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
	}
}
