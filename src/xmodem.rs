//! XMODEM-CRC datagram transport.
//!
//! Each QDA package crosses the wire as one complete XMODEM-CRC
//! session: 128-byte blocks framed with a sequence number and a
//! CRC-16/CCITT, acknowledged block by block, with retransmission and
//! duplicate absorption on top of the raw serial line. Only the CRC
//! variant with 128-byte blocks is spoken; the receiver opens every
//! session with the `'C'` handshake byte.

use std::time::Duration;

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::serial::SerialLine;

/// Payload bytes per XMODEM block.
pub const BLOCK_SIZE: usize = 128;

/// Times the sender retries one packet (or control byte) before the
/// transfer fails. Both ends tune their recovery around this value.
pub const MAX_RETRANSMIT: u32 = 25;

/// Consecutive framing errors the receiver tolerates before the
/// transfer fails.
pub const MAX_RX_ERRORS: u32 = 5;

const SOH: u8 = 0x01;
const EOT: u8 = 0x04;
const ACK: u8 = 0x06;
const NAK: u8 = 0x15;
const CAN: u8 = 0x18;
/// ASCII 'C', the CRC-mode NAK that starts a session.
const CRC: u8 = 0x43;

/// The byte filling the tail of a short final block.
const PAD: u8 = 0x1a;

/// Read timeout during normal flow.
const TIMEOUT_STD: Duration = Duration::from_millis(3000);
/// Read timeout while draining garbage after a framing error.
const TIMEOUT_ERR: Duration = Duration::from_millis(300);

fn calc_crc(data: &[u8]) -> u16 {
	crc16::State::<crc16::XMODEM>::calculate(data)
}

/// Turns timeout errors into `Ok(None)`
fn get_byte<L: SerialLine>(line: &mut L) -> Result<Option<u8>> {
	match line.read_byte() {
		Ok(b) => Ok(Some(b)),
		Err(Error::Timeout) => Ok(None),
		Err(e) => Err(e),
	}
}

/// What one frame read on the receive side amounted to.
enum Frame {
	/// A good in-sequence packet, copied into the caller's buffer.
	Accepted,
	/// A retransmission of the previous packet; payload dropped.
	Duplicate,
	/// The sender signalled end of transmission.
	Eot,
	/// Unrecoverable: the session must be canceled for this reason.
	Cancel(Error),
	/// Recoverable damage: bad start byte, short frame, sequence
	/// field mismatch, or CRC mismatch.
	Damaged,
}

/// The XMODEM engine. Holds the block scratch shared by both transfer
/// directions; one engine serves one serial line.
pub struct Xmodem {
	block: [u8; BLOCK_SIZE],
}

impl Xmodem {
	pub fn new() -> Self {
		Xmodem { block: [PAD; BLOCK_SIZE] }
	}

	/// Receive one package into `buf`.
	///
	/// Opens the session by sending `'C'` and collects blocks until
	/// the sender signals EOT. Returns the number of bytes written,
	/// always a multiple of [`BLOCK_SIZE`]: the real payload length
	/// is the caller's business, and up to 127 trailing bytes are
	/// padding.
	pub fn receive<L: SerialLine>(
		&mut self,
		line: &mut L,
		buf: &mut [u8],
	) -> Result<usize> {
		line.set_timeout(TIMEOUT_STD)?;

		/* XMODEM sequence numbers start from 1 */
		let mut expected_seq: u8 = 1;
		let mut errors = 0;
		let mut count = 0;
		/*
		 * Until the first packet lands, framing errors are NAKed
		 * with 'C' rather than a regular NAK: the session-start
		 * byte doubles as the CRC-mode handshake.
		 */
		let mut nak = CRC;
		let mut reply = CRC;

		debug!("receive: opening session");
		loop {
			trace!("receive: sending 0x{:02x}", reply);
			line.write_byte(reply)?;

			let frame = self.read_frame(
				line,
				expected_seq,
				&mut buf[count ..],
			)?;
			match frame {
				Frame::Accepted => {
					nak = NAK;
					count += BLOCK_SIZE;
					expected_seq =
						expected_seq.wrapping_add(1);
					errors = 0;
					reply = ACK;
				}
				Frame::Duplicate => {
					/*
					 * Duplicates must be acknowledged or
					 * the sender never moves on to the
					 * next packet.
					 */
					reply = ACK;
				}
				Frame::Eot => {
					line.write_byte(ACK)?;
					debug!(
						"receive: EOT after {} bytes",
						count
					);
					return Ok(count);
				}
				Frame::Cancel(e) => {
					line.write_byte(CAN)?;
					warn!("receive: canceled: {}", e);
					return Err(e);
				}
				Frame::Damaged => {
					errors += 1;
					if (errors >= MAX_RX_ERRORS) {
						warn!(
							"receive: {} \
							 consecutive errors, \
							 giving up",
							errors
						);
						return Err(
							Error::ExhaustedRetries,
						);
					}
					reply = nak;
				}
			}
		}
	}

	/// Send one package.
	///
	/// Waits for the receiver's `'C'`, pushes `data` out in 128-byte
	/// blocks (the last one padded if needed), then closes with EOT.
	/// Returns the number of bytes put on the wire including padding,
	/// i.e. `ceil(len / 128) * 128`.
	pub fn transmit<L: SerialLine>(
		&mut self,
		line: &mut L,
		mut data: &[u8],
	) -> Result<usize> {
		line.set_timeout(TIMEOUT_STD)?;

		let mut tries = 0;
		loop {
			match get_byte(line)? {
				Some(CRC) => break,
				Some(b) => trace!(
					"transmit: want 'C', got 0x{:02x}",
					b
				),
				None => trace!("transmit: waiting for 'C'"),
			}
			tries += 1;
			if (tries >= MAX_RETRANSMIT) {
				warn!(
					"transmit: receiver never opened \
					 the session"
				);
				return Err(Error::ExhaustedRetries);
			}
		}

		debug!("transmit: starting, {} bytes", data.len());
		let mut pkt_no: u32 = 1;
		while !data.is_empty() {
			let m = data.len().min(BLOCK_SIZE);
			self.block[.. m].copy_from_slice(&data[.. m]);
			self.block[m ..].fill(PAD);
			self.send_block_with_retry(line, pkt_no as u8)?;
			data = &data[m ..];
			pkt_no += 1;
		}
		self.send_byte_with_retry(line, EOT)?;

		Ok((pkt_no as usize - 1) * BLOCK_SIZE)
	}

	/// Read one frame, validating it against `expected_seq` and
	/// copying an accepted payload into `out`.
	fn read_frame<L: SerialLine>(
		&mut self,
		line: &mut L,
		expected_seq: u8,
		out: &mut [u8],
	) -> Result<Frame> {
		let cmd = match get_byte(line)? {
			Some(b) => b,
			None => return Ok(Frame::Damaged),
		};

		match cmd {
			SOH => (),
			EOT => return Ok(Frame::Eot),
			other => {
				/*
				 * A corrupted or lost SOH. The rest of the
				 * frame may still be in flight; drain it on a
				 * short timeout so our NAK goes out on a
				 * quiet line.
				 */
				trace!(
					"read_frame: unexpected control \
					 byte 0x{:02x}, draining",
					other
				);
				line.set_timeout(TIMEOUT_ERR)?;
				while get_byte(line)?.is_some() {}
				line.set_timeout(TIMEOUT_STD)?;
				return Ok(Frame::Damaged);
			}
		}

		let seq_no = match get_byte(line)? {
			Some(b) => b,
			None => return Ok(Frame::Damaged),
		};
		let seq_no_inv = match get_byte(line)? {
			Some(b) => b,
			None => return Ok(Frame::Damaged),
		};
		for slot in self.block.iter_mut() {
			*slot = match get_byte(line)? {
				Some(b) => b,
				None => return Ok(Frame::Damaged),
			};
		}
		let mut crc_recv = [0u8; 2];
		for slot in crc_recv.iter_mut() {
			*slot = match get_byte(line)? {
				Some(b) => b,
				None => return Ok(Frame::Damaged),
			};
		}

		if (seq_no != !seq_no_inv) {
			trace!("read_frame: sequence fields disagree");
			return Ok(Frame::Damaged);
		}
		/* The CRC travels high byte first */
		if (u16::from_be_bytes(crc_recv) != calc_crc(&self.block)) {
			trace!("read_frame: CRC mismatch");
			return Ok(Frame::Damaged);
		}

		if (seq_no == expected_seq.wrapping_sub(1)) {
			warn!("read_frame: duplicate packet {}", seq_no);
			return Ok(Frame::Duplicate);
		}
		if (seq_no != expected_seq) {
			warn!(
				"read_frame: packet {} while expecting {}, \
				 lost sync",
				seq_no, expected_seq
			);
			return Ok(Frame::Cancel(Error::Canceled));
		}

		/*
		 * Only now check for room. Testing the buffer any earlier
		 * would let a plain end-of-transfer be misread as a fatal
		 * error: EOT carries no payload and needs no room.
		 */
		if (out.len() < BLOCK_SIZE) {
			warn!("read_frame: caller buffer out of space");
			return Ok(Frame::Cancel(Error::BufferTooSmall));
		}
		out[.. BLOCK_SIZE].copy_from_slice(&self.block);

		Ok(Frame::Accepted)
	}

	/// Push the current block out as packet `seq_no`, retrying until
	/// the receiver ACKs it or the retransmit budget runs out.
	fn send_block_with_retry<L: SerialLine>(
		&mut self,
		line: &mut L,
		seq_no: u8,
	) -> Result<()> {
		for attempt in 0 .. MAX_RETRANSMIT {
			self.send_block(line, seq_no)?;
			match get_byte(line)? {
				Some(ACK) => {
					trace!("block {} acked", seq_no);
					return Ok(());
				}
				Some(b) => warn!(
					"block {}: expected ACK, got \
					 0x{:02x} (attempt {})",
					seq_no, b, attempt
				),
				None => warn!(
					"block {}: timeout waiting for ACK \
					 (attempt {})",
					seq_no, attempt
				),
			}
		}

		Err(Error::ExhaustedRetries)
	}

	fn send_block<L: SerialLine>(
		&mut self,
		line: &mut L,
		seq_no: u8,
	) -> Result<()> {
		trace!("sending block {}", seq_no);
		let crc = calc_crc(&self.block);
		line.write_byte(SOH)?;
		line.write_byte(seq_no)?;
		line.write_byte(!seq_no)?;
		for i in 0 .. BLOCK_SIZE {
			line.write_byte(self.block[i])?;
		}
		line.write_byte((crc >> 8) as u8)?;
		line.write_byte(crc as u8)?;
		Ok(())
	}

	/// Send a lone control byte (EOT in practice) with the same
	/// retry discipline as a data block.
	fn send_byte_with_retry<L: SerialLine>(
		&mut self,
		line: &mut L,
		cmd: u8,
	) -> Result<()> {
		for attempt in 0 .. MAX_RETRANSMIT {
			line.write_byte(cmd)?;
			match get_byte(line)? {
				Some(ACK) => return Ok(()),
				Some(b) => warn!(
					"expected ACK for 0x{:02x}, got \
					 0x{:02x} (attempt {})",
					cmd, b, attempt
				),
				None => warn!(
					"timeout waiting for ACK for 0x{:02x} \
					 (attempt {})",
					cmd, attempt
				),
			}
		}

		Err(Error::ExhaustedRetries)
	}
}

impl Default for Xmodem {
	fn default() -> Self {
		Xmodem::new()
	}
}
