//! Byte-exact checks of the frames the XMODEM engine puts on the
//! wire, driven by a scripted serial line.

use std::collections::VecDeque;
use std::time::Duration;

use qda_dfu::error::Error;
use qda_dfu::serial::SerialLine;
use qda_dfu::xmodem::Xmodem;

const SOH: u8 = 0x01;
const EOT: u8 = 0x04;
const ACK: u8 = 0x06;
const NAK: u8 = 0x15;
const CAN: u8 = 0x18;

/// One scripted event on the device side of the line.
enum Step {
	/// The device sends this byte.
	B(u8),
	/// The device stays quiet for one read (a timeout).
	Gap,
}

/// A serial line following a fixed script: reads pop the script,
/// writes are recorded. Once the script runs dry every read times
/// out.
struct ScriptLine {
	input: VecDeque<Step>,
	output: Vec<u8>,
}

impl ScriptLine {
	fn new(input: Vec<Step>) -> Self {
		ScriptLine {
			input: input.into(),
			output: Vec::new(),
		}
	}
}

impl SerialLine for ScriptLine {
	fn read_byte(&mut self) -> qda_dfu::Result<u8> {
		match self.input.pop_front() {
			Some(Step::B(b)) => Ok(b),
			Some(Step::Gap) | None => Err(Error::Timeout),
		}
	}

	fn write_byte(&mut self, b: u8) -> qda_dfu::Result<()> {
		self.output.push(b);
		Ok(())
	}

	fn set_timeout(&mut self, _timeout: Duration) -> qda_dfu::Result<()> {
		Ok(())
	}

	fn pulse_detach(&mut self) -> qda_dfu::Result<()> {
		Ok(())
	}
}

/// Build the wire image of one frame carrying `data` (padded with
/// 0x1a) under sequence number `seq`.
fn frame(seq: u8, data: &[u8]) -> Vec<u8> {
	assert!(data.len() <= 128);
	let mut block = [0x1a; 128];
	block[.. data.len()].copy_from_slice(data);
	let crc = crc16::State::<crc16::XMODEM>::calculate(&block);

	let mut f = vec![SOH, seq, !seq];
	f.extend_from_slice(&block);
	f.push((crc >> 8) as u8);
	f.push(crc as u8);
	f
}

fn steps(bytes: &[u8]) -> Vec<Step> {
	bytes.iter().map(|&b| Step::B(b)).collect()
}

/*
 * Sender side
 */

#[test]
fn transmit_single_frame_exact_bytes() {
	let mut line = ScriptLine::new(steps(&[b'C', ACK, ACK]));
	let mut xmodem = Xmodem::new();

	let sent = xmodem.transmit(&mut line, b"HELLO").unwrap();
	assert_eq!(sent, 128);

	/* SOH, seq 1, ~seq, "HELLO", 123 pad bytes, CRC 0x1e70, EOT */
	let mut expect = vec![SOH, 0x01, 0xfe];
	expect.extend_from_slice(b"HELLO");
	expect.extend_from_slice(&[0x1a; 123]);
	expect.extend_from_slice(&[0x1e, 0x70]);
	expect.push(EOT);
	assert_eq!(line.output, expect);
}

#[test]
fn crc_of_all_zero_block_is_zero() {
	let mut line = ScriptLine::new(steps(&[b'C', ACK, ACK]));
	let mut xmodem = Xmodem::new();

	xmodem.transmit(&mut line, &[0; 128]).unwrap();

	/* 133-byte frame plus the EOT */
	assert_eq!(line.output.len(), 134);
	assert_eq!(&line.output[131 .. 133], &[0x00, 0x00]);
}

#[test]
fn crc_reference_value_frozen() {
	/* CRC-16/CCITT of 0x01, 0x02, .. 0x80 with a zero initial
	 * register is 0xe7ae */
	let data: Vec<u8> = (1 ..= 128).collect();
	let mut line = ScriptLine::new(steps(&[b'C', ACK, ACK]));
	let mut xmodem = Xmodem::new();

	xmodem.transmit(&mut line, &data).unwrap();

	assert_eq!(&line.output[131 .. 133], &[0xe7, 0xae]);
}

#[test]
fn every_frame_carries_complementary_sequence_fields() {
	let data = vec![0x55; 300];
	let mut line =
		ScriptLine::new(steps(&[b'C', ACK, ACK, ACK, ACK]));
	let mut xmodem = Xmodem::new();

	xmodem.transmit(&mut line, &data).unwrap();

	for (idx, f) in line.output.chunks(133).enumerate() {
		if f.len() < 133 {
			/* trailing EOT */
			assert_eq!(f, &[EOT][..]);
			break;
		}
		assert_eq!(f[0], SOH);
		assert_eq!(f[1], (idx + 1) as u8);
		assert_eq!(f[1] ^ f[2], 0xff);
	}
}

#[test]
fn transmit_empty_sends_only_eot() {
	let mut line = ScriptLine::new(steps(&[b'C', ACK]));
	let mut xmodem = Xmodem::new();

	let sent = xmodem.transmit(&mut line, &[]).unwrap();

	assert_eq!(sent, 0);
	assert_eq!(line.output, vec![EOT]);
}

#[test]
fn transmit_retransmits_on_nak() {
	let mut line = ScriptLine::new(steps(&[b'C', NAK, ACK, ACK]));
	let mut xmodem = Xmodem::new();

	let sent = xmodem.transmit(&mut line, b"RETRY").unwrap();

	assert_eq!(sent, 128);
	/* The frame went out twice, identically */
	assert_eq!(line.output.len(), 133 + 133 + 1);
	assert_eq!(line.output[.. 133], line.output[133 .. 266]);
}

#[test]
fn transmit_fails_without_session_start() {
	/* The receiver never says 'C' */
	let mut line = ScriptLine::new(Vec::new());
	let mut xmodem = Xmodem::new();

	let err = xmodem.transmit(&mut line, b"LOST").unwrap_err();
	assert!(matches!(err, Error::ExhaustedRetries));
	assert!(line.output.is_empty());
}

#[test]
fn transmit_gives_up_after_retransmit_budget() {
	/* 'C', then dead silence instead of ACKs */
	let mut line = ScriptLine::new(steps(&[b'C']));
	let mut xmodem = Xmodem::new();

	let err = xmodem.transmit(&mut line, b"NOACK").unwrap_err();

	assert!(matches!(err, Error::ExhaustedRetries));
	assert_eq!(line.output.len(), 133 * 25);
}

/*
 * Receiver side
 */

#[test]
fn receive_renaks_with_c_until_first_frame() {
	/*
	 * Garbage instead of a first frame: every re-NAK must be the
	 * CRC handshake byte 'C', never a classic NAK, and after five
	 * consecutive errors the receive fails without an ACK.
	 */
	let mut line = ScriptLine::new(vec![Step::B(0x7f)]);
	let mut xmodem = Xmodem::new();
	let mut buf = [0; 256];

	let err = xmodem.receive(&mut line, &mut buf).unwrap_err();

	assert!(matches!(err, Error::ExhaustedRetries));
	assert_eq!(line.output, vec![b'C'; 5]);
}

#[test]
fn receive_crc_error_on_first_frame_renaks_with_c() {
	let mut bad = frame(1, b"AAAA");
	let len = bad.len();
	bad[len - 1] ^= 0xff;

	let mut input = steps(&bad);
	input.extend(steps(&frame(1, b"AAAA")));
	input.push(Step::B(EOT));

	let mut line = ScriptLine::new(input);
	let mut xmodem = Xmodem::new();
	let mut buf = [0; 256];

	let n = xmodem.receive(&mut line, &mut buf).unwrap();

	assert_eq!(n, 128);
	assert_eq!(&buf[.. 4], b"AAAA");
	/* Initial 'C', the bootstrap re-NAK 'C', then the two ACKs */
	assert_eq!(line.output, vec![b'C', b'C', ACK, ACK]);
}

#[test]
fn receive_naks_classically_after_first_frame() {
	let mut input = steps(&frame(1, b"ONE"));
	input.push(Step::B(0xaa));
	/* Let the drain loop run dry before the EOT follows */
	input.push(Step::Gap);
	input.push(Step::B(EOT));

	let mut line = ScriptLine::new(input);
	let mut xmodem = Xmodem::new();
	let mut buf = [0; 256];

	let n = xmodem.receive(&mut line, &mut buf).unwrap();

	assert_eq!(n, 128);
	assert_eq!(line.output, vec![b'C', ACK, NAK, ACK]);
}

#[test]
fn receive_absorbs_duplicate_frame() {
	/* Block 1 arrives twice, as after a lost ACK */
	let mut input = steps(&frame(1, b"ONE"));
	input.extend(steps(&frame(1, b"ONE")));
	input.extend(steps(&frame(2, b"TWO")));
	input.push(Step::B(EOT));

	let mut line = ScriptLine::new(input);
	let mut xmodem = Xmodem::new();
	let mut buf = [0; 512];

	let n = xmodem.receive(&mut line, &mut buf).unwrap();

	assert_eq!(n, 256);
	assert_eq!(&buf[.. 3], b"ONE");
	assert_eq!(&buf[128 .. 131], b"TWO");
	/* The duplicate is ACKed but written nowhere */
	assert_eq!(line.output, vec![b'C', ACK, ACK, ACK, ACK]);
}

#[test]
fn receive_cancels_on_sequence_gap() {
	let mut input = steps(&frame(1, b"ONE"));
	input.extend(steps(&frame(3, b"THREE")));

	let mut line = ScriptLine::new(input);
	let mut xmodem = Xmodem::new();
	let mut buf = [0; 512];

	let err = xmodem.receive(&mut line, &mut buf).unwrap_err();

	assert!(matches!(err, Error::Canceled));
	assert_eq!(line.output.last(), Some(&CAN));
}

#[test]
fn receive_cancels_when_buffer_is_full() {
	let mut input = steps(&frame(1, b"ONE"));
	input.extend(steps(&frame(2, b"TWO")));

	let mut line = ScriptLine::new(input);
	let mut xmodem = Xmodem::new();
	/* Room for exactly one block */
	let mut buf = [0; 128];

	let err = xmodem.receive(&mut line, &mut buf).unwrap_err();

	assert!(matches!(err, Error::BufferTooSmall));
	assert_eq!(line.output.last(), Some(&CAN));
}

#[test]
fn receive_eot_into_full_buffer_is_not_an_error() {
	/*
	 * EOT carries no payload, so it must be honored even when the
	 * buffer has no room left for another block.
	 */
	let mut line = ScriptLine::new(vec![Step::B(EOT)]);
	let mut xmodem = Xmodem::new();
	let mut buf = [0; 0];

	let n = xmodem.receive(&mut line, &mut buf).unwrap();

	assert_eq!(n, 0);
	assert_eq!(line.output, vec![b'C', ACK]);
}

#[test]
fn receive_rejects_mismatched_sequence_fields() {
	let mut bad = frame(1, b"BAD");
	/* Corrupt the complement field */
	bad[2] ^= 0x01;

	let mut input = steps(&bad);
	input.extend(steps(&frame(1, b"GOOD")));
	input.push(Step::B(EOT));

	let mut line = ScriptLine::new(input);
	let mut xmodem = Xmodem::new();
	let mut buf = [0; 256];

	let n = xmodem.receive(&mut line, &mut buf).unwrap();

	assert_eq!(n, 128);
	assert_eq!(&buf[.. 4], b"GOOD");
}
