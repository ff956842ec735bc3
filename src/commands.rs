//! The DFU operations behind each CLI mode: descriptor listing and
//! the chunked download/upload loops.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use log::{debug, info};

use crate::dfu::{self, DfuDescriptor};
use crate::error::{Error, Result};
use crate::qda::{self, Qda, Transport};

/// Query and print device identity and DFU capabilities.
pub fn list<T: Transport>(session: &mut Qda<T>) -> Result<()> {
	session.reset()?;
	let dev = session.device_descriptor()?;
	let desc = session.dfu_descriptor()?;
	let status = session.status()?;

	println!(
		"Device {:04x}:{:04x} (bcdDevice {:04x})",
		dev.vendor, dev.product, dev.bcd_device
	);
	println!(
		"DFU version {:04x}, attributes 0x{:02x}",
		desc.bcd_dfu_version, desc.bm_attributes
	);
	println!("Alt settings:  {}", desc.num_alt_settings);
	println!("Transfer size: {} bytes", desc.transfer_size);
	println!(
		"Status: {} ({})",
		status.status,
		dfu::status_string(status.status)
	);
	println!(
		"State:  {} ({})",
		status.state,
		dfu::state_string(status.state)
	);

	Ok(())
}

/// Block size for a transfer: what the device advertises, bounded by
/// what one QDA download packet can carry.
fn transfer_size(desc: &DfuDescriptor) -> usize {
	match desc.transfer_size as usize {
		0 => qda::MAX_DNLOAD_LEN,
		n => n.min(qda::MAX_DNLOAD_LEN),
	}
}

/// Poll GETSTATUS until the device leaves dfuDNBUSY, honoring the
/// advertised poll interval. Any reported error condition fails the
/// transfer.
fn wait_while_busy<T: Transport>(
	session: &mut Qda<T>,
) -> Result<dfu::DfuStatus> {
	loop {
		let status = session.status()?;
		if (status.status != dfu::STATUS_OK) {
			return Err(Error::DeviceStatus(status.status));
		}
		if (status.state != dfu::STATE_DFU_DNBUSY) {
			return Ok(status);
		}
		debug!(
			"device busy, polling again in {} ms",
			status.poll_timeout
		);
		thread::sleep(Duration::from_millis(
			status.poll_timeout as u64,
		));
	}
}

/// Write the firmware image in `file` to the device, one
/// transfer-sized block at a time, closing with the zero-length block
/// that starts manifestation.
pub fn download<T: Transport>(
	session: &mut Qda<T>,
	alt: u8,
	file: &Path,
) -> Result<()> {
	let image = fs::read(file)?;

	session.reset()?;
	let desc = session.dfu_descriptor()?;
	let block_size = transfer_size(&desc);
	session.set_alt_setting(alt)?;

	info!(
		"downloading {} bytes in blocks of {}",
		image.len(),
		block_size
	);
	let mut block_num: u16 = 0;
	for chunk in image.chunks(block_size) {
		session.download(block_num, chunk)?;
		wait_while_busy(session)?;
		block_num = block_num.wrapping_add(1);
	}

	/* A zero-length block ends the download and starts
	 * manifestation. */
	session.download(block_num, &[])?;
	wait_while_busy(session)?;

	info!("download complete");
	Ok(())
}

/// Read the firmware image off the device into `file`, block by
/// block until the device answers short.
pub fn upload<T: Transport>(
	session: &mut Qda<T>,
	alt: u8,
	file: &Path,
) -> Result<()> {
	session.reset()?;
	let desc = session.dfu_descriptor()?;
	let block_size = transfer_size(&desc);
	session.set_alt_setting(alt)?;

	info!("uploading in blocks of {}", block_size);
	let mut image = Vec::new();
	let mut chunk = vec![0u8; block_size];
	let mut block_num: u16 = 0;
	loop {
		let n = session.upload(block_num, &mut chunk)?;
		image.extend_from_slice(&chunk[.. n]);
		/* A short block is the end of the image */
		if (n < block_size) {
			break;
		}
		block_num = block_num.wrapping_add(1);
	}

	/* Put the device back into dfuIDLE */
	session.abort()?;

	fs::write(file, &image)?;
	info!("uploaded {} bytes to {}", image.len(), file.display());
	Ok(())
}
