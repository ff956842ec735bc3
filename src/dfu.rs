//! In-memory DFU types and the DFU 1.1 naming tables.

/// Identity fields reported by the device descriptor query.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDescriptor {
	pub vendor: u16,
	pub product: u16,
	pub bcd_device: u16,
}

/// The DFU functional descriptor reported by the device.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DfuDescriptor {
	pub num_alt_settings: u8,
	pub bm_attributes: u8,
	/// Milliseconds the device waits for a USB reset after a detach
	/// request.
	pub detach_timeout: u16,
	/// Largest block the device accepts per download/upload request.
	pub transfer_size: u16,
	pub bcd_dfu_version: u16,
}

/// One GETSTATUS answer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DfuStatus {
	pub status: u8,
	pub state: u8,
	/// Milliseconds the host should wait before the next request.
	pub poll_timeout: u32,
}

/* DFU 1.1 status codes (bStatus) */
pub const STATUS_OK: u8 = 0x00;
pub const STATUS_ERR_TARGET: u8 = 0x01;
pub const STATUS_ERR_FILE: u8 = 0x02;
pub const STATUS_ERR_WRITE: u8 = 0x03;
pub const STATUS_ERR_ERASE: u8 = 0x04;
pub const STATUS_ERR_CHECK_ERASED: u8 = 0x05;
pub const STATUS_ERR_PROG: u8 = 0x06;
pub const STATUS_ERR_VERIFY: u8 = 0x07;
pub const STATUS_ERR_ADDRESS: u8 = 0x08;
pub const STATUS_ERR_NOTDONE: u8 = 0x09;
pub const STATUS_ERR_FIRMWARE: u8 = 0x0a;
pub const STATUS_ERR_VENDOR: u8 = 0x0b;
pub const STATUS_ERR_USBR: u8 = 0x0c;
pub const STATUS_ERR_POR: u8 = 0x0d;
pub const STATUS_ERR_UNKNOWN: u8 = 0x0e;
pub const STATUS_ERR_STALLEDPKT: u8 = 0x0f;

/* DFU 1.1 states (bState) */
pub const STATE_APP_IDLE: u8 = 0;
pub const STATE_APP_DETACH: u8 = 1;
pub const STATE_DFU_IDLE: u8 = 2;
pub const STATE_DFU_DNLOAD_SYNC: u8 = 3;
pub const STATE_DFU_DNBUSY: u8 = 4;
pub const STATE_DFU_DNLOAD_IDLE: u8 = 5;
pub const STATE_DFU_MANIFEST_SYNC: u8 = 6;
pub const STATE_DFU_MANIFEST: u8 = 7;
pub const STATE_DFU_MANIFEST_WAIT_RESET: u8 = 8;
pub const STATE_DFU_UPLOAD_IDLE: u8 = 9;
pub const STATE_DFU_ERROR: u8 = 10;

/* Chapter 6.1.2 */
static STATUS_NAMES: [&str; 16] = [
	"No error condition is present",
	"File is not targeted for use by this device",
	"File is for this device but fails some vendor-specific test",
	"Device is unable to write memory",
	"Memory erase function failed",
	"Memory erase check failed",
	"Program memory function failed",
	"Programmed memory failed verification",
	"Cannot program memory due to received address that is out of \
	 range",
	"Received DFU_DNLOAD with wLength = 0, but device does not think \
	 that it has all data yet",
	"Device's firmware is corrupt. It cannot return to run-time \
	 (non-DFU) operations",
	"iString indicates a vendor specific error",
	"Device detected unexpected USB reset signalling",
	"Device detected unexpected power on reset",
	"Something went wrong, but the device does not know what it was",
	"Device stalled an unexpected request",
];

static STATE_NAMES: [&str; 11] = [
	"appIDLE",
	"appDETACH",
	"dfuIDLE",
	"dfuDNLOAD-SYNC",
	"dfuDNBUSY",
	"dfuDNLOAD-IDLE",
	"dfuMANIFEST-SYNC",
	"dfuMANIFEST",
	"dfuMANIFEST-WAIT-RESET",
	"dfuUPLOAD-IDLE",
	"dfuERROR",
];

/// Human-readable description of a DFU status code.
pub fn status_string(status: u8) -> &'static str {
	match STATUS_NAMES.get(status as usize) {
		Some(&s) => s,
		None => "INVALID",
	}
}

/// Name of a DFU state.
pub fn state_string(state: u8) -> &'static str {
	match STATE_NAMES.get(state as usize) {
		Some(&s) => s,
		None => "INVALID STATE ID",
	}
}
