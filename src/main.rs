//! Command-line front end: mode selection, port setup, signal
//! discipline.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::warn;

use qda_dfu::qda::{Qda, XmodemTransport};
use qda_dfu::{commands, dfu, serial};
use qda_dfu::{Error, Result};

/// SIGINT, the only signal we install a handler for.
const SIGINT: i32 = 2;

#[derive(Parser)]
#[command(
	name = "qda-dfu",
	version,
	about = "Firmware update utility for QDA devices behind a \
	         serial link"
)]
struct Cli {
	/// Serial device the board is attached to.
	#[arg(short, long)]
	port: String,

	/// Baud rate (8N1, no flow control).
	#[arg(short, long, default_value_t = 115200)]
	baud: u32,

	/// Alt setting: which memory region transfers target.
	#[arg(short, long, default_value_t = 0)]
	alt: u8,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// Print device identity and DFU capabilities.
	List,
	/// Reset the board into DFU mode via the RTS line.
	Detach,
	/// Read the firmware image off the device into FILE.
	Upload { file: PathBuf },
	/// Write the firmware image in FILE to the device.
	Download { file: PathBuf },
}

fn main() -> ExitCode {
	env_logger::init();

	let cli = Cli::parse();

	match run(&cli) {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			eprintln!("qda-dfu: {}", e);
			if let Error::DeviceStatus(status) = e {
				eprintln!(
					"qda-dfu: device says: {}",
					dfu::status_string(status)
				);
			}
			ExitCode::FAILURE
		}
	}
}

fn run(cli: &Cli) -> Result<()> {
	let port = serial::SharedPort::new(serial::open(&cli.port, cli.baud)?);

	/*
	 * Installed after the port is opened and before any protocol
	 * traffic touches its settings: ^C must put the line back the
	 * way open() left it and close the handle before the process
	 * dies. Exit codes for kill signals are 128 + signal_number.
	 */
	let hook = port.clone();
	if let Err(e) = ctrlc::set_handler(move || {
		if let Err(e) = hook.restore_and_close() {
			eprintln!("qda-dfu: closing port: {}", e);
		}
		std::process::exit(128 + SIGINT);
	}) {
		warn!("could not install interrupt handler: {}", e);
	}

	let teardown = port.clone();
	let mut session = Qda::new(XmodemTransport::new(port));

	let result = match &cli.command {
		Command::List => commands::list(&mut session),
		Command::Detach => session.detach(),
		Command::Upload { file } => {
			commands::upload(&mut session, cli.alt, file)
		}
		Command::Download { file } => {
			commands::download(&mut session, cli.alt, file)
		}
	};

	/* Normal teardown mirrors the signal path */
	let closed = teardown.restore_and_close();
	result.and(closed)
}
