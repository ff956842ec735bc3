//! Host-side firmware update for QDA microcontrollers behind a
//! serial link.
//!
//! The device is not USB-attached: a USB-DFU-style dialog is tunneled
//! through the serial line by two layered protocols. [`xmodem`] is
//! the reliable datagram transport (XMODEM-CRC, 128-byte blocks,
//! retransmission, duplicate detection); [`qda`] is the
//! request/response message set carried inside XMODEM payloads,
//! exposing the DFU command surface (descriptors, alt-setting
//! selection, download, upload, status, detach, reset).
//!
//! The whole stack is single-threaded and blocking. The only points
//! where it may stall are the byte reads of [`serial::SerialLine`],
//! each bounded by the currently configured timeout.

pub mod commands;
pub mod dfu;
pub mod error;
pub mod qda;
pub mod serial;
pub mod xmodem;

pub use error::{Error, Result};
