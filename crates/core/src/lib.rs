//! # spi-emu-core
//!
//! Register-level emulation core for a memory-mapped SPI master controller,
//! as found on small RISC-V SoCs: five 32-bit registers (CR1, CR2, SR, DR,
//! CSCTRL), one interrupt output, and four independently configurable
//! chip-select outputs. Each data-register write performs one instant 8-bit
//! full-duplex exchange with the attached slave device.
//!
//! ## Architecture
//!
//! - [`SpiController`] — the peripheral core: register dispatch, transfer
//!   with overrun/underrun tracking, interrupt evaluation, chip-select
//!   derivation, reset
//! - [`SpiDevice`] — trait for the slave on the far end of the serial bus
//! - [`LineSink`] — trait for the consumer of the interrupt and chip-select
//!   line levels
//! - [`Loopback`] — trivial slave answering with the previously sent byte
//! - [`SerialFlash`] — W25Q-style serial NOR flash slave (JEDEC ID, read,
//!   status, page program, power down)
//! - [`savestate`] — versioned save/restore of the register file
//!
//! ## Embedding
//!
//! The host constructs the controller, optionally attaches a [`LineSink`],
//! and calls [`SpiController::reset`] before dispatching guest memory
//! accesses to [`SpiController::read`] / [`SpiController::write`]. There is
//! no global registry and no internal locking: one host context owns the
//! controller and serializes all access.
//!
//! Out-of-range accesses and register traffic are reported through the
//! [`log`] facade (`warn!` and `trace!` respectively); the embedding host
//! decides whether and where that output goes.

pub mod device;
pub mod flash;
pub mod savestate;
pub mod spi;

pub use device::{LineSink, Loopback, SpiDevice};
pub use flash::SerialFlash;
pub use savestate::SpiState;
pub use spi::SpiController;
