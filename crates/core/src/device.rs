//! Collaborator seams of the SPI controller: the serial device on the far
//! end of the bus and the sink consuming the controller's output lines.

use std::cell::RefCell;
use std::rc::Rc;

/// A slave device attached to the controller's serial bus.
///
/// `transfer` performs one full-duplex 8-bit exchange: the controller shifts
/// `mosi` out and the device returns the byte clocked back in on MISO during
/// the same exchange. The call completes synchronously; there is no clock
/// timing or busy window in this model.
pub trait SpiDevice {
    fn transfer(&mut self, mosi: u8) -> u8;
}

/// Consumer of the controller's interrupt and chip-select output lines.
///
/// Levels are pushed after every recompute, including when the level did not
/// change, so implementors must tolerate repeated same-level calls.
/// Chip-select lines are active-low: `false` means asserted.
pub trait LineSink {
    /// Interrupt output level changed or was recomputed.
    fn set_irq(&mut self, level: bool);

    /// Chip-select line `line` (0–3) was recomputed to `level`.
    fn set_chip_select(&mut self, line: usize, level: bool);
}

// Shared sinks: lets a host (or test) keep a handle to the sink after
// handing it to the controller.
impl<S: LineSink> LineSink for Rc<RefCell<S>> {
    fn set_irq(&mut self, level: bool) {
        self.borrow_mut().set_irq(level);
    }

    fn set_chip_select(&mut self, line: usize, level: bool) {
        self.borrow_mut().set_chip_select(line, level);
    }
}

/// Slave that answers each exchange with the byte it received on the
/// previous one. Useful as a placeholder device and for wiring tests.
pub struct Loopback {
    last: u8,
}

impl Loopback {
    pub fn new() -> Self {
        // An idle MISO line reads as 0xFF, so the first exchange returns that.
        Loopback { last: 0xFF }
    }
}

impl Default for Loopback {
    fn default() -> Self {
        Loopback::new()
    }
}

impl SpiDevice for Loopback {
    fn transfer(&mut self, mosi: u8) -> u8 {
        std::mem::replace(&mut self.last, mosi)
    }
}
