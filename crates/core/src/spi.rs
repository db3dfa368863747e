//! SPI master controller emulation.
//!
//! Models the register-level behavior of a memory-mapped SPI controller with
//! five 32-bit registers, one interrupt output, and four chip-select outputs.
//! A write to DR performs one instant 8-bit full-duplex exchange with the
//! attached [`SpiDevice`] (no clock-cycle delay), so a firmware polling loop
//! sees TXE/RXNE set on its next status read.
//!
//! Register map (byte offsets, 32-bit accesses):
//!
//! | Offset | Register | Read                      | Write                                  |
//! |--------|----------|---------------------------|----------------------------------------|
//! | 0x00   | CR1      | value                     | store                                  |
//! | 0x04   | CR2      | value                     | store, re-evaluate IRQ                 |
//! | 0x08   | SR       | value                     | write-1-to-clear errors, re-eval IRQ   |
//! | 0x0C   | DR       | consume RXNE or underrun  | store low byte, transfer               |
//! | 0x10   | CSCTRL   | value                     | store low byte, re-derive chip selects |
//!
//! Accesses outside the map are diagnostics only: reads return 0, writes are
//! dropped, and neither touches state.

use log::{trace, warn};

use crate::device::{LineSink, SpiDevice};
use crate::savestate::SpiState;

/// Register byte offsets
pub const REG_CR1: u64 = 0x00;
pub const REG_CR2: u64 = 0x04;
pub const REG_SR: u64 = 0x08;
pub const REG_DR: u64 = 0x0C;
pub const REG_CSCTRL: u64 = 0x10;

/// Status register bits
pub const SR_RXNE: u32 = 1 << 0;
pub const SR_TXE: u32 = 1 << 1;
pub const SR_UNDERRUN: u32 = 1 << 2;
pub const SR_OVERRUN: u32 = 1 << 3;
pub const SR_ERR: u32 = SR_OVERRUN | SR_UNDERRUN;
/// Busy flag. Reserved: kept in the register image, never set by this model.
pub const SR_BSY: u32 = 1 << 7;

/// Control register 1 bits. Both are stored but not acted on: the controller
/// always behaves as an enabled master.
pub const CR1_MSTR: u32 = 1 << 2;
pub const CR1_SPE: u32 = 1 << 6;

/// Control register 2 interrupt-enable bits
pub const CR2_ERRIE: u32 = 1 << 5;
pub const CR2_RXNEIE: u32 = 1 << 6;
pub const CR2_TXEIE: u32 = 1 << 7;

/// Number of chip-select lines
pub const CS_LINES: usize = 4;

/// SR value after reset: TXE set, everything else clear.
const SR_RESET: u32 = SR_TXE;
/// DR value after reset.
const DR_RESET: u32 = 0x0C;

/// SPI master controller with an attached serial device.
///
/// The host owns the controller exclusively and serializes all access; every
/// `read`/`write` completes synchronously, updating status flags and pushing
/// output-line levels before it returns. Construct with [`SpiController::new`]
/// and call [`SpiController::reset`] before first use.
pub struct SpiController<D: SpiDevice> {
    cr1: u32,
    cr2: u32,
    sr: u32,
    dr: u32,
    cs: u32,
    device: D,
    irq_level: bool,
    cs_levels: [bool; CS_LINES],
    sink: Option<Box<dyn LineSink>>,
}

impl<D: SpiDevice> SpiController<D> {
    pub fn new(device: D) -> Self {
        SpiController {
            cr1: 0,
            cr2: 0,
            sr: 0,
            dr: 0,
            cs: 0,
            device,
            irq_level: false,
            cs_levels: [true; CS_LINES],
            sink: None,
        }
    }

    /// Attach the consumer of the interrupt and chip-select lines.
    pub fn set_line_sink(&mut self, sink: Box<dyn LineSink>) {
        self.sink = Some(sink);
    }

    /// Reset to power-on register values and re-derive the chip selects.
    ///
    /// The interrupt line is not recomputed here; with CR2 cleared the next
    /// evaluation de-asserts it.
    pub fn reset(&mut self) {
        self.cr1 = 0;
        self.cr2 = 0;
        self.sr = SR_RESET;
        self.dr = DR_RESET;
        self.cs = 0;
        self.update_cs();
    }

    /// Read the 32-bit register at `offset`.
    ///
    /// Reading DR consumes the pending receive byte (clears RXNE), or sets
    /// UNDERRUN when none is pending; the latched value is returned either
    /// way.
    pub fn read(&mut self, offset: u64) -> u32 {
        let val = match offset {
            REG_CR1 => self.cr1,
            REG_CR2 => self.cr2,
            REG_SR => self.sr,
            REG_DR => {
                if self.sr & SR_RXNE == 0 {
                    self.sr |= SR_UNDERRUN;
                } else {
                    self.sr &= !SR_RXNE;
                }
                let val = self.dr;
                self.update_irq();
                val
            }
            REG_CSCTRL => self.cs,
            _ => {
                warn!("spi: invalid read offset {offset:#x}");
                return 0;
            }
        };
        trace!("spi: read {val:#x} from {offset:#x}");
        val
    }

    /// Write `value` to the 32-bit register at `offset`.
    ///
    /// Writing DR triggers one transfer; writing CSCTRL re-derives all four
    /// chip-select lines. SR accepts only write-1-to-clear of the error bits.
    pub fn write(&mut self, offset: u64, value: u32) {
        trace!("spi: write {value:#x} to {offset:#x}");
        match offset {
            REG_CR1 => self.cr1 = value,
            REG_CR2 => {
                self.cr2 = value;
                self.update_irq();
            }
            REG_SR => {
                // Only the error bits written as 1 are cleared; RXNE/TXE are
                // not software-writable through this path.
                self.sr &= !(value & SR_ERR);
                self.update_irq();
            }
            REG_DR => self.transfer(value & 0xFF),
            REG_CSCTRL => {
                self.cs = value & 0xFF;
                self.update_cs();
            }
            _ => warn!("spi: invalid write offset {offset:#x}"),
        }
    }

    /// One 8-bit exchange, triggered by a DR write.
    fn transfer(&mut self, mosi: u32) {
        if self.sr & SR_RXNE != 0 {
            // Previous receive byte not consumed yet: drop the outbound byte
            // and keep the latched receive byte in DR.
            self.sr |= SR_OVERRUN;
            self.update_irq();
            return;
        }

        self.sr &= !(SR_RXNE | SR_TXE);
        self.dr = u32::from(self.device.transfer(mosi as u8));
        self.sr |= SR_RXNE | SR_TXE;
        trace!("spi: transfer out={mosi:#04x} in={:#04x}", self.dr);

        self.update_irq();
    }

    fn update_irq(&mut self) {
        self.irq_level = eval_irq(self.cr2, self.sr);
        if let Some(sink) = self.sink.as_mut() {
            sink.set_irq(self.irq_level);
        }
    }

    fn update_cs(&mut self) {
        for line in 0..CS_LINES {
            let level = eval_cs(self.cs, line);
            self.cs_levels[line] = level;
            trace!("spi: cs[{line}] level={}", level as u8);
            if let Some(sink) = self.sink.as_mut() {
                sink.set_chip_select(line, level);
            }
        }
    }

    /// Current interrupt output level.
    pub fn irq_level(&self) -> bool {
        self.irq_level
    }

    /// Current level of chip-select line `line` (`false` = asserted).
    /// Lines beyond the four that exist read as deasserted.
    pub fn cs_level(&self, line: usize) -> bool {
        self.cs_levels.get(line).copied().unwrap_or(true)
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Capture the register file for a save state.
    pub fn save_state(&self) -> SpiState {
        SpiState {
            cr1: self.cr1,
            cr2: self.cr2,
            sr: self.sr,
            dr: self.dr,
            cs: self.cs,
        }
    }

    /// Restore the register file from a save state.
    ///
    /// Only field values are restored: no transfer runs and no line level is
    /// pushed. The cached output levels are recomputed silently so the
    /// getters match the restored registers.
    pub fn load_state(&mut self, s: &SpiState) {
        self.cr1 = s.cr1;
        self.cr2 = s.cr2;
        self.sr = s.sr;
        self.dr = s.dr;
        self.cs = s.cs;
        self.irq_level = eval_irq(self.cr2, self.sr);
        for line in 0..CS_LINES {
            self.cs_levels[line] = eval_cs(self.cs, line);
        }
    }
}

/// Interrupt level: each source is its CR2 enable ANDed with its SR
/// condition, then ORed together.
fn eval_irq(cr2: u32, sr: u32) -> bool {
    let txe_int = cr2 & CR2_TXEIE != 0 && sr & SR_TXE != 0;
    let rxne_int = cr2 & CR2_RXNEIE != 0 && sr & SR_RXNE != 0;
    let err_int = cr2 & CR2_ERRIE != 0 && sr & SR_ERR != 0;
    txe_int || rxne_int || err_int
}

/// Chip-select level for one line: low nibble enables the line, high nibble
/// selects active-low drive. 0 (asserted) only when both bits are set.
fn eval_cs(cs: u32, line: usize) -> bool {
    let enabled = cs >> line & 1 != 0;
    let active_low = cs >> (line + 4) & 1 != 0;
    !(enabled && active_low)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// Device that records every MOSI byte and answers from a queue.
    struct Scripted {
        sent: Vec<u8>,
        responses: VecDeque<u8>,
    }

    impl Scripted {
        fn new(responses: &[u8]) -> Self {
            Scripted { sent: Vec::new(), responses: responses.iter().copied().collect() }
        }
    }

    impl SpiDevice for Scripted {
        fn transfer(&mut self, mosi: u8) -> u8 {
            self.sent.push(mosi);
            self.responses.pop_front().unwrap_or(0xFF)
        }
    }

    #[derive(Default)]
    struct Recorded {
        irq: Vec<bool>,
        cs: Vec<(usize, bool)>,
    }

    impl LineSink for Recorded {
        fn set_irq(&mut self, level: bool) {
            self.irq.push(level);
        }

        fn set_chip_select(&mut self, line: usize, level: bool) {
            self.cs.push((line, level));
        }
    }

    fn controller(responses: &[u8]) -> SpiController<Scripted> {
        let mut spi = SpiController::new(Scripted::new(responses));
        spi.reset();
        spi
    }

    #[test]
    fn reset_values() {
        let mut spi = controller(&[]);
        assert_eq!(spi.read(REG_CR1), 0);
        assert_eq!(spi.read(REG_CR2), 0);
        assert_eq!(spi.read(REG_SR), SR_TXE);
        assert_eq!(spi.read(REG_CSCTRL), 0);
        for line in 0..CS_LINES {
            assert!(spi.cs_level(line), "cs[{line}] must deassert on reset");
        }
        assert!(!spi.irq_level());
        assert_eq!(spi.read(REG_DR), DR_RESET);
    }

    #[test]
    fn transfer_success_sets_both_flags() {
        let mut spi = controller(&[0x5A]);
        spi.write(REG_DR, 0xA5);

        assert_eq!(spi.device().sent, vec![0xA5]);
        assert_eq!(spi.read(REG_SR), SR_TXE | SR_RXNE);
        assert_eq!(spi.read(REG_DR), 0x5A);
        // The DR read consumed RXNE; TXE stays set.
        assert_eq!(spi.read(REG_SR), SR_TXE);
    }

    #[test]
    fn transfer_truncates_to_one_byte() {
        let mut spi = controller(&[0x00]);
        spi.write(REG_DR, 0x1FF);
        assert_eq!(spi.device().sent, vec![0xFF]);
    }

    #[test]
    fn overrun_drops_byte_without_exchange() {
        let mut spi = controller(&[0x11, 0x22]);
        spi.write(REG_DR, 0x01);
        // RXNE still set: the second write must not reach the device.
        spi.write(REG_DR, 0x02);

        assert_eq!(spi.device().sent, vec![0x01]);
        assert_eq!(spi.read(REG_SR), SR_TXE | SR_RXNE | SR_OVERRUN);
        // The dropped write must not clobber the latched receive byte.
        assert_eq!(spi.read(REG_DR), 0x11);

        // Once drained and cleared, a retried write exchanges normally.
        spi.write(REG_SR, SR_OVERRUN);
        spi.write(REG_DR, 0x03);
        assert_eq!(spi.device().sent, vec![0x01, 0x03]);
        assert_eq!(spi.read(REG_DR), 0x22);
    }

    #[test]
    fn underrun_on_empty_read() {
        let mut spi = controller(&[]);
        assert_eq!(spi.read(REG_DR), DR_RESET);
        assert_eq!(spi.read(REG_SR), SR_TXE | SR_UNDERRUN);
        // RXNE stays clear, so a second read keeps reporting underrun.
        assert_eq!(spi.read(REG_DR), DR_RESET);
        assert_eq!(spi.read(REG_SR), SR_TXE | SR_UNDERRUN);
    }

    #[test]
    fn error_bits_clear_per_written_bit() {
        let mut spi = controller(&[0x00]);
        spi.read(REG_DR); // underrun
        spi.write(REG_DR, 0x01);
        spi.write(REG_DR, 0x02); // overrun
        assert_eq!(spi.read(REG_SR) & SR_ERR, SR_UNDERRUN | SR_OVERRUN);

        spi.write(REG_SR, SR_OVERRUN);
        assert_eq!(spi.read(REG_SR) & SR_ERR, SR_UNDERRUN);

        // Clearing an already-clear bit is a no-op.
        let before = spi.read(REG_SR);
        spi.write(REG_SR, SR_OVERRUN);
        assert_eq!(spi.read(REG_SR), before);

        spi.write(REG_SR, SR_UNDERRUN);
        assert_eq!(spi.read(REG_SR) & SR_ERR, 0);
    }

    #[test]
    fn sr_write_cannot_set_flags() {
        let mut spi = controller(&[]);
        spi.write(REG_SR, SR_RXNE | SR_BSY | SR_ERR);
        assert_eq!(spi.read(REG_SR), SR_TXE);
    }

    #[test]
    fn irq_truth_table() {
        // All 8 enable combinations against all 8 condition combinations.
        for enables in 0..8u32 {
            let cr2 = (enables & 1) * CR2_TXEIE
                | ((enables >> 1) & 1) * CR2_RXNEIE
                | ((enables >> 2) & 1) * CR2_ERRIE;
            for conds in 0..8u32 {
                let sr = (conds & 1) * SR_TXE
                    | ((conds >> 1) & 1) * SR_RXNE
                    | ((conds >> 2) & 1) * SR_OVERRUN;

                let mut spi = controller(&[]);
                spi.load_state(&SpiState { cr1: 0, cr2, sr, dr: 0, cs: 0 });

                let expected = (enables & conds) != 0;
                assert_eq!(
                    spi.irq_level(),
                    expected,
                    "cr2={cr2:#x} sr={sr:#x}"
                );
            }
        }
    }

    #[test]
    fn irq_follows_enable_writes() {
        let mut spi = controller(&[0x00]);
        assert!(!spi.irq_level());

        // TXE is set after reset, so enabling TXEIE asserts immediately.
        spi.write(REG_CR2, CR2_TXEIE);
        assert!(spi.irq_level());
        spi.write(REG_CR2, 0);
        assert!(!spi.irq_level());

        // Error interrupt asserts when OVERRUN latches and clears with it.
        spi.write(REG_CR2, CR2_ERRIE);
        spi.write(REG_DR, 0x01);
        spi.write(REG_DR, 0x02);
        assert!(spi.irq_level());
        spi.write(REG_SR, SR_OVERRUN);
        assert!(!spi.irq_level());
    }

    #[test]
    fn cs_derivation_all_values() {
        for value in 0..=255u32 {
            let mut spi = controller(&[]);
            spi.write(REG_CSCTRL, value);
            assert_eq!(spi.read(REG_CSCTRL), value);
            for line in 0..CS_LINES {
                let enabled = value >> line & 1 != 0;
                let active_low = value >> (line + 4) & 1 != 0;
                let expected = !(enabled && active_low);
                assert_eq!(
                    spi.cs_level(line),
                    expected,
                    "cs={value:#04x} line={line}"
                );
            }
        }
    }

    #[test]
    fn cs_level_out_of_range_reads_deasserted() {
        let mut spi = controller(&[]);
        spi.write(REG_CSCTRL, 0xFF); // all four lines asserted
        assert!(!spi.cs_level(3));
        assert!(spi.cs_level(4));
        assert!(spi.cs_level(100));
    }

    #[test]
    fn cs_write_masks_to_byte() {
        let mut spi = controller(&[]);
        spi.write(REG_CSCTRL, 0xABCD_1211);
        assert_eq!(spi.read(REG_CSCTRL), 0x11);
        assert!(!spi.cs_level(0)); // enable bit0 + polarity bit4
        assert!(spi.cs_level(1));
    }

    #[test]
    fn control_registers_round_trip() {
        let mut spi = controller(&[]);
        spi.write(REG_CR1, 0xDEAD_BEEF);
        spi.write(REG_CR2, 0x1234_5678);
        assert_eq!(spi.read(REG_CR1), 0xDEAD_BEEF);
        assert_eq!(spi.read(REG_CR2), 0x1234_5678);
    }

    #[test]
    fn reserved_bits_are_stored_not_acted_on() {
        let mut spi = controller(&[0x42]);
        spi.write(REG_CR1, CR1_SPE | CR1_MSTR);
        assert_eq!(spi.read(REG_CR1), CR1_SPE | CR1_MSTR);
        // Transfers run regardless of SPE/MSTR and BSY never latches.
        spi.write(REG_DR, 0x10);
        assert_eq!(spi.device().sent, vec![0x10]);
        assert_eq!(spi.read(REG_SR) & SR_BSY, 0);
    }

    #[test]
    fn out_of_range_access_is_inert() {
        let mut spi = controller(&[]);
        let before = spi.save_state();
        assert_eq!(spi.read(0x14), 0);
        assert_eq!(spi.read(0xFFC), 0);
        spi.write(0x14, 0xFFFF_FFFF);
        spi.write(0xFFC, 0x1);
        assert_eq!(spi.save_state(), before);
    }

    #[test]
    fn lines_are_pushed_to_the_sink() {
        let sink = Rc::new(RefCell::new(Recorded::default()));
        let mut spi = SpiController::new(Scripted::new(&[0x00]));
        spi.set_line_sink(Box::new(Rc::clone(&sink)));
        spi.reset();

        // Reset re-derives all four chip selects.
        assert_eq!(
            sink.borrow().cs,
            vec![(0, true), (1, true), (2, true), (3, true)]
        );

        spi.write(REG_CSCTRL, 0x11);
        assert_eq!(
            &sink.borrow().cs[4..],
            &[(0, false), (1, true), (2, true), (3, true)]
        );

        // CR2 write and the transfer both push the interrupt level.
        spi.write(REG_CR2, CR2_RXNEIE);
        assert_eq!(sink.borrow().irq, vec![false]);
        spi.write(REG_DR, 0x7F);
        assert_eq!(sink.borrow().irq, vec![false, true]);
    }

    #[test]
    fn restore_does_not_replay_side_effects() {
        let sink = Rc::new(RefCell::new(Recorded::default()));
        let mut spi = SpiController::new(Scripted::new(&[]));
        spi.set_line_sink(Box::new(Rc::clone(&sink)));

        let state = SpiState {
            cr1: CR1_SPE,
            cr2: CR2_TXEIE,
            sr: SR_TXE | SR_OVERRUN,
            dr: 0xA7,
            cs: 0x11,
        };
        spi.load_state(&state);

        // No exchange, no line pushes; cached levels still match the fields.
        assert!(spi.device().sent.is_empty());
        assert!(sink.borrow().irq.is_empty());
        assert!(sink.borrow().cs.is_empty());
        assert!(spi.irq_level());
        assert!(!spi.cs_level(0));
        assert_eq!(spi.save_state(), state);
    }
}
