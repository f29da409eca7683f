//! Errata 2.3 workaround: "Sensitivity Optimization with a 500 kHz
//! Bandwidth" and its knock-on effect on the receiver's intermediate
//! frequency and rejected image.
//!
//! Grounded verbatim on `_write_errata` in the Python reference driver.

use crate::error::RadioError;
use crate::radio::regs::Register;
use crate::radio::settings::{Bandwidth, Field, Settings};
use crate::radio::spi::{read_reg, write_reg, RadioIo};

const IF_FREQ2_LUT: [u8; 9] = [0x48, 0x44, 0x44, 0x44, 0x44, 0x44, 0x40, 0x40, 0x40];
const REJECTION_OFFSET_HZ_LUT: [u32; 9] = [7810, 10420, 15620, 20830, 31250, 41670, 0, 0, 0];

/// Applies Errata 2.3, then writes any outstanding carrier frequency.
/// `for_rx` selects the receive-path adjustment; must be called before
/// every RX and TX, same as `write_stngs` does in the Python driver.
pub fn write_errata(
    io: &mut dyn RadioIo,
    stngs: &mut Settings,
    for_rx: bool,
) -> Result<(), RadioError> {
    let mut freq = stngs.get(Field::RdoFreq);
    let mut auto_if_on = false;
    let mut reg_if_freq2 = 0x20u8;

    if for_rx && stngs.get(Field::RdoLoraMode) != 0 {
        let bw = stngs.get(Field::LoraBw) as usize;
        if bw >= Bandwidth::Bw500k as usize {
            auto_if_on = true;
        } else {
            reg_if_freq2 = IF_FREQ2_LUT[bw];
            freq += REJECTION_OFFSET_HZ_LUT[bw];
        }
    }

    if stngs.changed(Field::RdoLoraMode) || stngs.changed(Field::LoraBw) {
        write_reg(io, Register::LoraIfFreq2, reg_if_freq2)?;
        let mut reg = read_reg(io, Register::LoraDtctOptmz)?;
        reg &= 0x7F;
        if auto_if_on {
            reg |= 0x80;
        }
        write_reg(io, Register::LoraDtctOptmz, reg)?;
    }

    if freq != stngs.get_applied(Field::RdoFreq) {
        write_carrier_freq(io, freq)?;
        stngs.apply(Field::RdoFreq);
    }

    Ok(())
}

const SX127X_OSC_FREQ_HZ: u64 = 32_000_000;

fn write_carrier_freq(io: &mut dyn RadioIo, freq_hz: u32) -> Result<(), RadioError> {
    let reg_freq = ((freq_hz as u64 * (1u64 << 19)) / SX127X_OSC_FREQ_HZ) as u32;
    let regs = [(reg_freq >> 16) as u8, (reg_freq >> 8) as u8, reg_freq as u8];
    crate::radio::spi::write_regs(io, Register::FreqMsb, &regs)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeIo {
        regs: [u8; 256],
    }

    impl RadioIo for FakeIo {
        fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), RadioError> {
            let addr = tx[0] & 0x7F;
            if tx[0] & crate::radio::regs::WRITE_BIT != 0 {
                for (i, b) in tx[1..].iter().enumerate() {
                    self.regs[addr as usize + i] = *b;
                }
            } else {
                rx[0] = 0;
                for (i, r) in rx[1..].iter_mut().enumerate() {
                    *r = self.regs[addr as usize + i];
                }
            }
            Ok(())
        }
        fn pulse_reset(&mut self, _pin_low_us: u32) {}
        fn delay_us(&mut self, _us: u32) {}
    }

    #[test]
    fn narrow_bandwidth_adds_rejection_offset() {
        let mut io = FakeIo { regs: [0; 256] };
        let mut stngs = Settings::new();
        stngs.set(Field::LoraBw, Bandwidth::Bw125k as u32).unwrap();
        stngs.set(Field::RdoLoraMode, 1).unwrap();
        write_errata(&mut io, &mut stngs, true).unwrap();
        assert_eq!(io.regs[Register::LoraIfFreq2 as usize], 0x40);
    }

    #[test]
    fn wide_bandwidth_enables_auto_if() {
        let mut io = FakeIo { regs: [0; 256] };
        let mut stngs = Settings::new();
        stngs.set(Field::LoraBw, Bandwidth::Bw500k as u32).unwrap();
        stngs.set(Field::RdoLoraMode, 1).unwrap();
        write_errata(&mut io, &mut stngs, true).unwrap();
        assert_eq!(io.regs[Register::LoraDtctOptmz as usize] & 0x80, 0x80);
    }
}
