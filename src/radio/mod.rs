//! The SX127x driver: register-field settings, SPI transport, errata
//! workarounds and RX/status decoding.
//!
//! `Radio` owns a [`Settings`] cache and whatever [`RadioIo`]
//! implementation the caller supplies; it never touches GPIO or SPI
//! peripherals directly. Grounded verbatim on the `SX127x` class in
//! the Python reference driver.

pub mod errata;
pub mod regs;
pub mod settings;
pub mod spi;
pub mod status;

use crate::error::RadioError;
use regs::{DioSignal, IrqFlag, OpMode, Register, CHIP_VERSION};
use settings::{Field, Settings, SettingsOverlay};
use spi::{read_reg, read_regs, write_reg, write_regs, DioPins, RadioIo, ResetConfig};
use status::{decode_rx_status, NoiseAccumulator, RxResult};

pub struct Radio<IO> {
    io: IO,
    dio_pins: DioPins,
    reset: ResetConfig,
    stngs: Settings,
    noise: NoiseAccumulator,
}

impl<IO: RadioIo> Radio<IO> {
    pub fn new(io: IO, dio_pins: DioPins, reset: ResetConfig) -> Self {
        Self { io, dio_pins, reset, stngs: Settings::new(), noise: NoiseAccumulator::new() }
    }

    /// Toggles the hardware reset pin and resyncs the settings cache
    /// to chip-reset values. Caller must wait `reset.settle_us` before
    /// issuing any further SPI transaction.
    pub fn reset_radio(&mut self) {
        self.io.pulse_reset(self.reset.pin_low_us);
        self.io.delay_us(self.reset.settle_us);
        self.stngs.reset();
    }

    /// Validates chip identity, switches the modem into LoRa mode and
    /// returns whether the device responded as an SX127x.
    pub fn open(&mut self) -> Result<bool, RadioError> {
        let valid = self.validate_chip()?;
        if !valid {
            return Ok(false);
        }

        self.write_opmode(OpMode::Sleep)?;
        self.stngs.set(Field::RdoLoraMode, 1)?;
        self.write_sleep_settings()?;
        self.write_opmode(OpMode::Standby)?;
        self.stngs.apply(Field::RdoLoraMode);

        Ok(true)
    }

    /// Puts the radio to sleep; callers own tearing down GPIO/SPI.
    pub fn close(&mut self) -> Result<(), RadioError> {
        self.write_opmode(OpMode::Sleep)
    }

    fn validate_chip(&mut self) -> Result<bool, RadioError> {
        Ok(read_reg(&mut self.io, Register::ChipVersion)? == CHIP_VERSION)
    }

    pub fn read_opmode(&mut self) -> Result<OpMode, RadioError> {
        Ok(OpMode::from_bits(read_reg(&mut self.io, Register::OpMode)?))
    }

    pub fn write_opmode(&mut self, mode: OpMode) -> Result<(), RadioError> {
        let mut reg = read_reg(&mut self.io, Register::OpMode)?;
        reg &= !0x07;
        reg |= mode as u8;
        write_reg(&mut self.io, Register::OpMode, reg)
    }

    pub fn set_field(&mut self, fld: Field, val: u32) -> Result<(), RadioError> {
        self.stngs.set(fld, val)
    }

    pub fn set_fields(&mut self, pairs: &[(Field, u32)]) -> Result<(), RadioError> {
        for &(fld, val) in pairs {
            self.set_field(fld, val)?;
        }
        Ok(())
    }

    pub fn apply_overlay(&mut self, overlay: &SettingsOverlay) -> Result<(), RadioError> {
        self.set_fields(overlay)
    }

    /// Blocks for roughly `us` microseconds, delegating to the `RadioIo`
    /// impl. Used by the PHY state machine to align RX/TX actions to
    /// their scheduled time within a short window.
    pub fn delay_us(&mut self, us: u32) {
        self.io.delay_us(us)
    }

    pub fn settings(&self) -> &Settings {
        &self.stngs
    }

    /// `true` if any outstanding setting (currently only LoRa mode)
    /// requires the chip to be asleep before it can be applied.
    pub fn requires_sleep(&self) -> bool {
        self.stngs.changed(Field::RdoLoraMode)
    }

    /// Writes settings that require sleep mode. Caller must ensure the
    /// chip is already asleep.
    pub fn write_sleep_settings(&mut self) -> Result<(), RadioError> {
        if self.stngs.changed(Field::RdoLoraMode) {
            let mut reg = read_reg(&mut self.io, Register::OpMode)?;
            if self.stngs.get(Field::RdoLoraMode) != 0 {
                reg |= 0x80;
            } else {
                reg &= 0x7F;
            }
            write_reg(&mut self.io, Register::OpMode, reg)?;
            self.stngs.apply(Field::RdoLoraMode);
        }
        Ok(())
    }

    /// Writes every changed setting field to its register(s), applying
    /// errata 2.3 first (`for_rx` selects the RX-path adjustment).
    pub fn write_settings(&mut self, for_rx: bool) -> Result<(), RadioError> {
        errata::write_errata(&mut self.io, &mut self.stngs, for_rx)?;
        for fld in Settings::field_names() {
            self.write_one_setting(fld)?;
        }
        Ok(())
    }

    fn write_one_setting(&mut self, fld: Field) -> Result<(), RadioError> {
        if !self.stngs.changed(fld) {
            return Ok(());
        }
        let reg = Settings::register_of(fld);
        let reg_val = read_reg(&mut self.io, reg)?;
        let new_val = self.stngs.modify(fld, reg_val);
        write_reg(&mut self.io, reg, new_val)?;
        self.stngs.apply(fld);

        // Multi-register fields also need their shadow half written.
        match fld {
            Field::LoraRxTmout => {
                write_reg(&mut self.io, Register::LoraRxSymTmout, self.stngs.get(Field::RxTmoutLsb) as u8)?;
                self.stngs.apply(Field::RxTmoutLsb);
            }
            Field::LoraPreambleLen => {
                write_reg(
                    &mut self.io,
                    Register::LoraPreambleLenLsb,
                    self.stngs.get(Field::PreambleLenLsb) as u8,
                )?;
                self.stngs.apply(Field::PreambleLenLsb);
            }
            _ => {}
        }
        Ok(())
    }

    pub fn clear_irq_flags(&mut self) -> Result<(), RadioError> {
        let reg = read_reg(&mut self.io, Register::LoraIrqFlags)?;
        write_reg(&mut self.io, Register::LoraIrqFlags, reg)
    }

    pub fn write_lora_irq_flags(&mut self, clear_these: u8) -> Result<(), RadioError> {
        write_reg(&mut self.io, Register::LoraIrqFlags, clear_these)
    }

    pub fn write_lora_irq_mask(&mut self, disable_these: u8, enable_these: u8) -> Result<(), RadioError> {
        let mut reg = read_reg(&mut self.io, Register::LoraIrqMask)?;
        reg |= disable_these;
        reg &= !enable_these;
        write_reg(&mut self.io, Register::LoraIrqMask, reg)
    }

    pub fn write_fifo(&mut self, data: &[u8]) -> Result<(), RadioError> {
        if data.is_empty() || data.len() >= 256 {
            return Err(RadioError::InvalidSetting);
        }
        write_regs(&mut self.io, Register::Fifo, data)
    }

    pub fn write_fifo_ptr(&mut self, offset: u8) -> Result<(), RadioError> {
        write_regs(&mut self.io, Register::LoraFifoAddrPtr, &[offset, offset, offset])
    }

    pub fn write_lora_payld_len(&mut self, payld_len: u8) -> Result<(), RadioError> {
        write_reg(&mut self.io, Register::LoraPayldLen, payld_len)
    }

    /// Accumulates one bit of wideband-RSSI noise. Call periodically
    /// while idle to build up entropy for [`Radio::noise`].
    pub fn update_noise(&mut self) -> Result<(), RadioError> {
        let reg = read_reg(&mut self.io, Register::LoraRssiWideband)?;
        self.noise.append(reg & 1);
        Ok(())
    }

    pub fn noise(&mut self, out: &mut [u8]) -> usize {
        self.noise.noise(out)
    }

    /// Reads IRQ flags, clears the RX-related ones, and if the receive
    /// was good, drains the payload out of the FIFO into `out`,
    /// returning the slice actually filled.
    pub fn read_lora_rxd<'a>(
        &mut self,
        out: &'a mut [u8],
    ) -> Result<(RxResult, &'a [u8]), RadioError> {
        let irq_reg = read_reg(&mut self.io, Register::LoraIrqFlags)?;
        let clear_mask = irq_reg
            & (IrqFlag::RxTimeout as u8
                | IrqFlag::RxDone as u8
                | IrqFlag::PayloadCrcError as u8
                | IrqFlag::ValidHeader as u8);
        write_reg(&mut self.io, Register::LoraIrqFlags, clear_mask)?;

        let mut snr_rssi = [0u8; 2];
        read_regs(&mut self.io, Register::LoraPktSnr, &mut snr_rssi)?;
        let (result, good) = decode_rx_status(irq_reg, snr_rssi[0], snr_rssi[1]);

        if !good {
            return Ok((result, &out[..0]));
        }

        let mut fifo_info = [0u8; 4];
        read_regs(&mut self.io, Register::LoraFifoCurrAddr, &mut fifo_info)?;
        let pkt_start = fifo_info[0];
        let nbytes = fifo_info[3] as usize;
        write_regs(&mut self.io, Register::LoraFifoAddrPtr, &[pkt_start, pkt_start, pkt_start])?;
        let n = nbytes.min(out.len());
        read_regs(&mut self.io, Register::Fifo, &mut out[..n])?;
        Ok((result, &out[..n]))
    }

    pub fn calc_on_air_time(&self, payld_len: u8) -> f32 {
        status::calc_on_air_time(&self.stngs, payld_len)
    }

    /// Maps a DIO pin's rising edge to the signal it represents, given
    /// the currently applied `FLD_RDO_DIOx` mapping.
    pub fn dio_signal(&self, pin: u8) -> Option<DioSignal> {
        let fld = match pin {
            0 => Field::RdoDio0,
            1 => Field::RdoDio1,
            2 => Field::RdoDio2,
            3 => Field::RdoDio3,
            4 => Field::RdoDio4,
            5 => Field::RdoDio5,
            _ => return None,
        };
        regs::dio_signal(pin, self.stngs.get_applied(fld) as u8)
    }

    pub fn dio_pins(&self) -> DioPins {
        self.dio_pins
    }

    #[cfg(test)]
    pub fn io_mut(&mut self) -> &mut IO {
        &mut self.io
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeIo {
        regs: [u8; 256],
    }

    impl FakeIo {
        fn new() -> Self {
            let mut regs = [0u8; 256];
            regs[Register::ChipVersion as usize] = CHIP_VERSION;
            Self { regs }
        }
    }

    impl RadioIo for FakeIo {
        fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), RadioError> {
            let addr = tx[0] & 0x7F;
            if tx[0] & 0x80 != 0 {
                for (i, b) in tx[1..].iter().enumerate() {
                    self.regs[addr as usize + i] = *b;
                }
            } else {
                for (i, r) in rx[1..].iter_mut().enumerate() {
                    *r = self.regs[addr as usize + i];
                }
            }
            Ok(())
        }
        fn pulse_reset(&mut self, _pin_low_us: u32) {}
        fn delay_us(&mut self, _us: u32) {}
    }

    fn dio_pins() -> DioPins {
        DioPins { dio0: 4, dio1: 23, dio2: Some(24), dio3: 6, dio4: Some(5), dio5: Some(22) }
    }

    #[test]
    fn open_validates_chip_and_enters_standby() {
        let mut radio = Radio::new(FakeIo::new(), dio_pins(), ResetConfig::default());
        assert!(radio.open().unwrap());
        assert_eq!(radio.read_opmode().unwrap(), OpMode::Standby);
    }

    #[test]
    fn open_rejects_wrong_chip_version() {
        let mut io = FakeIo::new();
        io.regs[Register::ChipVersion as usize] = 0x00;
        let mut radio = Radio::new(io, dio_pins(), ResetConfig::default());
        assert!(!radio.open().unwrap());
    }

    #[test]
    fn write_settings_applies_multiregister_fields() {
        let mut radio = Radio::new(FakeIo::new(), dio_pins(), ResetConfig::default());
        radio.open().unwrap();
        radio.set_field(Field::LoraPreambleLen, 0x0108).unwrap();
        radio.write_settings(false).unwrap();
        assert!(!radio.settings().changed(Field::LoraPreambleLen));
        assert!(!radio.settings().changed(settings::Field::PreambleLenLsb));
    }

    #[test]
    fn dio0_rxdone_maps_from_applied_mapping() {
        let radio = Radio::new(FakeIo::new(), dio_pins(), ResetConfig::default());
        assert_eq!(radio.dio_signal(0), Some(DioSignal::RxDone));
    }
}
