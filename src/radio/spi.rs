//! SPI transport and GPIO configuration for the SX127x.
//!
//! The SX127x's register protocol is a single address byte (bit 7 is
//! the read/write bit, bits 0..6 are the register address) followed by
//! one or more data bytes, all on SPI mode 0. This module defines the
//! hardware-facing trait; `Radio` in `mod.rs` builds the higher-level
//! operations on top of it.

use crate::error::RadioError;
use crate::radio::regs::{Register, WRITE_BIT};

/// Chip-select-bracketed SPI + reset-pin access, implemented by the
/// caller for their platform (HAL-specific SPI peripheral, a bit-banged
/// mock for host tests, and so on). Every method already brackets the
/// transaction with chip-select; `Radio` never touches CS directly.
pub trait RadioIo {
    /// Full-duplex transfer: clocks out `tx` while clocking the same
    /// number of bytes into `rx`. `tx` and `rx` must be the same
    /// length.
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), RadioError>;

    /// Drives the reset pin low for `pin_low_us` then high again.
    fn pulse_reset(&mut self, pin_low_us: u32);

    /// Blocks for roughly `us` microseconds.
    fn delay_us(&mut self, us: u32);
}

/// Reads one byte from `reg`.
pub fn read_reg(io: &mut dyn RadioIo, reg: Register) -> Result<u8, RadioError> {
    let tx = [reg as u8, 0];
    let mut rx = [0u8; 2];
    io.transfer(&tx, &mut rx)?;
    Ok(rx[1])
}

/// Reads `n` consecutive bytes starting at `reg` into `out[..n]`.
pub fn read_regs(io: &mut dyn RadioIo, reg: Register, out: &mut [u8]) -> Result<(), RadioError> {
    let mut tx = [0u8; 257];
    let mut rx = [0u8; 257];
    let n = out.len();
    if n + 1 > tx.len() {
        return Err(RadioError::Spi);
    }
    tx[0] = reg as u8;
    io.transfer(&tx[..=n], &mut rx[..=n])?;
    out.copy_from_slice(&rx[1..=n]);
    Ok(())
}

/// Writes one byte to `reg`.
pub fn write_reg(io: &mut dyn RadioIo, reg: Register, val: u8) -> Result<(), RadioError> {
    let tx = [reg as u8 | WRITE_BIT, val];
    let mut rx = [0u8; 2];
    io.transfer(&tx, &mut rx)
}

/// Writes `data` to consecutive registers starting at `reg`.
pub fn write_regs(io: &mut dyn RadioIo, reg: Register, data: &[u8]) -> Result<(), RadioError> {
    let mut tx = [0u8; 257];
    let mut rx = [0u8; 257];
    let n = data.len();
    if n + 1 > tx.len() {
        return Err(RadioError::Spi);
    }
    tx[0] = reg as u8 | WRITE_BIT;
    tx[1..=n].copy_from_slice(data);
    io.transfer(&tx[..=n], &mut rx[..=n])
}

/// SPI bus/port selection. Grounded on `SpiConfig` in the Python
/// reference driver's platform configuration.
#[derive(Clone, Copy, Debug, defmt::Format)]
pub struct SpiConfig {
    pub port: u8,
    pub chip_select: u8,
    /// Bus clock frequency, 1 MHz to 20 MHz per the SX127x datasheet.
    pub freq_hz: u32,
}

impl SpiConfig {
    pub const FREQ_MIN: u32 = 1_000_000;
    pub const FREQ_MAX: u32 = 20_000_000;

    pub fn new(port: u8, chip_select: u8, freq_hz: u32) -> Result<Self, RadioError> {
        if !(Self::FREQ_MIN..=Self::FREQ_MAX).contains(&freq_hz) {
            return Err(RadioError::InvalidSetting);
        }
        Ok(Self { port, chip_select, freq_hz })
    }
}

/// GPIO pin numbers wired to the six `DIOx` outputs. `dio0`, `dio1`
/// and `dio3` are required (ModeReady, RxDone/TxDone and
/// ValidHeader/PayloadCrcError all live there); `dio2`, `dio4`,
/// `dio5` are optional extras some carrier boards omit.
#[derive(Clone, Copy, Debug, defmt::Format)]
pub struct DioPins {
    pub dio0: u8,
    pub dio1: u8,
    pub dio2: Option<u8>,
    pub dio3: u8,
    pub dio4: Option<u8>,
    pub dio5: Option<u8>,
}

/// Reset-pin configuration, including the datasheet-recommended pulse
/// width and post-reset settle time.
#[derive(Clone, Copy, Debug, defmt::Format)]
pub struct ResetConfig {
    pub pin: u8,
    pub pin_low_us: u32,
    pub settle_us: u32,
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self { pin: 0, pin_low_us: 110, settle_us: 5_000 }
    }
}
