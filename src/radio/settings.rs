//! Register-field settings cache for the SX127x.
//!
//! A "field" is one or more bits within one or more registers, named
//! and bounds-checked independent of its register layout. Callers
//! `set()` a desired value; nothing reaches the chip until
//! [`super::Radio::write_settings`] writes every changed field and
//! calls [`Settings::apply`] on it. This mirrors
//! `SX127xSettings` from the Python reference driver field for field,
//! including its multi-register handling for carrier frequency, RX
//! symbol timeout and preamble length.

use crate::error::RadioError;
use crate::radio::regs::Register;

/// LoRa bandwidth options. TX and RX stations must agree.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
#[repr(u8)]
pub enum Bandwidth {
    Bw7_8k = 0,
    Bw10_4k = 1,
    Bw15_6k = 2,
    Bw20_8k = 3,
    Bw31_25k = 4,
    Bw41_7k = 5,
    Bw62_5k = 6,
    Bw125k = 7,
    Bw250k = 8,
    Bw500k = 9,
}

impl Bandwidth {
    /// The actual bandwidth in Hz, per datasheet Table 13.
    pub fn hz(self) -> u32 {
        const TABLE: [u32; 10] =
            [7_800, 10_400, 15_600, 20_800, 31_250, 41_700, 62_500, 125_000, 250_000, 500_000];
        TABLE[self as usize]
    }

    fn from_idx(idx: u32) -> Self {
        match idx {
            0 => Self::Bw7_8k,
            1 => Self::Bw10_4k,
            2 => Self::Bw15_6k,
            3 => Self::Bw20_8k,
            4 => Self::Bw31_25k,
            5 => Self::Bw41_7k,
            6 => Self::Bw62_5k,
            7 => Self::Bw125k,
            8 => Self::Bw250k,
            _ => Self::Bw500k,
        }
    }
}

/// LoRa coding rate, carried in the PHY header so it may change per packet.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
#[repr(u8)]
pub enum CodingRate {
    Cr4_5 = 1,
    Cr4_6 = 2,
    Cr4_7 = 3,
    Cr4_8 = 4,
}

/// LoRa spreading factor: chips per symbol is `2^sf`.
pub type SpreadingFactor = u8;
pub const SF_MIN: SpreadingFactor = 6;
pub const SF_MAX: SpreadingFactor = 12;

/// Every settable field on the radio. Order matches the Python
/// reference driver's field table; the two shadow entries
/// (`RxTmoutLsb`, `PreambleLenLsb`) are not independently settable —
/// [`Settings::set`] splits their owning multi-register field into
/// both halves automatically.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
#[repr(usize)]
pub enum Field {
    RdoLfMode = 0,
    RdoLoraMode,
    RdoFreq,
    RdoOutPwr,
    RdoMaxPwr,
    RdoPaBoost,
    RdoLnaBoostHf,
    RdoLnaGain,
    RdoDio0,
    RdoDio1,
    RdoDio2,
    RdoDio3,
    RdoDio4,
    RdoDio5,
    LoraImplicitHdrMode,
    LoraCr,
    LoraBw,
    LoraCrcEn,
    LoraSf,
    LoraRxTmout,
    LoraPreambleLen,
    LoraAgcOn,
    LoraSyncWord,
    // Shadow fields: second register of a 2-register field. Never
    // addressed directly by callers; `modify` writes them alongside
    // their owner.
    RxTmoutLsb,
    PreambleLenLsb,
}

pub const FIELD_COUNT: usize = 25;

#[derive(Clone, Copy)]
struct FieldInfo {
    reg: Register,
    reg_count: u8,
    bit_start: u8,
    bit_count: u8,
    val_min: u32,
    val_max: u32,
    val_reset: u32,
}

const fn fi(
    reg: Register,
    reg_count: u8,
    bit_start: u8,
    bit_count: u8,
    val_min: u32,
    val_max: u32,
    val_reset: u32,
) -> FieldInfo {
    FieldInfo { reg, reg_count, bit_start, bit_count, val_min, val_max, val_reset }
}

pub const RF_FREQ_MIN: u32 = 137_000_000;
pub const RF_FREQ_MAX: u32 = 1_020_000_000;

use Register::*;

const FIELD_INFO: [FieldInfo; FIELD_COUNT] = [
    fi(OpMode, 1, 3, 1, 0, 1, 1),                              // RdoLfMode
    fi(OpMode, 1, 7, 1, 0, 1, 0),                               // RdoLoraMode
    fi(FreqMsb, 3, 0, 8, RF_FREQ_MIN, RF_FREQ_MAX, 434_000_000), // RdoFreq
    fi(PaConfig, 1, 0, 4, 0, 15, 0x0F),                          // RdoOutPwr
    fi(PaConfig, 1, 4, 3, 0, 7, 0x04),                           // RdoMaxPwr
    fi(PaConfig, 1, 7, 1, 0, 1, 0),                              // RdoPaBoost
    fi(Lna, 1, 0, 2, 0, 3, 0),                                   // RdoLnaBoostHf
    fi(Lna, 1, 5, 3, 1, 6, 0x01),                                // RdoLnaGain
    fi(DioMap1, 1, 6, 2, 0, 2, 0),                               // RdoDio0
    fi(DioMap1, 1, 4, 2, 0, 2, 0),                               // RdoDio1
    fi(DioMap1, 1, 2, 2, 0, 2, 0),                               // RdoDio2
    fi(DioMap1, 1, 0, 2, 0, 2, 0),                               // RdoDio3
    fi(DioMap2, 1, 6, 2, 0, 2, 0),                               // RdoDio4
    fi(DioMap2, 1, 4, 2, 0, 2, 0),                               // RdoDio5
    fi(LoraCfg1, 1, 0, 1, 0, 1, 0),                              // LoraImplicitHdrMode
    fi(LoraCfg1, 1, 1, 3, 1, 4, 1),                              // LoraCr
    fi(LoraCfg1, 1, 4, 4, 0, 9, 7),                              // LoraBw
    fi(LoraCfg2, 1, 2, 1, 0, 1, 0),                              // LoraCrcEn
    fi(LoraCfg2, 1, 4, 4, 6, 12, 7),                             // LoraSf
    fi(LoraCfg2, 2, 0, 2, 0, (1 << 10) - 1, 0x00),               // LoraRxTmout
    fi(LoraPreambleLen, 2, 0, 16, 0, (1 << 16) - 1, 0x00),       // LoraPreambleLen
    fi(LoraCfg3, 1, 2, 1, 0, 1, 0),                              // LoraAgcOn
    fi(LoraSyncWord, 1, 0, 8, 0, (1 << 8) - 1, 0x12),            // LoraSyncWord
    fi(LoraRxSymTmout, 1, 0, 8, 0, 0xFF, 0x64),                  // RxTmoutLsb (shadow)
    fi(LoraPreambleLenLsb, 1, 0, 8, 0, 0xFF, 0x08),              // PreambleLenLsb (shadow)
];

fn bit_mask(bit_start: u8, bit_count: u8) -> u8 {
    (((1u16 << bit_count) - 1) as u8) << bit_start
}

/// The desired/applied register-field cache for one SX127x.
#[derive(Clone, Copy)]
pub struct Settings {
    desired: [u32; FIELD_COUNT],
    applied: [u32; FIELD_COUNT],
}

impl Settings {
    pub fn new() -> Self {
        let mut s = Self { desired: [0; FIELD_COUNT], applied: [0; FIELD_COUNT] };
        s.reset();
        s
    }

    fn info(fld: Field) -> FieldInfo {
        FIELD_INFO[fld as usize]
    }

    /// Resets every field to its chip-reset value. Call after toggling
    /// the hardware reset pin so this cache tracks the chip.
    pub fn reset(&mut self) {
        for i in 0..FIELD_COUNT {
            let v = FIELD_INFO[i].val_reset;
            self.desired[i] = v;
            self.applied[i] = v;
        }
    }

    /// Sets a field's desired value, splitting multi-register fields
    /// into their shadow counterpart. Not yet written to the chip;
    /// call [`super::Radio::write_settings`] for that.
    pub fn set(&mut self, fld: Field, val: u32) -> Result<(), RadioError> {
        let info = Self::info(fld);
        if val < info.val_min || val > info.val_max {
            return Err(RadioError::InvalidSetting);
        }
        match fld {
            Field::RdoFreq => {
                self.desired[fld as usize] = val;
            }
            Field::LoraRxTmout => {
                self.desired[Field::LoraRxTmout as usize] = (val >> 8) & 0xFF;
                self.desired[Field::RxTmoutLsb as usize] = val & 0xFF;
            }
            Field::LoraPreambleLen => {
                self.desired[Field::LoraPreambleLen as usize] = (val >> 8) & 0xFF;
                self.desired[Field::PreambleLenLsb as usize] = val & 0xFF;
            }
            _ => {
                let mask = (1u32 << info.bit_count) - 1;
                self.desired[fld as usize] = val & mask;
            }
        }
        Ok(())
    }

    pub fn get(&self, fld: Field) -> u32 {
        self.desired[fld as usize]
    }

    pub fn get_applied(&self, fld: Field) -> u32 {
        self.applied[fld as usize]
    }

    /// Copies the desired value to applied; call once the value has
    /// actually reached the chip register.
    pub fn apply(&mut self, fld: Field) {
        self.applied[fld as usize] = self.desired[fld as usize];
    }

    pub fn changed(&self, fld: Field) -> bool {
        self.desired[fld as usize] != self.applied[fld as usize]
    }

    pub fn register_of(fld: Field) -> Register {
        Self::info(fld).reg
    }

    /// Read-modify-write a field's bits into a byte previously read
    /// from the field's register. Operates per physical register, so
    /// a multi-register field's second register is folded in
    /// correctly rather than left untouched (the Python reference
    /// driver's `modify` has a guard that skips any field spanning
    /// more than one register, leaving RX timeout and preamble length
    /// unwritable through that path).
    pub fn modify(&self, fld: Field, reg_val: u8) -> u8 {
        let info = Self::info(fld);
        let mask = bit_mask(info.bit_start, info.bit_count.min(8));
        let field_val = (self.desired[fld as usize] as u8) << info.bit_start;
        (reg_val & !mask) | (field_val & mask)
    }

    pub fn field_names() -> [Field; 23] {
        use Field::*;
        [
            RdoLfMode,
            RdoLoraMode,
            RdoFreq,
            RdoOutPwr,
            RdoMaxPwr,
            RdoPaBoost,
            RdoLnaBoostHf,
            RdoLnaGain,
            RdoDio0,
            RdoDio1,
            RdoDio2,
            RdoDio3,
            RdoDio4,
            RdoDio5,
            LoraImplicitHdrMode,
            LoraCr,
            LoraBw,
            LoraCrcEn,
            LoraSf,
            LoraRxTmout,
            LoraPreambleLen,
            LoraAgcOn,
            LoraSyncWord,
        ]
    }

    pub fn bandwidth(&self) -> Bandwidth {
        Bandwidth::from_idx(self.get_applied(Field::LoraBw))
    }

    pub fn coding_rate(&self) -> CodingRate {
        match self.get_applied(Field::LoraCr) {
            1 => CodingRate::Cr4_5,
            2 => CodingRate::Cr4_6,
            3 => CodingRate::Cr4_7,
            _ => CodingRate::Cr4_8,
        }
    }

    pub fn spreading_factor(&self) -> SpreadingFactor {
        self.get_applied(Field::LoraSf) as u8
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

/// A sparse set of field/value pairs merged onto a base [`Settings`]
/// cache, e.g. the PHY's per-action listen/transmit overlays atop its
/// base settings.
pub const MAX_OVERLAY_FIELDS: usize = 8;
pub type SettingsOverlay = heapless::Vec<(Field, u32), MAX_OVERLAY_FIELDS>;

/// Merges `extra` onto `base`, overwriting any field `extra` also sets.
pub fn merge_overlay(base: &mut SettingsOverlay, extra: &SettingsOverlay) {
    for &(fld, val) in extra {
        if let Some(slot) = base.iter_mut().find(|(f, _)| *f == fld) {
            slot.1 = val;
        } else {
            let _ = base.push((fld, val));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_values_match_defaults() {
        let s = Settings::new();
        assert_eq!(s.get(Field::RdoFreq), 434_000_000);
        assert_eq!(s.get(Field::LoraBw), 7);
        assert_eq!(s.get(Field::LoraSf), 7);
    }

    #[test]
    fn set_rejects_out_of_range() {
        let mut s = Settings::new();
        assert_eq!(s.set(Field::LoraSf, 20), Err(RadioError::InvalidSetting));
        assert_eq!(s.set(Field::RdoFreq, 1), Err(RadioError::InvalidSetting));
    }

    #[test]
    fn multi_register_field_splits_into_shadow() {
        let mut s = Settings::new();
        s.set(Field::LoraPreambleLen, 0x0108).unwrap();
        assert_eq!(s.get(Field::LoraPreambleLen), 0x01);
        assert_eq!(s.get(Field::PreambleLenLsb), 0x08);
    }

    #[test]
    fn changed_and_apply_round_trip() {
        let mut s = Settings::new();
        assert!(!s.changed(Field::LoraSf));
        s.set(Field::LoraSf, 9).unwrap();
        assert!(s.changed(Field::LoraSf));
        s.apply(Field::LoraSf);
        assert!(!s.changed(Field::LoraSf));
        assert_eq!(s.get_applied(Field::LoraSf), 9);
    }

    #[test]
    fn modify_preserves_other_bits() {
        let mut s = Settings::new();
        s.set(Field::LoraCrcEn, 1).unwrap();
        // LoraCrcEn is bit 2 of LoraCfg2; bits outside it must survive.
        let reg_before = 0b1011_0000u8;
        let reg_after = s.modify(Field::LoraCrcEn, reg_before);
        assert_eq!(reg_after, 0b1011_0100);
    }

    #[test]
    fn bandwidth_hz_table() {
        assert_eq!(Bandwidth::Bw125k.hz(), 125_000);
        assert_eq!(Bandwidth::Bw500k.hz(), 500_000);
    }

    #[test]
    fn overlay_merge_overwrites_and_appends() {
        let mut base: SettingsOverlay = heapless::Vec::new();
        base.push((Field::LoraSf, 7)).unwrap();
        base.push((Field::LoraBw, 7)).unwrap();
        let mut extra: SettingsOverlay = heapless::Vec::new();
        extra.push((Field::LoraSf, 9)).unwrap();
        extra.push((Field::RdoDio0, 1)).unwrap();
        merge_overlay(&mut base, &extra);
        assert_eq!(base.len(), 3);
        assert!(base.contains(&(Field::LoraSf, 9)));
        assert!(base.contains(&(Field::LoraBw, 7)));
        assert!(base.contains(&(Field::RdoDio0, 1)));
    }
}
