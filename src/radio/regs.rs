//! SX127x register map, IRQ flags and operating modes.
//!
//! Addresses and bit layouts come from the Semtech SX1276/77/78/79
//! datasheet (v6) as implemented in the Python reference driver.

/// A register address on the SX127x. `repr(u8)` so a variant can be
/// written directly as the SPI address byte (with the write bit ORed
/// in by the caller).
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
#[repr(u8)]
pub enum Register {
    Fifo = 0x00,
    OpMode = 0x01,
    FreqMsb = 0x06,
    FreqMid = 0x07,
    FreqLsb = 0x08,
    PaConfig = 0x09,
    Lna = 0x0C,
    LoraFifoAddrPtr = 0x0D,
    LoraFifoTxBase = 0x0E,
    LoraFifoRxBase = 0x0F,
    LoraFifoCurrAddr = 0x10,
    LoraIrqMask = 0x11,
    LoraIrqFlags = 0x12,
    LoraRxCnt = 0x13,
    LoraRxHdrCnt = 0x14,
    LoraRxHdrCntLsb = 0x15,
    LoraRxPktCnt = 0x16,
    LoraRxPktCntLsb = 0x17,
    LoraModemStat = 0x18,
    LoraPktSnr = 0x19,
    LoraPktRssi = 0x1A,
    LoraHopChnl = 0x1C,
    LoraCfg1 = 0x1D,
    LoraCfg2 = 0x1E,
    LoraRxSymTmout = 0x1F,
    LoraPreambleLen = 0x20,
    LoraPreambleLenLsb = 0x21,
    LoraPayldLen = 0x22,
    LoraCfg3 = 0x26,
    LoraRssiWideband = 0x2C,
    LoraIfFreq2 = 0x2F,
    LoraDtctOptmz = 0x31,
    LoraSyncWord = 0x39,
    DioMap1 = 0x40,
    DioMap2 = 0x41,
    ChipVersion = 0x42,
}

/// Expected value of [`Register::ChipVersion`] on a genuine SX127x part.
pub const CHIP_VERSION: u8 = 0x12;

/// Write bit (MSb of the SPI address byte).
pub const WRITE_BIT: u8 = 0x80;

/// `REG_LORA_IRQ_FLAGS`/`REG_LORA_IRQ_MASK` bit positions.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
#[repr(u8)]
pub enum IrqFlag {
    RxTimeout = 0x80,
    RxDone = 0x40,
    PayloadCrcError = 0x20,
    ValidHeader = 0x10,
    TxDone = 0x08,
    CadDone = 0x04,
    FhssChangedChannel = 0x02,
    CadDetected = 0x01,
}

pub const IRQ_FLAGS_ALL: u8 = 0xFF;

/// LoRa modem operating mode (bits 0..2 of [`Register::OpMode`]).
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
#[repr(u8)]
pub enum OpMode {
    Sleep = 0,
    Standby = 1,
    FsTx = 2,
    Tx = 3,
    FsRx = 4,
    RxContinuous = 5,
    RxSingle = 6,
    Cad = 7,
}

impl OpMode {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => Self::Sleep,
            1 => Self::Standby,
            2 => Self::FsTx,
            3 => Self::Tx,
            4 => Self::FsRx,
            5 => Self::RxContinuous,
            6 => Self::RxSingle,
            _ => Self::Cad,
        }
    }
}

/// Signals multiplexed onto the `DIOx` pins, indexed by the `FLD_RDO_DIOx`
/// field value (0, 1 or 2) read back from the applied settings.
///
/// This table is dual-maintained with [`super::settings::Field`]'s DIO
/// fields and with the PHY state machine's DIO dispatch.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum DioSignal {
    ModeReady,
    CadDetected,
    CadDone,
    FhssChangedChannel,
    RxTimeout,
    RxDone,
    ClkOut,
    PllLock,
    ValidHeader,
    TxDone,
    PayloadCrcError,
}

const DIO0_LUT: [DioSignal; 3] = [DioSignal::RxDone, DioSignal::TxDone, DioSignal::CadDone];
const DIO1_LUT: [DioSignal; 3] =
    [DioSignal::RxTimeout, DioSignal::FhssChangedChannel, DioSignal::CadDetected];
const DIO2_LUT: [DioSignal; 3] =
    [DioSignal::FhssChangedChannel, DioSignal::FhssChangedChannel, DioSignal::FhssChangedChannel];
const DIO3_LUT: [DioSignal; 3] =
    [DioSignal::CadDone, DioSignal::ValidHeader, DioSignal::PayloadCrcError];
const DIO4_LUT: [DioSignal; 3] =
    [DioSignal::CadDetected, DioSignal::PllLock, DioSignal::PllLock];
const DIO5_LUT: [DioSignal; 3] = [DioSignal::ModeReady, DioSignal::ClkOut, DioSignal::ClkOut];

/// Maps a DIO pin index (0..=5) and its mapped function value (0..=2) to
/// the signal it raises. Returns `None` for an out-of-range pin index.
pub fn dio_signal(pin: u8, mapped_value: u8) -> Option<DioSignal> {
    let idx = (mapped_value & 0x3).min(2) as usize;
    let lut: &[DioSignal; 3] = match pin {
        0 => &DIO0_LUT,
        1 => &DIO1_LUT,
        2 => &DIO2_LUT,
        3 => &DIO3_LUT,
        4 => &DIO4_LUT,
        5 => &DIO5_LUT,
        _ => return None,
    };
    Some(lut[idx])
}
