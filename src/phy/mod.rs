//! The PHY layer: a cooperative, single-threaded state machine that
//! owns the radio and turns "send this frame" / "listen for a frame"
//! requests into register writes and blocking, bounded sleeps around
//! the moment of transmission or reception.
//!
//! Grounded verbatim on `Sx127xHsm` in the Python reference driver. Its
//! state hierarchy (top, under which `initializing` and `scheduling`
//! sit directly, and `lingering`, a shared superstate of `listening`
//! (itself the super of `rxing`) and `sleeping`) is expressed here as a
//! flat [`State`] enum plus explicit entry functions, rather than a
//! dynamic-dispatch HSM runtime — `scheduling`'s immediate
//! self-transition in the Python source (it always posts itself an
//! event and returns) becomes a direct function call chain instead,
//! since nothing else can run between those two steps in a
//! single-threaded caller anyway.

pub mod queue;

use crate::error::RadioError;
use crate::frame::FrameBuf;
use crate::hsm::TimeEvent;
use crate::radio::regs::{DioSignal, IrqFlag, OpMode, IRQ_FLAGS_ALL};
use crate::radio::settings::{merge_overlay, Field, SettingsOverlay};
use crate::radio::spi::RadioIo;
use crate::radio::Radio;
use queue::{Action, ActionQueue, HeadKind};

/// Lower bound below which a blocking sleep isn't worth the call
/// overhead; upper bound above which the PHY would rather let the
/// caller's event loop come back around than block this long.
/// Matches the Python driver's `_TM_BLOCKING_MIN`/`_TM_BLOCKING_MAX`.
const TM_BLOCKING_MIN_US: u64 = 1_000;
const TM_BLOCKING_MAX_US: u64 = 100_000;

/// Margin the Python driver leaves between "wake up" and "the radio
/// must be listening/transmitting by now", to absorb its own service
/// latency.
const TM_SVC_MARGIN_US: u64 = 20_000;

/// How long a TX is allowed to run before the PHY gives up waiting for
/// `TxDone` and forces the radio back to standby. Matches the Python
/// driver's one-second backstop.
const TX_BACKSTOP_US: u64 = 1_000_000;

/// How often the PHY samples the wideband-RSSI noise bit while idle in
/// `Listening`.
const NOISE_PERIOD_US: u64 = 100_000;

/// How long to wait before retrying [`Radio::open`] after a failed
/// attempt.
const OPEN_RETRY_US: u64 = 1_000_000;

/// Where to schedule a posted action.
#[derive(Clone, Copy, Debug, defmt::Format)]
pub enum PhyTime {
    /// As soon as possible, ahead of anything already scheduled.
    Immediate,
    /// At `now` (i.e. scheduled for "right away", but FIFO with
    /// respect to other actions already due).
    Now,
    /// At an absolute microsecond timestamp on the caller's clock.
    At(u64),
}

/// The receiver of a completed reception. The caller supplies this at
/// every call into the PHY that could produce one, rather than the PHY
/// storing a callback — this sidesteps holding a borrowed closure
/// across state that must outlive a single call, while still letting a
/// one-off `post_rx_action` and the default listen-forever path share
/// the same delivery code.
pub trait RxSink {
    fn on_rx(&mut self, hdr_time_us: u64, bytes: &[u8], rssi_dbm: i16, snr_db: f32);
}

/// The PHY's current state. Mirrors the Python driver's hierarchy:
/// `Rxing` is logically nested under `Listening`, and `Listening`/
/// `Sleeping` both behave as `Lingering` unless overridden.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum State {
    Initializing,
    Scheduling,
    Listening,
    Rxing,
    Sleeping,
    Txing,
}

/// Drives an SX127x through request/response radio operations.
///
/// `base_stngs` is applied under every action's own overlay (so an
/// action only needs to specify what it changes); `listen_by_default`
/// decides whether the radio sits in `Listening` or `Sleeping` when the
/// action queue runs dry.
pub struct Phy<IO: RadioIo> {
    radio: Radio<IO>,
    state: State,
    listen_by_default: bool,
    base_stngs: SettingsOverlay,
    /// `true` when the current `Listening`/`Sleeping` state was entered
    /// with no explicit action (the "idle default"); a newly posted
    /// action should interrupt that, but not an in-progress action.
    default_action: bool,
    queue: ActionQueue,
    tmout: TimeEvent,
    prdc: TimeEvent,
    rxd_hdr_time_us: u64,
}

impl<IO: RadioIo> Phy<IO> {
    pub fn new(radio: Radio<IO>, listen_by_default: bool, base_stngs: SettingsOverlay) -> Self {
        Self {
            radio,
            state: State::Initializing,
            listen_by_default,
            base_stngs,
            default_action: true,
            queue: ActionQueue::new(),
            tmout: TimeEvent::new(),
            prdc: TimeEvent::new(),
            rxd_hdr_time_us: 0,
        }
    }

    /// Kicks off the `Initializing` state's first `Radio::open` attempt
    /// on the next [`Phy::tick`].
    pub fn start(&mut self, now_us: u64) {
        self.tmout.post_in(now_us, 0);
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn radio(&self) -> &Radio<IO> {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut Radio<IO> {
        &mut self.radio
    }

    /// Queues a frame for transmission.
    pub fn post_tx_action(&mut self, when: PhyTime, now_us: u64, stngs: SettingsOverlay, bytes: FrameBuf) -> bool {
        self.enqueue(when, now_us, Action::Tx { stngs, bytes })
    }

    /// Queues a one-off receive window. Only meaningful when
    /// `listen_by_default` is `false` — otherwise the radio is already
    /// listening continuously and this would only narrow the window.
    pub fn post_rx_action(
        &mut self,
        when: PhyTime,
        now_us: u64,
        stngs: SettingsOverlay,
        duration_us: u64,
    ) -> bool {
        self.enqueue(when, now_us, Action::Rx { stngs, duration_us })
    }

    fn enqueue(&mut self, when: PhyTime, now_us: u64, action: Action) -> bool {
        let ok = match when {
            PhyTime::Immediate => self.queue.enqueue_immediate(action),
            PhyTime::Now => self.queue.enqueue_at(now_us, action),
            PhyTime::At(t) => self.queue.enqueue_at(t, action),
        };
        // Lingering on the idle default gets reconsidered immediately;
        // an in-progress action (explicit Listening/Sleeping, or
        // Rxing/Txing) runs to completion undisturbed.
        if ok && matches!(self.state, State::Listening | State::Sleeping) && self.default_action {
            self.enter_scheduling(now_us);
        }
        ok
    }

    /// Call periodically (the caller's event-loop tick) so timers are
    /// serviced even with no DIO activity: the `Initializing` retry
    /// timer, the `Listening` noise-sample period, and `Lingering`'s
    /// rx-duration/TX-backstop timeout.
    pub fn tick(&mut self, now_us: u64, sink: &mut dyn RxSink) -> Result<(), RadioError> {
        if self.prdc.poll(now_us) && matches!(self.state, State::Listening | State::Rxing) {
            self.radio.update_noise()?;
        }
        if self.tmout.poll(now_us) {
            self.on_tmout(now_us, sink)?;
        }
        Ok(())
    }

    /// Call when `pin` has risen, with `radio().dio_signal(pin)` already
    /// resolved against the currently applied DIO mapping by the
    /// caller's board-integration layer.
    pub fn on_dio(&mut self, signal: DioSignal, now_us: u64, sink: &mut dyn RxSink) -> Result<(), RadioError> {
        use DioSignal::*;
        match (self.state, signal) {
            (State::Listening, ValidHeader) => {
                self.rxd_hdr_time_us = now_us;
                self.state = State::Rxing;
            }
            (State::Listening, RxTimeout) | (State::Listening, PayloadCrcError) => {
                self.enter_scheduling(now_us);
            }
            (State::Rxing, RxDone) => {
                self.on_rx_done(sink)?;
                self.enter_scheduling(now_us);
            }
            (State::Rxing, PayloadCrcError) => {
                self.enter_scheduling(now_us);
            }
            (State::Txing, TxDone) => {
                self.enter_scheduling(now_us);
            }
            (State::Txing, ModeReady) => {
                // Backstop: the TX never completed within TX_BACKSTOP_US
                // and on_tmout forced the radio to standby; this fires
                // once that mode change has actually taken effect.
                self.enter_scheduling(now_us);
            }
            _ => {}
        }
        Ok(())
    }

    fn on_tmout(&mut self, now_us: u64, sink: &mut dyn RxSink) -> Result<(), RadioError> {
        match self.state {
            State::Initializing => self.try_open(now_us)?,
            State::Listening | State::Sleeping | State::Rxing => self.enter_scheduling(now_us),
            State::Txing => self.force_tx_backstop()?,
            State::Scheduling => {}
        }
        let _ = sink;
        Ok(())
    }

    fn try_open(&mut self, now_us: u64) -> Result<(), RadioError> {
        match self.radio.open() {
            Ok(true) => {
                self.radio.apply_overlay(&self.base_stngs)?;
                self.radio.write_settings(false)?;
                self.enter_scheduling(now_us);
            }
            _ => {
                self.tmout.post_in(now_us, OPEN_RETRY_US);
            }
        }
        Ok(())
    }

    /// Chooses the next state from the head of the action queue, then
    /// immediately enters it — the Rust equivalent of the Python
    /// driver's `scheduling` state posting itself an `_ALWAYS` event
    /// and returning, collapsed into one synchronous call since nothing
    /// else can observe the intermediate state.
    fn enter_scheduling(&mut self, now_us: u64) {
        self.state = State::Scheduling;
        match self.queue.head_kind_soon(now_us) {
            Some(HeadKind::Rx) => {
                self.default_action = false;
                self.enter_listening(now_us);
            }
            Some(HeadKind::Tx) => {
                self.default_action = false;
                self.enter_txing(now_us);
            }
            None => {
                self.default_action = true;
                if self.listen_by_default {
                    self.enter_listening(now_us);
                } else {
                    self.enter_sleeping();
                }
            }
        }
    }

    fn enter_sleeping(&mut self) {
        self.state = State::Sleeping;
        self.tmout.disarm();
        let _ = self.radio.write_opmode(OpMode::Sleep);
    }

    fn enter_listening(&mut self, now_us: u64) {
        self.state = State::Listening;
        let mut overlay = self.base_stngs.clone();
        let mut duration_us = 0u64;
        let mut fire_at = now_us;

        if let Some((tm, Action::Rx { stngs, duration_us: d })) = self.queue.pop_soon(now_us) {
            merge_overlay(&mut overlay, &stngs);
            duration_us = d;
            fire_at = tm;
        }

        let _ = self.radio.set_field(Field::RdoDio0, 0); // RxDone
        let _ = self.radio.set_field(Field::RdoDio1, 0); // RxTimeout
        let _ = self.radio.set_field(Field::RdoDio3, 1); // ValidHeader
        let _ = self.radio.apply_overlay(&overlay);
        let _ = self.radio.write_settings(true);
        let _ = self.radio.write_lora_irq_mask(
            IRQ_FLAGS_ALL,
            IrqFlag::RxDone as u8 | IrqFlag::PayloadCrcError as u8 | IrqFlag::ValidHeader as u8,
        );
        let _ = self.radio.write_lora_irq_flags(IRQ_FLAGS_ALL);
        let _ = self.radio.write_fifo_ptr(0);

        let wait = fire_at.saturating_sub(now_us).min(TM_BLOCKING_MAX_US);
        if wait >= TM_BLOCKING_MIN_US {
            self.radio.delay_us(wait as u32);
        }

        let mode = if self.default_action { OpMode::RxContinuous } else { OpMode::RxSingle };
        let _ = self.radio.write_opmode(mode);

        if duration_us > 0 {
            self.tmout.post_in(fire_at, duration_us + TM_SVC_MARGIN_US);
        } else {
            self.tmout.disarm();
        }
        self.prdc.post_every(now_us, NOISE_PERIOD_US);
    }

    fn on_rx_done(&mut self, sink: &mut dyn RxSink) -> Result<(), RadioError> {
        let mut buf = [0u8; 256];
        let (result, bytes) = self.radio.read_lora_rxd(&mut buf)?;
        if result.is_good() {
            sink.on_rx(self.rxd_hdr_time_us, bytes, result.rssi_dbm, result.snr_db);
        }
        Ok(())
    }

    fn enter_txing(&mut self, now_us: u64) {
        self.state = State::Txing;
        let Some((tm, Action::Tx { stngs, bytes })) = self.queue.pop_soon(now_us) else {
            debug_assert!(false, "scheduling chose Txing without a queued Tx action");
            self.enter_scheduling(now_us);
            return;
        };

        let mut overlay = self.base_stngs.clone();
        merge_overlay(&mut overlay, &stngs);
        let _ = self.radio.set_field(Field::RdoDio0, 1); // TxDone
        let _ = self.radio.set_field(Field::RdoDio5, 0); // ModeReady, for the backstop path
        let _ = self.radio.apply_overlay(&overlay);
        let _ = self.radio.write_settings(false);
        let _ = self.radio.write_lora_irq_mask(IRQ_FLAGS_ALL, IrqFlag::TxDone as u8);
        let _ = self.radio.write_lora_irq_flags(IRQ_FLAGS_ALL);
        let _ = self.radio.write_fifo_ptr(0);
        let _ = self.radio.write_fifo(&bytes);
        let _ = self.radio.write_lora_payld_len(bytes.len() as u8);

        let wait = tm.saturating_sub(now_us).min(TM_BLOCKING_MAX_US);
        if wait >= TM_BLOCKING_MIN_US {
            self.radio.delay_us(wait as u32);
        }
        let _ = self.radio.write_opmode(OpMode::Tx);
        self.tmout.post_in(now_us.max(tm), TX_BACKSTOP_US);
    }

    fn force_tx_backstop(&mut self) -> Result<(), RadioError> {
        self.radio.write_opmode(OpMode::Standby)?;
        self.radio.set_field(Field::RdoDio5, 0)?;
        self.radio.write_settings(false)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::spi::{DioPins, ResetConfig};
    use crate::radio::regs::{Register, CHIP_VERSION};

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

    struct RecordingSink {
        frames: heapless::Vec<heapless::Vec<u8, 256>, 4>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self { frames: heapless::Vec::new() }
        }
    }

    impl RxSink for RecordingSink {
        fn on_rx(&mut self, _hdr_time_us: u64, bytes: &[u8], _rssi_dbm: i16, _snr_db: f32) {
            let mut v = heapless::Vec::new();
            let _ = v.extend_from_slice(bytes);
            let _ = self.frames.push(v);
        }
    }

    fn dio_pins() -> DioPins {
        DioPins { dio0: 0, dio1: 1, dio2: None, dio3: 3, dio4: None, dio5: Some(5) }
    }

    fn new_phy(listen_by_default: bool) -> Phy<FakeIo> {
        let radio = Radio::new(FakeIo::new(), dio_pins(), ResetConfig::default());
        Phy::new(radio, listen_by_default, heapless::Vec::new())
    }

    #[test]
    fn opens_and_falls_into_listening_by_default() {
        let mut phy = new_phy(true);
        let mut sink = RecordingSink::new();
        phy.start(0);
        phy.tick(0, &mut sink).unwrap();
        assert_eq!(phy.state(), State::Listening);
        assert_eq!(phy.radio().settings().get_applied(Field::RdoLoraMode), 1);
    }

    #[test]
    fn falls_asleep_when_not_listening_by_default_and_idle() {
        let mut phy = new_phy(false);
        let mut sink = RecordingSink::new();
        phy.start(0);
        phy.tick(0, &mut sink).unwrap();
        assert_eq!(phy.state(), State::Sleeping);
    }

    #[test]
    fn posting_tx_while_listening_reschedules_into_txing() {
        let mut phy = new_phy(true);
        let mut sink = RecordingSink::new();
        phy.start(0);
        phy.tick(0, &mut sink).unwrap();
        assert_eq!(phy.state(), State::Listening);

        let mut bytes = FrameBuf::new();
        bytes.extend_from_slice(&[0x01, 0x02, 0x03]).unwrap();
        phy.post_tx_action(PhyTime::Immediate, 1_000, heapless::Vec::new(), bytes);
        assert_eq!(phy.state(), State::Txing);
    }

    #[test]
    fn rxing_protects_itself_from_a_posted_tx_action() {
        let mut phy = new_phy(true);
        let mut sink = RecordingSink::new();
        phy.start(0);
        phy.tick(0, &mut sink).unwrap();
        phy.on_dio(DioSignal::ValidHeader, 100, &mut sink).unwrap();
        assert_eq!(phy.state(), State::Rxing);

        let mut bytes = FrameBuf::new();
        bytes.extend_from_slice(&[0xFF]).unwrap();
        phy.post_tx_action(PhyTime::Immediate, 200, heapless::Vec::new(), bytes);
        assert_eq!(phy.state(), State::Rxing, "a post must not preempt an in-progress reception");
    }

    #[test]
    fn rx_done_delivers_bytes_then_returns_to_scheduling_default() {
        use crate::radio::regs::Register;

        let mut phy = new_phy(true);
        let mut sink = RecordingSink::new();
        phy.start(0);
        phy.tick(0, &mut sink).unwrap();
        phy.on_dio(DioSignal::ValidHeader, 100, &mut sink).unwrap();

        // Simulate a good reception: IRQ flags say RxDone with no CRC
        // error, and the FIFO holds a short payload at offset 0.
        let io = phy.radio_mut().io_mut();
        io.regs[Register::LoraIrqFlags as usize] = IrqFlag::RxDone as u8;
        io.regs[Register::LoraFifoCurrAddr as usize] = 0;
        io.regs[Register::Fifo as usize] = 0xDE;
        io.regs[Register::Fifo as usize + 1] = 0xAD;
        io.regs[Register::LoraRxCnt as usize] = 2;

        phy.on_dio(DioSignal::RxDone, 150, &mut sink).unwrap();
        assert_eq!(phy.state(), State::Listening);
        assert_eq!(sink.frames.len(), 1);
        assert_eq!(sink.frames[0].as_slice(), &[0xDE, 0xAD]);
    }
}
