//! The LNK layer: beacons, maintains the neighbor table, and decides
//! whether this node has a working link to anyone.
//!
//! Grounded verbatim on `HeymacCsmaHsm`/`Heymac` in the Python reference
//! driver. Its state hierarchy — `lurking`, under which `beaconing` sits,
//! under which `linking` sits — is expressed the same way [`crate::phy`]
//! expresses the PHY hierarchy: a flat [`State`] enum plus explicit
//! transition code, since a real dynamic-dispatch HSM buys nothing for
//! three states nested two deep. `_initializing`'s immediate
//! self-transition into `_lurking` is likewise collapsed into
//! [`Lnk::start`].
//!
//! Unlike the Python driver, `Lnk` does not hold a reference to the PHY
//! it sits above. Storing `&mut Phy<IO>` (or the Python driver's
//! `self._phy_hsm`) would tie `Lnk`'s lifetime to a borrow threaded
//! through every method, and posting a frame from inside
//! [`Lnk::on_rx`] — itself called from inside [`crate::phy::Phy::tick`]
//! / [`crate::phy::Phy::on_dio`] — would require re-entering the PHY
//! while it is already being driven. Instead `Lnk` queues outgoing
//! frames in [`Lnk::pending_tx`] (beacons, and the re-transmit half of
//! multi-hop forwarding); the caller's main loop drains it with
//! [`Lnk::take_pending_tx`] and posts each onto `Phy` after the current
//! PHY call has returned.

pub mod neighbor;

use crate::frame::cmd::{Beacon, Command, LinkAddr};
use crate::frame::{Addr, Frame, FrameBuf, SubProtocol};
use crate::hsm::TimeEvent;
use crate::radio::settings::{Field, SettingsOverlay};
use neighbor::NeighborTable;

/// Seconds between beacon emissions, and the basis for lurk/link
/// timeouts. Matches `Heymac._BCN_PRD`.
pub const BCN_PERIOD_US: u64 = 32_000_000;
/// Matches `Heymac._LNK_UPDT_PRD`.
pub const LNK_UPDATE_PERIOD_US: u64 = 4_000_000;
/// How long `lurking` waits for identity credentials before giving up
/// and re-arming for another `BCN_PERIOD_US`. Matches `_lurking`'s
/// `2 * Heymac._BCN_PRD` entry timeout.
const LURK_TIMEOUT_US: u64 = 2 * BCN_PERIOD_US;

/// Node has surplus power (can afford to transmit/listen liberally).
pub const LNK_CAP_PWR: u16 = 0x0001;
/// Node can listen continuously rather than duty-cycling its receiver.
pub const LNK_CAP_RXCONT: u16 = 0x0002;
/// Node implements cryptographic routines. Unused by this crate (no
/// cipher is implemented yet), kept at `0` like the Python reference.
pub const LNK_CAP_CRYPTO: u16 = 0;

/// The LoRa sync word used to discriminate Heymac frames from other
/// traffic on the same band. ASCII `'H'`.
const HEYMAC_SYNC_WORD: u32 = 0x48;
const HEYMAC_FREQ_HZ: u32 = 432_550_000;

const MAX_PENDING_TX: usize = 4;

/// Identity credentials needed to beacon: a human-readable callsign and
/// a public key. The Python reference driver pulls these from a JSON
/// credential file on disk (`HamIdent.get_info_from_json_cred`); this
/// crate has no filesystem, so the caller supplies them directly once
/// acquired however the host platform does that.
#[derive(Clone, Debug, defmt::Format)]
pub struct Identity {
    pub callsign_ssid: [u8; 16],
    pub pub_key: [u8; 96],
}

/// The receiver of a frame LNK has finished processing (link data
/// updated, multi-hop re-transmission queued if applicable). Passed as
/// a parameter rather than stored, for the same reason [`crate::phy::RxSink`]
/// is.
pub trait LnkRxSink {
    fn on_rx(&mut self, frame: &Frame, rx_time_us: u64, rssi_dbm: i16, snr_db: f32);
}

/// Mirrors the Python driver's `lurking` / `lurking:beaconing` /
/// `lurking:beaconing:linking` hierarchy.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum State {
    Lurking,
    Beaconing,
    Linking,
}

/// The PHY settings every Heymac LNK action shares: LoRa mode on,
/// maximum PA output through the boost pin, explicit header, CRC
/// enabled, and the Heymac sync word. Matches `Heymac._PHY_STNGS_DFLT`.
pub fn phy_settings_default() -> SettingsOverlay {
    let mut overlay = SettingsOverlay::new();
    let _ = overlay.push((Field::RdoLoraMode, 1));
    let _ = overlay.push((Field::RdoMaxPwr, 7));
    let _ = overlay.push((Field::RdoPaBoost, 1));
    let _ = overlay.push((Field::LoraImplicitHdrMode, 0));
    let _ = overlay.push((Field::LoraCrcEn, 1));
    let _ = overlay.push((Field::LoraSyncWord, HEYMAC_SYNC_WORD));
    overlay
}

/// Matches `Heymac._PHY_STNGS_RX`.
pub fn phy_settings_rx() -> SettingsOverlay {
    let mut overlay = SettingsOverlay::new();
    let _ = overlay.push((Field::RdoFreq, HEYMAC_FREQ_HZ));
    overlay
}

/// Matches `Heymac._PHY_STNGS_TX`.
pub fn phy_settings_tx() -> SettingsOverlay {
    let mut overlay = SettingsOverlay::new();
    let _ = overlay.push((Field::RdoFreq, HEYMAC_FREQ_HZ));
    overlay
}

pub struct Lnk {
    local_addr: LinkAddr,
    identity: Option<Identity>,
    state: State,
    ngbrs: NeighborTable,
    bcn_evt: TimeEvent,
    tm_evt: TimeEvent,
    pending_tx: heapless::Vec<(SettingsOverlay, FrameBuf), MAX_PENDING_TX>,
}

impl Lnk {
    pub fn new(local_addr: LinkAddr) -> Self {
        Self {
            local_addr,
            identity: None,
            state: State::Lurking,
            ngbrs: NeighborTable::new(local_addr),
            bcn_evt: TimeEvent::new(),
            tm_evt: TimeEvent::new(),
            pending_tx: heapless::Vec::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn local_addr(&self) -> LinkAddr {
        self.local_addr
    }

    /// Supplies (or replaces) this node's beaconing identity. Lurking
    /// notices it the next time its timeout elapses.
    pub fn set_identity(&mut self, identity: Identity) {
        self.identity = Some(identity);
    }

    /// Enters `Lurking` and arms its credential-wait timeout.
    pub fn start(&mut self, now_us: u64) {
        self.state = State::Lurking;
        self.bcn_evt.post_in(now_us, LURK_TIMEOUT_US);
    }

    /// Pops the next queued outgoing frame (a beacon or a multi-hop
    /// re-transmission), for the caller to post onto `Phy`.
    pub fn take_pending_tx(&mut self) -> Option<(SettingsOverlay, FrameBuf)> {
        self.pending_tx.pop()
    }

    /// Call periodically so the beacon and link-update timers are
    /// serviced even when nothing has been received.
    pub fn tick(&mut self, now_us: u64) {
        if self.bcn_evt.poll(now_us) {
            self.on_bcn_tmout(now_us);
        }
        if self.tm_evt.poll(now_us) && self.state == State::Linking {
            self.ngbrs.expire(now_us, BCN_PERIOD_US);
            if !self.ngbrs.ngbr_hears_me() {
                self.state = State::Beaconing;
                self.tm_evt.disarm();
            }
        }
    }

    fn on_bcn_tmout(&mut self, now_us: u64) {
        match self.state {
            State::Lurking => {
                if self.identity.is_some() {
                    self.enter_beaconing(now_us);
                } else {
                    self.bcn_evt.post_in(now_us, BCN_PERIOD_US);
                }
            }
            State::Beaconing | State::Linking => {
                self.post_bcn();
            }
        }
    }

    fn enter_beaconing(&mut self, now_us: u64) {
        self.state = State::Beaconing;
        self.bcn_evt.post_every(now_us, BCN_PERIOD_US);
        self.post_bcn();
    }

    /// Builds and queues a beacon advertising this node's capabilities
    /// and the neighbors it currently hears.
    fn post_bcn(&mut self) {
        let Some(identity) = &self.identity else { return };
        let bcn = Beacon {
            caps: LNK_CAP_RXCONT,
            status: 0,
            callsign_ssid: identity.callsign_ssid,
            pub_key: identity.pub_key,
            heard_ngbrs: self.ngbrs.heard_ngbrs(),
        };
        let cmd = Command::Beacon(bcn);
        let mut payld = heapless::Vec::new();
        if cmd.serialize_into(&mut payld).is_err() {
            return;
        }
        let Ok(frame) = Frame::new(SubProtocol::Csma).with_saddr(Addr::Long(self.local_addr)) else {
            return;
        };
        let Ok(frame) = frame.with_payload(&payld) else { return };
        let Ok(bytes) = frame.to_bytes() else { return };
        let _ = self.pending_tx.push((phy_settings_tx(), bytes));
    }

    /// Builds and queues an application command addressed to `dest`
    /// (or broadcast, if `None`), using the PHY's current base settings
    /// rather than the TX overlay — matches `send_cmd`'s `None` stngs
    /// argument in the Python reference driver.
    pub fn send_cmd(&mut self, cmd: &Command, dest: Option<LinkAddr>) {
        let Ok(mut frame) = Frame::new(SubProtocol::Csma).with_saddr(Addr::Long(self.local_addr)) else {
            return;
        };
        if let Some(dest) = dest {
            let Ok(f) = frame.with_daddr(Addr::Long(dest)) else { return };
            frame = f;
        }
        let mut payld = heapless::Vec::new();
        if cmd.serialize_into(&mut payld).is_err() {
            return;
        }
        let Ok(frame) = frame.with_payload(&payld) else { return };
        let Ok(bytes) = frame.to_bytes() else { return };
        let _ = self.pending_tx.push((SettingsOverlay::new(), bytes));
    }

    /// Processes a frame the PHY delivered: updates link data, queues a
    /// multi-hop re-transmission if this frame needs one, decides
    /// whether the link is now (or no longer) proven two-way, and hands
    /// the frame to `sink` for upper-layer processing.
    pub fn on_rx(&mut self, now_us: u64, bytes: &[u8], rssi_dbm: i16, snr_db: f32, sink: &mut dyn LnkRxSink) {
        let Ok(frame) = Frame::parse(bytes) else { return };
        let Some(sender_addr) = frame.sender() else { return };
        let Addr::Long(sender) = sender_addr else { return };
        let sender = *sender;

        let cmd = Command::parse(frame.payload()).ok();
        let beacon = cmd.as_ref().and_then(|c| match c {
            Command::Beacon(b) => Some(b),
            _ => None,
        });
        self.ngbrs.process_frame(sender, now_us, rssi_dbm, snr_db, beacon);

        if cmd.is_some() && frame.is_mhop() {
            if let Some(hops) = frame.hops() {
                if hops > 1 {
                    self.forward(&frame, hops - 1);
                }
            }
        }

        sink.on_rx(&frame, now_us, rssi_dbm, snr_db);

        match self.state {
            State::Beaconing => {
                if self.ngbrs.ngbr_hears_me() {
                    self.state = State::Linking;
                    self.tm_evt.post_every(now_us, LNK_UPDATE_PERIOD_US);
                }
            }
            State::Linking => {
                if self.ngbrs.ngbr_hears_me() {
                    self.tm_evt.post_every(now_us, LNK_UPDATE_PERIOD_US);
                }
            }
            State::Lurking => {}
        }
    }

    /// Re-transmits a multi-hop frame with its hop count decremented
    /// and this node set as re-transmitter, per `_on_rxd_from_phy`.
    fn forward(&mut self, frame: &Frame, hops_left: u8) {
        let mut rebuilt = Frame::new(frame.sub_protocol().unwrap_or(SubProtocol::Csma));
        if let Some(netid) = frame.netid() {
            rebuilt = rebuilt.with_netid(netid);
        }
        if let Some(daddr) = frame.daddr().copied() {
            let Ok(f) = rebuilt.with_daddr(daddr) else { return };
            rebuilt = f;
        }
        if let Some(ies) = frame.ies().cloned() {
            rebuilt = rebuilt.with_ies(ies);
        }
        if let Some(saddr) = frame.saddr().copied() {
            let Ok(f) = rebuilt.with_saddr(saddr) else { return };
            rebuilt = f;
        }
        let Ok(rebuilt) = rebuilt.with_payload(frame.payload()) else { return };
        let Ok(rebuilt) = rebuilt.with_mic(frame.mic()) else { return };
        let Ok(rebuilt) = rebuilt.with_multihop(hops_left, Addr::Long(self.local_addr)) else { return };
        let Ok(bytes) = rebuilt.to_bytes() else { return };
        let _ = self.pending_tx.push((phy_settings_tx(), bytes));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        let mut callsign_ssid = [0u8; 16];
        callsign_ssid[..2].copy_from_slice(b"N0");
        Identity { callsign_ssid, pub_key: [0u8; 96] }
    }

    struct NullSink;
    impl LnkRxSink for NullSink {
        fn on_rx(&mut self, _frame: &Frame, _rx_time_us: u64, _rssi_dbm: i16, _snr_db: f32) {}
    }

    #[test]
    fn lurking_without_identity_rearms_and_stays_lurking() {
        let mut lnk = Lnk::new([1; 8]);
        lnk.start(0);
        lnk.tick(LURK_TIMEOUT_US);
        assert_eq!(lnk.state(), State::Lurking);
    }

    #[test]
    fn lurking_with_identity_transitions_to_beaconing_and_queues_a_beacon() {
        let mut lnk = Lnk::new([1; 8]);
        lnk.set_identity(identity());
        lnk.start(0);
        lnk.tick(LURK_TIMEOUT_US);
        assert_eq!(lnk.state(), State::Beaconing);
        assert!(lnk.take_pending_tx().is_some());
    }

    #[test]
    fn beaconing_periodically_requeues_a_beacon() {
        let mut lnk = Lnk::new([1; 8]);
        lnk.set_identity(identity());
        lnk.start(0);
        lnk.tick(LURK_TIMEOUT_US);
        lnk.take_pending_tx();
        lnk.tick(LURK_TIMEOUT_US + BCN_PERIOD_US);
        assert!(lnk.take_pending_tx().is_some());
    }

    fn beacon_bytes(sender: LinkAddr, heard: &[LinkAddr]) -> FrameBuf {
        let mut heard_ngbrs = heapless::Vec::new();
        for a in heard {
            heard_ngbrs.push(*a).unwrap();
        }
        let bcn = Beacon { caps: 0, status: 0, callsign_ssid: [0; 16], pub_key: [0; 96], heard_ngbrs };
        let mut payld = heapless::Vec::new();
        Command::Beacon(bcn).serialize_into(&mut payld).unwrap();
        Frame::new(SubProtocol::Csma)
            .with_saddr(Addr::Long(sender))
            .unwrap()
            .with_payload(&payld)
            .unwrap()
            .to_bytes()
            .unwrap()
    }

    #[test]
    fn hearing_our_own_address_in_a_beacon_enters_linking() {
        let local = [1u8; 8];
        let mut lnk = Lnk::new(local);
        lnk.set_identity(identity());
        lnk.start(0);
        lnk.tick(LURK_TIMEOUT_US);
        assert_eq!(lnk.state(), State::Beaconing);

        let mut sink = NullSink;
        let bytes = beacon_bytes([2; 8], &[local]);
        lnk.on_rx(100, &bytes, -80, 5.0, &mut sink);
        assert_eq!(lnk.state(), State::Linking);
    }

    #[test]
    fn linking_drops_back_to_beaconing_once_ngbr_goes_quiet() {
        let local = [1u8; 8];
        let mut lnk = Lnk::new(local);
        lnk.set_identity(identity());
        lnk.start(0);
        lnk.tick(LURK_TIMEOUT_US);
        let mut sink = NullSink;
        let bytes = beacon_bytes([2; 8], &[local]);
        lnk.on_rx(100, &bytes, -80, 5.0, &mut sink);
        assert_eq!(lnk.state(), State::Linking);

        lnk.tick(100 + 4 * BCN_PERIOD_US + LNK_UPDATE_PERIOD_US);
        assert_eq!(lnk.state(), State::Beaconing);
    }

    #[test]
    fn multihop_frame_is_requeued_with_decremented_hops_and_our_address() {
        let local = [9u8; 8];
        let mut lnk = Lnk::new(local);
        let mut sink = NullSink;

        let mut payld = heapless::Vec::new();
        Command::Text({
            let mut m = heapless::Vec::new();
            m.extend_from_slice(b"hi").unwrap();
            m
        })
        .serialize_into(&mut payld)
        .unwrap();
        let frame = Frame::new(SubProtocol::Csma)
            .with_saddr(Addr::Long([2; 8]))
            .unwrap()
            .with_payload(&payld)
            .unwrap()
            .with_multihop(3, Addr::Long([3; 8]))
            .unwrap();
        let bytes = frame.to_bytes().unwrap();

        lnk.on_rx(0, &bytes, -80, 5.0, &mut sink);
        let (_, queued) = lnk.take_pending_tx().expect("multihop frame should be requeued");
        let rebuilt = Frame::parse(&queued).unwrap();
        assert_eq!(rebuilt.hops(), Some(2));
        assert_eq!(rebuilt.taddr(), Some(&Addr::Long(local)));
    }

    #[test]
    fn single_hop_remaining_is_not_requeued() {
        let local = [9u8; 8];
        let mut lnk = Lnk::new(local);
        let mut sink = NullSink;

        let mut payld = heapless::Vec::new();
        Command::Text(heapless::Vec::new()).serialize_into(&mut payld).unwrap();
        let frame = Frame::new(SubProtocol::Csma)
            .with_saddr(Addr::Long([2; 8]))
            .unwrap()
            .with_payload(&payld)
            .unwrap()
            .with_multihop(1, Addr::Long([3; 8]))
            .unwrap();
        let bytes = frame.to_bytes().unwrap();

        lnk.on_rx(0, &bytes, -80, 5.0, &mut sink);
        assert!(lnk.take_pending_tx().is_none());
    }
}
