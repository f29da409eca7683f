//! The neighbor table: per-neighbor beacon/RX statistics used to
//! decide when this node has a working two-way link and which
//! neighbors have gone quiet.
//!
//! Grounded on `HeymacLink` in the Python reference driver, with one
//! deliberate change: `ngbr_hears_me` is answered for real rather than
//! being the Python source's permanent `False` stub (see its own
//! `FIXME`, which notes the beacon frame it once relied on no longer
//! carries a neighbor list). This crate's [`super::cmd::Beacon`] — see
//! `crate::frame::cmd::Beacon` — keeps a `heard_ngbrs` list for exactly
//! this purpose, so a neighbor whose beacon lists our own address
//! proves the link works both ways.
//!
//! The Python source also only tracks `LATEST_RX_*` fields on a
//! neighbor once its first beacon has arrived, then expires neighbors
//! by reading time off that beacon frame — which throws if a neighbor
//! is heard from but never beacons. Expiration here runs off
//! `latest_rx_time_us`, which every heard frame updates, beacon or not.

use crate::frame::cmd::{Beacon, LinkAddr};

pub const MAX_NGBRS: usize = 16;

/// Neighbors not heard from in this many beacon periods are pruned.
/// Matches `HeymacLink._EXPIRATION_PRD` (4 * beacon period).
pub const EXPIRATION_PERIODS: u64 = 4;

#[derive(Clone, Debug, defmt::Format)]
pub struct NgbrEntry {
    pub bcn_cnt: u32,
    pub last_beacon: Option<Beacon>,
    pub latest_rx_time_us: u64,
    pub latest_rx_rssi_dbm: i16,
    pub latest_rx_snr_db: f32,
}

impl NgbrEntry {
    fn new(rx_time_us: u64, rssi_dbm: i16, snr_db: f32) -> Self {
        Self {
            bcn_cnt: 0,
            last_beacon: None,
            latest_rx_time_us: rx_time_us,
            latest_rx_rssi_dbm: rssi_dbm,
            latest_rx_snr_db: snr_db,
        }
    }
}

pub struct NeighborTable {
    local_addr: LinkAddr,
    ngbrs: heapless::FnvIndexMap<LinkAddr, NgbrEntry, MAX_NGBRS>,
}

impl NeighborTable {
    pub fn new(local_addr: LinkAddr) -> Self {
        Self { local_addr, ngbrs: heapless::FnvIndexMap::new() }
    }

    pub fn get(&self, addr: &LinkAddr) -> Option<&NgbrEntry> {
        self.ngbrs.get(addr)
    }

    pub fn len(&self) -> usize {
        self.ngbrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ngbrs.is_empty()
    }

    /// Records reception meta-data from `sender`, and if `beacon` is
    /// `Some`, counts it and keeps it as the neighbor's most recent one.
    pub fn process_frame(
        &mut self,
        sender: LinkAddr,
        rx_time_us: u64,
        rssi_dbm: i16,
        snr_db: f32,
        beacon: Option<&Beacon>,
    ) {
        if !self.ngbrs.contains_key(&sender) {
            let _ = self.ngbrs.insert(sender, NgbrEntry::new(rx_time_us, rssi_dbm, snr_db));
        }
        let Some(entry) = self.ngbrs.get_mut(&sender) else {
            return;
        };
        entry.latest_rx_time_us = rx_time_us;
        entry.latest_rx_rssi_dbm = rssi_dbm;
        entry.latest_rx_snr_db = snr_db;
        if let Some(bcn) = beacon {
            entry.bcn_cnt += 1;
            entry.last_beacon = Some(bcn.clone());
        }
    }

    /// Prunes neighbors not heard from in `EXPIRATION_PERIODS *
    /// bcn_period_us`.
    pub fn expire(&mut self, now_us: u64, bcn_period_us: u64) {
        let cutoff = EXPIRATION_PERIODS * bcn_period_us;
        let expired: heapless::Vec<LinkAddr, MAX_NGBRS> = self
            .ngbrs
            .iter()
            .filter(|(_, d)| now_us > d.latest_rx_time_us + cutoff)
            .map(|(addr, _)| *addr)
            .collect();
        for addr in expired {
            self.ngbrs.remove(&addr);
        }
    }

    /// `true` once at least one neighbor's most recent beacon lists
    /// this node's own address, proving two-way transmission.
    pub fn ngbr_hears_me(&self) -> bool {
        self.ngbrs.values().any(|d| {
            d.bcn_cnt > 0
                && d.last_beacon.as_ref().is_some_and(|b| b.heard_ngbrs.contains(&self.local_addr))
        })
    }

    /// The neighbors this node currently tracks, for stamping into an
    /// outgoing beacon's `heard_ngbrs` list.
    pub fn heard_ngbrs(&self) -> heapless::Vec<LinkAddr, MAX_NGBRS> {
        let mut out = heapless::Vec::new();
        for addr in self.ngbrs.keys() {
            if out.push(*addr).is_err() {
                break;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beacon_with_heard(heard: &[LinkAddr]) -> Beacon {
        let mut heard_ngbrs = heapless::Vec::new();
        for a in heard {
            heard_ngbrs.push(*a).unwrap();
        }
        Beacon { caps: 0, status: 0, callsign_ssid: [0; 16], pub_key: [0; 96], heard_ngbrs }
    }

    #[test]
    fn new_neighbor_is_tracked_without_a_beacon() {
        let mut tbl = NeighborTable::new([1; 8]);
        tbl.process_frame([2; 8], 100, -80, 5.0, None);
        let entry = tbl.get(&[2; 8]).unwrap();
        assert_eq!(entry.bcn_cnt, 0);
        assert_eq!(entry.latest_rx_time_us, 100);
    }

    #[test]
    fn ngbr_hears_me_true_once_a_beacon_lists_us() {
        let local = [1u8; 8];
        let mut tbl = NeighborTable::new(local);
        assert!(!tbl.ngbr_hears_me());
        tbl.process_frame([2; 8], 100, -80, 5.0, Some(&beacon_with_heard(&[local])));
        assert!(tbl.ngbr_hears_me());
    }

    #[test]
    fn ngbr_hears_me_false_when_beacon_omits_us() {
        let mut tbl = NeighborTable::new([1; 8]);
        tbl.process_frame([2; 8], 100, -80, 5.0, Some(&beacon_with_heard(&[[9; 8]])));
        assert!(!tbl.ngbr_hears_me());
    }

    #[test]
    fn expire_prunes_stale_neighbors() {
        let mut tbl = NeighborTable::new([1; 8]);
        tbl.process_frame([2; 8], 0, -80, 5.0, None);
        tbl.expire(4 * 32_000_000 + 1, 32_000_000);
        assert!(tbl.is_empty());
    }

    #[test]
    fn expire_keeps_recently_heard_neighbors() {
        let mut tbl = NeighborTable::new([1; 8]);
        tbl.process_frame([2; 8], 100, -80, 5.0, None);
        tbl.expire(100 + 4 * 32_000_000 - 1, 32_000_000);
        assert!(!tbl.is_empty());
    }
}
