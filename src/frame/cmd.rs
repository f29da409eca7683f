//! The Heymac command catalog: MAC/link-layer management messages
//! carried in a frame's payload.
//!
//! Grounded verbatim on `HeymacCmd` and its subclasses in the Python
//! reference driver. A command starts with a prefix byte (`10` in the
//! top two bits, the command ID in the low six); some commands carry a
//! second, sub-ID byte. Fixed-format commands have a fixed body size;
//! variable-length commands are a count byte followed by that many
//! identical fixed-size entries.

use crate::error::CommandError;

pub const PREFIX: u8 = 0b1000_0000;
const PREFIX_MASK: u8 = 0b1100_0000;
const CMD_MASK: u8 = 0b0011_1111;

/// Heymac link-layer address, as carried in `NeighborData` entries.
pub type LinkAddr = [u8; 8];

pub const TXT_CMD_ID: u8 = 1;
pub const BCN_CMD_ID: u8 = 2;
pub const NGBR_DATA_CMD_ID: u8 = 4;
pub const JOIN_CMD_ID: u8 = 5;

pub const JOIN_SUB_RQST: u8 = 1;
pub const JOIN_SUB_ACPT: u8 = 2;
pub const JOIN_SUB_CNFM: u8 = 3;
pub const JOIN_SUB_RJCT: u8 = 4;

pub const MAX_TXT_LEN: usize = 64;
pub const MAX_NGBRS: usize = 16;
pub const CALLSIGN_SSID_LEN: usize = 16;
pub const PUB_KEY_LEN: usize = 96;

#[derive(Clone, Debug, defmt::Format)]
pub struct Beacon {
    pub caps: u16,
    pub status: u16,
    pub callsign_ssid: [u8; CALLSIGN_SSID_LEN],
    pub pub_key: [u8; PUB_KEY_LEN],
    /// Neighbors this node hears, appended past the Python reference
    /// format so `ngbr_hears_me` can be answered for real instead of
    /// always returning false (see module docs on `lnk::neighbor`).
    pub heard_ngbrs: heapless::Vec<LinkAddr, MAX_NGBRS>,
}

impl Beacon {
    pub fn callsign_ssid_str(&self) -> &[u8] {
        let end = self.callsign_ssid.iter().position(|&b| b == 0).unwrap_or(CALLSIGN_SSID_LEN);
        &self.callsign_ssid[..end]
    }
}

#[derive(Clone, Debug, defmt::Format)]
pub enum Command {
    Text(heapless::Vec<u8, MAX_TXT_LEN>),
    Beacon(Beacon),
    NeighborData(heapless::Vec<LinkAddr, MAX_NGBRS>),
    JoinRequest { net_id: u16 },
    JoinAccept { net_id: u16, net_addr: u16 },
    JoinConfirm { net_id: u16, net_addr: u16 },
    JoinReject,
    Unknown { cmd_byte: u8 },
}

impl Command {
    pub fn serialize_into(&self, out: &mut heapless::Vec<u8, 256>) -> Result<(), CommandError> {
        let push = |out: &mut heapless::Vec<u8, 256>, b: u8| out.push(b).map_err(|_| CommandError::WrongLength);
        match self {
            Command::Text(msg) => {
                push(out, PREFIX | TXT_CMD_ID)?;
                push(out, msg.len() as u8)?;
                out.extend_from_slice(msg).map_err(|_| CommandError::WrongLength)?;
            }
            Command::Beacon(b) => {
                push(out, PREFIX | BCN_CMD_ID)?;
                out.extend_from_slice(&b.caps.to_be_bytes()).map_err(|_| CommandError::WrongLength)?;
                out.extend_from_slice(&b.status.to_be_bytes()).map_err(|_| CommandError::WrongLength)?;
                out.extend_from_slice(&b.callsign_ssid).map_err(|_| CommandError::WrongLength)?;
                out.extend_from_slice(&b.pub_key).map_err(|_| CommandError::WrongLength)?;
                push(out, b.heard_ngbrs.len() as u8)?;
                for addr in &b.heard_ngbrs {
                    out.extend_from_slice(addr).map_err(|_| CommandError::WrongLength)?;
                }
            }
            Command::NeighborData(entries) => {
                push(out, PREFIX | NGBR_DATA_CMD_ID)?;
                push(out, entries.len() as u8)?;
                for addr in entries {
                    out.extend_from_slice(addr).map_err(|_| CommandError::WrongLength)?;
                }
            }
            Command::JoinRequest { net_id } => {
                push(out, PREFIX | JOIN_CMD_ID)?;
                push(out, JOIN_SUB_RQST)?;
                out.extend_from_slice(&net_id.to_be_bytes()).map_err(|_| CommandError::WrongLength)?;
            }
            Command::JoinAccept { net_id, net_addr } => {
                push(out, PREFIX | JOIN_CMD_ID)?;
                push(out, JOIN_SUB_ACPT)?;
                out.extend_from_slice(&net_id.to_be_bytes()).map_err(|_| CommandError::WrongLength)?;
                out.extend_from_slice(&net_addr.to_be_bytes()).map_err(|_| CommandError::WrongLength)?;
            }
            Command::JoinConfirm { net_id, net_addr } => {
                push(out, PREFIX | JOIN_CMD_ID)?;
                push(out, JOIN_SUB_CNFM)?;
                out.extend_from_slice(&net_id.to_be_bytes()).map_err(|_| CommandError::WrongLength)?;
                out.extend_from_slice(&net_addr.to_be_bytes()).map_err(|_| CommandError::WrongLength)?;
            }
            Command::JoinReject => {
                push(out, PREFIX | JOIN_CMD_ID)?;
                push(out, JOIN_SUB_RJCT)?;
            }
            Command::Unknown { cmd_byte } => {
                push(out, *cmd_byte)?;
            }
        }
        Ok(())
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, CommandError> {
        let prefix = *bytes.first().ok_or(CommandError::Empty)?;
        if prefix & PREFIX_MASK != PREFIX {
            return Ok(Command::Unknown { cmd_byte: prefix });
        }
        let cmd_id = prefix & CMD_MASK;
        match cmd_id {
            TXT_CMD_ID => {
                let len = *bytes.get(1).ok_or(CommandError::WrongLength)? as usize;
                let body = bytes.get(2..2 + len).ok_or(CommandError::TruncatedEntries)?;
                let mut msg = heapless::Vec::new();
                msg.extend_from_slice(body).map_err(|_| CommandError::WrongLength)?;
                Ok(Command::Text(msg))
            }
            BCN_CMD_ID => parse_beacon(bytes),
            NGBR_DATA_CMD_ID => {
                let n = *bytes.get(1).ok_or(CommandError::WrongLength)? as usize;
                let mut entries = heapless::Vec::new();
                let mut off = 2;
                for _ in 0..n {
                    let entry: LinkAddr =
                        bytes.get(off..off + 8).ok_or(CommandError::TruncatedEntries)?.try_into().unwrap();
                    entries.push(entry).map_err(|_| CommandError::TruncatedEntries)?;
                    off += 8;
                }
                Ok(Command::NeighborData(entries))
            }
            JOIN_CMD_ID => parse_join(bytes),
            _ => Ok(Command::Unknown { cmd_byte: prefix }),
        }
    }
}

fn parse_beacon(bytes: &[u8]) -> Result<Command, CommandError> {
    const FIXED_LEN: usize = 1 + 2 + 2 + CALLSIGN_SSID_LEN + PUB_KEY_LEN + 1;
    if bytes.len() < FIXED_LEN {
        return Err(CommandError::WrongLength);
    }
    let mut off = 1;
    let caps = u16::from_be_bytes([bytes[off], bytes[off + 1]]);
    off += 2;
    let status = u16::from_be_bytes([bytes[off], bytes[off + 1]]);
    off += 2;
    let mut callsign_ssid = [0u8; CALLSIGN_SSID_LEN];
    callsign_ssid.copy_from_slice(&bytes[off..off + CALLSIGN_SSID_LEN]);
    off += CALLSIGN_SSID_LEN;
    let mut pub_key = [0u8; PUB_KEY_LEN];
    pub_key.copy_from_slice(&bytes[off..off + PUB_KEY_LEN]);
    off += PUB_KEY_LEN;

    let ngbr_cnt = bytes[off] as usize;
    off += 1;
    let mut heard_ngbrs = heapless::Vec::new();
    for _ in 0..ngbr_cnt {
        let entry: LinkAddr = bytes.get(off..off + 8).ok_or(CommandError::TruncatedEntries)?.try_into().unwrap();
        heard_ngbrs.push(entry).map_err(|_| CommandError::TruncatedEntries)?;
        off += 8;
    }

    Ok(Command::Beacon(Beacon { caps, status, callsign_ssid, pub_key, heard_ngbrs }))
}

fn parse_join(bytes: &[u8]) -> Result<Command, CommandError> {
    let sub_id = *bytes.get(1).ok_or(CommandError::MissingSubId)?;
    match sub_id {
        JOIN_SUB_RQST => {
            let net_id = u16::from_be_bytes(bytes.get(2..4).ok_or(CommandError::WrongLength)?.try_into().unwrap());
            Ok(Command::JoinRequest { net_id })
        }
        JOIN_SUB_ACPT => {
            let net_id = u16::from_be_bytes(bytes.get(2..4).ok_or(CommandError::WrongLength)?.try_into().unwrap());
            let net_addr = u16::from_be_bytes(bytes.get(4..6).ok_or(CommandError::WrongLength)?.try_into().unwrap());
            Ok(Command::JoinAccept { net_id, net_addr })
        }
        JOIN_SUB_CNFM => {
            let net_id = u16::from_be_bytes(bytes.get(2..4).ok_or(CommandError::WrongLength)?.try_into().unwrap());
            let net_addr = u16::from_be_bytes(bytes.get(4..6).ok_or(CommandError::WrongLength)?.try_into().unwrap());
            Ok(Command::JoinConfirm { net_id, net_addr })
        }
        JOIN_SUB_RJCT => Ok(Command::JoinReject),
        _ => Ok(Command::Unknown { cmd_byte: bytes[0] }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_round_trip() {
        let mut msg = heapless::Vec::new();
        msg.extend_from_slice(b"hi").unwrap();
        let cmd = Command::Text(msg);
        let mut buf = heapless::Vec::new();
        cmd.serialize_into(&mut buf).unwrap();
        match Command::parse(&buf).unwrap() {
            Command::Text(m) => assert_eq!(m.as_slice(), b"hi"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn neighbor_data_round_trip() {
        let mut entries = heapless::Vec::new();
        entries.push([1u8; 8]).unwrap();
        entries.push([2u8; 8]).unwrap();
        let cmd = Command::NeighborData(entries);
        let mut buf = heapless::Vec::new();
        cmd.serialize_into(&mut buf).unwrap();
        match Command::parse(&buf).unwrap() {
            Command::NeighborData(e) => assert_eq!(e.len(), 2),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn join_request_round_trip() {
        let cmd = Command::JoinRequest { net_id: 0xABCD };
        let mut buf = heapless::Vec::new();
        cmd.serialize_into(&mut buf).unwrap();
        match Command::parse(&buf).unwrap() {
            Command::JoinRequest { net_id } => assert_eq!(net_id, 0xABCD),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn beacon_carries_heard_neighbors() {
        let mut heard = heapless::Vec::new();
        heard.push([7u8; 8]).unwrap();
        let beacon = Beacon {
            caps: 1,
            status: 2,
            callsign_ssid: {
                let mut cs = [0u8; CALLSIGN_SSID_LEN];
                cs[..2].copy_from_slice(b"N0");
                cs
            },
            pub_key: [0u8; PUB_KEY_LEN],
            heard_ngbrs: heard,
        };
        let cmd = Command::Beacon(beacon);
        let mut buf = heapless::Vec::new();
        cmd.serialize_into(&mut buf).unwrap();
        match Command::parse(&buf).unwrap() {
            Command::Beacon(b) => {
                assert_eq!(b.callsign_ssid_str(), b"N0");
                assert_eq!(b.heard_ngbrs.len(), 1);
                assert_eq!(b.heard_ngbrs[0], [7u8; 8]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_command_id_preserved() {
        let buf = [PREFIX | 0x3F];
        match Command::parse(&buf).unwrap() {
            Command::Unknown { cmd_byte } => assert_eq!(cmd_byte, buf[0]),
            _ => panic!("wrong variant"),
        }
    }
}
