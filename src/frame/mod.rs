//! Heymac link-layer frame: `[Pid, Fctl, NetId, DstAddr, IEs, SrcAddr,
//! Payld, MIC, Hops, TxAddr]`.
//!
//! Grounded verbatim on `HeymacFrame` in the Python reference driver.
//! A frame is built by setting fields through [`Frame::new`] and the
//! `with_*` builders, then serialized with [`Frame::to_bytes`]; an
//! over-the-air buffer is turned back into a `Frame` with
//! [`Frame::parse`].

pub mod cmd;
pub mod ie;

use crate::error::FrameError;
pub use ie::IeSequence;

pub const MAX_FRAME_LEN: usize = 256;
pub type FrameBuf = heapless::Vec<u8, MAX_FRAME_LEN>;

/// MIC trailer, sized by a `Ie::PldMic` pIE rather than fixed.
pub const MAX_MIC_LEN: usize = 16;
pub type MicBuf = heapless::Vec<u8, MAX_MIC_LEN>;

/// PID ident nibble: always `0b1110` for a Heymac frame.
pub const PID_IDENT_HEYMAC: u8 = 0b1110_0000;
const PID_IDENT_MASK: u8 = 0b1111_0000;
const PID_TYPE_MASK: u8 = 0b0000_1111;

/// Heymac sub-protocol carried in the PID's low nibble.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum SubProtocol {
    Tdma,
    Csma,
}

impl SubProtocol {
    const TDMA_BITS: u8 = 0b0000_0000;
    const CSMA_BITS: u8 = 0b0000_0100;

    fn from_bits(pid: u8) -> Option<Self> {
        match pid & PID_TYPE_MASK {
            Self::TDMA_BITS => Some(Self::Tdma),
            Self::CSMA_BITS => Some(Self::Csma),
            _ => None,
        }
    }

    fn bits(self) -> u8 {
        match self {
            Self::Tdma => Self::TDMA_BITS,
            Self::Csma => Self::CSMA_BITS,
        }
    }
}

/// Frame Control bit flags.
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
#[repr(u8)]
pub enum Fctl {
    Extended = 0b1000_0000,
    LongAddr = 0b0100_0000,
    NetIdPresent = 0b0010_0000,
    DstAddrPresent = 0b0001_0000,
    IesPresent = 0b0000_1000,
    SrcAddrPresent = 0b0000_0100,
    Multihop = 0b0000_0010,
    Pending = 0b0000_0001,
}

/// A link-layer address, 2 bytes (short) or 8 bytes (long), selected
/// by [`Fctl::LongAddr`].
#[derive(Clone, Copy, PartialEq, Eq, Debug, defmt::Format)]
pub enum Addr {
    Short([u8; 2]),
    Long([u8; 8]),
}

impl Addr {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Addr::Short(b) => b.as_slice(),
            Addr::Long(b) => b.as_slice(),
        }
    }

    pub fn is_long(&self) -> bool {
        matches!(self, Addr::Long(_))
    }

    fn from_slice(bytes: &[u8], long: bool) -> Result<Self, FrameError> {
        if long {
            let arr: [u8; 8] = bytes.try_into().map_err(|_| FrameError::AddressLengthMismatch)?;
            Ok(Addr::Long(arr))
        } else {
            let arr: [u8; 2] = bytes.try_into().map_err(|_| FrameError::AddressLengthMismatch)?;
            Ok(Addr::Short(arr))
        }
    }
}

/// A parsed or to-be-built Heymac frame.
#[derive(Clone)]
pub struct Frame {
    pid: u8,
    fctl: u8,
    netid: Option<[u8; 2]>,
    daddr: Option<Addr>,
    ies: Option<IeSequence>,
    saddr: Option<Addr>,
    payld: FrameBuf,
    mic: MicBuf,
    hops: Option<u8>,
    taddr: Option<Addr>,
}

impl Frame {
    /// Creates an empty frame with the given sub-protocol. Build it up
    /// with the `with_*` methods, then call [`Frame::to_bytes`].
    pub fn new(sub_protocol: SubProtocol) -> Self {
        Self {
            pid: PID_IDENT_HEYMAC | sub_protocol.bits(),
            fctl: 0,
            netid: None,
            daddr: None,
            ies: None,
            saddr: None,
            payld: FrameBuf::new(),
            mic: MicBuf::new(),
            hops: None,
            taddr: None,
        }
    }

    pub fn pid(&self) -> u8 {
        self.pid
    }

    pub fn fctl(&self) -> u8 {
        self.fctl
    }

    pub fn sub_protocol(&self) -> Option<SubProtocol> {
        SubProtocol::from_bits(self.pid)
    }

    pub fn is_extended(&self) -> bool {
        self.fctl & Fctl::Extended as u8 != 0
    }

    pub fn is_long_addrs(&self) -> bool {
        !self.is_extended() && self.fctl & Fctl::LongAddr as u8 != 0
    }

    pub fn is_mhop(&self) -> bool {
        !self.is_extended() && self.fctl & Fctl::Multihop as u8 != 0
    }

    fn addr_len(&self) -> usize {
        if self.is_long_addrs() {
            8
        } else {
            2
        }
    }

    pub fn with_netid(mut self, netid: [u8; 2]) -> Self {
        self.netid = Some(netid);
        self.fctl |= Fctl::NetIdPresent as u8;
        self
    }

    pub fn with_daddr(mut self, addr: Addr) -> Result<Self, FrameError> {
        self.adopt_addr_shape(&addr)?;
        self.daddr = Some(addr);
        self.fctl |= Fctl::DstAddrPresent as u8;
        Ok(self)
    }

    pub fn with_saddr(mut self, addr: Addr) -> Result<Self, FrameError> {
        self.adopt_addr_shape(&addr)?;
        self.saddr = Some(addr);
        self.fctl |= Fctl::SrcAddrPresent as u8;
        Ok(self)
    }

    pub fn with_ies(mut self, ies: IeSequence) -> Self {
        self.ies = Some(ies);
        self.fctl |= Fctl::IesPresent as u8;
        self
    }

    pub fn with_payload(mut self, payld: &[u8]) -> Result<Self, FrameError> {
        self.payld.clear();
        self.payld.extend_from_slice(payld).map_err(|_| FrameError::FrameTooLarge)?;
        Ok(self)
    }

    /// Sets the MIC trailer. Its length must match what a `Ie::PldMic`
    /// pIE in this frame's `ies` declares, or [`Frame::to_bytes`] /
    /// [`Frame::parse`] rejects the frame as malformed.
    pub fn with_mic(mut self, mic: &[u8]) -> Result<Self, FrameError> {
        self.mic.clear();
        self.mic.extend_from_slice(mic).map_err(|_| FrameError::FrameTooLarge)?;
        Ok(self)
    }

    /// The MIC size declared by this frame's IE sequence, 0 if none.
    fn declared_mic_len(&self) -> usize {
        self.ies
            .as_ref()
            .and_then(|ies| {
                ies.iter().find_map(|ie| match ie {
                    ie::Ie::PldMic { mic_sz, .. } => Some(*mic_sz as usize),
                    _ => None,
                })
            })
            .unwrap_or(0)
    }

    pub fn with_multihop(mut self, hops: u8, taddr: Addr) -> Result<Self, FrameError> {
        self.adopt_addr_shape(&taddr)?;
        self.hops = Some(hops);
        self.taddr = Some(taddr);
        self.fctl |= Fctl::Multihop as u8;
        Ok(self)
    }

    /// The first address set on a frame fixes whether it uses long or
    /// short addressing (`Fctl::LongAddr`); every later address must
    /// match that shape.
    fn adopt_addr_shape(&mut self, addr: &Addr) -> Result<(), FrameError> {
        let have_addr = self.daddr.is_some() || self.saddr.is_some() || self.taddr.is_some();
        if have_addr {
            if addr.is_long() != self.is_long_addrs() {
                return Err(FrameError::AddressLengthMismatch);
            }
        } else if addr.is_long() {
            self.fctl |= Fctl::LongAddr as u8;
        }
        Ok(())
    }

    pub fn netid(&self) -> Option<[u8; 2]> {
        self.netid
    }

    pub fn daddr(&self) -> Option<&Addr> {
        self.daddr.as_ref()
    }

    pub fn saddr(&self) -> Option<&Addr> {
        self.saddr.as_ref()
    }

    pub fn ies(&self) -> Option<&IeSequence> {
        self.ies.as_ref()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payld
    }

    pub fn mic(&self) -> &[u8] {
        &self.mic
    }

    pub fn hops(&self) -> Option<u8> {
        self.hops
    }

    pub fn taddr(&self) -> Option<&Addr> {
        self.taddr.as_ref()
    }

    /// The frame's sender: the re-transmitter's address if this is a
    /// multi-hop frame, otherwise the original source address.
    pub fn sender(&self) -> Option<&Addr> {
        if self.is_mhop() {
            self.taddr.as_ref()
        } else {
            self.saddr.as_ref()
        }
    }

    /// Serializes the frame, validating Fctl/field consistency first.
    pub fn to_bytes(&self) -> Result<FrameBuf, FrameError> {
        self.validate()?;

        let mut out = FrameBuf::new();
        let push = |out: &mut FrameBuf, b: u8| out.push(b).map_err(|_| FrameError::FrameTooLarge);
        let extend = |out: &mut FrameBuf, bytes: &[u8]| {
            out.extend_from_slice(bytes).map_err(|_| FrameError::FrameTooLarge)
        };

        push(&mut out, self.pid)?;
        push(&mut out, self.fctl)?;

        if self.is_extended() {
            extend(&mut out, &self.payld)?;
            return Ok(out);
        }

        if let Some(netid) = self.netid {
            extend(&mut out, &netid)?;
        }
        if let Some(daddr) = &self.daddr {
            extend(&mut out, daddr.as_bytes())?;
        }
        if let Some(ies) = &self.ies {
            let mut buf = [0u8; MAX_FRAME_LEN];
            let n = ies.serialize_into(&mut buf)?;
            extend(&mut out, &buf[..n])?;
        }
        if let Some(saddr) = &self.saddr {
            extend(&mut out, saddr.as_bytes())?;
        }
        if !self.payld.is_empty() {
            extend(&mut out, &self.payld)?;
        }
        if !self.mic.is_empty() {
            extend(&mut out, &self.mic)?;
        }
        if self.is_mhop() {
            push(&mut out, self.hops.unwrap())?;
            extend(&mut out, self.taddr.as_ref().unwrap().as_bytes())?;
        }

        if out.len() > MAX_FRAME_LEN {
            return Err(FrameError::FrameTooLarge);
        }
        Ok(out)
    }

    /// Parses a complete over-the-air buffer into a `Frame`. The radio
    /// driver's FIFO byte count is authoritative for `bytes`' length —
    /// this codec never expects or emits a length prefix of its own.
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < 2 {
            return Err(FrameError::TrailingOrMissingBytes);
        }
        let pid = bytes[0];
        if pid & PID_IDENT_MASK != PID_IDENT_HEYMAC {
            return Err(FrameError::NotHeymac);
        }
        if SubProtocol::from_bits(pid).is_none() {
            return Err(FrameError::UnsupportedSubProtocol);
        }
        let fctl = bytes[1];
        let mut frame = Self {
            pid,
            fctl,
            netid: None,
            daddr: None,
            ies: None,
            saddr: None,
            payld: FrameBuf::new(),
            mic: MicBuf::new(),
            hops: None,
            taddr: None,
        };
        let addr_sz = frame.addr_len();
        let mut offset = 2usize;

        if frame.is_extended() {
            frame.payld.extend_from_slice(&bytes[offset..]).map_err(|_| FrameError::FrameTooLarge)?;
            offset = bytes.len();
        } else {
            if fctl & Fctl::NetIdPresent as u8 != 0 {
                let end = offset + 2;
                let slice = bytes.get(offset..end).ok_or(FrameError::TrailingOrMissingBytes)?;
                frame.netid = Some([slice[0], slice[1]]);
                offset = end;
            }
            if fctl & Fctl::DstAddrPresent as u8 != 0 {
                let end = offset + addr_sz;
                let slice = bytes.get(offset..end).ok_or(FrameError::TrailingOrMissingBytes)?;
                frame.daddr = Some(Addr::from_slice(slice, addr_sz == 8)?);
                offset = end;
            }
            if fctl & Fctl::IesPresent as u8 != 0 {
                let (seq, consumed) = IeSequence::parse(&bytes[offset..])?;
                frame.ies = Some(seq);
                offset += consumed;
            }
            if fctl & Fctl::SrcAddrPresent as u8 != 0 {
                let end = offset + addr_sz;
                let slice = bytes.get(offset..end).ok_or(FrameError::TrailingOrMissingBytes)?;
                frame.saddr = Some(Addr::from_slice(slice, addr_sz == 8)?);
                offset = end;
            }

            let mhop_sz = if fctl & Fctl::Multihop as u8 != 0 { 1 + addr_sz } else { 0 };
            let mic_sz = frame.declared_mic_len();
            if bytes.len() < offset + mic_sz + mhop_sz {
                return Err(FrameError::TrailingOrMissingBytes);
            }
            let payld_sz = bytes.len() - offset - mic_sz - mhop_sz;
            if payld_sz > 0 {
                frame
                    .payld
                    .extend_from_slice(&bytes[offset..offset + payld_sz])
                    .map_err(|_| FrameError::FrameTooLarge)?;
                offset += payld_sz;
            }
            if mic_sz > 0 {
                frame
                    .mic
                    .extend_from_slice(&bytes[offset..offset + mic_sz])
                    .map_err(|_| FrameError::FrameTooLarge)?;
                offset += mic_sz;
            }

            if fctl & Fctl::Multihop as u8 != 0 {
                frame.hops = Some(bytes[offset]);
                offset += 1;
                let end = offset + addr_sz;
                let slice = bytes.get(offset..end).ok_or(FrameError::TrailingOrMissingBytes)?;
                frame.taddr = Some(Addr::from_slice(slice, addr_sz == 8)?);
                offset = end;
            }
        }

        if offset != bytes.len() {
            return Err(FrameError::TrailingOrMissingBytes);
        }
        frame.validate()?;
        Ok(frame)
    }

    fn validate(&self) -> Result<(), FrameError> {
        let fctl = self.fctl;
        let checks: [(u8, bool); 4] = [
            (Fctl::NetIdPresent as u8, self.netid.is_some()),
            (Fctl::DstAddrPresent as u8, self.daddr.is_some()),
            (Fctl::IesPresent as u8, self.ies.is_some()),
            (Fctl::SrcAddrPresent as u8, self.saddr.is_some()),
        ];
        for (bit, present) in checks {
            if (fctl & bit != 0) != present {
                return Err(FrameError::FctlFieldMismatch);
            }
        }
        let mhop_set = fctl & Fctl::Multihop as u8 != 0;
        if mhop_set != (self.hops.is_some() && self.taddr.is_some()) {
            return Err(FrameError::FctlFieldMismatch);
        }

        if self.mic.len() != self.declared_mic_len() {
            return Err(FrameError::FctlFieldMismatch);
        }

        if fctl & Fctl::LongAddr as u8 != 0
            && self.daddr.is_none()
            && self.saddr.is_none()
            && self.taddr.is_none()
        {
            return Err(FrameError::LongAddrWithoutAddress);
        }

        if fctl & Fctl::Extended as u8 != 0
            && (self.netid.is_some()
                || self.daddr.is_some()
                || self.ies.is_some()
                || self.saddr.is_some()
                || self.hops.is_some()
                || self.taddr.is_some())
        {
            return Err(FrameError::ExtendedWithStructuredField);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_parse_round_trip() {
        let frame = Frame::new(SubProtocol::Csma)
            .with_daddr(Addr::Short([0x01, 0xE3]))
            .unwrap()
            .with_saddr(Addr::Short([0x35, 0x16]))
            .unwrap()
            .with_payload(b"hello")
            .unwrap();
        let bytes = frame.to_bytes().unwrap();
        let parsed = Frame::parse(&bytes).unwrap();
        assert_eq!(parsed.daddr(), Some(&Addr::Short([0x01, 0xE3])));
        assert_eq!(parsed.saddr(), Some(&Addr::Short([0x35, 0x16])));
        assert_eq!(parsed.payload(), b"hello");
    }

    #[test]
    fn rejects_non_heymac_pid() {
        assert_eq!(Frame::parse(&[0x00, 0x00]), Err(FrameError::NotHeymac));
    }

    #[test]
    fn rejects_trailing_bytes() {
        let frame = Frame::new(SubProtocol::Csma).with_payload(b"x").unwrap();
        let mut bytes = frame.to_bytes().unwrap();
        bytes.push(0xFF).unwrap();
        assert_eq!(Frame::parse(&bytes), Err(FrameError::TrailingOrMissingBytes));
    }

    #[test]
    fn mic_round_trip() {
        let mut ies = IeSequence::new();
        ies.push(ie::Ie::PldMic { mic_algo: 1, mic_sz: 4 }).unwrap();
        ies.push(ie::Ie::PldTerm).unwrap();

        let frame = Frame::new(SubProtocol::Csma)
            .with_ies(ies)
            .with_payload(b"hi")
            .unwrap()
            .with_mic(&[0xAA, 0xBB, 0xCC, 0xDD])
            .unwrap();
        let bytes = frame.to_bytes().unwrap();
        let parsed = Frame::parse(&bytes).unwrap();
        assert_eq!(parsed.payload(), b"hi");
        assert_eq!(parsed.mic(), &[0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn mic_length_mismatch_is_rejected() {
        let mut ies = IeSequence::new();
        ies.push(ie::Ie::PldMic { mic_algo: 1, mic_sz: 4 }).unwrap();
        ies.push(ie::Ie::PldTerm).unwrap();

        let frame = Frame::new(SubProtocol::Csma).with_ies(ies).with_mic(&[0x01, 0x02]).unwrap();
        assert_eq!(frame.to_bytes(), Err(FrameError::FctlFieldMismatch));
    }

    #[test]
    fn multihop_round_trip() {
        let frame = Frame::new(SubProtocol::Csma)
            .with_saddr(Addr::Short([1, 2]))
            .unwrap()
            .with_multihop(3, Addr::Short([9, 9]))
            .unwrap();
        let bytes = frame.to_bytes().unwrap();
        let parsed = Frame::parse(&bytes).unwrap();
        assert_eq!(parsed.hops(), Some(3));
        assert_eq!(parsed.sender(), Some(&Addr::Short([9, 9])));
    }
}
