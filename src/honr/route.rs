//! Routing over HONR addresses.
//!
//! A node's address is tantamount to the route from the root to that
//! node. Routing between two arbitrary nodes walks up from the source
//! to their nearest common ancestor, then down to the destination.
//! Grounded verbatim on `heymac/net/route.py`.

use super::{is_valid_node, nearest_common_ancestor, rank, Addr};
use crate::error::AddressError;

/// Max hop count: root-to-leaf for an 8-byte (16-nibble) address is 17
/// hops (ranks 0..16), and a route can touch at most two such spans.
pub const MAX_ROUTE_LEN: usize = 33;

pub type Route = heapless::Vec<Addr, MAX_ROUTE_LEN>;

/// Returns the simple up-down route from `src` to `dst`, inclusive of
/// both endpoints.
pub fn get_route(src: Addr, dst: Addr) -> Result<Route, AddressError> {
    if !is_valid_node(src) || !is_valid_node(dst) {
        return Err(AddressError::IllFormed);
    }
    let nca = nearest_common_ancestor(src, dst)?;

    let mut route = Route::new();
    // Walk up from src to nca.
    let mut cur = src;
    let mut r = rank(src)?;
    while cur != nca {
        route.push(cur).map_err(|_| AddressError::WrongLength)?;
        r -= 1;
        cur = zero_nibble(cur, r)?;
    }
    route.push(nca).map_err(|_| AddressError::WrongLength)?;

    // Walk down from nca to dst, restoring dst's nibbles left-to-right.
    let dst_nibble_at = |idx: usize| -> Result<u8, AddressError> { nibble_at(dst, idx) };
    while cur != dst {
        cur = set_nibble(cur, r, dst_nibble_at(r)?)?;
        route.push(cur).map_err(|_| AddressError::WrongLength)?;
        r += 1;
    }
    Ok(route)
}

/// Returns `true` iff `local` should forward a frame received from
/// `resender` addressed to `dst`: i.e. `local` is the hop immediately
/// after `resender` in the ideal route from `resender` to `dst`. The
/// original source address is intentionally not considered, since it
/// may be encrypted.
pub fn should_forward(resender: Addr, dst: Addr, local: Addr) -> Result<bool, AddressError> {
    if dst == local {
        return Ok(false);
    }
    let route = get_route(resender, dst)?;
    let resender_pos = route.iter().position(|&a| a == resender);
    let local_pos = route.iter().position(|&a| a == local);
    Ok(matches!((resender_pos, local_pos), (Some(rp), Some(lp)) if lp == rp + 1))
}

fn nibble_at(addr: Addr, idx: usize) -> Result<u8, AddressError> {
    let bytes = addr_bytes(addr);
    let byte = bytes.get(idx / 2).copied().ok_or(AddressError::WrongLength)?;
    Ok(if idx % 2 == 0 { byte >> 4 } else { byte & 0xF })
}

fn zero_nibble(addr: Addr, idx: usize) -> Result<Addr, AddressError> {
    set_nibble(addr, idx, 0)
}

fn set_nibble(addr: Addr, idx: usize, val: u8) -> Result<Addr, AddressError> {
    let mut bytes = addr_bytes(addr);
    let b = bytes.get_mut(idx / 2).ok_or(AddressError::WrongLength)?;
    if idx % 2 == 0 {
        *b = (*b & 0x0F) | (val << 4);
    } else {
        *b = (*b & 0xF0) | (val & 0xF);
    }
    Ok(match addr {
        Addr::Short(_) => Addr::Short([bytes[0], bytes[1]]),
        Addr::Long(_) => Addr::Long(bytes),
    })
}

fn addr_bytes(addr: Addr) -> [u8; 8] {
    let mut out = [0u8; 8];
    match addr {
        Addr::Short(b) => {
            out[0] = b[0];
            out[1] = b[1];
        }
        Addr::Long(b) => out = b,
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a16(v: u16) -> Addr {
        Addr::Short(v.to_be_bytes())
    }

    #[test]
    fn route_to_self() {
        let a = a16(0xC59A);
        let route = get_route(a, a).unwrap();
        assert_eq!(route.as_slice(), &[a]);
    }

    #[test]
    fn two_hop_route() {
        let src = a16(0xC59A);
        let dst = a16(0xC59F);
        let route = get_route(src, dst).unwrap();
        assert_eq!(route.as_slice(), &[src, a16(0xC590), dst]);
    }

    #[test]
    fn six_hop_route() {
        let src = a16(0xC59A);
        let dst = a16(0xC232);
        let route = get_route(src, dst).unwrap();
        assert_eq!(
            route.as_slice(),
            &[
                src,
                a16(0xC590),
                a16(0xC500),
                a16(0xC000),
                a16(0xC200),
                a16(0xC230),
                dst,
            ]
        );
    }

    #[test]
    fn should_forward_matches_second_hop() {
        let resender = a16(0xC59A);
        let dst = a16(0xC232);
        let route = get_route(resender, dst).unwrap();
        let next_hop = route[1];
        assert!(should_forward(resender, dst, next_hop).unwrap());
        assert!(!should_forward(resender, dst, route[2]).unwrap());
        assert!(!should_forward(resender, dst, dst).unwrap());
    }
}
