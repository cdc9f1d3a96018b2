//! Client address fingerprinting for sticky worker selection.
//!
//! The fingerprint is FNV-1a over the textual IP address, followed by the
//! murmur3 finalizer so the low bits used by `% pool_size` depend on every
//! input bit. There is no per-process seed: every process and every restart
//! computes the same value. The port is not part of the fingerprint.

use std::net::IpAddr;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Stable 32-bit fingerprint of a client address string.
#[inline]
pub fn hash(remote_address: &str) -> u32 {
    avalanche(fnv1a(remote_address.as_bytes()))
}

#[inline]
fn fnv1a(bytes: &[u8]) -> u32 {
    let mut h = FNV_OFFSET_BASIS;
    for byte in bytes {
        h ^= u32::from(*byte);
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

#[inline]
fn avalanche(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Worker slot for a client address: `hash(address) % pool_size`.
#[inline]
pub fn worker_index(remote_address: &str, pool_size: usize) -> usize {
    debug_assert!(pool_size > 0, "worker pool cannot be empty");
    hash(remote_address) as usize % pool_size
}

/// Fingerprint of a socket peer IP.
///
/// IPv4-mapped IPv6 addresses are reduced to their IPv4 form first, so a
/// client is fingerprinted identically whether the public listener is bound
/// dual-stack or IPv4-only.
#[inline]
pub fn fingerprint_ip(ip: IpAddr) -> u32 {
    hash(&canonical_ip(ip).to_string())
}

/// Worker slot for a socket peer IP.
#[inline]
pub fn worker_index_for_ip(ip: IpAddr, pool_size: usize) -> usize {
    debug_assert!(pool_size > 0, "worker pool cannot be empty");
    fingerprint_ip(ip) as usize % pool_size
}

fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}
