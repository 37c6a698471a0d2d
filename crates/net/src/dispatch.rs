//! Plaintext routing between the virtual interface and the sessions.

use std::net::Ipv4Addr;

/// Offset of the IPv4 source address within an IP header.
const IPV4_SOURCE_OFFSET: usize = 12;
/// Length of the packet-information prefix some interfaces prepend.
pub const PACKET_INFO_LEN: usize = 4;

/// Extract the IPv4 source address from an interface read.
///
/// The buffer is forwarded to the peer exactly as read, so this only peeks:
/// when the interface was created with packet information enabled the 4-byte
/// prefix is skipped before the IP header.
pub fn source_address(buffer: &[u8], packet_info: bool) -> Option<Ipv4Addr> {
    let offset = if packet_info { PACKET_INFO_LEN } else { 0 };
    let raw: [u8; 4] = buffer
        .get(offset + IPV4_SOURCE_OFFSET..offset + IPV4_SOURCE_OFFSET + 4)?
        .try_into()
        .ok()?;
    Some(Ipv4Addr::from(raw))
}

/// The tunnel address for a session: the configured base plus the session
/// index, as one host-order increment.
pub fn offset_address(base: Ipv4Addr, index: u32) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(base).wrapping_add(index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_packet(source: Ipv4Addr) -> Vec<u8> {
        let mut packet = vec![0u8; 40];
        packet[0] = 0x45;
        packet[IPV4_SOURCE_OFFSET..IPV4_SOURCE_OFFSET + 4].copy_from_slice(&source.octets());
        packet
    }

    #[test]
    fn reads_the_source_address() {
        let packet = ipv4_packet(Ipv4Addr::new(10, 7, 0, 2));
        assert_eq!(
            source_address(&packet, false),
            Some(Ipv4Addr::new(10, 7, 0, 2))
        );
    }

    #[test]
    fn skips_the_packet_info_prefix() {
        let mut prefixed = vec![0u8; PACKET_INFO_LEN];
        prefixed.extend(ipv4_packet(Ipv4Addr::new(10, 7, 0, 9)));
        assert_eq!(
            source_address(&prefixed, true),
            Some(Ipv4Addr::new(10, 7, 0, 9))
        );
    }

    #[test]
    fn short_reads_have_no_source() {
        assert_eq!(source_address(&[0u8; 8], false), None);
    }

    #[test]
    fn address_assignment_counts_from_the_base() {
        let base = Ipv4Addr::new(10, 7, 0, 1);
        assert_eq!(offset_address(base, 1), Ipv4Addr::new(10, 7, 0, 2));
        assert_eq!(offset_address(base, 20), Ipv4Addr::new(10, 7, 0, 21));
        assert_eq!(
            offset_address(Ipv4Addr::new(10, 7, 0, 255), 1),
            Ipv4Addr::new(10, 7, 1, 0)
        );
    }
}
