use codec::{
    ADDRESS_TYPE_V4, ADDRESS_TYPE_V6, MAX_LIST_PACKETS, MAX_LIST_PAYLOAD,
    NEW_STYLE_V4_SERVER_SIZE, NEW_STYLE_V6_SERVER_SIZE, OLD_STYLE_SERVER_SIZE,
};

use crate::address::Address;

/// One list response packet worth of server records.
///
/// `data` holds the wire records only; the per-packet server count is kept
/// beside it and written into the packet prefix when the page is sent.
#[derive(Debug, Clone)]
pub struct ResponsePage {
    pub count: u16,
    pub data: Vec<u8>,
}

/// Greedy packer turning matched servers into size-bounded response pages.
///
/// Old style records are 6 bytes of IPv4 address and port. New style records
/// carry a one byte family tag and support both families. A page is sealed
/// when the next record would push it past [`MAX_LIST_PAYLOAD`], and the
/// whole result is clipped at [`MAX_LIST_PACKETS`] pages.
pub struct PageBuilder {
    new_style: bool,
    pages: Vec<ResponsePage>,
    data: Vec<u8>,
    count: u16,
    clipped: bool,
}

impl PageBuilder {
    pub fn new(new_style: bool) -> Self {
        Self {
            new_style,
            pages: Vec::new(),
            data: Vec::with_capacity(MAX_LIST_PAYLOAD),
            count: 0,
            clipped: false,
        }
    }

    /// Append one server. Returns `false` once the page cap is reached and
    /// the rest of the results are being dropped.
    pub fn push(&mut self, addr: &Address) -> bool {
        if self.clipped {
            return false;
        }

        // Old style packets have no way to express an IPv6 endpoint.
        if addr.is_ipv6() && !self.new_style {
            return true;
        }

        let record_size = match (self.new_style, addr.is_ipv6()) {
            (false, _) => OLD_STYLE_SERVER_SIZE,
            (true, false) => NEW_STYLE_V4_SERVER_SIZE,
            (true, true) => NEW_STYLE_V6_SERVER_SIZE,
        };

        if self.data.len() + record_size > MAX_LIST_PAYLOAD && !self.seal() {
            return false;
        }

        match addr.socket_addr() {
            std::net::SocketAddr::V4(v4) => {
                if self.new_style {
                    self.data.push(ADDRESS_TYPE_V4);
                }
                self.data.extend_from_slice(&v4.ip().octets());
                self.data.extend_from_slice(&addr.port().to_le_bytes());
            }
            std::net::SocketAddr::V6(v6) => {
                self.data.push(ADDRESS_TYPE_V6);
                self.data.extend_from_slice(&v6.ip().octets());
                self.data.extend_from_slice(&addr.port().to_le_bytes());
            }
        }

        self.count += 1;
        true
    }

    /// Seal the pages. There is always at least one, so an empty result
    /// still answers the client with a zero-count packet.
    pub fn finish(mut self) -> (Vec<ResponsePage>, u16, bool) {
        if self.count > 0 || self.pages.is_empty() {
            let page = ResponsePage {
                count: self.count,
                data: std::mem::take(&mut self.data),
            };
            self.pages.push(page);
        }

        let total = self.pages.iter().map(|page| page.count).sum();
        (self.pages, total, self.clipped)
    }

    fn seal(&mut self) -> bool {
        if self.pages.len() + 1 >= MAX_LIST_PACKETS {
            self.clipped = true;
            return false;
        }

        self.pages.push(ResponsePage {
            count: self.count,
            data: std::mem::take(&mut self.data),
        });
        self.data.reserve(MAX_LIST_PAYLOAD);
        self.count = 0;
        true
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;

    fn v4(n: u32) -> Address {
        let octets = n.to_be_bytes();
        Address::from(SocketAddr::from((
            [10, octets[1], octets[2], octets[3]],
            28000,
        )))
    }

    #[test]
    fn old_style_page_capacity() {
        let per_page = MAX_LIST_PAYLOAD / OLD_STYLE_SERVER_SIZE;
        let mut builder = PageBuilder::new(false);

        for n in 0..per_page as u32 + 1 {
            assert!(builder.push(&v4(n)));
        }

        let (pages, total, clipped) = builder.finish();
        assert!(!clipped);
        assert_eq!(total, per_page as u16 + 1);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].count as usize, per_page);
        assert_eq!(pages[0].data.len(), per_page * OLD_STYLE_SERVER_SIZE);
        assert_eq!(pages[1].count, 1);
    }

    #[test]
    fn empty_result_still_produces_a_page() {
        let (pages, total, clipped) = PageBuilder::new(true).finish();
        assert!(!clipped);
        assert_eq!(total, 0);
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].count, 0);
        assert!(pages[0].data.is_empty());
    }

    #[test]
    fn old_style_skips_ipv6() {
        let mut builder = PageBuilder::new(false);
        assert!(builder.push(&Address::from("[::1]:28000".parse::<SocketAddr>().unwrap())));
        assert!(builder.push(&v4(1)));

        let (pages, total, _) = builder.finish();
        assert_eq!(total, 1);
        assert_eq!(pages[0].data.len(), OLD_STYLE_SERVER_SIZE);
    }

    #[test]
    fn result_is_clipped_at_the_page_cap() {
        let per_page = (MAX_LIST_PAYLOAD / NEW_STYLE_V4_SERVER_SIZE) as u32;
        let cap = per_page * MAX_LIST_PACKETS as u32;
        let mut builder = PageBuilder::new(true);

        for n in 0..cap {
            assert!(builder.push(&v4(n)));
        }
        assert!(!builder.push(&v4(cap)));

        let (pages, total, clipped) = builder.finish();
        assert!(clipped);
        assert_eq!(pages.len(), MAX_LIST_PACKETS);
        assert_eq!(total as u32, cap);
    }

    #[test]
    fn new_style_mixes_families() {
        let mut builder = PageBuilder::new(true);
        builder.push(&v4(1));
        builder.push(&Address::from("[::1]:28000".parse::<SocketAddr>().unwrap()));

        let (pages, total, _) = builder.finish();
        assert_eq!(total, 2);
        assert_eq!(
            pages[0].data.len(),
            NEW_STYLE_V4_SERVER_SIZE + NEW_STYLE_V6_SERVER_SIZE
        );
        assert_eq!(pages[0].data[0], ADDRESS_TYPE_V4);
        assert_eq!(pages[0].data[NEW_STYLE_V4_SERVER_SIZE], ADDRESS_TYPE_V6);
    }
}
