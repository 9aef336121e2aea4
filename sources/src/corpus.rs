//! Built-in request corpus used by the `random` source

use dealgood_core::Request;

const IPFS_PATHS: &[&str] = &[
    "/ipfs/QmQPeNsJPyVWPFDVHb77w8G42Fvo15z4bG2X8D2GhfbSXc/readme",
    "/ipfs/bafkreifjjcie6lypi6ny7amxnfftagclbuxndqonfipmb64f2km2devei4",
    "/ipfs/QmUa7f9JtJMsqJJ3s3ZXk6WyF4xJLE8FiqYskZGgk8GCDv",
    "/ipfs/QmaQsTLL3nc5dw6wAvaioJSBfd1jhQrA2o6ucFf7XeV74P",
    "/ipfs/QmWS73SiuSK1zZ2nVSmUb2xZfSwHcdgrYkmXn2ELpQ5XRT",
    "/ipfs/QmVxjFRyhmyQaZEtCh7nk2abc7LhFkzhnRX4rcHqCCpikR",
    "/ipfs/QmUiRx71uxfmUE8V3H9sWAsAXoM88KR4eo1ByvvcFNeTLR",
    "/ipfs/QmcS5JZs8X3TdtkEBpHAdUYjdNDqcL7fWQFtQz69mpnu2X",
    "/ipfs/QmfA31fbCWojSmhSGvvfxmxaYCpMoXP95zEQ9sLvBGHNaN",
    "/ipfs/QmR9i9KL3vhhAqTBGj1bPPC7LvkptxrH9RvxJxLN1vvsBE",
    "/ipfs/QmWV8rqZLxs1oQN9jxNWmnT1YdgLwCcscv94VARrhHf1T7",
    "/ipfs/QmamahpFCstMUqHi2qGtVoDnRrsXhid86qsfvoyCTKJqHr",
    "/ipfs/QmWionkqH2B6TXivzBSQeSyBxojaiAFbzhjtwYRrfwd8nH",
    "/ipfs/Qmf93EMrADXAK6CyiSfE8xx45fkMfR3uzKEPCvZC1n2kzb",
    "/ipfs/QmNT23NWCVFFw9ioBjUCMcBXpHTDgr7tKzaj1ckm5UPWT1/ipfs-029.w3c-blockchain-workshop.compressed.pdf",
    "/ipfs/QmR7tiySn6vFHcEjBeZNtYGAFh735PJHfEMdVEycj9jAPy/docs/getting-started",
    "/ipfs/QmNvTjdqEPjZVWCvRWsFJA1vK7TTw1g9JP6we1WBJTRADM",
    "/ipfs/QmNvTjdqEPjZVWCvRWsFJA1vK7TTw1g9JP6we1WBJTRADM/rfc-data/rfc1113.txt",
    "/ipfs/QmNvTjdqEPjZVWCvRWsFJA1vK7TTw1g9JP6we1WBJTRADM/rfc-data/rfc1147.pdf",
    "/ipfs/QmSnuWmxptJZdLJpKRarxBMS2Ju2oANVrgbr2xWbie9b2D/frontend/pages",
    "/ipfs/QmSnuWmxptJZdLJpKRarxBMS2Ju2oANVrgbr2xWbie9b2D/frontend/thumbnails/21027771304_43d7ae4edc_o.jpg._t.jpg",
    "/ipfs/QmNoscE3kNc83dM5rZNUC5UDXChiTdDcgf16RVtFCRWYuU/food/aphrodis.txt",
    "/ipfs/QmNoscE3kNc83dM5rZNUC5UDXChiTdDcgf16RVtFCRWYuU/food/ppbeer.txt",
    "/ipfs/QmNoscE3kNc83dM5rZNUC5UDXChiTdDcgf16RVtFCRWYuU/humor/aclamt.txt",
    "/ipfs/QmVCjhoEFC9vwvaa8bKyJgwAByP4MXSogcyDGoz4Lkc3ox/SUBSITES/ar.geocities.com.7z.009",
    "/ipfs/QmVCjhoEFC9vwvaa8bKyJgwAByP4MXSogcyDGoz4Lkc3ox/GEOCITIES/www.geocities.com.7z.011",
];

const IPNS_PATHS: &[&str] = &[
    "/ipns/proofs.filecoin.io/v28-proof-of-spacetime-fallback-merkletree-poseidon_hasher-8-0-0-0170db1f394b35d995252228ee359194b13199d259380541dc529fb0099096b0.meta",
    "/ipns/proofs.filecoin.io/v28-proof-of-spacetime-fallback-merkletree-poseidon_hasher-8-0-0-0cfb4f178bbb71cf2ecfcd42accce558b27199ab4fb59cb78f2483fe21ef36d9.vk",
    "/ipns/en.wikipedia-on-ipfs.org/wiki/United_Kingdom",
    "/ipns/en.wikipedia-on-ipfs.org/wiki/Rugby_School",
    "/ipns/en.wikipedia-on-ipfs.org/wiki/John_Locke",
    "/ipns/en.wikipedia-on-ipfs.org/wiki/Vertigo_(film)",
    "/ipns/en.wikipedia-on-ipfs.org/wiki/Fleetwood_Mac",
    "/ipns/QmYoQ4Gn9vAcimaXT5xWYAPrBCu3QZyLmEvhLFu9djNZCy/whitelist.txt",
    "/ipns/ipfs-planets.echox.app/mainnet/GQJqkw49LrbLAKa/66/metadata.json",
    "/ipns/fromthemachine.org/ARTIMESIAN.html",
];

/// `Accept` values each sample path is requested with; `None` sends no header
pub const ACCEPT_VARIANTS: &[Option<&str>] = &[
    None,
    Some("application/vnd.ipld.car"),
    Some("application/vnd.ipld.raw"),
];

/// The sample gateway requests: every built-in path in every `Accept` variant
pub fn sample_requests() -> Vec<Request> {
    let paths = IPFS_PATHS.iter().chain(IPNS_PATHS).copied();
    permute_accept(paths)
}

/// Expand each path into one GET request per `Accept` variant
pub fn permute_accept<'a>(paths: impl IntoIterator<Item = &'a str>) -> Vec<Request> {
    paths
        .into_iter()
        .flat_map(|path| {
            ACCEPT_VARIANTS.iter().map(move |accept| match accept {
                Some(value) => Request::get(path).with_header("Accept", *value),
                None => Request::get(path),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealgood_core::RequestFilter;

    #[test]
    fn test_sample_size() {
        let reqs = sample_requests();
        assert_eq!(reqs.len(), (IPFS_PATHS.len() + IPNS_PATHS.len()) * 3);
    }

    #[test]
    fn test_variants_per_path() {
        let reqs = permute_accept(["/ipfs/x"]);
        assert_eq!(reqs.len(), 3);
        assert!(reqs[0].header.is_empty());
        assert_eq!(reqs[1].header_value("accept"), Some("application/vnd.ipld.car"));
        assert_eq!(reqs[2].header_value("accept"), Some("application/vnd.ipld.raw"));
    }

    #[test]
    fn test_samples_are_gateway_requests() {
        for req in sample_requests() {
            assert!(RequestFilter::PathOnly.matches(&req), "{}", req.uri);
        }
    }
}
