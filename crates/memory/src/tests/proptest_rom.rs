use crate::{DenseMemory, GuestMemory, RomSet};
use proptest::prelude::*;

#[derive(Clone, Debug)]
struct Blob {
    addr: u64,
    len: usize,
    fill: u8,
}

prop_compose! {
    fn arb_blob(mem_size: u64)(
        addr in 0u64..mem_size,
        len in 0usize..64,
        fill in any::<u8>(),
    ) -> Blob {
        Blob { addr, len, fill }
    }
}

proptest! {
    /// Whatever subset of blobs the set accepts, applying it leaves every accepted blob intact in
    /// RAM: accepted blobs never share a byte.
    #[test]
    fn accepted_blobs_never_clobber_each_other(
        blobs in proptest::collection::vec(arb_blob(0x1000), 1..16)
    ) {
        let mut rom = RomSet::new();
        for (i, b) in blobs.iter().enumerate() {
            let _ = rom.add_blob_fixed(format!("blob{i}"), vec![b.fill; b.len], b.addr);
        }

        let mut mem = DenseMemory::new(0x1040).unwrap();
        rom.reset(&mut mem).unwrap();

        for blob in rom.blobs() {
            let mut buf = vec![0u8; blob.len()];
            mem.read_into(blob.addr(), &mut buf).unwrap();
            prop_assert_eq!(buf.as_slice(), blob.data());
        }

        for pair in rom.blobs().windows(2) {
            let disjoint = pair[0].end() <= pair[1].addr();
            prop_assert!(disjoint || pair[0].is_empty() || pair[1].is_empty());
        }
    }
}
