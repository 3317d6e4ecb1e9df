#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use shiguredo_netstack::gzip_header::{GzipHeader, GzipHeaderStatus};

#[derive(Arbitrary, Debug)]
struct FuzzHeader {
    data: Vec<u8>,
    cuts: Vec<u8>,
}

/// 分割して渡し、ヘッダー末尾を入力全体での位置に直して返す
fn read_in_chunks(data: &[u8], cuts: &[u8]) -> GzipHeaderStatus {
    let mut header = GzipHeader::new();
    let mut offset = 0;
    let mut cuts = cuts.iter();
    while offset < data.len() {
        let rest = &data[offset..];
        let n = match cuts.next() {
            Some(cut) => (usize::from(*cut) % rest.len()).max(1),
            None => rest.len(),
        };
        let status = header.read_more(&rest[..n]);
        match status {
            GzipHeaderStatus::Complete { header_end } => {
                return GzipHeaderStatus::Complete {
                    header_end: offset + header_end,
                };
            }
            GzipHeaderStatus::Invalid => return status,
            GzipHeaderStatus::Incomplete => offset += n,
        }
    }
    GzipHeaderStatus::Incomplete
}

fuzz_target!(|input: FuzzHeader| {
    let mut header = GzipHeader::new();
    let whole = header.read_more(&input.data);
    if let GzipHeaderStatus::Complete { header_end } = whole {
        assert!(header_end <= input.data.len());
    }

    // 分割して渡しても同じ位置で読み終える
    assert_eq!(whole, read_in_chunks(&input.data, &input.cuts));
});
