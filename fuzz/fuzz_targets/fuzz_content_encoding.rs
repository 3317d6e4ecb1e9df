#![no_main]

use libfuzzer_sys::fuzz_target;
use shiguredo_netstack::content_encoding::ContentEncoding;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data)
        && let Ok(value) = ContentEncoding::parse(s)
    {
        for coding in value.encodings() {
            let _ = coding.as_str();
            let _ = coding.source_type();
        }
        let _ = value.source_types();
        let displayed = value.to_string();
        let reparsed = ContentEncoding::parse(&displayed).expect("displayed value must parse");
        assert_eq!(reparsed, value);
    }
});
