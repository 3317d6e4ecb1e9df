#![no_main]

use libfuzzer_sys::fuzz_target;
use shiguredo_netstack::proxy::{ProxyList, ProxyScheme, ProxyServer};

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // PAC の戻り値
        let mut list = ProxyList::new();
        list.set_from_pac_string(s);
        assert!(!list.is_empty());
        let pac_string = list.to_pac_string();
        let mut reparsed = ProxyList::new();
        reparsed.set_from_pac_string(&pac_string);
        assert_eq!(reparsed, list);

        // URI 形式のリスト
        let list = ProxyList::from_uri_list(s, ProxyScheme::Http);
        for server in list.iter() {
            let reparsed = ProxyServer::from_uri(&server.to_uri(), ProxyScheme::Http);
            assert_eq!(reparsed.as_ref(), Some(server));
        }
    }
});
