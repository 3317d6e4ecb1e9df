#![no_main]

use libfuzzer_sys::fuzz_target;
use shiguredo_netstack::proxy::{ProxyBypassRules, ProxyInfo, ProxyRules, ProxyRulesType};
use shiguredo_netstack::uri::Uri;

const URLS: &[&str] = &[
    "http://www.example.com/",
    "https://example.com:8443/path?q=1",
    "ftp://ftp.example.org/",
    "ws://localhost/",
    "http://127.0.0.1/",
    "http://[::1]:8080/",
    "http://intranet/",
];

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // 前半をプロキシルール、後半をバイパスルールとして使う
        let (rules_part, bypass_part) = s.split_once('|').unwrap_or((s, ""));
        let bypass_rules = ProxyBypassRules::parse(bypass_part);
        let rules = ProxyRules::parse(rules_part).with_bypass_rules(bypass_rules);

        if rules.rules_type == ProxyRulesType::Empty {
            assert!(rules.single_proxies.is_empty());
        }

        for url in URLS {
            let Ok(uri) = Uri::parse(url) else {
                continue;
            };
            let _ = rules.bypass_rules.matches(&uri);
            let mut info = ProxyInfo::new();
            rules.apply(&uri, &mut info);
            let pac_string = info.to_pac_string();
            if rules.rules_type == ProxyRulesType::Empty {
                assert_eq!(pac_string, "DIRECT");
            }
        }
    }
});
