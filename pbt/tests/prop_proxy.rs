//! プロキシ指定のプロパティテスト (proxy_server.rs / proxy_list.rs / proxy_config.rs)

use std::time::{Duration, Instant};

use proptest::prelude::*;
use shiguredo_netstack::proxy::{
    DEFAULT_PROXY_RETRY_DELAY, ProxyList, ProxyRetryInfoMap, ProxyRules, ProxyRulesType,
    ProxyScheme, ProxyServer,
};

// ========================================
// Strategy 定義
// ========================================

fn pac_token() -> impl Strategy<Value = String> {
    prop_oneof![
        (pbt::pac_keyword(), pbt::host_name(), pbt::port())
            .prop_map(|(keyword, host, port)| format!("{} {}:{}", keyword, host, port)),
        (pbt::pac_keyword(), pbt::host_name())
            .prop_map(|(keyword, host)| format!("{} {}", keyword, host)),
        Just("DIRECT".to_string()),
    ]
}

fn proxy_uri_list() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec(pbt::proxy_uri(), 1..6)
}

fn url_scheme() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("http"), Just("https"), Just("ftp"), Just("socks")]
}

// ========================================
// ProxyServer
// ========================================

proptest! {
    #[test]
    fn uri_form_roundtrip(uri in pbt::proxy_uri()) {
        let server = ProxyServer::from_uri(&uri, ProxyScheme::Http).unwrap();
        let reparsed = ProxyServer::from_uri(&server.to_uri(), ProxyScheme::Http).unwrap();
        prop_assert_eq!(reparsed, server);
    }
}

proptest! {
    #[test]
    fn pac_form_roundtrip(token in pac_token()) {
        let server = ProxyServer::from_pac_token(&token).unwrap();
        let reparsed = ProxyServer::from_pac_token(&server.to_pac_string()).unwrap();
        prop_assert_eq!(reparsed, server);
    }
}

proptest! {
    #[test]
    fn pac_and_uri_forms_agree(token in pac_token()) {
        let server = ProxyServer::from_pac_token(&token).unwrap();
        let from_uri = ProxyServer::from_uri(&server.to_uri(), ProxyScheme::Http).unwrap();
        prop_assert_eq!(from_uri, server);
    }
}

proptest! {
    #[test]
    fn omitted_port_uses_scheme_default(keyword in pbt::pac_keyword(), host in pbt::host_name()) {
        let server = ProxyServer::from_pac_token(&format!("{} {}", keyword, host)).unwrap();
        prop_assert_eq!(server.port(), server.scheme().default_port());
        prop_assert_eq!(server.host(), host.as_str());
    }
}

proptest! {
    #[test]
    fn arbitrary_input_never_panics(input in "\\PC{0,64}") {
        let _ = ProxyServer::from_uri(&input, ProxyScheme::Http);
        let _ = ProxyServer::from_pac_token(&input);
        let mut list = ProxyList::new();
        list.set_from_pac_string(&input);
        prop_assert!(!list.is_empty());
    }
}

// ========================================
// ProxyList
// ========================================

proptest! {
    #[test]
    fn uri_list_keeps_every_entry(uris in proxy_uri_list(), semicolon in any::<bool>()) {
        let separator = if semicolon { ";" } else { "," };
        let list = ProxyList::from_uri_list(&uris.join(separator), ProxyScheme::Http);
        prop_assert_eq!(list.len(), uris.len());
    }
}

proptest! {
    #[test]
    fn pac_string_roundtrip(uris in proxy_uri_list()) {
        let list = ProxyList::from_uri_list(&uris.join(","), ProxyScheme::Http);
        let mut reparsed = ProxyList::new();
        reparsed.set_from_pac_string(&list.to_pac_string());
        prop_assert_eq!(reparsed, list);
    }
}

proptest! {
    #[test]
    fn fallback_visits_every_candidate(uris in proxy_uri_list()) {
        let mut list = ProxyList::from_uri_list(&uris.join(","), ProxyScheme::Http);
        let expected: Vec<ProxyServer> = list.iter().cloned().collect();
        let mut retry_info = ProxyRetryInfoMap::new();
        let now = Instant::now();

        let mut visited = Vec::new();
        loop {
            visited.push(list.first().unwrap().clone());
            if !list.fallback(&mut retry_info, None, now) {
                break;
            }
        }
        prop_assert_eq!(visited, expected.clone());
        prop_assert!(list.is_empty());

        // 重複を除いたすべての候補が記録される
        for server in &expected {
            let entry = retry_info.get(&server.to_uri()).unwrap();
            prop_assert_eq!(entry.bad_until, now + DEFAULT_PROXY_RETRY_DELAY);
            prop_assert!(entry.try_while_bad);
        }
    }
}

proptest! {
    #[test]
    fn bad_proxies_move_to_the_end(uris in proxy_uri_list(), bad_index in any::<usize>()) {
        let mut list = ProxyList::from_uri_list(&uris.join(","), ProxyScheme::Http);
        let bad = list.iter().nth(bad_index % list.len()).unwrap().clone();
        let mut retry_info = ProxyRetryInfoMap::new();
        let now = Instant::now();
        ProxyList::from_server(bad.clone()).fallback(&mut retry_info, None, now);

        let before = list.len();
        list.deprioritize_bad_proxies(&retry_info, now);
        prop_assert_eq!(list.len(), before);
        prop_assert_eq!(list.iter().last(), Some(&bad));

        // 期限切れの記録は無視される
        let mut later = ProxyList::from_uri_list(&uris.join(","), ProxyScheme::Http);
        let original = later.clone();
        later.deprioritize_bad_proxies(&retry_info, now + DEFAULT_PROXY_RETRY_DELAY + Duration::from_secs(1));
        prop_assert_eq!(later, original);
    }
}

// ========================================
// ProxyRules
// ========================================

proptest! {
    #[test]
    fn single_list_applies_to_every_scheme(uris in proxy_uri_list()) {
        let rules = ProxyRules::parse(&uris.join(","));
        prop_assert_eq!(rules.rules_type, ProxyRulesType::ProxyList);
        prop_assert_eq!(rules.single_proxies.len(), uris.len());
    }
}

proptest! {
    #[test]
    fn per_scheme_rules(
        entries in proptest::collection::vec((url_scheme(), pbt::host_name(), pbt::port()), 1..6)
    ) {
        let input = entries
            .iter()
            .map(|(scheme, host, port)| format!("{}={}:{}", scheme, host, port))
            .collect::<Vec<_>>()
            .join(";");
        let rules = ProxyRules::parse(&input);
        prop_assert_eq!(rules.rules_type, ProxyRulesType::ProxyListPerScheme);

        let count = |name: &str| entries.iter().filter(|(scheme, _, _)| *scheme == name).count();
        prop_assert_eq!(rules.proxies_for_http.len(), count("http"));
        prop_assert_eq!(rules.proxies_for_https.len(), count("https"));
        prop_assert_eq!(rules.proxies_for_ftp.len(), count("ftp"));
        prop_assert_eq!(rules.fallback_proxies.len(), count("socks"));

        // socks= の候補はスキームを省略すると SOCKS4
        for server in rules.fallback_proxies.iter() {
            prop_assert_eq!(server.scheme(), ProxyScheme::Socks4);
        }
    }
}

proptest! {
    #[test]
    fn rules_parse_never_panics(input in "[a-z0-9=;:,/ .]{0,64}") {
        let rules = ProxyRules::parse(&input);
        if rules.rules_type == ProxyRulesType::Empty {
            prop_assert!(rules.is_empty());
        }
    }
}
