#![no_main]

use libfuzzer_sys::fuzz_target;
use shiguredo_netstack::proxy::ProxyBypassRules;
use shiguredo_netstack::uri::{SanitizeUrlPolicy, Uri};

fuzz_target!(|data: &[u8]| {
    // UTF-8 文字列として解釈できる場合のみテスト
    if let Ok(s) = std::str::from_utf8(data)
        && let Ok(uri) = Uri::parse(s)
    {
        let _ = uri.scheme();
        let _ = uri.authority();
        let _ = uri.host();
        let _ = uri.port();
        let _ = uri.effective_port();
        let _ = uri.path();
        let _ = uri.query();
        let _ = uri.fragment();
        let _ = uri.is_absolute();
        let _ = uri.is_cryptographic();

        // サニタイズ後は認証情報とフラグメントを含まない
        for policy in [SanitizeUrlPolicy::Safe, SanitizeUrlPolicy::Unsafe] {
            let sanitized = uri.sanitized(policy);
            assert!(!sanitized.has_userinfo());
            assert!(sanitized.fragment().is_none());
        }

        // 自分自身のホストをバイパスルールにすると一致する
        if let Some(host) = uri.host()
            && !host.is_empty()
            && uri.is_absolute()
        {
            let rules = ProxyBypassRules::parse(host);
            let _ = rules.matches(&uri);
        }
    }
});
