//! PBT テスト共通ユーティリティ

use proptest::prelude::*;

// ========================================
// 圧縮対象データ生成
// ========================================

/// 圧縮対象のデータ
///
/// ランダムなバイト列だけでは圧縮率が低いため、繰り返しの多いテキストも混ぜる。
pub fn payload() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        proptest::collection::vec(any::<u8>(), 0..4096),
        ("[a-z ]{1,16}", 1usize..512).prop_map(|(word, n)| word.repeat(n).into_bytes()),
    ]
}

/// データを空でないチャンクに分割する
///
/// `cuts` は分割位置の候補 (データ長で割った余りを使う)。
pub fn split_into_chunks(data: &[u8], cuts: &[usize]) -> Vec<Vec<u8>> {
    if data.is_empty() {
        return Vec::new();
    }
    let mut points: Vec<usize> = cuts.iter().map(|c| c % data.len()).filter(|p| *p > 0).collect();
    points.sort_unstable();
    points.dedup();

    let mut chunks = Vec::with_capacity(points.len() + 1);
    let mut start = 0;
    for point in points {
        chunks.push(data[start..point].to_vec());
        start = point;
    }
    chunks.push(data[start..].to_vec());
    chunks
}

// ========================================
// プロキシ指定生成
// ========================================

/// ホスト名 (小文字の DNS ラベル 1-3 個)
pub fn host_name() -> impl Strategy<Value = String> {
    proptest::collection::vec("[a-z][a-z0-9]{0,7}", 1..=3).prop_map(|labels| labels.join("."))
}

/// ポート番号 (0 以外)
pub fn port() -> impl Strategy<Value = u16> {
    1u16..=65535
}

/// `PROXY` / `SOCKS` などの PAC キーワード
pub fn pac_keyword() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("PROXY"),
        Just("HTTPS"),
        Just("SOCKS"),
        Just("SOCKS4"),
        Just("SOCKS5"),
        Just("QUIC"),
    ]
}

/// URI 形式のプロキシスキーム (省略を含む)
pub fn proxy_uri_scheme() -> impl Strategy<Value = Option<&'static str>> {
    prop_oneof![
        Just(None),
        Just(Some("http")),
        Just(Some("https")),
        Just(Some("socks4")),
        Just(Some("socks5")),
        Just(Some("quic")),
    ]
}

/// URI 形式のプロキシ指定 (`socks5://host:port` など)
pub fn proxy_uri() -> impl Strategy<Value = String> {
    (proxy_uri_scheme(), host_name(), port()).prop_map(|(scheme, host, port)| match scheme {
        Some(scheme) => format!("{}://{}:{}", scheme, host, port),
        None => format!("{}:{}", host, port),
    })
}
