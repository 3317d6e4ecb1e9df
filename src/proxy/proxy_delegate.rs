//! プロキシ解決への介入

use crate::Error;
use crate::proxy::proxy_info::ProxyInfo;
use crate::proxy::proxy_server::ProxyServer;
use crate::uri::Uri;

/// プロキシ解決の結果を観察、変更する
pub trait ProxyDelegate {
    /// 解決が成功した直後に呼ばれる。`info` を書き換えてよい
    ///
    /// 失敗したプロキシの後回しはこの後に行う。
    fn on_resolve_proxy(&mut self, _url: &Uri, _method: &str, _info: &mut ProxyInfo) {}

    /// フォールバックで使われなくなったプロキシが確定したときに呼ばれる
    fn on_fallback(&mut self, _bad_proxy: &ProxyServer, _net_error: Option<&Error>) {}
}
