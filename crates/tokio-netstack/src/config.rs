//! JSON ファイルからのプロキシ設定の読み込み
//!
//! ```json
//! {
//!   "auto_detect": false,
//!   "pac_url": "http://wpad.example/proxy.pac",
//!   "pac_mandatory": false,
//!   "rules": "http=proxy.example:8080;socks=socks.example",
//!   "bypass": "localhost;*.internal.example;<local>",
//!   "reverse_bypass": false
//! }
//! ```
//!
//! すべてのキーは省略できる。すべて省略すると直接接続になる。

use std::path::Path;

use nojson::{JsonParseError, RawJsonValue};
use shiguredo_netstack::proxy::{
    ConfigAvailability, ProxyBypassRules, ProxyConfig, ProxyConfigService, ProxyConfigSource,
    ProxyRules,
};
use shiguredo_netstack::uri::Uri;

use crate::error::Result;

/// JSON 文字列からプロキシ設定を作る
pub fn parse_proxy_config(text: &str) -> Result<ProxyConfig> {
    let raw = nojson::RawJson::parse(text)?;
    let JsonProxyConfig(config) = raw.value().try_into()?;
    Ok(config)
}

/// JSON ファイルからプロキシ設定を読み込む
pub async fn load_proxy_config(path: impl AsRef<Path>) -> Result<ProxyConfig> {
    let text = tokio::fs::read_to_string(path).await?;
    parse_proxy_config(&text)
}

struct JsonProxyConfig(ProxyConfig);

impl<'text, 'raw> TryFrom<RawJsonValue<'text, 'raw>> for JsonProxyConfig {
    type Error = JsonParseError;

    fn try_from(value: RawJsonValue<'text, 'raw>) -> std::result::Result<Self, Self::Error> {
        let auto_detect: Option<bool> = optional(value, "auto_detect")?;
        let pac_mandatory: Option<bool> = optional(value, "pac_mandatory")?;
        let reverse_bypass: Option<bool> = optional(value, "reverse_bypass")?;
        let rules: Option<String> = optional(value, "rules")?;
        let bypass: Option<String> = optional(value, "bypass")?;

        let pac_url = match value.to_member("pac_url")?.get() {
            Some(v) => {
                let url: String = v.try_into()?;
                match Uri::parse(&url) {
                    Ok(uri) if uri.is_absolute() => Some(url),
                    Ok(_) => return Err(v.invalid("pac_url must be an absolute URL")),
                    Err(e) => return Err(v.invalid(e)),
                }
            }
            None => None,
        };

        let mut proxy_rules = ProxyRules::parse(rules.as_deref().unwrap_or(""));
        if let Some(bypass) = bypass {
            proxy_rules = proxy_rules.with_bypass_rules(ProxyBypassRules::parse(&bypass));
        }
        proxy_rules.reverse_bypass = reverse_bypass.unwrap_or(false);

        let mut config = ProxyConfig::direct().with_source(ProxyConfigSource::Custom);
        config.auto_detect = auto_detect.unwrap_or(false);
        config.pac_url = pac_url;
        config.pac_mandatory = pac_mandatory.unwrap_or(false);
        config.proxy_rules = proxy_rules;
        Ok(JsonProxyConfig(config))
    }
}

fn optional<T>(value: RawJsonValue<'_, '_>, name: &str) -> std::result::Result<Option<T>, JsonParseError>
where
    for<'text, 'raw> T: TryFrom<RawJsonValue<'text, 'raw>, Error = JsonParseError>,
{
    value.to_member(name)?.get().map(T::try_from).transpose()
}

/// JSON ファイルから読み込んだ設定を返す `ProxyConfigService`
#[derive(Debug, Clone)]
pub struct JsonProxyConfigService {
    config: ProxyConfig,
}

impl JsonProxyConfigService {
    /// ファイルから読み込む
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config = load_proxy_config(path).await?;
        Ok(Self { config })
    }

    /// JSON 文字列から作る
    pub fn parse(text: &str) -> Result<Self> {
        let config = parse_proxy_config(text)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

impl ProxyConfigService for JsonProxyConfigService {
    fn latest_proxy_config(&mut self) -> ConfigAvailability {
        ConfigAvailability::Valid(self.config.clone())
    }
}
