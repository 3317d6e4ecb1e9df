//! URL に使うプロキシを解決して PAC 形式で表示する例
//!
//! 使い方:
//!   cargo run -p netstack_proxy -- --rules "http=foopy:80;direct://" http://example.com/
//!   cargo run -p netstack_proxy -- --pac-result "PROXY a:80;PROXY b:80;DIRECT" --fail 2 http://example.com/
//!   cargo run -p netstack_proxy -- --config proxy.json https://example.com/

use shiguredo_netstack::Error;
use shiguredo_netstack::proxy::{ProxyInfo, ProxyService, ResolveResult};
use tokio_netstack::config::JsonProxyConfigService;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = noargs::raw_args();
    args.metadata_mut().app_name = "netstack_proxy";

    // --help フラグ
    noargs::HELP_FLAG.take_help(&mut args);

    // --version フラグ
    let version_flag: bool = noargs::flag("version")
        .short('V')
        .doc("Show version")
        .take(&mut args)
        .is_present();
    if version_flag {
        println!("{}", env!("CARGO_PKG_VERSION"));
        std::process::exit(0);
    }

    // --rules オプション
    let rules: Option<String> = noargs::opt("rules")
        .short('r')
        .doc("Manual proxy rules (e.g., \"http=foopy:80;https=foopy:443\")")
        .take(&mut args)
        .present_and_then(|o| Ok::<_, &str>(o.value().to_string()))
        .map_err(|e| format!("{:?}", e))?;

    // --pac-result オプション
    let pac_result: Option<String> = noargs::opt("pac-result")
        .doc("Fixed PAC result string (e.g., \"PROXY a:80;DIRECT\")")
        .take(&mut args)
        .present_and_then(|o| Ok::<_, &str>(o.value().to_string()))
        .map_err(|e| format!("{:?}", e))?;

    // --config オプション
    let config_path: Option<String> = noargs::opt("config")
        .short('c')
        .doc("Path to JSON proxy configuration file")
        .take(&mut args)
        .present_and_then(|o| Ok::<_, &str>(o.value().to_string()))
        .map_err(|e| format!("{:?}", e))?;

    // --fail オプション (接続失敗を何回起こすか)
    let failures: usize = noargs::opt("fail")
        .doc("Number of simulated proxy connection failures (default: 0)")
        .default("0")
        .take(&mut args)
        .then(|o| o.value().parse())
        .map_err(|e| format!("{:?}", e))?;

    // 位置引数: URL
    let url: String = noargs::arg("<URL>")
        .doc("URL to resolve (e.g., http://example.com/)")
        .take(&mut args)
        .then(|a| Ok::<_, &str>(a.value().to_string()))
        .map_err(|e| format!("{:?}", e))?;

    // 未知の引数があればエラー、ヘルプが返されたら表示
    if let Some(help) = args.finish().map_err(|e| format!("{:?}", e))? {
        print!("{}", help);
        return Ok(());
    }

    let mut service = if let Some(rules) = rules {
        ProxyService::create_fixed_from_rules(&rules)
    } else if let Some(pac_result) = pac_result {
        ProxyService::create_fixed_from_pac_result(&pac_result)
    } else if let Some(path) = config_path {
        let config_service = JsonProxyConfigService::load(&path).await?;
        ProxyService::create_without_proxy_resolver(Box::new(config_service))
    } else {
        ProxyService::create_direct()
    };

    let mut info = expect_ready(service.resolve_proxy(&url, "GET", |_| {}))?;
    print_info(&info);

    for attempt in 1..=failures {
        println!("Simulating connection failure #{}", attempt);
        let result = service.reconsider_proxy_after_error(
            &url,
            "GET",
            Error::ProxyConnectionFailed,
            info,
            |_| {},
        );
        info = match expect_ready(result) {
            Ok(info) => info,
            Err(e) => {
                println!("No proxies left: {}", e);
                return Ok(());
            }
        };
        print_info(&info);
    }

    service.report_success(&info);
    println!("Bad proxies: {}", service.proxy_retry_info().len());
    Ok(())
}

fn expect_ready(result: ResolveResult) -> Result<ProxyInfo, Error> {
    match result {
        ResolveResult::Ready(result) => result,
        ResolveResult::Pending(_) => Err(Error::Unexpected(
            "resolution did not complete synchronously".to_string(),
        )),
    }
}

fn print_info(info: &ProxyInfo) {
    println!("Proxy: {}", info.to_pac_string());
    println!(
        "  source: {}, pac script: {}, bypassed: {}",
        info.config_source().as_str(),
        info.did_use_pac_script(),
        info.did_bypass_proxy()
    );
}
