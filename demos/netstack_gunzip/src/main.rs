//! gzip / deflate で圧縮されたファイルを展開して標準出力に書き出す例
//!
//! 使い方:
//!   cargo run -p netstack_gunzip -- body.gz
//!   cargo run -p netstack_gunzip -- --deflate body.deflate
//!   cargo run -p netstack_gunzip -- --encoding "deflate, gzip" body.bin

use shiguredo_netstack::content_encoding::{ContentEncoding, build_source_stream};
use shiguredo_netstack::gzip_source_stream::GzipSourceStream;
use shiguredo_netstack::{FilterLimits, SourceStream, SourceType};
use tokio::io::AsyncWriteExt;
use tokio_netstack::{AsyncReadSourceStream, SourceStreamReader};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = noargs::raw_args();
    args.metadata_mut().app_name = "netstack_gunzip";

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

    // --deflate フラグ
    let deflate: bool = noargs::flag("deflate")
        .short('d')
        .doc("Treat the input as deflate (zlib or raw) instead of gzip")
        .take(&mut args)
        .is_present();

    // --encoding オプション (Content-Encoding ヘッダーの値)
    let encoding: Option<String> = noargs::opt("encoding")
        .short('e')
        .doc("Content-Encoding header value (e.g., \"deflate, gzip\")")
        .take(&mut args)
        .present_and_then(|o| Ok::<_, &str>(o.value().to_string()))
        .map_err(|e| format!("{:?}", e))?;

    // --buffer-size オプション
    let buffer_size: usize = noargs::opt("buffer-size")
        .doc("Input buffer size of each filter (default: 32768)")
        .default("32768")
        .take(&mut args)
        .then(|o| o.value().parse())
        .map_err(|e| format!("{:?}", e))?;

    // 位置引数: 入力ファイル
    let path: String = noargs::arg("<FILE>")
        .doc("Compressed input file")
        .take(&mut args)
        .then(|a| Ok::<_, &str>(a.value().to_string()))
        .map_err(|e| format!("{:?}", e))?;

    // 未知の引数があればエラー、ヘルプが返されたら表示
    if let Some(help) = args.finish().map_err(|e| format!("{:?}", e))? {
        print!("{}", help);
        return Ok(());
    }

    let file = tokio::fs::File::open(&path).await?;
    let upstream: Box<dyn SourceStream> = Box::new(AsyncReadSourceStream::new(file));
    let limits = FilterLimits::with_input_buffer_size(buffer_size);

    let stream: Box<dyn SourceStream> = match encoding {
        Some(value) => {
            let encoding = ContentEncoding::parse(&value)?;
            build_source_stream(upstream, &encoding, &limits)
        }
        None => {
            let source_type = if deflate {
                SourceType::Deflate
            } else {
                SourceType::Gzip
            };
            let stream = GzipSourceStream::create_with_limits(upstream, source_type, &limits)
                .ok_or("unsupported source type")?;
            Box::new(stream)
        }
    };
    eprintln!("Filters: {}", stream.description());

    let mut reader = SourceStreamReader::new(stream);
    let mut stdout = tokio::io::stdout();
    let written = tokio::io::copy(&mut reader, &mut stdout).await?;
    stdout.flush().await?;

    eprintln!("Decoded {} bytes", written);
    Ok(())
}
