//! `SourceStream` と `AsyncRead` の相互変換

use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use shiguredo_netstack::{SourceStream, SourceType};
use tokio::io::{AsyncRead, ReadBuf};

use crate::error::Result;

/// 読み込み 1 回あたりのバッファサイズ
const READ_CHUNK_SIZE: usize = 32 * 1024;

/// `AsyncRead` を上流とする `SourceStream`
///
/// ソケットやファイルを展開フィルターの上流にするために使う。
#[derive(Debug)]
pub struct AsyncReadSourceStream<R> {
    reader: R,
    eof: bool,
}

impl<R: AsyncRead + Unpin> AsyncReadSourceStream<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, eof: false }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: AsyncRead + Unpin> SourceStream for AsyncReadSourceStream<R> {
    fn poll_read(
        &mut self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<std::result::Result<usize, shiguredo_netstack::Error>> {
        let mut read_buf = ReadBuf::new(buf);
        ready!(Pin::new(&mut self.reader).poll_read(cx, &mut read_buf))?;
        let n = read_buf.filled().len();
        if n == 0 {
            self.eof = true;
        }
        Poll::Ready(Ok(n))
    }

    fn description(&self) -> String {
        String::new()
    }

    fn may_have_more_bytes(&self) -> bool {
        !self.eof
    }

    fn source_type(&self) -> SourceType {
        SourceType::None
    }
}

/// `SourceStream` を `AsyncRead` として読む
///
/// 展開したボディを `tokio::io::copy` などに渡すために使う。
/// ストリームのエラーは `std::io::Error` に変換する。
#[derive(Debug)]
pub struct SourceStreamReader<S> {
    stream: S,
}

impl<S: SourceStream + Unpin> SourceStreamReader<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: SourceStream + Unpin> AsyncRead for SourceStreamReader<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        let this = self.get_mut();
        let n = ready!(this.stream.poll_read(cx, buf.initialize_unfilled())).map_err(into_io_error)?;
        buf.advance(n);
        Poll::Ready(Ok(()))
    }
}

fn into_io_error(e: shiguredo_netstack::Error) -> io::Error {
    match &e {
        shiguredo_netstack::Error::Io { kind, .. } => io::Error::new(*kind, e),
        _ => io::Error::new(io::ErrorKind::InvalidData, e),
    }
}

/// `stream` から `buf` に読み込む。`0` は終端
pub async fn read<S: SourceStream + ?Sized>(stream: &mut S, buf: &mut [u8]) -> Result<usize> {
    let n = poll_fn(|cx| stream.poll_read(cx, buf)).await?;
    Ok(n)
}

/// `stream` を終端まで読み込む
pub async fn read_to_end<S: SourceStream + ?Sized>(stream: &mut S) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        let n = read(stream, &mut buf).await?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&buf[..n]);
    }
}
