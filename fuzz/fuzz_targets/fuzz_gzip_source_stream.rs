#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use shiguredo_netstack::gzip_source_stream::GzipSourceStream;
use shiguredo_netstack::mock_source_stream::{MockSourceStream, ReadMode};
use shiguredo_netstack::{Error, FilterLimits, SourceStream, SourceType};

#[derive(Arbitrary, Debug)]
struct FuzzStream {
    deflate: bool,
    input_buffer_size: u8,
    output_buffer_size: u8,
    chunks: Vec<Vec<u8>>,
    async_reads: bool,
}

fuzz_target!(|input: FuzzStream| {
    let source = MockSourceStream::new();
    let handle = source.handle();
    let mode = if input.async_reads {
        ReadMode::Async
    } else {
        ReadMode::Sync
    };
    for chunk in input.chunks.iter().filter(|c| !c.is_empty()) {
        handle.add_read_result(chunk, mode);
    }
    handle.add_read_result(b"", mode);

    let source_type = if input.deflate {
        SourceType::Deflate
    } else {
        SourceType::Gzip
    };
    let limits = FilterLimits::with_input_buffer_size(usize::from(input.input_buffer_size));
    let Some(mut stream) =
        GzipSourceStream::create_with_limits(Box::new(source), source_type, &limits)
    else {
        return;
    };

    let mut buf = vec![0u8; usize::from(input.output_buffer_size).max(1)];
    loop {
        match stream.try_read(&mut buf) {
            Some(Ok(0)) => break,
            Some(Ok(n)) => assert!(n <= buf.len()),
            Some(Err(e)) => {
                assert_eq!(e, Error::ContentDecodingFailed);
                break;
            }
            None => {
                if !handle.complete_next_read() {
                    panic!("stream is pending without a queued read");
                }
            }
        }
    }
});
