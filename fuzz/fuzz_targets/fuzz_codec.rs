#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use msim_server::core::codec::MsimCodec;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Feed the stream in two chunks to exercise terminator search across reads
    let split = data.first().map_or(0, |b| *b as usize % (data.len() + 1));
    let mut codec = MsimCodec::new(4096);
    let mut buf = BytesMut::from(&data[..split]);
    while let Ok(Some(_)) = codec.decode(&mut buf) {}
    buf.extend_from_slice(&data[split..]);
    while let Ok(Some(_)) = codec.decode_eof(&mut buf) {}
});
