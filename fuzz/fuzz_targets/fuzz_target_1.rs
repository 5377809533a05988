#![no_main]

use libfuzzer_sys::fuzz_target;
use msim_server::core::wire;

fuzz_target!(|data: &[u8]| {
    // Decoding must be total: any byte string classifies without panicking
    let decoded = wire::decode(data);
    let _ = decoded.packet.get_body();
});
