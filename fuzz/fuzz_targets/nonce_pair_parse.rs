#![no_main]

use beacon_crypto::musig::{partial_sig_from_hex, point_from_hex, pubnonce_from_hex_pair};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Wire decoding of points, nonce pairs and partial signatures must never
    // panic on arbitrary input.
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = point_from_hex(s);
        let _ = partial_sig_from_hex(s);

        let pair = [s.to_string(), s.to_string()];
        let _ = pubnonce_from_hex_pair(&pair);
    }
});
