#![no_main]

use beacon_protocols::Envelope;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Try parsing arbitrary bytes as a wire envelope.
    // Envelope::decode must never panic — it should always return Ok or Err.
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(envelope) = Envelope::decode(s) {
            // A decodable envelope must re-encode and decode to the same kind
            let json = envelope.encode().unwrap();
            let reparsed = Envelope::decode(&json).unwrap();
            assert_eq!(
                envelope.payload.type_uri(),
                reparsed.payload.type_uri()
            );
        }
    }
});
