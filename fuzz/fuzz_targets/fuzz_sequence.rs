#![no_main]

use libfuzzer_sys::fuzz_target;
use protoforge::CodecRegistry;

fuzz_target!(|data: &[u8]| {
    // Sequence decoding must reject malformed input without panicking or
    // allocating from an untrusted count.
    let registry = CodecRegistry::new();
    let _ = registry.deserialize_sequence::<u32>(data);
    let _ = registry.deserialize_sequence::<String>(data);
    let _ = registry.deserialize_sequence::<bool>(data);
});
