#![no_main]

use jarscope::classfile::{ClassCodec, JvmCodec};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let codec = JvmCodec::new().with_max_iterations(10_000);
    if let Ok(class) = codec.decode(data) {
        let _ = codec.encode(&class);
    }
});
