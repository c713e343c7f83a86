#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Config parsing and validation must reject malformed input without
    // panicking.
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = ferrite_fuzzer::config::FuzzerConfig::parse_str(s) {
            let _ = config.validate();
        }
    }
});
