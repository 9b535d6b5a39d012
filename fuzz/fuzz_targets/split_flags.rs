#![no_main]

use libfuzzer_sys::fuzz_target;
use sigcheck_host_runner::shell_words::split_flags;

fuzz_target!(|data: &[u8]| {
    let data = if data.len() > 16 * 1024 {
        &data[..16 * 1024]
    } else {
        data
    };

    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    let words = split_flags(s);
    if !s.contains(['\'', '"', '\\']) {
        let plain: Vec<&str> = s.split_whitespace().collect();
        assert_eq!(words, plain);
    }
});
