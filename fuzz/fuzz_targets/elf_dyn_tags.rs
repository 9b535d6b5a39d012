#![no_main]

use libfuzzer_sys::fuzz_target;
use sigcheck_host_runner::elf_dyn::{DynamicTagSet, DT_TEXTREL};

fuzz_target!(|data: &[u8]| {
    let data = if data.len() > 64 * 1024 {
        &data[..64 * 1024]
    } else {
        data
    };

    if let Ok(tags) = DynamicTagSet::from_bytes(data) {
        let _ = tags.contains(DT_TEXTREL);
        let _ = tags.has_text_relocations();
    }
});
