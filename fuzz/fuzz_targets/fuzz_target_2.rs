#![no_main]

use flowsock::frame::{self, ParseOutcome};
use libfuzzer_sys::fuzz_target;

// Fuzzes the frame header parser: it must never panic on
// truncated or malformed input, only return `NeedMore`/`Invalid`, and the
// payload offset it reports must never run past the input it was given.
fuzz_target!(|data: &[u8]| {
    match frame::parse_header(data) {
        ParseOutcome::Ok(_, offset) => assert!(offset <= data.len()),
        ParseOutcome::NeedMore | ParseOutcome::Invalid(_) => {}
    }
});
