#![no_main]

use flowsock::handshake;
use libfuzzer_sys::fuzz_target;

// Fuzzes the server-side opening-handshake parser directly. `try_accept` is a
// pure function over a byte slice, so this needs no TCP socket or runtime at
// all.
fuzz_target!(|data: &[u8]| {
    match handshake::try_accept(data) {
        handshake::ServerHandshakeOutcome::Accepted { consumed, .. } => {
            assert!(consumed <= data.len());
        }
        handshake::ServerHandshakeOutcome::NeedMore | handshake::ServerHandshakeOutcome::Invalid(_) => {}
    }
});
