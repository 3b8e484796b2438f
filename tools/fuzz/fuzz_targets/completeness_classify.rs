#![no_main]

//! Fuzzes Component G's completeness classifier (`assistant_runtime::completeness::classify`).
//! `classify` is documented as total over arbitrary UTF-8 — it must never panic regardless of
//! fence balance, length, or trailing grapheme.

use assistant_runtime::completeness::classify;
use assistant_runtime::upstream::StopReason;
use libfuzzer_sys::{arbitrary::Arbitrary, fuzz_target};

#[derive(Arbitrary, Debug)]
struct Input {
    text: String,
    stop_reason: FuzzStopReason,
}

#[derive(Arbitrary, Debug)]
enum FuzzStopReason {
    Stop,
    Length,
    ToolCalls,
}

impl From<FuzzStopReason> for StopReason {
    fn from(r: FuzzStopReason) -> Self {
        match r {
            FuzzStopReason::Stop => StopReason::Stop,
            FuzzStopReason::Length => StopReason::Length,
            FuzzStopReason::ToolCalls => StopReason::ToolCalls,
        }
    }
}

fuzz_target!(|input: Input| {
    let report = classify(&input.text, input.stop_reason.into());
    if !report.complete {
        assert!(report.reason.is_some());
    }
});
