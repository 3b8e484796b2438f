//! Component G — classifies a generated text as complete or incomplete with a typed reason.
//! A pure, total function: no I/O, no state. Rule order follows SPEC_FULL §4.G exactly; the
//! Open Question in DESIGN.md freezes this ordered-rule list as normative over the source's
//! alternate length-gated definition.

use crate::events::{CompletenessReport, IncompleteReason};
use crate::upstream::StopReason as UpstreamStopReason;

const MIN_LENGTH: usize = 32;

const TERMINAL_CHARS: &[char] = &[
    '.', '!', '?', '…', '"', '\'', ')', ']', '}',
    // Common CJK terminators.
    '。', '!', '?', '」', '』', '、', '…',
];

/// Classifies `text` given the upstream's reported stop reason.
pub fn classify(text: &str, stop_reason: UpstreamStopReason) -> CompletenessReport {
    if stop_reason == UpstreamStopReason::ToolCalls {
        return CompletenessReport {
            complete: true,
            reason: None,
        };
    }

    if has_unbalanced_fence(text) {
        return incomplete(IncompleteReason::Fence);
    }

    let trimmed = text.trim();
    if trimmed.chars().count() < MIN_LENGTH {
        return incomplete(IncompleteReason::Short);
    }

    match trimmed.chars().next_back() {
        Some(c) if TERMINAL_CHARS.contains(&c) => {}
        _ => return incomplete(IncompleteReason::Punct),
    }

    if stop_reason == UpstreamStopReason::Length {
        return incomplete(IncompleteReason::Length);
    }

    CompletenessReport {
        complete: true,
        reason: None,
    }
}

fn incomplete(reason: IncompleteReason) -> CompletenessReport {
    CompletenessReport {
        complete: false,
        reason: Some(reason),
    }
}

/// A fenced code block (` ``` `) is unbalanced when an odd number of fence markers appear.
fn has_unbalanced_fence(text: &str) -> bool {
    text.matches("```").count() % 2 == 1
}
