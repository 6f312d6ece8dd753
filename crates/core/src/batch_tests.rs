// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

use RequestState::*;

#[parameterized(
    all_complete = { &[Complete, Complete], Complete },
    one_failed_rest_terminal = { &[Complete, Failed], Failed },
    all_failed = { &[Failed, Failed], Failed },
    queued_member_wins = { &[Complete, Queued], InProgress },
    in_progress_member_wins = { &[Failed, InProgress], InProgress },
    single_queued = { &[Queued], InProgress },
    empty = { &[], Complete },
)]
fn derivation(members: &[RequestState], expected: RequestState) {
    assert_eq!(batch_state(members.iter()), expected);
}

#[test]
fn failed_needs_all_terminal() {
    // A failed member does not fail the batch while siblings still run.
    let members = [Failed, Queued, Complete];
    assert_eq!(batch_state(members.iter()), InProgress);
}

#[test]
fn batch_id_display() {
    assert_eq!(BatchId(17).to_string(), "17");
}
