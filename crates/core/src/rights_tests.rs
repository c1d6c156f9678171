// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn empty_set_allows_nothing() {
    let set = PermissionSet::new();
    assert!(!set.allows(RightsType::InstanceManager, instance_manager::READ));
}

#[test]
fn full_set_allows_everything() {
    let set = PermissionSet::full();
    for group in RightsType::ALL {
        assert!(set.allows(group, all_bits(group)), "{group} incomplete");
    }
}

#[test]
fn grant_is_additive() {
    let mut set = PermissionSet::new();
    set.grant(RightsType::GameServer, game_server::START);
    set.grant(RightsType::GameServer, game_server::STOP);

    assert!(set.allows(RightsType::GameServer, game_server::START | game_server::STOP));
    assert!(!set.allows(RightsType::GameServer, game_server::RESTART));
}

#[test]
fn revoke_clears_only_named_bits() {
    let mut set = PermissionSet::full();
    set.revoke(RightsType::Repository, repository::CLONE);

    assert!(!set.allows(RightsType::Repository, repository::CLONE));
    assert!(set.allows(RightsType::Repository, repository::FETCH));
}

#[test]
fn allows_requires_all_bits() {
    let mut set = PermissionSet::new();
    set.grant(RightsType::Repository, repository::CLONE);
    assert!(!set.allows(RightsType::Repository, repository::CLONE | repository::RESET));
}

#[yare::parameterized(
    instance_manager = { RightsType::InstanceManager },
    repository = { RightsType::Repository },
    game_server = { RightsType::GameServer },
)]
fn group_all_masks_are_contiguous(group: RightsType) {
    let bits = all_bits(group);
    // ALL must be a contiguous low mask with no gaps
    assert_eq!(bits & (bits + 1), 0);
}
