// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Round-trip properties for the wire protocol.

use super::*;
use proptest::prelude::*;
use std::path::PathBuf;
use warden_core::{InstanceId, InstanceUpdate, JobId};

fn arb_request() -> impl Strategy<Value = Request> {
    prop_oneof![
        "[a-z0-9.+-]{1,20}".prop_map(|version| Request::Hello { version }),
        ("[a-z]{1,12}", "[a-z]{1,12}", "[a-z/]{1,24}").prop_map(|(user, name, path)| {
            Request::InstanceCreate { user, name, path: PathBuf::from(format!("/{path}")) }
        }),
        ("[a-z]{1,12}", "[a-z0-9-]{1,24}").prop_map(|(user, id)| Request::InstanceGet {
            user,
            id: InstanceId::from_string(id),
        }),
        ("[a-z]{1,12}", "[a-z0-9-]{1,24}", any::<Option<bool>>()).prop_map(
            |(user, id, online)| Request::InstanceUpdate {
                user,
                id: InstanceId::from_string(id),
                update: InstanceUpdate { online, ..InstanceUpdate::default() },
            }
        ),
        ("[a-z]{1,12}", "[a-z0-9-]{1,24}").prop_map(|(user, id)| Request::JobCancel {
            user,
            id: JobId::from_string(id),
        }),
        ("[a-z]{1,12}", "[a-z0-9-]{1,24}", 1u64..100_000, any::<bool>()).prop_map(
            |(user, id, number, pin)| Request::RepoTestMerge {
                user,
                id: InstanceId::from_string(id),
                number,
                target_sha: pin.then(|| "a".repeat(40)),
                comment: None,
            }
        ),
    ]
}

proptest! {
    #[test]
    fn requests_survive_the_wire(request in arb_request()) {
        let encoded = serde_json::to_vec(&request).unwrap();
        let decoded: Request = serde_json::from_slice(&encoded).unwrap();
        prop_assert_eq!(decoded, request);
    }

    #[test]
    fn frame_length_matches_payload(request in arb_request()) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let buf = rt.block_on(async {
            let mut buf = Vec::new();
            write_message(&mut buf, &request).await.unwrap();
            buf
        });
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        prop_assert_eq!(len, buf.len() - 4);
    }
}
