mod common;
use common::{assert_consistent, ids, indexed_groups, setup};

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;
use roster_supergroups::{Context, SuperGroupManagement};

const GROUP_IDS: [&str; 3] = ["g0", "g1", "g2"];
const USER_IDS: [&str; 5] = ["u0", "u1", "u2", "u3", "u4"];

#[derive(Clone, Debug)]
enum Step {
    Add { group: usize, users: Vec<usize> },
    Remove { group: usize, users: Vec<usize> },
}

fn step() -> impl Strategy<Value = Step> {
    let users = prop::collection::vec(0..USER_IDS.len(), 0..4);
    prop_oneof![
        (0..GROUP_IDS.len(), users.clone()).prop_map(|(group, users)| Step::Add { group, users }),
        (0..GROUP_IDS.len(), users).prop_map(|(group, users)| Step::Remove { group, users }),
    ]
}

fn user_ids(users: &[usize]) -> Vec<String> {
    users.iter().map(|&user| USER_IDS[user].to_string()).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn membership_and_index_agree(steps in prop::collection::vec(step(), 1..20)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let (_store, manager) = setup();
            let ctx = Context::background();

            let mut model: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
            for group_id in GROUP_IDS {
                manager.create_super_group(&ctx, group_id, &[]).await.unwrap();
                model.insert(group_id, BTreeSet::new());
            }

            for step in steps {
                match step {
                    Step::Add { group, users } => {
                        let users = user_ids(&users);
                        manager.add_members(&ctx, GROUP_IDS[group], &users).await.unwrap();
                        model.entry(GROUP_IDS[group]).or_default().extend(users);
                    }
                    Step::Remove { group, users } => {
                        let users = user_ids(&users);
                        manager.remove_members(&ctx, GROUP_IDS[group], &users).await.unwrap();
                        let members = model.entry(GROUP_IDS[group]).or_default();
                        for user in &users {
                            members.remove(user);
                        }
                    }
                }

                assert_consistent(&manager, &GROUP_IDS, &USER_IDS).await;
            }

            for (group_id, expected) in &model {
                let group = manager.get_super_group(&ctx, group_id).await.unwrap();
                let actual: BTreeSet<String> = group.member_ids.iter().cloned().collect();
                assert_eq!(&actual, expected, "members of {group_id}");
                assert_eq!(actual.len(), group.member_ids.len(), "duplicate members in {group_id}");
            }

            for user_id in USER_IDS {
                let indexed = indexed_groups(&manager, user_id).await;
                let unique: BTreeSet<&String> = indexed.iter().collect();
                assert_eq!(unique.len(), indexed.len(), "duplicate groups for {user_id}");
            }

            // Emptied groups are kept.
            assert_eq!(
                manager.get_super_groups(&ctx, &ids(&GROUP_IDS)).await.unwrap().len(),
                GROUP_IDS.len()
            );
        });
    }
}
