use ferry_core::mapping::UserMap;
use ferry_core::transport::memory::MemoryTransport;
use proptest::prelude::*;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};

const PEOPLE: u64 = 6;

fn source() -> MemoryTransport {
    let people: Vec<Value> = (1..=PEOPLE)
        .map(|id| json!({"ixPerson": id, "sFullName": format!("Person {id}")}))
        .collect();
    MemoryTransport::new("source").with_response("listPeople", json!({ "people": people }))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Any lookup order yields one create per distinct person and a stable id.
    #[test]
    fn lookups_create_each_person_once(lookups in prop::collection::vec(prop_oneof![
        (1..=PEOPLE).prop_map(|id| id.to_string()),
        Just("-1".to_string()),
    ], 1..40)) {
        let mut src = source();
        let mut dest = MemoryTransport::new("dest");
        let mut users = UserMap::load(&BTreeMap::new(), "-1", &mut src, &mut dest).unwrap();

        let mut seen: BTreeMap<String, String> = BTreeMap::new();
        for source_id in &lookups {
            let dest_id = users.get_ixperson(source_id, &mut dest).unwrap();
            let first = seen.entry(source_id.clone()).or_insert_with(|| dest_id.clone());
            prop_assert_eq!(&*first, &dest_id);
        }

        let distinct: BTreeSet<&String> = lookups.iter().filter(|id| *id != "-1").collect();
        let creates = dest.commands().iter().filter(|c| **c == "newPerson").count();
        prop_assert_eq!(creates, distinct.len());
        prop_assert_eq!(users.created(), distinct.len());
        if lookups.iter().any(|id| id == "-1") {
            prop_assert_eq!(seen["-1"].as_str(), "-1");
        }
    }
}
