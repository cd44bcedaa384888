//! End-to-end coverage of composite-index prefix matching on a three-column
//! tuple: a prefix lookup returns exactly the nodes matching every given
//! column, ignoring nodes that only share a shorter prefix.

use ligaturedb::schema::CompositeIndex;
use ligaturedb::Value;

#[test]
fn prefix_lookup_on_three_columns_matches_exactly_the_right_nodes() {
    let mut index = CompositeIndex::new();

    let us = Value::String("US".into());
    let ca = Value::String("CA".into());
    let ny = Value::String("NY".into());
    let sf = Value::String("SF".into());
    let nyc = Value::String("NYC".into());
    let de = Value::String("DE".into());
    let by = Value::String("BY".into());
    let mu = Value::String("MU".into());

    index.insert(&[&us, &ca, &sf], &"n1".to_string());
    index.insert(&[&us, &ca, &sf], &"n2".to_string());
    index.insert(&[&us, &ny, &nyc], &"n3".to_string());
    index.insert(&[&de, &by, &mu], &"n4".to_string());

    let us_ca = index.lookup_prefix(&[&us, &ca]);
    assert_eq!(us_ca.len(), 2);
    assert!(us_ca.contains("n1"));
    assert!(us_ca.contains("n2"));
    assert!(!us_ca.contains("n3"));
    assert!(!us_ca.contains("n4"));

    let us_only = index.lookup_prefix(&[&us]);
    assert_eq!(us_only.len(), 3);
    assert!(!us_only.contains("n4"));

    let full = index.lookup_full(&[&us, &ca, &sf]);
    assert_eq!(full.len(), 2);

    index.remove(&[&us, &ca, &sf], &"n1".to_string());
    let us_ca_after_remove = index.lookup_prefix(&[&us, &ca]);
    assert_eq!(us_ca_after_remove.len(), 1);
    assert!(us_ca_after_remove.contains("n2"));
}
