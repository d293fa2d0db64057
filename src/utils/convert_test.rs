use super::convert::*;

#[test]
fn test_safe_kv_preserves_numeric_order() {
    let a = safe_kv(9);
    let b = safe_kv(10);
    let c = safe_kv(256);
    assert!(a < b && b < c);
    assert_eq!(safe_vk(c).unwrap(), 256);
}

#[test]
fn test_safe_vk_rejects_wrong_length() {
    assert!(safe_vk([1u8, 2, 3]).is_err());
}

#[test]
fn test_composite_key_round_trip() {
    let key = composite_key(&[b"Q42", b"enwiki"]);
    assert_eq!(key, b"Q42\0enwiki".to_vec());

    let [entity, site] = split_key::<2>(&key).unwrap();
    assert_eq!(entity, b"Q42");
    assert_eq!(site, b"enwiki");
    assert!(split_key::<3>(&key).is_err());
}

#[test]
fn test_composite_prefix_does_not_match_longer_ids() {
    let prefix = composite_prefix(&[b"Q4"]);
    let q42 = composite_key(&[b"Q42", b"enwiki"]);
    let q4 = composite_key(&[b"Q4", b"enwiki"]);

    assert!(!q42.starts_with(&prefix));
    assert!(q4.starts_with(&prefix));
}
