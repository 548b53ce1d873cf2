use std::collections::BTreeMap;

/**
 * The string both providers compute signatures over: drop the excluded keys and
 * every empty value, sort by key, join `key=value` pairs with `&`.
 *
 * alipay excludes `sign` and `sign_type`, weixin v2 only `sign`.
 */
pub fn canonical_string<'a, I, K, V>(params: I, excluded: &[&str]) -> String
where
    I: IntoIterator<Item = (&'a K, &'a V)>,
    K: AsRef<str> + ?Sized + 'a,
    V: AsRef<str> + ?Sized + 'a,
{
    let sorted: BTreeMap<&str, &str> = params
        .into_iter()
        .map(|(k, v)| (k.as_ref(), v.as_ref()))
        .filter(|(k, v)| !v.is_empty() && !excluded.contains(k))
        .collect();
    sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<String>>()
        .join("&")
}

/// Constant time comparison for signatures we computed ourselves.
pub fn signature_eq(expected: &str, actual: &str) -> bool {
    expected.len() == actual.len() && openssl::memcmp::eq(expected.as_bytes(), actual.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn sorts_keys_and_skips_excluded_and_empty() {
        let mut m = HashMap::new();
        m.insert("total_amount".to_string(), "10.00".to_string());
        m.insert("app_id".to_string(), "2021".to_string());
        m.insert("sign".to_string(), "abc".to_string());
        m.insert("sign_type".to_string(), "RSA2".to_string());
        m.insert("body".to_string(), "".to_string());
        assert_eq!(
            canonical_string(&m, &["sign", "sign_type"]),
            "app_id=2021&total_amount=10.00"
        );
    }

    #[test]
    fn order_of_insertion_does_not_matter() {
        let pairs = [("c", "3"), ("a", "1"), ("b", "2"), ("a_b", "4")];
        let forward: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let backward: BTreeMap<String, String> = pairs
            .iter()
            .rev()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let a = canonical_string(&forward, &["sign"]);
        let b = canonical_string(&backward, &["sign"]);
        assert_eq!(a, b);
        assert_eq!(a, "a=1&a_b=4&b=2&c=3");
    }

    #[test]
    fn compares_signatures() {
        assert!(signature_eq("ABCD", "ABCD"));
        assert!(!signature_eq("ABCD", "ABCE"));
        assert!(!signature_eq("ABCD", "ABC"));
    }
}
