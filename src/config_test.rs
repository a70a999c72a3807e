use std::collections::HashMap;

use super::*;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

#[test]
fn empty_lookup_yields_defaults() {
    let cfg = AuthConfig::from_lookup(|_| None);
    assert_eq!(cfg, AuthConfig::default());
    assert_eq!(cfg.guest_expiration, Duration::from_secs(DEFAULT_GUEST_EXPIRATION_SECS));
    assert_eq!(cfg.storage_namespace, "repple-");
    assert!(cfg.storage_path.is_none());
}

#[test]
fn parses_overrides() {
    let cfg = AuthConfig::from_lookup(lookup_from(&[
        ("GUEST_EXPIRATION_SECS", "6"),
        ("GUEST_STORAGE_NAMESPACE", "test-"),
        ("EMAIL_VERIFICATION_RETURN_URL", "https://repple.example/"),
        ("AUTH_STORAGE_PATH", "/tmp/auth.json"),
    ]));
    assert_eq!(cfg.guest_expiration, Duration::from_secs(6));
    assert_eq!(cfg.storage_namespace, "test-");
    assert_eq!(cfg.verification_return_url, "https://repple.example");
    assert_eq!(cfg.storage_path, Some(PathBuf::from("/tmp/auth.json")));
}

#[test]
fn invalid_expiration_falls_back_to_default() {
    let cfg = AuthConfig::from_lookup(lookup_from(&[("GUEST_EXPIRATION_SECS", "soon")]));
    assert_eq!(cfg.guest_expiration, Duration::from_secs(DEFAULT_GUEST_EXPIRATION_SECS));
}

#[test]
fn blank_storage_path_is_ignored() {
    let cfg = AuthConfig::from_lookup(lookup_from(&[("AUTH_STORAGE_PATH", "  ")]));
    assert!(cfg.storage_path.is_none());
}

#[test]
fn empty_namespace_falls_back_to_default() {
    let cfg = AuthConfig::from_lookup(lookup_from(&[("GUEST_STORAGE_NAMESPACE", "")]));
    assert_eq!(cfg.storage_namespace, DEFAULT_STORAGE_NAMESPACE);
}
