use super::*;

// =============================================================================
// Identity
// =============================================================================

#[test]
fn anonymous_identity_is_not_permanent() {
    let identity = Identity { id: "g1".into(), email: None, is_anonymous: true };
    assert!(!identity.is_permanent());
}

#[test]
fn email_identity_is_permanent() {
    let identity = Identity { id: "u1".into(), email: Some("a@b.co".into()), is_anonymous: false };
    assert!(identity.is_permanent());
}

#[test]
fn identity_serializes_snake_case_fields() {
    let identity = Identity { id: "u1".into(), email: None, is_anonymous: true };
    let json = serde_json::to_value(&identity).unwrap();
    assert_eq!(json["id"], "u1");
    assert!(json["email"].is_null());
    assert_eq!(json["is_anonymous"], true);
}

// =============================================================================
// Credential
// =============================================================================

#[test]
fn credential_debug_redacts_password() {
    let cred = Credential::EmailPassword { email: "a@b.co".into(), password: "hunter22".into() };
    let debug = format!("{cred:?}");
    assert!(debug.contains("a@b.co"));
    assert!(!debug.contains("hunter22"));
}

#[test]
fn external_provider_as_str() {
    assert_eq!(ExternalProvider::Google.as_str(), "google");
}

// =============================================================================
// ProviderError
// =============================================================================

#[test]
fn provider_error_displays_message_verbatim() {
    let err = ProviderError::new(ProviderErrorKind::EmailAlreadyInUse, "Error (auth/email-already-in-use).");
    assert_eq!(err.to_string(), "Error (auth/email-already-in-use).");
}
