//! Pluggable client authentication.
//!
//! Authenticators are looked up by name: the handshake carries an auth name
//! and an opaque payload, and the broker delegates verification to the
//! authenticator registered under that name. With no authenticators
//! configured, authentication is disabled and every client is allowed.

use std::{
    collections::HashMap,
    sync::{Arc, OnceLock, RwLock},
};

use zipper_proto::HandshakeFrame;

/// A named credential verifier.
pub trait Authenticator: Send + Sync + 'static {
    /// Initialize the authenticator with deployment-specific arguments.
    fn init(&self, _args: &[String]) {}

    /// Verify a client's credential payload.
    fn authenticate(&self, payload: &str) -> bool;

    /// The scheme name clients select this authenticator by.
    fn name(&self) -> &str;
}

/// Name-keyed set of authenticators a server verifies against.
pub type AuthenticationMap = HashMap<String, Arc<dyn Authenticator>>;

/// Something carrying credentials to be verified, usually a
/// [`HandshakeFrame`].
pub trait AuthObject {
    /// Name of the scheme the credentials belong to.
    fn auth_name(&self) -> &str;

    /// The credential payload.
    fn auth_payload(&self) -> &str;
}

impl AuthObject for HandshakeFrame {
    fn auth_name(&self) -> &str {
        self.auth_name()
    }

    fn auth_payload(&self) -> &str {
        self.auth_payload()
    }
}

/// Verify `obj` against `auths`.
///
/// Policy:
/// - `auths` empty: allow (authentication disabled).
/// - `obj` absent: deny.
/// - no authenticator under `obj`'s auth name: deny.
/// - otherwise: the authenticator decides.
pub fn authenticate(auths: &AuthenticationMap, obj: Option<&dyn AuthObject>) -> bool {
    if auths.is_empty() {
        return true;
    }
    let Some(obj) = obj else {
        return false;
    };
    match auths.get(obj.auth_name()) {
        Some(auth) => auth.authenticate(obj.auth_payload()),
        None => false,
    }
}

/// A parsed client credential: scheme name plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    name: String,
    payload: String,
}

impl Credential {
    /// Split a credential string on its first `:`.
    ///
    /// `"token:the-token"` parses to `("token", "the-token")`; a string
    /// without a separator parses to `("none", "")`.
    #[must_use]
    pub fn parse(payload: &str) -> Self {
        match payload.split_once(':') {
            Some((name, payload)) => {
                Self { name: name.to_string(), payload: payload.to_string() }
            }
            None => Self { name: "none".to_string(), payload: String::new() },
        }
    }

    /// The scheme name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The credential payload.
    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }
}

fn registry() -> &'static RwLock<AuthenticationMap> {
    static REGISTRY: OnceLock<RwLock<AuthenticationMap>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register an authenticator in the process-wide registry.
///
/// The registry backs deployments that wire authenticators up at startup;
/// treat it as immutable once a server is serving.
pub fn register(auth: Arc<dyn Authenticator>) {
    registry()
        .write()
        .expect("auth registry lock poisoned")
        .insert(auth.name().to_string(), auth);
}

/// Look up a registered authenticator by name.
#[must_use]
pub fn get(name: &str) -> Option<Arc<dyn Authenticator>> {
    registry().read().expect("auth registry lock poisoned").get(name).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockAuth {
        authed: bool,
    }

    impl Authenticator for MockAuth {
        fn authenticate(&self, _payload: &str) -> bool {
            self.authed
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    fn handshake_with_auth(name: &str, payload: &str) -> HandshakeFrame {
        HandshakeFrame::new("client", "id", 0x5F, vec![], name, payload)
    }

    #[test]
    fn empty_auths_allow_everything() {
        let auths = AuthenticationMap::new();
        let obj = handshake_with_auth("whatever", "x");
        assert!(authenticate(&auths, Some(&obj)));
        // With auth disabled even an absent object passes.
        assert!(authenticate(&auths, None));
    }

    #[test]
    fn absent_object_is_denied() {
        let mut auths = AuthenticationMap::new();
        auths.insert("mock".to_string(), Arc::new(MockAuth { authed: true }));
        assert!(!authenticate(&auths, None));
    }

    #[test]
    fn unknown_auth_name_is_denied() {
        let mut auths = AuthenticationMap::new();
        auths.insert("mock".to_string(), Arc::new(MockAuth { authed: true }));
        let obj = handshake_with_auth("nope", "x");
        assert!(!authenticate(&auths, Some(&obj)));
    }

    #[test]
    fn authenticator_decides() {
        let mut auths = AuthenticationMap::new();
        auths.insert("mock".to_string(), Arc::new(MockAuth { authed: false }));
        let obj = handshake_with_auth("mock", "x");
        assert!(!authenticate(&auths, Some(&obj)));

        auths.insert("mock".to_string(), Arc::new(MockAuth { authed: true }));
        assert!(authenticate(&auths, Some(&obj)));
    }

    #[test]
    fn credential_splits_on_first_colon() {
        let c = Credential::parse("token:the-token");
        assert_eq!(c.name(), "token");
        assert_eq!(c.payload(), "the-token");

        let c = Credential::parse("token:a:b");
        assert_eq!(c.name(), "token");
        assert_eq!(c.payload(), "a:b");
    }

    #[test]
    fn credential_without_separator_is_none() {
        let c = Credential::parse("abcdefg");
        assert_eq!(c.name(), "none");
        assert_eq!(c.payload(), "");
    }

    #[test]
    fn registry_lookup() {
        register(Arc::new(MockAuth { authed: true }));
        assert!(get("mock").is_some());
        assert!(get("missing").is_none());
    }
}
