use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;

/// Static shared-secret check on the credential header.
///
/// A missing header and a wrong value are indistinguishable to the caller.
#[derive(Debug)]
pub struct CredentialGate {
    expected: SecretString,
}

impl CredentialGate {
    pub fn new(expected: SecretString) -> Self {
        Self { expected }
    }

    pub fn check(&self, presented: Option<&str>) -> bool {
        let Some(presented) = presented else {
            return false;
        };
        // ct_eq on slices of different length is false
        presented
            .as_bytes()
            .ct_eq(self.expected.expose_secret().as_bytes())
            .into()
    }
}
