//! Bearer-credential verification.
//!
//! Identity is issued by an external collaborator; this server only checks
//! that a presented credential was minted under the shared secret.  The
//! format is `<user_id>.<mac>` where the MAC is a BLAKE3 keyed hash of the
//! user id, hex-encoded.  Verification failures are `Unauthenticated` across
//! the board: no detail leaks about *why* a credential was refused, and
//! there is no guest fallback.

use subtle::ConstantTimeEq;

use palaver_shared::UserId;

use crate::error::ServerError;

/// Verifies bearer credentials against the shared issuer secret.
#[derive(Clone)]
pub struct Authenticator {
    secret: [u8; 32],
}

impl Authenticator {
    pub fn new(secret: [u8; 32]) -> Self {
        Self { secret }
    }

    /// Verify a raw credential and return the authenticated user.
    pub fn verify(&self, credential: &str) -> Result<UserId, ServerError> {
        let Some((user_raw, mac_hex)) = credential.split_once('.') else {
            return Err(ServerError::Unauthenticated);
        };

        let user = UserId::parse(user_raw).map_err(|_| ServerError::Unauthenticated)?;

        let presented = hex::decode(mac_hex).map_err(|_| ServerError::Unauthenticated)?;
        let expected = self.mac(&user);

        // Constant-time comparison; length check first since ct_eq requires
        // equal-length slices.
        if presented.len() != expected.len()
            || presented.ct_eq(expected.as_slice()).unwrap_u8() != 1
        {
            return Err(ServerError::Unauthenticated);
        }

        Ok(user)
    }

    /// Mint a credential for `user`.
    ///
    /// This mirrors what the external issuer produces; the server itself
    /// only calls it from tests and dev tooling.
    #[allow(dead_code)]
    pub fn issue(&self, user: &UserId) -> String {
        format!("{}.{}", user, hex::encode(self.mac(user)))
    }

    fn mac(&self, user: &UserId) -> [u8; 32] {
        *blake3::keyed_hash(&self.secret, user.as_str().as_bytes()).as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    #[test]
    fn issue_verify_round_trip() {
        let auth = Authenticator::new([7u8; 32]);
        let credential = auth.issue(&uid("u1"));
        assert_eq!(auth.verify(&credential).unwrap(), uid("u1"));
    }

    #[test]
    fn rejects_tampered_user() {
        let auth = Authenticator::new([7u8; 32]);
        let credential = auth.issue(&uid("u1"));
        let forged = credential.replacen("u1", "u2", 1);
        assert!(matches!(
            auth.verify(&forged),
            Err(ServerError::Unauthenticated)
        ));
    }

    #[test]
    fn rejects_wrong_secret() {
        let issuer = Authenticator::new([7u8; 32]);
        let verifier = Authenticator::new([8u8; 32]);
        let credential = issuer.issue(&uid("u1"));
        assert!(verifier.verify(&credential).is_err());
    }

    #[test]
    fn rejects_garbage() {
        let auth = Authenticator::new([7u8; 32]);
        for raw in ["", "u1", "u1.", ".abcd", "u1.nothex", "u 1.abcd"] {
            assert!(auth.verify(raw).is_err(), "{raw:?} should be refused");
        }
    }
}
