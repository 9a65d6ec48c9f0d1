//! Password handling for the user directory.
//!
//! Registration runs every password through a strength estimate before it is
//! accepted, and only the bcrypt hash of an accepted password is ever stored.
//! [ValidatedPassword] is the proof that the strength check ran;
//! [PasswordHash] is what goes into the `user` table.

use std::fmt::{Debug, Display, Formatter};

use bcrypt::{BcryptError, hash, verify};
use zxcvbn::{Score, zxcvbn};

use crate::Error;

/// The lowest strength score accepted for a new password.
const MIN_SCORE: Score = Score::Three;

/// A plaintext password that has passed the strength check.
///
/// Holding one of these is the precondition for hashing: [PasswordHash::new]
/// only accepts validated passwords, so an unchecked string cannot reach the
/// database by accident.
#[derive(Clone, PartialEq)]
pub struct ValidatedPassword(String);

impl ValidatedPassword {
    /// Check that `raw_password` is strong enough to accept.
    ///
    /// # Errors
    /// Returns [Error::TooWeak] when the strength estimate scores the
    /// password below the cutoff. The message carries the estimator's
    /// feedback so the client can tell the user how to pick a better one.
    pub fn new(raw_password: &str) -> Result<Self, Error> {
        let estimate = zxcvbn(raw_password, &[]);

        if estimate.score() < MIN_SCORE {
            let feedback = estimate
                .feedback()
                .map(|feedback| feedback.to_string())
                .unwrap_or_else(|| "try a longer password".to_owned());

            return Err(Error::TooWeak(feedback));
        }

        Ok(Self(raw_password.to_owned()))
    }

    /// Wrap `raw_password` without running the strength check.
    ///
    /// Intended for tests and trusted call sites. Not `unsafe`: skipping the
    /// check can admit a weak password but cannot break memory safety.
    pub fn new_unchecked(raw_password: &str) -> Self {
        Self(raw_password.to_owned())
    }
}

// The plaintext must never end up in logs or error output, so both the
// Display and Debug forms redact it.
impl Display for ValidatedPassword {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("********")
    }
}

impl Debug for ValidatedPassword {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("ValidatedPassword(\"********\")")
    }
}

/// A bcrypt hash of a validated password.
#[derive(Debug, Clone, PartialEq)]
pub struct PasswordHash(String);

impl PasswordHash {
    /// The bcrypt cost used for real registrations.
    ///
    /// Hashing at this cost takes a noticeable fraction of a second on
    /// purpose. Tests pass a lower cost to stay fast.
    pub const DEFAULT_COST: u32 = bcrypt::DEFAULT_COST;

    /// Hash `password` with the given bcrypt `cost`.
    ///
    /// # Errors
    /// Returns [Error::HashingError] if bcrypt rejects the cost or fails
    /// internally.
    pub fn new(password: ValidatedPassword, cost: u32) -> Result<Self, Error> {
        hash(&password.0, cost)
            .map(Self)
            .map_err(|error| Error::HashingError(error.to_string()))
    }

    /// Wrap a hash string read back from the database.
    ///
    /// The caller is responsible for only passing strings produced by
    /// [PasswordHash::new].
    pub fn new_unchecked(raw_password_hash: &str) -> Self {
        Self(raw_password_hash.to_owned())
    }

    /// Validate and hash a raw password in one step.
    ///
    /// # Errors
    /// Returns [Error::TooWeak] if the password fails the strength check, or
    /// [Error::HashingError] if hashing fails.
    pub fn from_raw_password(raw_password: &str, cost: u32) -> Result<Self, Error> {
        PasswordHash::new(ValidatedPassword::new(raw_password)?, cost)
    }

    /// Check `raw_password` against the stored hash.
    ///
    /// # Errors
    /// Returns the underlying bcrypt error if the stored hash is malformed.
    pub fn verify(&self, raw_password: &str) -> Result<bool, BcryptError> {
        verify(raw_password, &self.0)
    }

    /// The hash string as stored in the database.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PasswordHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod password_strength_tests {
    use crate::Error;

    use super::ValidatedPassword;

    #[test]
    fn short_and_common_passwords_are_rejected() {
        for weak in ["", "password", "abc123", "letmein1"] {
            let result = ValidatedPassword::new(weak);

            assert!(
                matches!(result, Err(Error::TooWeak(_))),
                "{weak:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejection_explains_itself() {
        let Err(Error::TooWeak(feedback)) = ValidatedPassword::new("password") else {
            panic!("a dictionary word should be rejected");
        };

        assert!(!feedback.is_empty());
    }

    #[test]
    fn long_passphrases_are_accepted() {
        assert!(ValidatedPassword::new("asomewhatlongpassword1").is_ok());
        assert!(ValidatedPassword::new("averysafeandsecurepassword").is_ok());
    }

    #[test]
    fn display_and_debug_never_show_the_password() {
        let password = ValidatedPassword::new_unchecked("okon");

        assert!(!format!("{password}").contains("okon"));
        assert!(!format!("{password:?}").contains("okon"));
    }
}

#[cfg(test)]
mod hashing_tests {
    use super::{PasswordHash, ValidatedPassword};

    // Low bcrypt cost to keep the tests fast.
    const TEST_COST: u32 = 4;

    #[test]
    fn verify_accepts_the_original_password() {
        let hash =
            PasswordHash::new(ValidatedPassword::new_unchecked("okon"), TEST_COST).unwrap();

        assert!(hash.verify("okon").unwrap());
    }

    #[test]
    fn verify_rejects_other_passwords() {
        let hash =
            PasswordHash::new(ValidatedPassword::new_unchecked("okon"), TEST_COST).unwrap();

        assert!(!hash.verify("definitelynotokon").unwrap());
    }

    #[test]
    fn the_stored_string_is_not_the_password() {
        let hash =
            PasswordHash::new(ValidatedPassword::new_unchecked("okon"), TEST_COST).unwrap();

        assert_ne!(hash.as_str(), "okon");
        assert!(hash.as_str().starts_with("$2"));
    }

    #[test]
    fn round_trips_through_the_database_representation() {
        let hash =
            PasswordHash::new(ValidatedPassword::new_unchecked("okon"), TEST_COST).unwrap();

        let restored = PasswordHash::new_unchecked(hash.as_str());

        assert!(restored.verify("okon").unwrap());
    }

    #[test]
    fn from_raw_password_runs_the_strength_check() {
        let result = PasswordHash::from_raw_password("password", TEST_COST);

        assert!(matches!(result, Err(crate::Error::TooWeak(_))));
    }
}
