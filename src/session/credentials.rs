//! Client-side credential checks, run before any call to the identity provider

use crate::{constants::MIN_PASSWORD_LEN, error::AuthError};

/// Loose shape check: `local@domain.tld`, no whitespace
pub fn validate_email(email: &str) -> Result<(), AuthError> {
    let email = email.trim();
    if email.chars().any(char::is_whitespace) {
        return Err(AuthError::InvalidEmail);
    }

    let Some((local, domain)) = email.split_once('@') else {
        return Err(AuthError::InvalidEmail);
    };
    let domain_ok = domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains('@');

    if local.is_empty() || !domain_ok {
        return Err(AuthError::InvalidEmail);
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::WeakPassword);
    }
    Ok(())
}

pub fn validate_sign_in(email: &str, password: &str) -> Result<(), AuthError> {
    validate_email(email)?;
    if password.is_empty() {
        return Err(AuthError::InvalidCredential);
    }
    Ok(())
}

/// Checks a sign-up form: email shape, password strength, confirmation match
pub fn validate_sign_up(email: &str, password: &str, confirm: &str) -> Result<(), AuthError> {
    validate_email(email)?;
    if password != confirm {
        return Err(AuthError::PasswordMismatch);
    }
    validate_password(password)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_shapes() {
        assert!(validate_email("trader@example.com").is_ok());
        assert_eq!(validate_email("trader@example"), Err(AuthError::InvalidEmail));
        assert_eq!(validate_email("@example.com"), Err(AuthError::InvalidEmail));
        assert_eq!(validate_email("a b@example.com"), Err(AuthError::InvalidEmail));
        assert_eq!(validate_email("a@b@example.com"), Err(AuthError::InvalidEmail));
    }

    #[test]
    fn test_sign_up_rejects_mismatch_before_strength() {
        assert_eq!(
            validate_sign_up("a@example.com", "secret1", "secret2"),
            Err(AuthError::PasswordMismatch)
        );
        assert_eq!(
            validate_sign_up("a@example.com", "abc", "abc"),
            Err(AuthError::WeakPassword)
        );
        assert!(validate_sign_up("a@example.com", "secret1", "secret1").is_ok());
    }

    #[test]
    fn test_sign_in_requires_password() {
        assert_eq!(
            validate_sign_in("a@example.com", ""),
            Err(AuthError::InvalidCredential)
        );
    }
}
