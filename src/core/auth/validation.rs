//! Request validation
//!
//! Validators return every failing field at once as a [`FieldErrors`] map
//! instead of stopping at the first problem.

use std::collections::BTreeMap;

use crate::core::auth::service::{LoginRequest, RegisterRequest, ResetPasswordRequest};

/// Field name to human-readable message
pub type FieldErrors = BTreeMap<&'static str, String>;

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 50;
const EMAIL_MAX: usize = 100;
const FULL_NAME_MAX: usize = 100;
const PASSWORD_MIN: usize = 10;
const OTP_LENGTH: usize = 6;

/// Render as `field: message; field: message`
pub fn describe(errors: &FieldErrors) -> String {
    errors
        .iter()
        .map(|(field, message)| format!("{field}: {message}"))
        .collect::<Vec<_>>()
        .join("; ")
}

fn finish(errors: FieldErrors) -> Result<(), FieldErrors> {
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn check(errors: &mut FieldErrors, field: &'static str, result: Result<(), String>) {
    if let Err(message) = result {
        errors.insert(field, message);
    }
}

pub fn validate_username(username: &str) -> Result<(), String> {
    if username.trim().is_empty() {
        return Err("Username is required".to_string());
    }
    let len = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
        return Err(format!(
            "Username must be between {USERNAME_MIN} and {USERNAME_MAX} characters"
        ));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), String> {
    if email.trim().is_empty() {
        return Err("Email is required".to_string());
    }
    if email.chars().count() > EMAIL_MAX {
        return Err(format!("Email must not exceed {EMAIL_MAX} characters"));
    }
    if !is_well_formed_email(email) {
        return Err("Email should be valid".to_string());
    }
    Ok(())
}

fn is_well_formed_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return false;
    }
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    domain.contains('.') && domain.split('.').all(|label| !label.is_empty())
}

pub fn validate_full_name(full_name: &str) -> Result<(), String> {
    if full_name.trim().is_empty() {
        return Err("Full name is required".to_string());
    }
    if full_name.chars().count() > FULL_NAME_MAX {
        return Err(format!("Full name must not exceed {FULL_NAME_MAX} characters"));
    }
    Ok(())
}

/// At least ten characters with a lowercase letter, an uppercase letter, a
/// digit and a character outside `[A-Za-z0-9]`
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("Password is required".to_string());
    }

    let long_enough = password.chars().count() >= PASSWORD_MIN;
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_symbol = password.chars().any(|c| !c.is_ascii_alphanumeric());

    if long_enough && has_lower && has_upper && has_digit && has_symbol {
        Ok(())
    } else {
        Err(format!(
            "Password must be at least {PASSWORD_MIN} characters and contain uppercase, \
             lowercase, digit and special characters"
        ))
    }
}

pub fn validate_otp(otp: &str) -> Result<(), String> {
    if otp.len() == OTP_LENGTH && otp.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(format!("OTP must be exactly {OTP_LENGTH} digits"))
    }
}

pub fn validate_register(request: &RegisterRequest) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::new();
    check(&mut errors, "username", validate_username(&request.username));
    check(&mut errors, "email", validate_email(&request.email));
    check(&mut errors, "password", validate_password(&request.password));
    check(&mut errors, "full_name", validate_full_name(&request.full_name));
    finish(errors)
}

pub fn validate_login(request: &LoginRequest) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::new();
    if request.username.trim().is_empty() {
        errors.insert("username", "Username is required".to_string());
    }
    if request.password.is_empty() {
        errors.insert("password", "Password is required".to_string());
    }
    finish(errors)
}

pub fn validate_reset_password(request: &ResetPasswordRequest) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::new();
    check(&mut errors, "email", validate_email(&request.email));
    check(&mut errors, "otp", validate_otp(&request.otp));
    check(
        &mut errors,
        "new_password",
        validate_password(&request.new_password),
    );
    finish(errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(username: &str, email: &str, password: &str, full_name: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            full_name: full_name.to_string(),
        }
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("user+tag@example.co.uk").is_ok());

        assert!(validate_email("").is_err());
        assert!(validate_email("invalid").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("user@example").is_err());
        assert!(validate_email("user@@example.com").is_err());
        assert!(validate_email("user@example.").is_err());
        assert!(validate_email("us er@example.com").is_err());

        let long = format!("{}@example.com", "a".repeat(95));
        assert!(validate_email(&long).is_err());
    }

    #[test]
    fn test_validate_username_length() {
        assert!(validate_username("abc").is_ok());
        assert!(validate_username(&"a".repeat(50)).is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username(&"a".repeat(51)).is_err());
        assert!(validate_username("   ").is_err());
    }

    #[test]
    fn test_validate_password_rules() {
        assert!(validate_password("Str0ng!Pass").is_ok());
        assert!(validate_password("Aa1!aaaaaa").is_ok());

        assert!(validate_password("Aa1!aaaaa").is_err()); // 9 chars
        assert!(validate_password("str0ng!pass").is_err()); // no upper
        assert!(validate_password("STR0NG!PASS").is_err()); // no lower
        assert!(validate_password("Strong!Pass").is_err()); // no digit
        assert!(validate_password("Str0ngPass1").is_err()); // no symbol
    }

    #[test]
    fn test_validate_otp() {
        assert!(validate_otp("012345").is_ok());
        assert!(validate_otp("12345").is_err());
        assert!(validate_otp("1234567").is_err());
        assert!(validate_otp("12a456").is_err());
    }

    #[test]
    fn test_validate_register_collects_all_fields() {
        let errors = validate_register(&register("ab", "bad", "weak", " ")).unwrap_err();

        assert_eq!(errors.len(), 4);
        assert!(errors.contains_key("username"));
        assert!(errors.contains_key("email"));
        assert!(errors.contains_key("password"));
        assert!(errors.contains_key("full_name"));
    }

    #[test]
    fn test_validate_register_accepts_valid_request() {
        let request = register("alice", "alice@example.com", "Str0ng!Pass", "Alice Doe");
        assert!(validate_register(&request).is_ok());
    }

    #[test]
    fn test_validate_reset_password() {
        let request = ResetPasswordRequest {
            email: "alice@example.com".to_string(),
            otp: "12ab".to_string(),
            new_password: "Str0ng!Pass".to_string(),
        };
        let errors = validate_reset_password(&request).unwrap_err();
        assert_eq!(errors.keys().copied().collect::<Vec<_>>(), vec!["otp"]);
    }

    #[test]
    fn test_describe_is_sorted_by_field() {
        let mut errors = FieldErrors::new();
        errors.insert("password", "p".to_string());
        errors.insert("email", "e".to_string());
        assert_eq!(describe(&errors), "email: e; password: p");
    }
}
