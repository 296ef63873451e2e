//! Format rules shared by the adapters, the orchestrator and the checkout
//! controllers. Every check is local; none of them touches the network.

use chrono::{Datelike, Utc};

pub const PHONE_DIGITS: usize = 9;
pub const OTP_DIGITS: usize = 6;
const CARD_MIN_DIGITS: usize = 13;
const CARD_MAX_DIGITS: usize = 19;
const MOVIE_ID_MAX_LEN: usize = 64;

fn is_digits(value: &str, len: impl Fn(usize) -> bool) -> bool {
    len(value.len()) && value.bytes().all(|b| b.is_ascii_digit())
}

pub fn check_email(email: &str) -> Result<(), &'static str> {
    let email = email.trim();
    if email.is_empty() {
        return Err("email is required");
    }
    if email.chars().any(char::is_whitespace) {
        return Err("email must not contain spaces");
    }
    let Some((local, domain)) = email.split_once('@') else {
        return Err("email must contain @");
    };
    let domain_ok = domain.contains('.')
        && !domain.contains('@')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..");
    if local.is_empty() || !domain_ok {
        return Err("email is not well-formed");
    }
    Ok(())
}

/// Catalog ids are slugs; anything else never reaches the content API.
pub fn check_movie_id(raw: &str) -> Result<(), &'static str> {
    if raw.is_empty() || raw.len() > MOVIE_ID_MAX_LEN {
        return Err("movie id must be 1 to 64 characters");
    }
    if !raw
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err("movie id may only contain letters, digits, '-' and '_'");
    }
    Ok(())
}

/// Strips spaces and returns the bare card number.
pub fn check_card_number(raw: &str) -> Result<String, &'static str> {
    let digits: String = raw.chars().filter(|c| *c != ' ').collect();
    if digits.is_empty() {
        return Err("card number is required");
    }
    if !is_digits(&digits, |n| (CARD_MIN_DIGITS..=CARD_MAX_DIGITS).contains(&n)) {
        return Err("card number must be 13 to 19 digits");
    }
    if !luhn_valid(&digits) {
        return Err("card number is not valid");
    }
    Ok(digits)
}

/// Mod-10 checksum over an all-digit string.
fn luhn_valid(digits: &str) -> bool {
    let sum: u32 = digits
        .bytes()
        .rev()
        .map(|b| u32::from(b - b'0'))
        .enumerate()
        .map(|(i, d)| match (i % 2, d * 2) {
            (0, _) => d,
            (_, doubled) if doubled > 9 => doubled - 9,
            (_, doubled) => doubled,
        })
        .sum();
    sum % 10 == 0
}

pub fn check_expiry_month(raw: &str) -> Result<u8, &'static str> {
    let raw = raw.trim();
    if !is_digits(raw, |n| n == 2) {
        return Err("expiry month must be MM");
    }
    match raw.parse::<u8>() {
        Ok(month @ 1..=12) => Ok(month),
        _ => Err("expiry month must be between 01 and 12"),
    }
}

/// Accepts `YY` or `YYYY` and returns the four-digit year.
pub fn check_expiry_year(raw: &str) -> Result<u16, &'static str> {
    let raw = raw.trim();
    if !is_digits(raw, |n| n == 2 || n == 4) {
        return Err("expiry year must be YY");
    }
    let year: u16 = raw.parse().map_err(|_| "expiry year must be YY")?;
    Ok(if raw.len() == 2 { 2000 + year } else { year })
}

/// Month and year together: the card must not be expired.
pub fn check_expiry(month: &str, year: &str) -> Result<(u8, u16), &'static str> {
    let month = check_expiry_month(month)?;
    let year = check_expiry_year(year)?;
    let today = Utc::now().date_naive();
    let current = (today.year() as u16, today.month() as u8);
    if (year, month) < current {
        return Err("card has expired");
    }
    Ok((month, year))
}

/// Splits a single `MM/YY` form field into its two parts.
pub fn split_expiry(raw: &str) -> Result<(&str, &str), &'static str> {
    raw.trim()
        .split_once('/')
        .map(|(m, y)| (m.trim(), y.trim()))
        .ok_or("expiry must be MM/YY")
}

pub fn check_cvv(raw: &str) -> Result<(), &'static str> {
    if is_digits(raw.trim(), |n| n == 3 || n == 4) {
        Ok(())
    } else {
        Err("security code must be 3 or 4 digits")
    }
}

pub fn check_phone(raw: &str) -> Result<(), &'static str> {
    if is_digits(raw, |n| n == PHONE_DIGITS) {
        Ok(())
    } else {
        Err("phone must be exactly 9 digits")
    }
}

pub fn check_otp(raw: &str) -> Result<(), &'static str> {
    if is_digits(raw, |n| n == OTP_DIGITS) {
        Ok(())
    } else {
        Err("approval code must be exactly 6 digits")
    }
}
