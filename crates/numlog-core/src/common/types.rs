//! # Token Types and Line Classification
//!
//! This module defines the wire-level vocabulary shared by every component of
//! the server: the [`Token`] accepted from clients, the reasons a line can be
//! rejected ([`TokenError`]), and the classification of a complete input line
//! ([`Input`]).
//!
//! ## Overview
//!
//! - A [`Token`] is exactly [`TOKEN_LEN`] ASCII decimal digits. Leading zeros
//!   are significant: `"000000042"` and `"42"` are different inputs, and only
//!   the former is a token.
//! - [`Input::classify`] replaces exception-driven control flow with an
//!   explicit outcome that the connection loop can `match` on.
//!
//! ## Constants
//!
//! - [`TOKEN_LEN`] - Number of digits in a token
//! - [`TERMINATE_COMMAND`] - The literal line requesting server shutdown
//! - [`MAX_LINE_BYTES`] - Upper bound on buffered bytes while waiting for a
//!   line terminator

use core::{fmt, str::FromStr};

/// Number of ASCII digits in every valid token.
pub const TOKEN_LEN: usize = 9;

/// The exact, case-sensitive line that asks the server to shut down.
pub const TERMINATE_COMMAND: &str = "terminate";

/// Maximum number of bytes buffered for a single line before the client is
/// considered misbehaving.
pub const MAX_LINE_BYTES: usize = 1024;

/// A validated 9-digit token.
///
/// Stored as its integer value; the textual form is always rendered with
/// [`TOKEN_LEN`] digits, so leading zeros round-trip exactly. Every 9-digit
/// value is below `i32::MAX`, which keeps the token inside the signed 32-bit
/// range clients were promised.
///
/// Construct one with [`Token::parse`] or [`str::parse`].
///
/// ```
/// use numlog_core::types::Token;
///
/// let token: Token = "000987658".parse().unwrap();
/// assert_eq!(token.to_string(), "000987658");
/// assert_eq!(token.value(), 987_658);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(u32);

impl Token {
    /// Parses `line` into a token, returning why it was rejected otherwise.
    ///
    /// # Errors
    ///
    /// - [`TokenError::WrongLength`] if `line` is not exactly [`TOKEN_LEN`]
    ///   bytes long.
    /// - [`TokenError::NonDigit`] if any byte is not `0..=9`. Signs are not
    ///   digits, so `"+12345678"` is rejected.
    /// - [`TokenError::OutOfRange`] if the value does not fit an `i32`.
    pub fn parse(line: &str) -> Result<Self, TokenError> {
        let bytes = line.as_bytes();
        if bytes.len() != TOKEN_LEN {
            return Err(TokenError::WrongLength { len: bytes.len() });
        }

        let mut value: u32 = 0;
        for (position, byte) in bytes.iter().enumerate() {
            if !byte.is_ascii_digit() {
                return Err(TokenError::NonDigit { position });
            }
            value = value * 10 + u32::from(byte - b'0');
        }

        if i32::try_from(value).is_err() {
            return Err(TokenError::OutOfRange);
        }

        Ok(Self(value))
    }

    /// Returns the numeric value of the token.
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Builds a token from its numeric value, if it has at most
    /// [`TOKEN_LEN`] digits.
    pub const fn from_value(value: u32) -> Option<Self> {
        if value < 1_000_000_000 {
            Some(Self(value))
        } else {
            None
        }
    }
}

impl FromStr for Token {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0width$}", self.0, width = TOKEN_LEN)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({self})")
    }
}

/// Returns `true` if `line` is an acceptable token.
///
/// Pure predicate; see [`Token::parse`] for the exact rules. The
/// [`TERMINATE_COMMAND`] is *not* a valid token and must be recognised by the
/// caller before validation.
pub fn is_valid(line: &str) -> bool {
    Token::parse(line).is_ok()
}

/// Why a line was refused.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("expected {TOKEN_LEN} characters, got {len}")]
    WrongLength { len: usize },

    #[error("non-digit character at position {position}")]
    NonDigit { position: usize },

    #[error("value does not fit a signed 32-bit integer")]
    OutOfRange,

    #[error("line is not valid UTF-8")]
    NotUtf8,

    #[error("line exceeds {limit} bytes without a terminator")]
    TooLong { limit: usize },
}

/// Classification of one complete, terminator-stripped input line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input {
    /// A valid token.
    Token(Token),
    /// The shutdown command.
    Terminate,
    /// Anything else. The connection that sent it gets closed.
    Invalid(TokenError),
}

impl Input {
    /// Classifies a line. The terminate command is checked before the token
    /// rules.
    pub fn classify(line: &str) -> Self {
        if line == TERMINATE_COMMAND {
            return Self::Terminate;
        }
        match Token::parse(line) {
            Ok(token) => Self::Token(token),
            Err(reason) => Self::Invalid(reason),
        }
    }

    /// Classifies raw line bytes, rejecting anything that is not UTF-8.
    pub fn classify_bytes(line: &[u8]) -> Self {
        match core::str::from_utf8(line) {
            Ok(line) => Self::classify(line),
            Err(_) => Self::Invalid(TokenError::NotUtf8),
        }
    }
}

/// Strips one trailing `\n` and, if present, one `\r` before it.
///
/// Returns `None` when `line` does not end in `\n`, i.e. it is an incomplete
/// line that must never be processed.
pub fn strip_terminator(line: &[u8]) -> Option<&[u8]> {
    let line = line.strip_suffix(b"\n")?;
    Some(line.strip_suffix(b"\r").unwrap_or(line))
}
