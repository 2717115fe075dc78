// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Subject grammar shared by publishers and subscribers.
//!
//! Subjects are dot separated tokens. Patterns may use `*` to match exactly
//! one token and a trailing `>` to match one or more tokens.

use std::fmt::{Display, Formatter};

use crate::errors::BusError;

pub const SEPARATOR: char = '.';
pub const WILDCARD_SINGLE: &str = "*";
pub const WILDCARD_TAIL: &str = ">";

/// A single token of a subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Token {
    Literal(String),
    Single,
    Tail,
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Literal(s) => write!(f, "{}", s),
            Token::Single => write!(f, "{}", WILDCARD_SINGLE),
            Token::Tail => write!(f, "{}", WILDCARD_TAIL),
        }
    }
}

/// Check that a value can be used as one literal token.
pub fn validate_token(token: &str) -> Result<(), String> {
    if token.is_empty() {
        return Err("empty token".to_string());
    }
    if token.contains(SEPARATOR) {
        return Err(format!("token '{}' contains the '{}' separator", token, SEPARATOR));
    }
    if token == WILDCARD_SINGLE || token == WILDCARD_TAIL {
        return Err(format!("token '{}' is a wildcard", token));
    }
    if token.chars().any(char::is_whitespace) {
        return Err(format!("token '{}' contains whitespace", token));
    }
    Ok(())
}

/// Validate a concrete subject, i.e. one that can be published to.
pub fn validate_subject(subject: &str) -> Result<(), BusError> {
    for token in subject.split(SEPARATOR) {
        validate_token(token).map_err(|reason| BusError::InvalidSubject {
            subject: subject.to_string(),
            reason,
        })?;
    }
    Ok(())
}

/// Split a pattern into tokens, checking wildcard placement.
pub fn tokenize(pattern: &str) -> Result<Vec<Token>, BusError> {
    let invalid = |reason: String| BusError::InvalidPattern {
        pattern: pattern.to_string(),
        reason,
    };

    let parts: Vec<&str> = pattern.split(SEPARATOR).collect();
    let last = parts.len() - 1;

    let mut tokens = Vec::with_capacity(parts.len());
    for (i, part) in parts.iter().enumerate() {
        let token = match *part {
            WILDCARD_SINGLE => Token::Single,
            WILDCARD_TAIL if i == last => Token::Tail,
            WILDCARD_TAIL => return Err(invalid("'>' must be the last token".to_string())),
            literal => {
                validate_token(literal).map_err(invalid)?;
                Token::Literal(literal.to_string())
            }
        };
        tokens.push(token);
    }

    Ok(tokens)
}

/// A parsed subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pattern {
    raw: String,
    tokens: Vec<Token>,
}

impl Pattern {
    pub fn parse(pattern: &str) -> Result<Self, BusError> {
        Ok(Pattern {
            raw: pattern.to_string(),
            tokens: tokenize(pattern)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Match a concrete subject against this pattern.
    pub fn matches(&self, subject: &str) -> bool {
        let parts: Vec<&str> = subject.split(SEPARATOR).collect();

        let mut i = 0;
        for token in &self.tokens {
            match token {
                // one or more remaining tokens
                Token::Tail => return i < parts.len(),
                Token::Single => {
                    if i >= parts.len() {
                        return false;
                    }
                }
                Token::Literal(lit) => {
                    if i >= parts.len() || parts[i] != lit {
                        return false;
                    }
                }
            }
            i += 1;
        }

        i == parts.len()
    }
}

impl Display for Pattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}
