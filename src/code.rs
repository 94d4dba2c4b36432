//! Session code generation
//!
//! Codes are four decimal digits in `1000..=9999`, a space of 9000 codes.
//! With a few hundred live sessions a random draw collides well under 10% of
//! the time, so the retry loop is effectively one or two draws. Past a few
//! thousand concurrent sessions the space gets crowded; the generator then
//! falls back to a linear scan so allocation still terminates, and
//! `RelayConfig::max_sessions` keeps the registry below the space size.

use crate::error::{RelayError, Result};
use rand::Rng;

/// Smallest allocatable code
pub const CODE_MIN: u16 = 1000;

/// Largest allocatable code
pub const CODE_MAX: u16 = 9999;

/// Number of distinct codes
pub const CODE_SPACE: usize = (CODE_MAX - CODE_MIN + 1) as usize;

/// Random draws before falling back to a scan
pub const MAX_ATTEMPTS: usize = 64;

/// Produces session codes not currently held by an active session
#[derive(Debug, Clone)]
pub struct CodeGenerator {
    max_attempts: usize,
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
        }
    }
}

impl CodeGenerator {
    pub fn new(max_attempts: usize) -> Self {
        Self { max_attempts }
    }

    /// Draw a code for which `is_taken` returns false
    pub fn generate<F>(&self, is_taken: F) -> Result<String>
    where
        F: Fn(&str) -> bool,
    {
        let mut rng = rand::thread_rng();

        for _ in 0..self.max_attempts {
            let code = rng.gen_range(CODE_MIN..=CODE_MAX).to_string();
            if !is_taken(&code) {
                return Ok(code);
            }
        }

        // Crowded space: scan from a random offset so codes stay spread out
        let start = rng.gen_range(0..CODE_SPACE);
        (0..CODE_SPACE)
            .map(|i| (CODE_MIN as usize + (start + i) % CODE_SPACE).to_string())
            .find(|code| !is_taken(code))
            .ok_or_else(|| RelayError::Exhausted(format!("all {} codes in use", CODE_SPACE)))
    }

    /// Whether a string is shaped like a code this generator could produce
    pub fn is_valid(code: &str) -> bool {
        code.len() == 4
            && code
                .parse::<u16>()
                .is_ok_and(|n| (CODE_MIN..=CODE_MAX).contains(&n))
    }
}
