//! Pre-execution gate

/// Verdict of a [`CodeValidator`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub passed: bool,
    pub reason: Option<String>,
}

impl Validation {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Decides whether code may be executed at all.
pub trait CodeValidator: Send + Sync {
    fn validate(&self, code: &str) -> Validation;
}

/// Rejects blank code and code longer than a configured maximum.
#[derive(Debug, Clone)]
pub struct LengthValidator {
    max_code_length: usize,
}

impl LengthValidator {
    pub fn new(max_code_length: usize) -> Self {
        Self { max_code_length }
    }
}

impl CodeValidator for LengthValidator {
    fn validate(&self, code: &str) -> Validation {
        if code.trim().is_empty() {
            return Validation::fail("code must not be empty");
        }
        if code.len() > self.max_code_length {
            return Validation::fail(format!(
                "code is {} bytes, the maximum is {}",
                code.len(),
                self.max_code_length
            ));
        }
        Validation::pass()
    }
}
