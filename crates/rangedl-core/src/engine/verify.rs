//! Post-merge integrity hooks
//!
//! A verifier sees every merged chunk in file order and gets the final say
//! on whether the file is accepted.

use crate::error::RangedlError;
use sha2::{Digest, Sha256};

/// Incremental check run over the merged output
pub trait MergeVerifier: Send {
    /// Feed the next merged chunk
    fn update(&mut self, chunk: &[u8]);

    /// Accept or reject the merged file
    fn finish(self: Box<Self>) -> Result<(), RangedlError>;
}

/// Compares the SHA-256 of the merged file against a known digest
pub struct Sha256Verifier {
    hasher: Sha256,
    expected: String,
}

impl Sha256Verifier {
    /// `expected` is a hex digest; case is ignored
    pub fn new(expected: impl Into<String>) -> Self {
        Self {
            hasher: Sha256::new(),
            expected: expected.into().trim().to_ascii_lowercase(),
        }
    }
}

impl MergeVerifier for Sha256Verifier {
    fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    fn finish(self: Box<Self>) -> Result<(), RangedlError> {
        let actual = hex::encode(self.hasher.finalize());
        if actual == self.expected {
            Ok(())
        } else {
            Err(RangedlError::ChecksumMismatch {
                expected: self.expected,
                actual,
            })
        }
    }
}
