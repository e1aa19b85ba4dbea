use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Encrypt,
    Decrypt,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Encrypt => "encrypt",
            Operation::Decrypt => "decrypt",
        }
    }
}

/// Snapshot of [`OpsCounter`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpsSnapshot {
    pub encrypt_success: u64,
    pub encrypt_failure: u64,
    pub decrypt_success: u64,
    pub decrypt_failure: u64,
}

/// Counts encryption operations by outcome.
#[derive(Debug, Default)]
pub struct OpsCounter {
    encrypt_success: AtomicU64,
    encrypt_failure: AtomicU64,
    decrypt_success: AtomicU64,
    decrypt_failure: AtomicU64,
}

impl OpsCounter {
    pub fn record(&self, operation: Operation, success: bool) {
        let counter = match (operation, success) {
            (Operation::Encrypt, true) => &self.encrypt_success,
            (Operation::Encrypt, false) => &self.encrypt_failure,
            (Operation::Decrypt, true) => &self.decrypt_success,
            (Operation::Decrypt, false) => &self.decrypt_failure,
        };
        let total = counter.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            target = "metrics",
            action = "encryption.operation",
            operation = operation.as_str(),
            success = success,
            total = total,
            "encryption operation recorded"
        );
    }

    pub fn snapshot(&self) -> OpsSnapshot {
        OpsSnapshot {
            encrypt_success: self.encrypt_success.load(Ordering::Relaxed),
            encrypt_failure: self.encrypt_failure.load(Ordering::Relaxed),
            decrypt_success: self.decrypt_success.load(Ordering::Relaxed),
            decrypt_failure: self.decrypt_failure.load(Ordering::Relaxed),
        }
    }
}
