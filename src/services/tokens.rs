//! Secret and label generation

use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;

const LABEL_LENGTH: usize = 12;

/// Source of new key secrets
///
/// Implementations must not block. Collisions are not checked for; the
/// store's uniqueness constraint on secrets is the only backstop.
pub trait TokenGenerator: Send + Sync {
    fn new_secret(&self) -> String;
}

/// Fixed-length `[a-zA-Z0-9]` secrets drawn from the OS random source
#[derive(Debug, Clone)]
pub struct AlphanumericTokenGenerator {
    length: usize,
}

impl AlphanumericTokenGenerator {
    pub fn new(length: usize) -> Self {
        Self { length }
    }
}

impl TokenGenerator for AlphanumericTokenGenerator {
    fn new_secret(&self) -> String {
        OsRng
            .sample_iter(&Alphanumeric)
            .take(self.length)
            .map(char::from)
            .collect()
    }
}

/// Display name such as `key_QWERTYUIOPAS`
pub fn random_label(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..LABEL_LENGTH)
        .map(|_| char::from(rng.gen_range(b'A'..=b'Z')))
        .collect();
    format!("{}_{}", prefix, suffix)
}
