//! Credential pool
//!
//! Ordered set of interchangeable upstream API keys with a shared rotation cursor

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Rotating pool of upstream credentials
///
/// The cursor is shared by every request going through the pool, so
/// concurrent calls interleave their draws. Each [`Rotation`] still visits
/// every credential exactly once.
pub struct CredentialPool {
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl CredentialPool {
    /// Create a pool; blank entries are dropped
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys = keys
            .into_iter()
            .map(Into::into)
            .map(|key: String| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .collect();

        Self {
            keys,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Credential at `index`
    pub fn key(&self, index: usize) -> Option<&str> {
        self.keys.get(index).map(String::as_str)
    }

    /// Start a rotation covering the whole pool once
    pub fn rotation(&self) -> Rotation<'_> {
        Rotation {
            pool: self,
            tried: vec![false; self.keys.len()],
            remaining: self.keys.len(),
        }
    }

    fn draw(&self) -> usize {
        self.cursor.fetch_add(1, Ordering::Relaxed) % self.keys.len()
    }
}

impl fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPool")
            .field("keys", &format_args!("[{} redacted]", self.keys.len()))
            .field("cursor", &self.cursor.load(Ordering::Relaxed))
            .finish()
    }
}

/// One pass over the pool, yielding `(index, key)` pairs
///
/// Every draw advances the shared cursor. A drawn index already used by this
/// rotation (possible when other requests moved the cursor meanwhile) is
/// replaced by the next untried index.
pub struct Rotation<'a> {
    pool: &'a CredentialPool,
    tried: Vec<bool>,
    remaining: usize,
}

impl<'a> Iterator for Rotation<'a> {
    type Item = (usize, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let len = self.tried.len();
        let drawn = self.pool.draw();
        let index = (0..len)
            .map(|offset| (drawn + offset) % len)
            .find(|candidate| !self.tried[*candidate])?;

        self.tried[index] = true;
        self.remaining -= 1;
        Some((index, self.pool.keys[index].as_str()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}
