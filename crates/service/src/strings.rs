use std::{ops::Deref, sync::Arc};

use ahash::{HashMap, HashMapExt};

/// Handle to a pooled string.
///
/// Two handles compare equal only when they refer to the same pool entry, so
/// filter evaluation is a pointer comparison rather than a string compare.
#[derive(Debug, Clone)]
pub struct PooledStr(Arc<str>);

impl PartialEq for PooledStr {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for PooledStr {}

impl Deref for PooledStr {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for PooledStr {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

struct Entry {
    text: Arc<str>,
    refs: usize,
}

/// Reference-counted pool of the game and mission type tags.
///
/// Matching is case-insensitive; the first spelling seen is the one kept and
/// reported back to clients.
///
/// ```
/// use master_server_service::strings::StringPool;
///
/// let mut pool = StringPool::new();
///
/// let a = pool.intern("CTF");
/// let b = pool.intern("ctf");
/// assert_eq!(a, b);
/// assert_eq!(&*a, "CTF");
/// assert_eq!(pool.len(), 1);
///
/// pool.release(&a);
/// pool.release(&b);
/// assert_eq!(pool.len(), 0);
/// ```
pub struct StringPool {
    entries: HashMap<String, Entry>,
}

impl Default for StringPool {
    fn default() -> Self {
        Self::new()
    }
}

impl StringPool {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Intern `text`, bumping the reference count of its entry.
    pub fn intern(&mut self, text: &str) -> PooledStr {
        let entry = self
            .entries
            .entry(text.to_ascii_lowercase())
            .or_insert_with(|| Entry {
                text: Arc::from(text),
                refs: 0,
            });

        entry.refs += 1;
        PooledStr(entry.text.clone())
    }

    /// Drop one reference; the entry disappears at zero.
    pub fn release(&mut self, handle: &PooledStr) {
        let key = handle.to_ascii_lowercase();
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.refs -= 1;
            if entry.refs == 0 {
                self.entries.remove(&key);
            }
        }
    }

    /// Look up an existing entry without touching its reference count.
    pub fn lookup(&self, text: &str) -> Option<PooledStr> {
        self.entries
            .get(&text.to_ascii_lowercase())
            .map(|entry| PooledStr(entry.text.clone()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the entry lengths in bytes, used to budget the types response.
    pub fn total_len(&self) -> usize {
        self.entries.values().map(|entry| entry.text.len()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|entry| &*entry.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_differs_between_entries() {
        let mut pool = StringPool::new();

        let ctf = pool.intern("CTF");
        let dm = pool.intern("DM");

        assert_ne!(ctf, dm);
        assert_eq!(pool.lookup("Ctf"), Some(ctf.clone()));
        assert_eq!(pool.lookup("race"), None);
    }

    #[test]
    fn release_restores_the_pool() {
        let mut pool = StringPool::new();
        pool.intern("Flag");
        let before = pool.len();

        let a = pool.intern("CTF");
        let b = pool.intern("CTF");
        pool.release(&a);
        pool.release(&b);

        assert_eq!(pool.len(), before);
        assert_eq!(pool.total_len(), "Flag".len());
    }

    #[test]
    fn lookup_does_not_pin_an_entry() {
        let mut pool = StringPool::new();
        let handle = pool.intern("CTF");
        let _peek = pool.lookup("ctf");

        pool.release(&handle);
        assert!(pool.lookup("CTF").is_none());
    }
}
