/// Order-preserving key builder.
///
/// Integers are written big-endian and strings are NUL-terminated, so the
/// byte order of built keys matches the logical order of their fields and a
/// key built from a leading subset of fields is a prefix of every key that
/// extends it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Key(Vec<u8>);

impl Key {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(mut self, v: u8) -> Self {
        self.0.push(v);
        self
    }

    pub fn u32(mut self, v: u32) -> Self {
        self.0.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u64(mut self, v: u64) -> Self {
        self.0.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn bytes(mut self, v: &[u8]) -> Self {
        self.0.extend_from_slice(v);
        self
    }

    /// Append a string. Strings must not contain NUL.
    pub fn str(mut self, v: &str) -> Self {
        self.0.extend_from_slice(v.as_bytes());
        self.0.push(0);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_sort_numerically() {
        let a = Key::new().u64(2).build();
        let b = Key::new().u64(10).build();
        let c = Key::new().u64(256).build();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn leading_fields_form_a_prefix() {
        let prefix = Key::new().u32(7).bytes(&[1, 2]).build();
        let full = Key::new().u32(7).bytes(&[1, 2]).str("name").build();
        assert!(full.starts_with(&prefix));
    }

    #[test]
    fn string_terminator_keeps_prefixes_apart() {
        let ab = Key::new().str("ab").build();
        let abc = Key::new().str("abc").build();
        assert!(!abc.starts_with(&ab));
        assert!(ab < abc);
    }
}
