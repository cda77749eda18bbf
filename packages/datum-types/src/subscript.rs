//! Subscripts: opaque keys into container slots and struct fields.

use bytes::Bytes;

/// An owned subscript - an opaque byte key.
///
/// Backed by `Bytes`, which is reference-counted and supports zero-copy
/// slicing. No validation is performed here; the store validates a subscript
/// against the declared key type of the datum it addresses.
///
/// Integer keys use their decimal ASCII form, so `Subscript::from(5i64)` is
/// `b"5"`. Struct fields are addressed by their decimal field index.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Subscript(Bytes);

impl Subscript {
    /// Wrap raw key bytes.
    pub fn new(bytes: Bytes) -> Self {
        Subscript(bytes)
    }

    /// Copy a key out of a byte slice.
    pub fn copy_from_slice(bytes: &[u8]) -> Self {
        Subscript(Bytes::copy_from_slice(bytes))
    }

    /// The key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The key as shared `Bytes`.
    pub fn to_bytes(&self) -> Bytes {
        self.0.clone()
    }

    /// Length of the key in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the zero-length key.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The key as UTF-8, if it is.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    /// Parse the key as a decimal integer.
    ///
    /// Only the canonical spelling produced by `Subscript::from(i64)` is
    /// accepted: no sign on positives, no leading zeros, no `-0`.
    pub fn as_i64(&self) -> Option<i64> {
        let n: i64 = self.as_str()?.parse().ok()?;
        (Subscript::from(n) == *self).then_some(n)
    }

    /// Parse the key as a struct field index.
    ///
    /// Like [`Subscript::as_i64`], but non-negative only.
    pub fn as_field_index(&self) -> Option<usize> {
        self.as_i64().and_then(|n| usize::try_from(n).ok())
    }
}

impl From<i64> for Subscript {
    fn from(key: i64) -> Self {
        Subscript(Bytes::from(key.to_string()))
    }
}

impl From<&str> for Subscript {
    fn from(key: &str) -> Self {
        Subscript(Bytes::copy_from_slice(key.as_bytes()))
    }
}

impl From<String> for Subscript {
    fn from(key: String) -> Self {
        Subscript(Bytes::from(key))
    }
}

impl From<Bytes> for Subscript {
    fn from(key: Bytes) -> Self {
        Subscript(key)
    }
}

impl From<Vec<u8>> for Subscript {
    fn from(key: Vec<u8>) -> Self {
        Subscript(Bytes::from(key))
    }
}

impl std::fmt::Debug for Subscript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.as_str() {
            Some(s) => write!(f, "Subscript({:?})", s),
            None => write!(f, "Subscript({:?})", self.0),
        }
    }
}

impl std::fmt::Display for Subscript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Try to display as UTF-8, fall back to escaped bytes
        match self.as_str() {
            Some(s) => write!(f, "[\"{}\"]", s),
            None => write!(f, "[{:?}]", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_subscripts_are_decimal() {
        let s = Subscript::from(-12i64);
        assert_eq!(s.as_bytes(), b"-12");
        assert_eq!(s.as_i64(), Some(-12));
    }

    #[test]
    fn field_index_rejects_signs_and_junk() {
        assert_eq!(Subscript::from("3").as_field_index(), Some(3));
        assert_eq!(Subscript::from("-1").as_field_index(), None);
        assert_eq!(Subscript::from("+1").as_field_index(), None);
        assert_eq!(Subscript::from("").as_field_index(), None);
        assert_eq!(Subscript::from("x").as_field_index(), None);
    }

    #[test]
    fn only_canonical_integers_parse() {
        assert_eq!(Subscript::from("5").as_i64(), Some(5));
        assert_eq!(Subscript::from("0").as_i64(), Some(0));
        assert_eq!(Subscript::from("05").as_i64(), None);
        assert_eq!(Subscript::from("+5").as_i64(), None);
        assert_eq!(Subscript::from("-0").as_i64(), None);
        assert_eq!(Subscript::from(" 5").as_i64(), None);

        assert_eq!(Subscript::from("0").as_field_index(), Some(0));
        assert_eq!(Subscript::from("00").as_field_index(), None);
        assert_eq!(Subscript::from("01").as_field_index(), None);
    }

    #[test]
    fn ordering_is_bytewise() {
        let mut keys = vec![Subscript::from("b"), Subscript::from("a"), Subscript::from("ab")];
        keys.sort();
        assert_eq!(keys, crate::str_subscripts(&["a", "ab", "b"]));
    }

    #[test]
    fn display_falls_back_for_binary_keys() {
        let s = Subscript::from(vec![0xff, 0x00]);
        assert!(s.as_str().is_none());
        assert!(format!("{}", s).starts_with('['));
        assert_eq!(format!("{}", Subscript::from("k")), "[\"k\"]");
    }
}
