//! Entity records in the arena
//!
//! Three record kinds share the address space, each starting with a u32
//! header whose low two bits carry the kind (matching the first three
//! [`Type`](crate::value::Type) variants) and whose bit 31 is reserved for
//! the reclaimer's mark:
//!
//! ```text
//! Object:   [first_prop|0: u32] [parent: u32]
//! Property: [next_prop|1: u32]  [key_str: u32] [value: u64]
//! String:   [(len_with_nul<<2)|2: u32] [bytes... NUL] (padded to 4)
//! ```
//!
//! Offsets grow monotonically as entities are appended; only the reclaimer
//! reorders them. Property lists are append-only: a write prepends a new
//! record and rewrites the object's head, so offsets captured by earlier
//! lookups stay valid (the shadowed record becomes garbage).

use crate::gc::arena::{Arena, align4};
use crate::value::{Offset, Value};

/// Low-bit entity tags. The arena never allocates a fourth kind.
pub const T_OBJECT: u32 = 0;
pub const T_PROPERTY: u32 = 1;
pub const T_STRING: u32 = 2;

/// Mask selecting the entity tag of a header.
pub const TAG_MASK: u32 = 3;

/// Reclaimer mark, kept out of the way of both tag and payload.
pub const MARK_BIT: u32 = 1 << 31;

pub const OBJECT_SIZE: u32 = 8;
pub const PROPERTY_SIZE: u32 = 16;

/// Size in bytes of the entity whose (unmarked) header is `header`.
pub fn entity_size(header: u32) -> u32 {
    let header = header & !MARK_BIT;
    match header & TAG_MASK {
        T_OBJECT => OBJECT_SIZE,
        T_PROPERTY => PROPERTY_SIZE,
        _ => 4 + align4(header >> 2),
    }
}

impl Arena {
    /// Append an Object entity. `parent` 0 chains to the root scope.
    pub fn create_object(&mut self, parent: Offset) -> Option<Offset> {
        let off = self.alloc(OBJECT_SIZE)?;
        self.put_u32(off, T_OBJECT); // empty property list
        self.put_u32(off + 4, parent);
        Some(off)
    }

    /// Append a String entity; content is NUL-terminated in the arena.
    pub fn create_string(&mut self, bytes: &[u8]) -> Option<Offset> {
        let stored = bytes.len() as u32 + 1;
        let off = self.alloc(4 + stored)?;
        self.put_u32(off, (stored << 2) | T_STRING);
        self.put_bytes(off + 4, bytes);
        // NUL-terminate and clear the alignment padding; the space may hold
        // stale bytes after a compaction.
        let pad = align4(4 + stored) - 4 - bytes.len() as u32;
        self.put_bytes(off + 4 + bytes.len() as u32, &[0u8; 4][..pad as usize]);
        Some(off)
    }

    /// Prepend a Property record to `obj`'s list. The old head (if any)
    /// becomes this record's next pointer; existing records are never
    /// touched.
    pub fn create_property(&mut self, obj: Offset, key_str: Offset, val: Value) -> Option<Offset> {
        let off = self.alloc(PROPERTY_SIZE)?;
        let first = self.get_u32(obj) & !TAG_MASK;
        self.put_u32(off, first | T_PROPERTY);
        self.put_u32(off + 4, key_str);
        self.put_u64(off + 8, val.bits());
        self.put_u32(obj, off | T_OBJECT);
        Some(off)
    }

    /// Content bytes of a String entity, without the NUL terminator.
    pub fn string_bytes(&self, str_off: Offset) -> &[u8] {
        let header = self.get_u32(str_off) & !MARK_BIT;
        debug_assert_eq!(header & TAG_MASK, T_STRING);
        let len = (header >> 2) - 1;
        self.bytes(str_off + 4, len)
    }

    /// Offset of the first property of `obj`, or `None` for an empty list.
    #[inline]
    pub fn first_property(&self, obj: Offset) -> Option<Offset> {
        let p = self.get_u32(obj) & !(TAG_MASK | MARK_BIT);
        (p != 0).then_some(p)
    }

    /// Next property in the same object's list.
    #[inline]
    pub fn next_property(&self, prop: Offset) -> Option<Offset> {
        let p = self.get_u32(prop) & !(TAG_MASK | MARK_BIT);
        (p != 0).then_some(p)
    }

    /// Key String offset of a Property record.
    #[inline]
    pub fn property_key(&self, prop: Offset) -> Offset {
        self.get_u32(prop + 4)
    }

    /// Stored Value of a Property record.
    #[inline]
    pub fn property_value(&self, prop: Offset) -> Value {
        Value::from_bits(self.get_u64(prop + 8))
    }

    /// Linear scan of `obj`'s own property list (parents are not
    /// consulted). The most recently written record wins, consistent with
    /// prepend-on-write shadowing. O(properties); fine for small scripts.
    pub fn lookup_property(&self, obj: Offset, key: &[u8]) -> Option<Offset> {
        let mut cur = self.first_property(obj);
        while let Some(p) = cur {
            if self.string_bytes(self.property_key(p)) == key {
                return Some(p);
            }
            cur = self.next_property(p);
        }
        None
    }

    /// Parent object offset (0 = root).
    #[inline]
    pub fn object_parent(&self, obj: Offset) -> Offset {
        self.get_u32(obj + 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Type;

    fn arena() -> Arena {
        Arena::from_buffer(vec![0; 1024])
    }

    #[test]
    fn test_entity_size() {
        assert_eq!(entity_size(T_OBJECT), 8);
        assert_eq!(entity_size(T_PROPERTY), 16);
        // "hi" + NUL = 3 stored bytes, padded to 4
        assert_eq!(entity_size((3 << 2) | T_STRING), 8);
        // mark bit is ignored
        assert_eq!(entity_size(MARK_BIT | T_PROPERTY), 16);
    }

    #[test]
    fn test_object_layout() {
        let mut a = arena();
        let root = a.create_object(0).unwrap();
        assert_eq!(root, 0);
        assert_eq!(a.first_property(root), None);
        assert_eq!(a.object_parent(root), 0);

        let child = a.create_object(root).unwrap();
        assert_eq!(a.object_parent(child), root);
    }

    #[test]
    fn test_string_round_trip() {
        let mut a = arena();
        let s = a.create_string(b"hello").unwrap();
        assert_eq!(a.string_bytes(s), b"hello");
        // NUL terminator sits right after the content
        assert_eq!(a.bytes(s + 4, 6)[5], 0);

        let empty = a.create_string(b"").unwrap();
        assert_eq!(a.string_bytes(empty), b"");
    }

    #[test]
    fn test_property_prepend_and_lookup() {
        let mut a = arena();
        let obj = a.create_object(0).unwrap();
        let k1 = a.create_string(b"x").unwrap();
        let k2 = a.create_string(b"y").unwrap();

        let p1 = a.create_property(obj, k1, Value::number(1.0)).unwrap();
        let p2 = a.create_property(obj, k2, Value::number(2.0)).unwrap();

        // Most recent write is the head of the list.
        assert_eq!(a.first_property(obj), Some(p2));
        assert_eq!(a.next_property(p2), Some(p1));
        assert_eq!(a.next_property(p1), None);

        assert_eq!(a.lookup_property(obj, b"x"), Some(p1));
        assert_eq!(a.lookup_property(obj, b"y"), Some(p2));
        assert_eq!(a.lookup_property(obj, b"z"), None);
        assert_eq!(a.property_value(p1).as_number(), 1.0);
    }

    #[test]
    fn test_shadowing_keeps_old_record() {
        let mut a = arena();
        let obj = a.create_object(0).unwrap();
        let key = a.create_string(b"v").unwrap();

        let old = a.create_property(obj, key, Value::number(1.0)).unwrap();
        let new = a.create_property(obj, key, Value::number(2.0)).unwrap();

        // Lookup sees the shadowing record; the old one is intact behind it.
        assert_eq!(a.lookup_property(obj, b"v"), Some(new));
        assert_eq!(a.property_value(old).as_number(), 1.0);
        assert_eq!(a.property_value(new).as_number(), 2.0);
    }

    #[test]
    fn test_ref_value_in_property() {
        let mut a = arena();
        let obj = a.create_object(0).unwrap();
        let key = a.create_string(b"s").unwrap();
        let s = a.create_string(b"text").unwrap();
        let p = a
            .create_property(obj, key, Value::new(Type::String, s as u64))
            .unwrap();
        let v = a.property_value(p);
        assert_eq!(v.type_of(), Type::String);
        assert_eq!(a.string_bytes(v.offset()), b"text");
    }
}
