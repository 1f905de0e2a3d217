//! Scope chain and object model
//!
//! A scope is just an Object entity used as a binding context, chained to
//! its parent through the object's parent field (0 = the root/global
//! object, which lives at offset 0). Name resolution walks that chain;
//! writes always prepend, so the structure is persistent: a Property-ref
//! captured before a write still names the same record afterwards.

use crate::gc::arena::Arena;
use crate::value::{Offset, Type, Value};

impl Arena {
    /// Walk from `scope` through parent links looking for `name`.
    ///
    /// Returns both the owning object and the property record: the owner is
    /// what the append-only assignment model prepends the shadowing record
    /// to.
    pub fn resolve(&self, scope: Offset, name: &[u8]) -> Option<(Offset, Offset)> {
        let mut obj = scope;
        loop {
            if let Some(p) = self.lookup_property(obj, name) {
                return Some((obj, p));
            }
            if obj == 0 {
                return None;
            }
            obj = self.object_parent(obj);
        }
    }

    /// Bind `name` to `val` in `obj`, shadowing any earlier binding.
    ///
    /// A new Property record is always created; if the key already exists
    /// in this object its String entity is reused, so repeated
    /// reassignments churn only 16 bytes each. Returns the new record's
    /// Property-ref, or `None` on arena exhaustion.
    pub fn set_property(&mut self, obj: Offset, name: &[u8], val: Value) -> Option<Value> {
        let key = match self.lookup_property(obj, name) {
            Some(p) => self.property_key(p),
            None => self.create_string(name)?,
        };
        let p = self.create_property(obj, key, val)?;
        Some(Value::new(Type::Property, p as u64))
    }

    /// Follow Property-refs to the stored Value, recursively: a property
    /// may itself hold a Property-ref (indirection through another
    /// binding).
    pub fn deref_property(&self, v: Value) -> Value {
        let mut v = v;
        while v.type_of() == Type::Property {
            v = self.property_value(v.offset());
        }
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena_with_root() -> Arena {
        let mut a = Arena::from_buffer(vec![0; 2048]);
        let root = a.create_object(0).unwrap();
        assert_eq!(root, 0);
        a
    }

    #[test]
    fn test_resolve_walks_parents() {
        let mut a = arena_with_root();
        a.set_property(0, b"g", Value::number(1.0)).unwrap();

        let inner = a.create_object(0).unwrap();
        a.set_property(inner, b"l", Value::number(2.0)).unwrap();

        // Local name found in the inner scope itself.
        let (owner, p) = a.resolve(inner, b"l").unwrap();
        assert_eq!(owner, inner);
        assert_eq!(a.property_value(p).as_number(), 2.0);

        // Outer name found by walking up to the root.
        let (owner, p) = a.resolve(inner, b"g").unwrap();
        assert_eq!(owner, 0);
        assert_eq!(a.property_value(p).as_number(), 1.0);

        assert!(a.resolve(inner, b"missing").is_none());
    }

    #[test]
    fn test_inner_binding_shadows_outer() {
        let mut a = arena_with_root();
        a.set_property(0, b"x", Value::number(1.0)).unwrap();
        let inner = a.create_object(0).unwrap();
        a.set_property(inner, b"x", Value::number(2.0)).unwrap();

        let (owner, p) = a.resolve(inner, b"x").unwrap();
        assert_eq!(owner, inner);
        assert_eq!(a.property_value(p).as_number(), 2.0);
    }

    #[test]
    fn test_set_property_shadows_and_preserves_old_ref() {
        let mut a = arena_with_root();
        let r1 = a.set_property(0, b"k", Value::number(1.0)).unwrap();
        let r2 = a.set_property(0, b"k", Value::number(2.0)).unwrap();

        // New lookup sees the latest write.
        let (_, p) = a.resolve(0, b"k").unwrap();
        assert_eq!(p, r2.offset());

        // The ref captured before the write still reads the old value.
        assert_eq!(a.deref_property(r1).as_number(), 1.0);
        assert_eq!(a.deref_property(r2).as_number(), 2.0);

        // Both records share one key string.
        assert_eq!(a.property_key(r1.offset()), a.property_key(r2.offset()));
    }

    #[test]
    fn test_deref_follows_indirection() {
        let mut a = arena_with_root();
        let inner = a.set_property(0, b"a", Value::number(7.0)).unwrap();
        let outer = a.set_property(0, b"b", inner).unwrap();
        assert_eq!(a.deref_property(outer).as_number(), 7.0);
        // Non-refs pass through untouched.
        assert_eq!(a.deref_property(Value::TRUE), Value::TRUE);
    }
}
