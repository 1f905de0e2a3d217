//! Compacting reclamation
//!
//! Reclamation runs in three passes over the arena:
//! 1. Mark: walk reachable entities from the roots (the scope chain held
//!    in root Values plus any pinned offsets), setting header bit 31.
//!    An object marks its parent and, for each key in its property list,
//!    only the first record: shadowed records reachable through nothing
//!    but the chain stay unmarked and die. A marked property marks its
//!    key string and stored value.
//! 2. Forward: scan the arena in address order building an old→new offset
//!    table for every marked entity, then rewrite every offset field in
//!    place, including the root Values and the pins, and clear the marks.
//!    Next pointers are relinked past dead records while rewriting.
//! 3. Slide: copy surviving entities down in their original relative
//!    order and pull the allocation boundary back.
//!
//! The pass is all-or-nothing: no allocation happens inside it, and every
//! live offset is rewritten consistently or not at all. Pins exist to
//! protect in-flight function bodies' String entities while calls are
//! executing.

use crate::gc::arena::Arena;
use crate::runtime::entity::{MARK_BIT, T_OBJECT, T_PROPERTY, TAG_MASK, entity_size};
use crate::value::{Offset, Type, Value};

/// Outcome of one reclamation pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcStats {
    /// Entities that survived.
    pub live_entities: usize,
    /// Bytes occupied after compaction.
    pub live_bytes: u32,
    /// Bytes returned to the allocator.
    pub reclaimed_bytes: u32,
}

/// Reclaim everything unreachable from `roots` and `pins`, compacting the
/// survivors toward offset 0. Every root Value and pinned offset is
/// rewritten to the survivors' new offsets.
pub fn collect(arena: &mut Arena, roots: &mut [&mut Value], pins: &mut [Offset]) -> GcStats {
    // Pass 1: mark.
    let mut worklist: Vec<Offset> = Vec::new();
    for root in roots.iter() {
        push_value_edge(&mut worklist, **root);
    }
    worklist.extend_from_slice(pins);
    // Offset 0 is the root scope object; it is live whenever any scope is.
    worklist.push(0);
    while let Some(off) = worklist.pop() {
        mark_entity(arena, off, &mut worklist);
    }

    // Pass 2a: build the forwarding table in address order.
    let old_brk = arena.brk();
    let mut forwarding: Vec<(Offset, Offset)> = Vec::new();
    let mut new_off: Offset = 0;
    let mut off: Offset = 0;
    while off < old_brk {
        let header = arena.get_u32(off);
        let size = entity_size(header);
        if header & MARK_BIT != 0 {
            forwarding.push((off, new_off));
            new_off += size;
        }
        off += size;
    }

    // Pass 2b: rewrite offsets in place and clear marks.
    for &(old, _) in &forwarding {
        rewrite_entity(arena, old, &forwarding);
    }
    for root in roots.iter_mut() {
        **root = remap_value(**root, &forwarding);
    }
    for pin in pins.iter_mut() {
        *pin = remap(*pin, &forwarding);
    }

    // Pass 3: slide survivors down.
    for &(old, new) in &forwarding {
        if old != new {
            let size = entity_size(arena.get_u32(old));
            arena.copy_within(old, new, size);
        }
    }
    arena.set_brk(new_off);

    GcStats {
        live_entities: forwarding.len(),
        live_bytes: new_off,
        reclaimed_bytes: old_brk - new_off,
    }
}

/// Queue the entity an arena-ref Value points at, if any.
fn push_value_edge(worklist: &mut Vec<Offset>, v: Value) {
    match v.type_of() {
        Type::Object | Type::Property | Type::String => worklist.push(v.offset()),
        Type::Function if !v.is_native_function() => worklist.push(v.offset()),
        _ => {}
    }
}

fn mark_entity(arena: &mut Arena, off: Offset, worklist: &mut Vec<Offset>) {
    let header = arena.get_u32(off);
    if header & MARK_BIT != 0 {
        return;
    }
    arena.put_u32(off, header | MARK_BIT);
    match header & TAG_MASK {
        T_OBJECT => {
            worklist.push(arena.object_parent(off));
            mark_property_list(arena, header & !(TAG_MASK | MARK_BIT), worklist);
        }
        T_PROPERTY => {
            // Reached through a Property-ref held outside the list. The
            // owning object's walk decides which chain records stay live,
            // so the next edge is not followed here.
            worklist.push(arena.property_key(off));
            push_value_edge(worklist, arena.property_value(off));
        }
        _ => {} // strings are leaves
    }
}

/// Mark the visible binding for each key in one object's property list.
/// Records with equal keys share one key String (reassignment reuses it),
/// so key identity is offset identity.
fn mark_property_list(arena: &mut Arena, mut cur: Offset, worklist: &mut Vec<Offset>) {
    let mut seen: Vec<Offset> = Vec::new();
    while cur != 0 {
        let header = arena.get_u32(cur);
        let key = arena.property_key(cur);
        if !seen.contains(&key) {
            seen.push(key);
            if header & MARK_BIT == 0 {
                arena.put_u32(cur, header | MARK_BIT);
                worklist.push(key);
                push_value_edge(worklist, arena.property_value(cur));
            }
        }
        cur = header & !(TAG_MASK | MARK_BIT);
    }
}

/// New offset of the first surviving record in a property chain. Dead
/// records are read at their old addresses; they are never rewritten, so
/// their next fields still hold old offsets.
fn next_live(arena: &Arena, mut off: Offset, forwarding: &[(Offset, Offset)]) -> Offset {
    while off != 0 {
        if let Ok(i) = forwarding.binary_search_by_key(&off, |e| e.0) {
            return forwarding[i].1;
        }
        off = arena.get_u32(off) & !(TAG_MASK | MARK_BIT);
    }
    0
}

/// New offset of a live entity. Offset 0 (the root object) always maps to
/// itself.
fn remap(off: Offset, forwarding: &[(Offset, Offset)]) -> Offset {
    if off == 0 {
        return 0;
    }
    match forwarding.binary_search_by_key(&off, |e| e.0) {
        Ok(i) => forwarding[i].1,
        // A live entity referenced an unmarked one: the invariant is
        // broken and continuing would corrupt the arena.
        Err(_) => unreachable!("reclaimer: dangling offset {off}"),
    }
}

fn remap_value(v: Value, forwarding: &[(Offset, Offset)]) -> Value {
    match v.type_of() {
        Type::Object | Type::Property | Type::String => {
            Value::new(v.type_of(), remap(v.offset(), forwarding) as u64)
        }
        Type::Function if !v.is_native_function() => {
            Value::function(remap(v.offset(), forwarding))
        }
        _ => v,
    }
}

/// Rewrite one live entity's offset fields using the forwarding table and
/// drop its mark bit. Runs before the slide, so fields are read and
/// written at the old location.
fn rewrite_entity(arena: &mut Arena, off: Offset, forwarding: &[(Offset, Offset)]) {
    let header = arena.get_u32(off) & !MARK_BIT;
    match header & TAG_MASK {
        T_OBJECT => {
            let first = next_live(arena, header & !TAG_MASK, forwarding);
            arena.put_u32(off, first | T_OBJECT);
            let parent = arena.object_parent(off);
            arena.put_u32(off + 4, remap(parent, forwarding));
        }
        T_PROPERTY => {
            let next = next_live(arena, header & !TAG_MASK, forwarding);
            arena.put_u32(off, next | T_PROPERTY);
            let key = arena.property_key(off);
            arena.put_u32(off + 4, remap(key, forwarding));
            let val = remap_value(arena.property_value(off), forwarding);
            arena.put_u64(off + 8, val.bits());
        }
        _ => arena.put_u32(off, header), // string: just clear the mark
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena_with_root() -> Arena {
        let mut a = Arena::from_buffer(vec![0; 4096]);
        a.create_object(0).unwrap();
        a
    }

    #[test]
    fn test_collect_empty_root() {
        let mut a = arena_with_root();
        let mut scope = Value::new(Type::Object, 0);
        let stats = collect(&mut a, &mut [&mut scope], &mut []);
        assert_eq!(stats.live_entities, 1);
        assert_eq!(a.brk(), 8);
        assert_eq!(scope.offset(), 0);
    }

    #[test]
    fn test_unreferenced_entities_are_reclaimed() {
        let mut a = arena_with_root();
        a.create_string(b"garbage").unwrap();
        a.create_object(0).unwrap(); // unrooted object
        let before = a.brk();

        let mut scope = Value::new(Type::Object, 0);
        let stats = collect(&mut a, &mut [&mut scope], &mut []);
        assert_eq!(stats.live_entities, 1);
        assert_eq!(stats.reclaimed_bytes, before - 8);
    }

    #[test]
    fn test_live_graph_survives_and_offsets_rewrite() {
        let mut a = arena_with_root();
        a.create_string(b"doomed filler").unwrap(); // garbage before live data
        a.set_property(0, b"name", Value::number(5.0)).unwrap();
        let s = a.create_string(b"payload").unwrap();
        a.set_property(0, b"s", Value::new(Type::String, s as u64))
            .unwrap();

        let mut scope = Value::new(Type::Object, 0);
        collect(&mut a, &mut [&mut scope], &mut []);

        // Everything is still reachable by name after relocation.
        let (_, p) = a.resolve(0, b"name").unwrap();
        assert_eq!(a.property_value(p).as_number(), 5.0);
        let (_, p) = a.resolve(0, b"s").unwrap();
        let sv = a.property_value(p);
        assert_eq!(a.string_bytes(sv.offset()), b"payload");
    }

    #[test]
    fn test_shadowed_property_is_garbage() {
        let mut a = arena_with_root();
        a.set_property(0, b"x", Value::number(1.0)).unwrap();
        a.set_property(0, b"x", Value::number(2.0)).unwrap();

        let mut scope = Value::new(Type::Object, 0);
        let stats = collect(&mut a, &mut [&mut scope], &mut []);

        // root + one property + one key string: the shadowed record died.
        assert_eq!(stats.live_entities, 3);
        let (_, p) = a.resolve(0, b"x").unwrap();
        assert_eq!(a.property_value(p).as_number(), 2.0);
    }

    #[test]
    fn test_reassignment_churn_is_reclaimed() {
        let mut a = arena_with_root();
        for i in 0..16 {
            a.set_property(0, b"v", Value::number(i as f64)).unwrap();
        }

        let mut scope = Value::new(Type::Object, 0);
        let stats = collect(&mut a, &mut [&mut scope], &mut []);

        // root + the winning record + its key string, however long the
        // shadow chain grew.
        assert_eq!(stats.live_entities, 3);
        let (_, p) = a.resolve(0, b"v").unwrap();
        assert_eq!(a.property_value(p).as_number(), 15.0);
        assert!(a.next_property(p).is_none());
    }

    #[test]
    fn test_shadowed_record_survives_through_held_ref() {
        let mut a = arena_with_root();
        let r1 = a.set_property(0, b"x", Value::number(1.0)).unwrap();
        a.set_property(0, b"x", Value::number(2.0)).unwrap();

        let mut scope = Value::new(Type::Object, 0);
        let mut held = r1;
        collect(&mut a, &mut [&mut scope, &mut held], &mut []);

        // The held record is still readable through its rewritten ref,
        // while lookups keep seeing the shadowing head.
        assert_eq!(a.deref_property(held).as_number(), 1.0);
        let (_, p) = a.resolve(0, b"x").unwrap();
        assert_eq!(a.property_value(p).as_number(), 2.0);
    }

    #[test]
    fn test_idempotent_when_nothing_allocated() {
        let mut a = arena_with_root();
        a.set_property(0, b"a", Value::number(1.0)).unwrap();
        let inner = a.create_object(0).unwrap();
        a.set_property(inner, b"b", Value::number(2.0)).unwrap();

        let mut scope = Value::new(Type::Object, inner as u64);
        let first = collect(&mut a, &mut [&mut scope], &mut []);
        let brk_after_first = a.brk();
        let scope_after_first = scope;

        let second = collect(&mut a, &mut [&mut scope], &mut []);
        assert_eq!(first.live_entities, second.live_entities);
        assert_eq!(second.reclaimed_bytes, 0);
        assert_eq!(a.brk(), brk_after_first);
        assert_eq!(scope, scope_after_first);
    }

    #[test]
    fn test_pin_protects_unreferenced_string() {
        let mut a = arena_with_root();
        let s = a.create_string(b"in-flight body").unwrap();

        let mut scope = Value::new(Type::Object, 0);
        let mut pins = [s];
        collect(&mut a, &mut [&mut scope], &mut pins);

        // The string survived and the pin tracked its relocation.
        assert_eq!(a.string_bytes(pins[0]), b"in-flight body");
    }

    #[test]
    fn test_scope_chain_roots_parents() {
        let mut a = arena_with_root();
        a.set_property(0, b"g", Value::number(9.0)).unwrap();
        let mid = a.create_object(0).unwrap();
        let leaf = a.create_object(mid).unwrap();

        let mut scope = Value::new(Type::Object, leaf as u64);
        collect(&mut a, &mut [&mut scope], &mut []);

        // Rooting the leaf keeps the whole chain, including globals.
        let (_, p) = a.resolve(scope.offset(), b"g").unwrap();
        assert_eq!(a.property_value(p).as_number(), 9.0);
    }
}
