// File: src/gc.rs
//
// Tri-colour mark-sweep garbage collector for every heap-allocated runtime
// value (strings, functions, closures, upvalues, classes, instances, bound
// methods). The collector is precise, non-moving, and non-generational;
// allocation is its only trigger (§4.6).
//
// Objects live in an arena (`Heap`) addressed by `ObjRef`, a small `Copy`
// handle that stands in for the raw, `next`-pointer-threaded pointers the
// C implementation uses. Sweeping walks the arena directly instead of a
// linked list; the semantics are identical.

use std::mem;

use crate::object::Obj;
use crate::value::Value;

/// Handle to a heap object. Cheap to copy, compared by identity (the index
/// itself), which is exactly the identity comparison §3 requires for
/// non-string objects (and for strings, combined with interning, for
/// structural equality too).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(pub(crate) usize);

enum Slot {
    Live { obj: Obj, marked: bool },
    Free { next_free: Option<usize> },
}

/// Grow factor applied to `next_gc` after every collection (§4.6).
const HEAP_GROW_FACTOR: usize = 2;
/// Collections never trigger below this many live bytes, mirroring clox's
/// generous default so tiny scripts don't collect on every allocation.
const INITIAL_NEXT_GC: usize = 1024 * 1024;

/// The GC heap: an arena of objects plus the bookkeeping that decides when
/// to collect. Every allocation funnels through [`Heap::allocate`], which is
/// the only place `bytes_allocated` grows.
pub struct Heap {
    slots: Vec<Slot>,
    free_list: Option<usize>,
    pub bytes_allocated: usize,
    pub next_gc: usize,
    /// Forces a collection on every growing allocation; used by tests that
    /// want to prove an in-flight value survives the most aggressive GC
    /// schedule possible (§8: "Verifiable by running with stress-GC").
    pub stress_test: bool,
    gray_stack: Vec<ObjRef>,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            slots: Vec::new(),
            free_list: None,
            bytes_allocated: 0,
            next_gc: INITIAL_NEXT_GC,
            stress_test: false,
            gray_stack: Vec::new(),
        }
    }

    /// Allocates `obj` on the heap and returns its handle. Charges its
    /// estimated size against `bytes_allocated`; callers that need a
    /// collection to run *before* this allocation (so a not-yet-rooted
    /// value never gets invented on the gray stack) should collect ahead of
    /// calling this directly — see the `*_push`-around-allocation rule in
    /// §4.6's invariants, applied at each call site in `vm.rs`/`compiler.rs`.
    pub fn allocate(&mut self, obj: Obj) -> ObjRef {
        self.bytes_allocated += obj.approx_size();
        let index = match self.free_list {
            Some(free) => {
                let next_free = match &self.slots[free] {
                    Slot::Free { next_free } => *next_free,
                    Slot::Live { .. } => unreachable!("free list points at a live slot"),
                };
                self.free_list = next_free;
                self.slots[free] = Slot::Live { obj, marked: false };
                free
            }
            None => {
                self.slots.push(Slot::Live { obj, marked: false });
                self.slots.len() - 1
            }
        };
        ObjRef(index)
    }

    pub fn get(&self, ptr: ObjRef) -> &Obj {
        match &self.slots[ptr.0] {
            Slot::Live { obj, .. } => obj,
            Slot::Free { .. } => panic!("dangling ObjRef {:?}: slot was swept", ptr),
        }
    }

    pub fn get_mut(&mut self, ptr: ObjRef) -> &mut Obj {
        match &mut self.slots[ptr.0] {
            Slot::Live { obj, .. } => obj,
            Slot::Free { .. } => panic!("dangling ObjRef {:?}: slot was swept", ptr),
        }
    }

    pub fn should_collect(&self) -> bool {
        self.stress_test || self.bytes_allocated > self.next_gc
    }

    fn mark_object(&mut self, ptr: ObjRef) {
        let already_marked = match &mut self.slots[ptr.0] {
            Slot::Live { marked, .. } => mem::replace(marked, true),
            Slot::Free { .. } => return,
        };
        if !already_marked {
            self.gray_stack.push(ptr);
        }
    }

    pub fn mark_value(&mut self, value: &Value) {
        if let Value::Obj(ptr) = value {
            self.mark_object(*ptr);
        }
    }

    /// Blackens every gray object until the worklist is empty, i.e. drains
    /// to fixpoint before any sweeping happens — this is what keeps the
    /// tri-colour invariant (no black→white edge) intact in a stop-the-world
    /// collector (§4.6).
    fn trace_references(&mut self) {
        while let Some(ptr) = self.gray_stack.pop() {
            let refs = self.get(ptr).child_refs();
            for value in refs {
                self.mark_value(&value);
            }
        }
    }

    /// Removes every heap object that survived this collection's mark phase
    /// neither through a root nor through tracing, freeing its slot for
    /// reuse and clearing the mark bit on survivors.
    ///
    /// Returns the set of freed string `ObjRef`s so the VM can prune them
    /// from the intern table *before* their storage is actually reclaimed —
    /// required by §4.6's "remove white interned strings" step. Sweeping the
    /// intern table after this call would read freed slots.
    pub fn sweep(&mut self, white_strings: &mut Vec<ObjRef>) {
        for index in 0..self.slots.len() {
            match &self.slots[index] {
                Slot::Live { obj, marked: false } => {
                    if obj.is_string() {
                        white_strings.push(ObjRef(index));
                    }
                    self.bytes_allocated = self.bytes_allocated.saturating_sub(obj.approx_size());
                    self.slots[index] = Slot::Free {
                        next_free: self.free_list,
                    };
                    self.free_list = Some(index);
                }
                Slot::Live { marked: true, .. } => {
                    if let Slot::Live { marked, .. } = &mut self.slots[index] {
                        *marked = false;
                    }
                }
                Slot::Free { .. } => {}
            }
        }
    }

    /// Runs one full mark-trace-sweep cycle. `mark_roots` is supplied by the
    /// VM (and, during an in-flight compile, the compiler) because only they
    /// know what's currently reachable from the stack/globals/call frames.
    pub fn collect<F: FnOnce(&mut Heap)>(&mut self, mark_roots: F) -> Vec<ObjRef> {
        mark_roots(self);
        self.trace_references();
        let mut white_strings = Vec::new();
        self.sweep(&mut white_strings);
        self.next_gc = self.bytes_allocated.max(1) * HEAP_GROW_FACTOR;
        white_strings
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Obj, ObjString};

    #[test]
    fn freed_slots_are_reused() {
        let mut heap = Heap::new();
        let a = heap.allocate(Obj::String(ObjString::new("a".into())));
        let mut white = Vec::new();
        // Nothing marked => everything is swept.
        heap.sweep(&mut white);
        assert_eq!(white, vec![a]);
        let b = heap.allocate(Obj::String(ObjString::new("b".into())));
        assert_eq!(b, a, "freed slot should be recycled");
    }

    #[test]
    fn marked_object_survives_sweep() {
        let mut heap = Heap::new();
        let a = heap.allocate(Obj::String(ObjString::new("kept".into())));
        heap.collect(|h| h.mark_object(a));
        assert_eq!(heap.get(a).as_string().unwrap().value, "kept");
    }
}
