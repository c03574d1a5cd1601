//! The object pool: one arena per GC object kind, plus the string interner.
//! All heap allocation in the runtime goes through here, never through raw
//! `Rc`/`Box` held by Lua-visible values — everything Lua can reach is
//! addressed by a typed id so the collector can enumerate and sweep it.

use ahash::AHashMap;

use crate::closure::{Closure, Upvalue};
use crate::gc::arena::Arena;
use crate::gc::header::GcHeader;
use crate::gc::ids::{FunctionId, StringId, TableId, ThreadId, UpvalueId, UserdataId};
use crate::gc::object::{GcClosure, GcString, GcTable, GcThread, GcUpvalue, GcUserdata};
use crate::lua_value::{LuaString, LuaTable, LuaUserdata};
use crate::thread::LuaThread;

pub struct GcPool {
    pub strings: Arena<GcString>,
    pub tables: Arena<GcTable>,
    pub closures: Arena<GcClosure>,
    pub upvalues: Arena<GcUpvalue>,
    pub userdata: Arena<GcUserdata>,
    pub threads: Arena<GcThread>,

    /// Interned short strings: equal content always yields the same id, so
    /// `raw_equal` and table-key hashing on strings can compare ids instead
    /// of content.
    interner: AHashMap<smol_str::SmolStr, StringId>,

    /// The collector's "current white" — objects born with this bit are
    /// reachable-by-default until the next cycle flips it.
    pub current_white: bool,
}

impl Default for GcPool {
    fn default() -> Self {
        Self::new()
    }
}

impl GcPool {
    pub fn new() -> Self {
        GcPool {
            strings: Arena::new(),
            tables: Arena::new(),
            closures: Arena::new(),
            upvalues: Arena::new(),
            userdata: Arena::new(),
            threads: Arena::new(),
            interner: AHashMap::new(),
            current_white: true,
        }
    }

    pub fn intern_string(&mut self, s: &str) -> StringId {
        if let Some(id) = self.interner.get(s) {
            return *id;
        }
        let smol = smol_str::SmolStr::new(s);
        let header = GcHeader::new(self.current_white);
        let id = StringId(self.strings.alloc(GcString { header, data: LuaString::new(smol.clone()) }));
        self.interner.insert(smol, id);
        id
    }

    pub fn get_string(&self, id: StringId) -> Option<&str> {
        self.strings.get(id.0).map(|s| s.data.as_str())
    }

    pub fn alloc_table(&mut self, table: LuaTable) -> TableId {
        let header = GcHeader::new(self.current_white);
        TableId(self.tables.alloc(GcTable { header, data: table }))
    }

    pub fn get_table(&self, id: TableId) -> Option<&LuaTable> {
        self.tables.get(id.0).map(|t| &t.data)
    }

    pub fn get_table_mut(&mut self, id: TableId) -> Option<&mut LuaTable> {
        self.tables.get_mut(id.0).map(|t| &mut t.data)
    }

    pub fn alloc_closure(&mut self, closure: Closure) -> FunctionId {
        let header = GcHeader::new(self.current_white);
        FunctionId(self.closures.alloc(GcClosure { header, data: closure }))
    }

    pub fn get_closure(&self, id: FunctionId) -> Option<&Closure> {
        self.closures.get(id.0).map(|c| &c.data)
    }

    pub fn alloc_upvalue(&mut self, upvalue: Upvalue) -> UpvalueId {
        let header = GcHeader::new(self.current_white);
        UpvalueId(self.upvalues.alloc(GcUpvalue { header, data: upvalue }))
    }

    pub fn get_upvalue(&self, id: UpvalueId) -> Option<&Upvalue> {
        self.upvalues.get(id.0).map(|u| &u.data)
    }

    pub fn get_upvalue_mut(&mut self, id: UpvalueId) -> Option<&mut Upvalue> {
        self.upvalues.get_mut(id.0).map(|u| &mut u.data)
    }

    pub fn alloc_userdata(&mut self, userdata: LuaUserdata) -> UserdataId {
        let header = GcHeader::new(self.current_white);
        UserdataId(self.userdata.alloc(GcUserdata { header, data: userdata }))
    }

    pub fn get_userdata(&self, id: UserdataId) -> Option<&LuaUserdata> {
        self.userdata.get(id.0).map(|u| &u.data)
    }

    pub fn get_userdata_mut(&mut self, id: UserdataId) -> Option<&mut LuaUserdata> {
        self.userdata.get_mut(id.0).map(|u| &mut u.data)
    }

    pub fn alloc_thread(&mut self, thread: LuaThread) -> ThreadId {
        let header = GcHeader::new(self.current_white);
        ThreadId(self.threads.alloc(GcThread { header, data: thread }))
    }

    pub fn get_thread(&self, id: ThreadId) -> Option<&LuaThread> {
        self.threads.get(id.0).map(|t| &t.data)
    }

    pub fn get_thread_mut(&mut self, id: ThreadId) -> Option<&mut LuaThread> {
        self.threads.get_mut(id.0).map(|t| &mut t.data)
    }

    /// Total live object count across every arena, the figure the collector
    /// compares against its debt threshold to decide whether to step.
    pub fn live_count(&self) -> usize {
        self.strings.len()
            + self.tables.len()
            + self.closures.len()
            + self.upvalues.len()
            + self.userdata.len()
            + self.threads.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_returns_same_id_for_equal_content() {
        let mut pool = GcPool::new();
        let a = pool.intern_string("hello");
        let b = pool.intern_string("hello");
        let c = pool.intern_string("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn table_alloc_and_free_reuses_slot() {
        let mut pool = GcPool::new();
        let id = pool.alloc_table(LuaTable::new());
        assert!(pool.get_table(id).is_some());
        pool.tables.free(id.0);
        assert!(pool.get_table(id).is_none());
    }
}
