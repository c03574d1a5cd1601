//! GC-managed object wrappers: each pairs a `GcHeader` with its payload so
//! the collector can mark/sweep uniformly without payload-specific code.

use crate::closure::{Closure, Upvalue};
use crate::gc::header::GcHeader;
use crate::gc::ids::UpvalueId;
use crate::lua_value::{LuaString, LuaTable, LuaUserdata};
use crate::thread::LuaThread;

pub struct GcString {
    pub header: GcHeader,
    pub data: LuaString,
}

pub struct GcTable {
    pub header: GcHeader,
    pub data: LuaTable,
}

pub struct GcClosure {
    pub header: GcHeader,
    pub data: Closure,
}

pub struct GcUpvalue {
    pub header: GcHeader,
    pub data: Upvalue,
}

pub struct GcUserdata {
    pub header: GcHeader,
    pub data: LuaUserdata,
}

pub struct GcThread {
    pub header: GcHeader,
    pub data: LuaThread,
}

/// Upvalue ids owned directly by a closure (used when walking a closure's
/// children during the mark phase).
pub fn closure_children(c: &Closure) -> &[UpvalueId] {
    &c.upvalues
}
