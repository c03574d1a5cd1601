//! Typed indices into the object pool's arenas.
//!
//! Each Lua GC-object kind gets its own newtype so the compiler keeps us from
//! handing a `TableId` to a function expecting a `FunctionId`, even though both
//! are just `u32` indices under the hood.

macro_rules! gc_id {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, PartialOrd, Ord)]
        #[repr(transparent)]
        pub struct $name(pub u32);

        impl $name {
            #[inline(always)]
            pub fn index(self) -> u32 {
                self.0
            }
        }
    };
}

gc_id!(StringId);
gc_id!(TableId);
gc_id!(FunctionId);
gc_id!(UpvalueId);
gc_id!(UserdataId);
gc_id!(ThreadId);

/// Any GC object kind, used by the collector's generic mark/sweep pass to
/// remember what arena a root or gray-list entry belongs to.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum GcRef {
    String(StringId),
    Table(TableId),
    Function(FunctionId),
    Upvalue(UpvalueId),
    Userdata(UserdataId),
    Thread(ThreadId),
}
