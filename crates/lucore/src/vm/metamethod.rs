//! Metamethod event-name interning and the lookup protocol shared by the
//! interpreter's arithmetic/comparison/indexing opcodes and by native
//! functions that need the same dispatch (`tostring`, `pairs`, ...).

use crate::gc::{GcPool, StringId, TableId};
use crate::value::LuaValue;

macro_rules! events {
    ($($field:ident => $name:expr),* $(,)?) => {
        pub struct MetamethodNames {
            $(pub $field: StringId,)*
        }

        impl MetamethodNames {
            pub fn intern(pool: &mut GcPool) -> Self {
                MetamethodNames {
                    $($field: pool.intern_string($name),)*
                }
            }
        }
    };
}

events! {
    index => "__index",
    newindex => "__newindex",
    call => "__call",
    add => "__add",
    sub => "__sub",
    mul => "__mul",
    div => "__div",
    mod_ => "__mod",
    pow => "__pow",
    unm => "__unm",
    idiv => "__idiv",
    band => "__band",
    bor => "__bor",
    bxor => "__bxor",
    bnot => "__bnot",
    shl => "__shl",
    shr => "__shr",
    concat => "__concat",
    len => "__len",
    eq => "__eq",
    lt => "__lt",
    le => "__le",
    close => "__close",
    gc => "__gc",
    tostring => "__tostring",
    metatable => "__metatable",
    mode => "__mode",
    name => "__name",
    pairs => "__pairs",
}

/// Look up `event` on `value`'s metatable, if it has one. Tables/userdata
/// carry their own metatable field; every other type shares a single
/// per-type metatable stored on the VM (set via `debug.setmetatable` on a
/// primitive, which stock Lua also restricts to a privileged caller).
pub fn lookup(
    value: LuaValue,
    event: StringId,
    pool: &GcPool,
    primitive_metatables: &[Option<TableId>; 9],
) -> Option<LuaValue> {
    let meta_id = if let Some(t) = value.as_table_id() {
        pool.get_table(t).and_then(|t| t.metatable)
    } else if let Some(u) = value.as_userdata_id() {
        pool.get_userdata(u).and_then(|u| u.metatable)
    } else {
        primitive_metatables[value.type_tag() as usize]
    }?;
    let meta = pool.get_table(meta_id)?;
    let key = LuaValue::string(event);
    let result = meta.get(&key);
    (!result.is_nil()).then_some(result)
}
