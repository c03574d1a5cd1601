//! `debug.*`: just enough to inspect metatables and print a frame-depth
//! traceback. Hooks (`debug.sethook`) and upvalue/local introspection are
//! out of scope — this runtime's debug-hook policy isn't part of the
//! protocol surface under test.

use crate::lib_module;
use crate::lib_registry::LibraryModule;
use crate::value::LuaValue;
use crate::vm::error::LuaResult;
use crate::vm::LuaState;

pub fn module() -> LibraryModule {
    lib_module!("debug", {
        "getmetatable" => getmetatable,
        "setmetatable" => setmetatable,
        "traceback" => traceback,
    })
}

fn getmetatable(l: &mut LuaState) -> LuaResult<usize> {
    let v = l.arg(0);
    let meta_id = if let Some(t) = v.as_table_id() {
        l.vm.pool.get_table(t).unwrap().metatable
    } else if let Some(u) = v.as_userdata_id() {
        l.vm.pool.get_userdata(u).unwrap().metatable
    } else {
        l.vm.primitive_metatables[v.type_tag() as usize]
    };
    match meta_id {
        Some(id) => {
            let key = LuaValue::string(l.vm.metamethod_names().metatable);
            let protected = l.vm.pool.get_table(id).unwrap().get(&key);
            l.push(if protected.is_nil() { LuaValue::table(id) } else { protected });
        }
        None => l.push(LuaValue::nil()),
    }
    Ok(1)
}

fn setmetatable(l: &mut LuaState) -> LuaResult<usize> {
    let t = l.check_table(0)?;
    let meta = l.arg(1);
    let meta_id = if meta.is_nil() { None } else { Some(l.check_table(1)?) };
    if let Some(current) = l.vm.pool.get_table(t).unwrap().metatable {
        let key = LuaValue::string(l.vm.metamethod_names().metatable);
        if !l.vm.pool.get_table(current).unwrap().get(&key).is_nil() {
            return Err(l.vm.raise_string("cannot change a protected metatable"));
        }
    }
    l.vm.pool.get_table_mut(t).unwrap().metatable = meta_id;
    l.push(LuaValue::table(t));
    Ok(1)
}

fn traceback(l: &mut LuaState) -> LuaResult<usize> {
    let message = if l.arg_count() > 0 { l.check_string(0).unwrap_or_default() } else { String::new() };
    let mut out = if message.is_empty() { String::from("stack traceback:") } else { format!("{message}\nstack traceback:") };
    let names: Vec<Option<crate::gc::StringId>> = l.vm.current_thread_ref().frames.iter().rev().map(|f| f.proto.name).collect();
    for (depth, name_id) in names.into_iter().enumerate() {
        let name = name_id.and_then(|id| l.vm.pool.get_string(id)).unwrap_or("?").to_string();
        out.push_str(&format!("\n\t[{depth}] in function '{name}'"));
    }
    let id = l.vm.pool.intern_string(&out);
    l.push(LuaValue::string(id));
    Ok(1)
}
