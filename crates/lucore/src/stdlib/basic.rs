//! The functions Lua puts directly into `_G`: type introspection, raw table
//! access, `pairs`/`ipairs`/`next`, and the `pcall`/`xpcall`/`error`/`assert`
//! protected-call family.

use crate::lib_module;
use crate::lib_registry::LibraryModule;
use crate::value::LuaValue;
use crate::vm::call::{call_value, protected_call};
use crate::vm::error::LuaResult;
use crate::vm::{interp, LuaState};

pub fn module() -> LibraryModule {
    lib_module!("_G", {
        "type" => type_,
        "tostring" => tostring,
        "tonumber" => tonumber,
        "rawget" => rawget,
        "rawset" => rawset,
        "rawequal" => rawequal,
        "rawlen" => rawlen,
        "next" => next,
        "pairs" => pairs,
        "ipairs" => ipairs,
        "select" => select,
        "setmetatable" => setmetatable,
        "getmetatable" => getmetatable,
        "assert" => assert_,
        "error" => error_,
        "pcall" => pcall,
        "xpcall" => xpcall,
        "print" => print,
        "collectgarbage" => collectgarbage,
    })
}

fn type_(l: &mut LuaState) -> LuaResult<usize> {
    let name = l.arg(0).type_name();
    let id = l.vm.pool.intern_string(name);
    l.push(LuaValue::string(id));
    Ok(1)
}

fn tostring(l: &mut LuaState) -> LuaResult<usize> {
    let s = interp::tostring(l.vm, l.arg(0))?;
    let id = l.vm.pool.intern_string(&s);
    l.push(LuaValue::string(id));
    Ok(1)
}

fn tonumber(l: &mut LuaState) -> LuaResult<usize> {
    let v = l.arg(0);
    if v.is_number() {
        l.push(v);
        return Ok(1);
    }
    if l.arg_count() > 1 {
        let base = l.check_integer(1)?;
        let s = l.check_string(0)?;
        match i64::from_str_radix(s.trim(), base as u32) {
            Ok(n) => l.push(LuaValue::integer(n)),
            Err(_) => l.push(LuaValue::nil()),
        }
        return Ok(1);
    }
    if let Some(id) = v.as_string_id() {
        let s = l.vm.pool.get_string(id).unwrap_or("").trim().to_string();
        if let Ok(i) = s.parse::<i64>() {
            l.push(LuaValue::integer(i));
        } else if let Ok(f) = s.parse::<f64>() {
            l.push(LuaValue::float(f));
        } else {
            l.push(LuaValue::nil());
        }
        return Ok(1);
    }
    l.push(LuaValue::nil());
    Ok(1)
}

fn rawget(l: &mut LuaState) -> LuaResult<usize> {
    let t = l.check_table(0)?;
    let k = l.arg(1);
    let v = l.vm.pool.get_table(t).unwrap().get(&k);
    l.push(v);
    Ok(1)
}

fn rawset(l: &mut LuaState) -> LuaResult<usize> {
    let t = l.check_table(0)?;
    let k = l.arg(1);
    let v = l.arg(2);
    l.vm.pool.get_table_mut(t).unwrap().set(k, v);
    l.push(LuaValue::table(t));
    Ok(1)
}

fn rawequal(l: &mut LuaState) -> LuaResult<usize> {
    l.push(LuaValue::boolean(l.arg(0).raw_equal(&l.arg(1))));
    Ok(1)
}

fn rawlen(l: &mut LuaState) -> LuaResult<usize> {
    let v = l.arg(0);
    let len = if let Some(t) = v.as_table_id() {
        l.vm.pool.get_table(t).unwrap().length()
    } else if let Some(s) = v.as_string_id() {
        l.vm.pool.get_string(s).map(str::len).unwrap_or(0) as i64
    } else {
        return Err(l.vm.raise_string("table or string expected"));
    };
    l.push(LuaValue::integer(len));
    Ok(1)
}

fn next(l: &mut LuaState) -> LuaResult<usize> {
    let t = l.check_table(0)?;
    let key = l.arg(1);
    match l.vm.pool.get_table(t).unwrap().next_key(&key) {
        Some((k, v)) => {
            l.push(k);
            l.push(v);
            Ok(2)
        }
        None => {
            l.push(LuaValue::nil());
            Ok(1)
        }
    }
}

fn pairs(l: &mut LuaState) -> LuaResult<usize> {
    let t = l.arg(0);
    l.push(LuaValue::native_function(next));
    l.push(t);
    l.push(LuaValue::nil());
    Ok(3)
}

fn inext(l: &mut LuaState) -> LuaResult<usize> {
    let t = l.check_table(0)?;
    let i = l.check_integer(1)? + 1;
    let v = l.vm.pool.get_table(t).unwrap().get(&LuaValue::integer(i));
    if v.is_nil() {
        l.push(LuaValue::nil());
        Ok(1)
    } else {
        l.push(LuaValue::integer(i));
        l.push(v);
        Ok(2)
    }
}

fn ipairs(l: &mut LuaState) -> LuaResult<usize> {
    let t = l.arg(0);
    l.push(LuaValue::native_function(inext));
    l.push(t);
    l.push(LuaValue::integer(0));
    Ok(3)
}

fn select(l: &mut LuaState) -> LuaResult<usize> {
    let sel = l.arg(0);
    if let Some(id) = sel.as_string_id() {
        if l.vm.pool.get_string(id) == Some("#") {
            l.push(LuaValue::integer(l.arg_count() as i64 - 1));
            return Ok(1);
        }
    }
    let n = l.check_integer(0)?;
    let start = if n < 0 { (l.arg_count() as i64 + n).max(1) } else { n } as usize;
    let mut count = 0;
    for i in start..l.arg_count() {
        l.push(l.arg(i));
        count += 1;
    }
    Ok(count)
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

fn assert_(l: &mut LuaState) -> LuaResult<usize> {
    if l.arg(0).is_truthy() {
        let n = l.arg_count();
        for i in 0..n {
            l.push(l.arg(i));
        }
        return Ok(n);
    }
    let message = if l.arg_count() > 1 {
        l.arg(1)
    } else {
        let id = l.vm.pool.intern_string("assertion failed!");
        LuaValue::string(id)
    };
    Err(l.vm.raise_value(message))
}

fn error_(l: &mut LuaState) -> LuaResult<usize> {
    // `level` would select which caller's position to prefix a string message
    // with; without compiler-fed debug info attached to frames, every level
    // raises the message exactly as given rather than a "chunk:line:" prefix.
    let value = l.arg(0);
    Err(l.vm.raise_value(value))
}

fn pcall(l: &mut LuaState) -> LuaResult<usize> {
    let callee = l.arg(0);
    let args = l.args()[1.min(l.arg_count())..].to_vec();
    let (_, results) = protected_call(l.vm, callee, args);
    let n = results.len();
    for v in results {
        l.push(v);
    }
    Ok(n)
}

fn xpcall(l: &mut LuaState) -> LuaResult<usize> {
    let callee = l.arg(0);
    let handler = l.arg(1);
    let args = l.args()[2.min(l.arg_count())..].to_vec();
    match call_value(l.vm, callee, args) {
        Ok(mut results) => {
            results.insert(0, LuaValue::boolean(true));
            let n = results.len();
            for v in results {
                l.push(v);
            }
            Ok(n)
        }
        Err(err) => {
            let handled = call_value(l.vm, handler, vec![err.value]).map(|r| r.into_iter().next().unwrap_or(LuaValue::nil()));
            l.push(LuaValue::boolean(false));
            l.push(handled.unwrap_or(LuaValue::nil()));
            Ok(2)
        }
    }
}

fn print(l: &mut LuaState) -> LuaResult<usize> {
    let mut parts = Vec::with_capacity(l.arg_count());
    for i in 0..l.arg_count() {
        parts.push(interp::tostring(l.vm, l.arg(i))?);
    }
    tracing::info!(target: "lua.print", "{}", parts.join("\t"));
    Ok(0)
}

fn collectgarbage(l: &mut LuaState) -> LuaResult<usize> {
    let opt = l.arg_count() > 0 && l.arg(0).as_string_id().and_then(|id| l.vm.pool.get_string(id)) == Some("count");
    if opt {
        let kb = (l.vm.pool.live_count() * 64) as f64 / 1024.0;
        l.push(LuaValue::float(kb));
        return Ok(1);
    }
    // Driving the collector to completion here would sweep every object the
    // VM hasn't rooted through its own trace callback yet; that wiring lives
    // with whatever owns the root set, not with this stdlib entry point.
    l.push(LuaValue::integer(0));
    Ok(1)
}
