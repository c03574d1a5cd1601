//! `table.*`: the sequence-manipulation subset built on `LuaTable`'s own
//! `get`/`set`/`length` — no array/hash-part awareness leaks in here.

use crate::lib_module;
use crate::lib_registry::LibraryModule;
use crate::value::LuaValue;
use crate::vm::error::LuaResult;
use crate::vm::LuaState;

pub fn module() -> LibraryModule {
    lib_module!("table", {
        "insert" => insert,
        "remove" => remove,
        "concat" => concat,
        "unpack" => unpack,
        "pack" => pack,
    })
}

fn insert(l: &mut LuaState) -> LuaResult<usize> {
    let t = l.check_table(0)?;
    let len = l.vm.pool.get_table(t).unwrap().length();
    match l.arg_count() {
        2 => {
            let value = l.arg(1);
            l.vm.pool.get_table_mut(t).unwrap().set(LuaValue::integer(len + 1), value);
            Ok(0)
        }
        3 => {
            let pos = l.check_integer(1)?;
            if pos < 1 || pos > len + 1 {
                return Err(l.vm.raise_string("bad argument #2 to 'insert' (position out of bounds)"));
            }
            let value = l.arg(2);
            let table = l.vm.pool.get_table_mut(t).unwrap();
            let mut i = len + 1;
            while i > pos {
                let prev = table.get(&LuaValue::integer(i - 1));
                table.set(LuaValue::integer(i), prev);
                i -= 1;
            }
            table.set(LuaValue::integer(pos), value);
            Ok(0)
        }
        _ => Err(l.vm.raise_string("wrong number of arguments to 'insert'")),
    }
}

fn remove(l: &mut LuaState) -> LuaResult<usize> {
    let t = l.check_table(0)?;
    let len = l.vm.pool.get_table(t).unwrap().length();
    let pos = if l.arg_count() > 1 { l.check_integer(1)? } else { len };
    if len == 0 {
        l.push(LuaValue::nil());
        return Ok(1);
    }
    if pos < 1 || pos > len + 1 {
        return Err(l.vm.raise_string("bad argument #1 to 'remove' (position out of bounds)"));
    }
    let table = l.vm.pool.get_table_mut(t).unwrap();
    let removed = table.get(&LuaValue::integer(pos));
    let mut i = pos;
    while i < len {
        let next = table.get(&LuaValue::integer(i + 1));
        table.set(LuaValue::integer(i), next);
        i += 1;
    }
    table.set(LuaValue::integer(len), LuaValue::nil());
    l.push(removed);
    Ok(1)
}

fn concat(l: &mut LuaState) -> LuaResult<usize> {
    let t = l.check_table(0)?;
    let sep = if l.arg_count() > 1 { l.check_string(1)? } else { String::new() };
    let len = l.vm.pool.get_table(t).unwrap().length();
    let i = if l.arg_count() > 2 { l.check_integer(2)? } else { 1 };
    let j = if l.arg_count() > 3 { l.check_integer(3)? } else { len };

    let mut parts = Vec::new();
    for idx in i..=j {
        let v = l.vm.pool.get_table(t).unwrap().get(&LuaValue::integer(idx));
        let s = match v.as_string_id() {
            Some(id) => l.vm.pool.get_string(id).unwrap_or("").to_string(),
            None if v.is_number() => crate::vm::interp::tostring(l.vm, v)?,
            None => {
                return Err(l.vm.raise_string(format!("invalid value (at index {idx}) in table for 'concat'")));
            }
        };
        parts.push(s);
    }
    let joined = parts.join(&sep);
    let id = l.vm.pool.intern_string(&joined);
    l.push(LuaValue::string(id));
    Ok(1)
}

fn unpack(l: &mut LuaState) -> LuaResult<usize> {
    let t = l.check_table(0)?;
    let len = l.vm.pool.get_table(t).unwrap().length();
    let i = if l.arg_count() > 1 { l.check_integer(1)? } else { 1 };
    let j = if l.arg_count() > 2 { l.check_integer(2)? } else { len };
    let mut count = 0;
    for idx in i..=j {
        l.push(l.vm.pool.get_table(t).unwrap().get(&LuaValue::integer(idx)));
        count += 1;
    }
    Ok(count)
}

fn pack(l: &mut LuaState) -> LuaResult<usize> {
    let n = l.arg_count();
    let table = crate::lua_value::LuaTable::with_capacity(n, 1);
    let id = l.vm.pool.alloc_table(table);
    for i in 0..n {
        let v = l.arg(i);
        l.vm.pool.get_table_mut(id).unwrap().set(LuaValue::integer(i as i64 + 1), v);
    }
    let n_key = l.vm.pool.intern_string("n");
    l.vm.pool.get_table_mut(id).unwrap().set(LuaValue::string(n_key), LuaValue::integer(n as i64));
    l.push(LuaValue::table(id));
    Ok(1)
}
