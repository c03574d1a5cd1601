//! `io.*`: `write`/`read` against stdout/stdin only. File handles, buffering
//! modes, and `io.open` are out of scope — this exists so scripts can print
//! without going through `print`'s tab/newline formatting.

use std::io::Write as _;

use crate::lib_module;
use crate::lib_registry::LibraryModule;
use crate::value::LuaValue;
use crate::vm::error::LuaResult;
use crate::vm::LuaState;

pub fn module() -> LibraryModule {
    lib_module!("io", {
        "write" => write,
        "read" => read,
    })
}

fn write(l: &mut LuaState) -> LuaResult<usize> {
    let mut stdout = std::io::stdout();
    for i in 0..l.arg_count() {
        let v = l.arg(i);
        let text = match v.as_string_id() {
            Some(id) => l.vm.pool.get_string(id).unwrap_or("").to_string(),
            None if v.is_number() => crate::vm::interp::tostring(l.vm, v)?,
            None => return Err(l.vm.raise_string("invalid argument to 'write'")),
        };
        let _ = stdout.write_all(text.as_bytes());
    }
    Ok(0)
}

fn read(l: &mut LuaState) -> LuaResult<usize> {
    let mut line = String::new();
    match std::io::stdin().read_line(&mut line) {
        Ok(0) => l.push(LuaValue::nil()),
        Ok(_) => {
            let trimmed = line.trim_end_matches(['\n', '\r']);
            let id = l.vm.pool.intern_string(trimmed);
            l.push(LuaValue::string(id));
        }
        Err(_) => l.push(LuaValue::nil()),
    }
    Ok(1)
}
