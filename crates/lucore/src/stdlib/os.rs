//! `os.*`: wall-clock/CPU-time queries only. `os.date`/`os.execute` and
//! friends need locale/shell surface this runtime has no business owning.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::lib_module;
use crate::lib_registry::LibraryModule;
use crate::value::LuaValue;
use crate::vm::error::LuaResult;
use crate::vm::LuaState;

pub fn module() -> LibraryModule {
    lib_module!("os", {
        "time" => time,
        "clock" => clock,
    })
}

fn time(l: &mut LuaState) -> LuaResult<usize> {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
    l.push(LuaValue::integer(secs));
    Ok(1)
}

fn clock(l: &mut LuaState) -> LuaResult<usize> {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0);
    l.push(LuaValue::float(secs));
    Ok(1)
}
