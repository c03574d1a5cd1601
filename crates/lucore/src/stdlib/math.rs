//! `math.*`: the arithmetic surface needed to exercise integer/float
//! semantics end to end, not a full numeric library.

use crate::lib_module;
use crate::lib_registry::LibraryModule;
use crate::value::LuaValue;
use crate::vm::error::LuaResult;
use crate::vm::LuaState;

pub fn module() -> LibraryModule {
    lib_module!("math", {
        "floor" => floor,
        "ceil" => ceil,
        "abs" => abs,
        "max" => max,
        "min" => min,
        "sqrt" => sqrt,
        "type" => type_,
        "tointeger" => tointeger,
    })
    .with_value("huge", |_| LuaValue::float(f64::INFINITY))
    .with_value("pi", |_| LuaValue::float(std::f64::consts::PI))
    .with_value("maxinteger", |_| LuaValue::integer(i64::MAX))
    .with_value("mininteger", |_| LuaValue::integer(i64::MIN))
}

fn floor(l: &mut LuaState) -> LuaResult<usize> {
    let v = l.arg(0);
    if let Some(i) = v.as_integer() {
        l.push(LuaValue::integer(i));
    } else {
        let f = v.as_float().ok_or_else(|| l.vm.raise_string("bad argument #1 to 'floor' (number expected)"))?;
        l.push(LuaValue::integer(f.floor() as i64));
    }
    Ok(1)
}

fn ceil(l: &mut LuaState) -> LuaResult<usize> {
    let v = l.arg(0);
    if let Some(i) = v.as_integer() {
        l.push(LuaValue::integer(i));
    } else {
        let f = v.as_float().ok_or_else(|| l.vm.raise_string("bad argument #1 to 'ceil' (number expected)"))?;
        l.push(LuaValue::integer(f.ceil() as i64));
    }
    Ok(1)
}

fn abs(l: &mut LuaState) -> LuaResult<usize> {
    let v = l.arg(0);
    if v.is_integer() {
        l.push(LuaValue::integer(v.as_integer().unwrap().abs()));
    } else {
        let f = v.as_float().ok_or_else(|| l.vm.raise_string("bad argument #1 to 'abs' (number expected)"))?;
        l.push(LuaValue::float(f.abs()));
    }
    Ok(1)
}

fn max(l: &mut LuaState) -> LuaResult<usize> {
    if l.arg_count() == 0 {
        return Err(l.vm.raise_string("bad argument #1 to 'max' (value expected)"));
    }
    let mut best = l.arg(0);
    for i in 1..l.arg_count() {
        let candidate = l.arg(i);
        if candidate.as_float().unwrap_or(f64::NEG_INFINITY) > best.as_float().unwrap_or(f64::NEG_INFINITY) {
            best = candidate;
        }
    }
    l.push(best);
    Ok(1)
}

fn min(l: &mut LuaState) -> LuaResult<usize> {
    if l.arg_count() == 0 {
        return Err(l.vm.raise_string("bad argument #1 to 'min' (value expected)"));
    }
    let mut best = l.arg(0);
    for i in 1..l.arg_count() {
        let candidate = l.arg(i);
        if candidate.as_float().unwrap_or(f64::INFINITY) < best.as_float().unwrap_or(f64::INFINITY) {
            best = candidate;
        }
    }
    l.push(best);
    Ok(1)
}

fn sqrt(l: &mut LuaState) -> LuaResult<usize> {
    let f = l.arg(0).as_float().ok_or_else(|| l.vm.raise_string("bad argument #1 to 'sqrt' (number expected)"))?;
    l.push(LuaValue::float(f.sqrt()));
    Ok(1)
}

fn type_(l: &mut LuaState) -> LuaResult<usize> {
    let v = l.arg(0);
    let name = if v.is_integer() {
        Some("integer")
    } else if v.is_float() {
        Some("float")
    } else {
        None
    };
    match name {
        Some(n) => {
            let id = l.vm.pool.intern_string(n);
            l.push(LuaValue::string(id));
        }
        None => l.push(LuaValue::nil()),
    }
    Ok(1)
}

fn tointeger(l: &mut LuaState) -> LuaResult<usize> {
    match l.arg(0).as_integer() {
        Some(i) => l.push(LuaValue::integer(i)),
        None => l.push(LuaValue::nil()),
    }
    Ok(1)
}
