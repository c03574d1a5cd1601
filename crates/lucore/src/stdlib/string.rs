//! `string.*`: the byte-oriented subset that doesn't require pattern
//! matching (`find`/`match`/`gmatch`/`gsub`) or Lua's number-formatting
//! internals — `len`/`sub`/`upper`/`lower`/`rep`/`reverse`/`byte`/`char` plus
//! a `format` that covers `%s`/`%d`/`%x`/`%f`/`%%` only.

use crate::lib_module;
use crate::lib_registry::LibraryModule;
use crate::value::LuaValue;
use crate::vm::error::LuaResult;
use crate::vm::LuaState;

pub fn module() -> LibraryModule {
    lib_module!("string", {
        "len" => len,
        "sub" => sub,
        "upper" => upper,
        "lower" => lower,
        "rep" => rep,
        "reverse" => reverse,
        "byte" => byte,
        "char" => char_,
        "format" => format,
    })
}

fn resolve_range(len: i64, i: i64, j: i64) -> (i64, i64) {
    let start = if i < 0 { (len + i + 1).max(1) } else { i.max(1) };
    let end = if j < 0 { len + j + 1 } else { j.min(len) };
    (start, end)
}

fn len(l: &mut LuaState) -> LuaResult<usize> {
    let s = l.check_string(0)?;
    l.push(LuaValue::integer(s.len() as i64));
    Ok(1)
}

fn sub(l: &mut LuaState) -> LuaResult<usize> {
    let s = l.check_string(0)?;
    let n = s.len() as i64;
    let i = if l.arg_count() > 1 { l.check_integer(1)? } else { 1 };
    let j = if l.arg_count() > 2 { l.check_integer(2)? } else { -1 };
    let (start, end) = resolve_range(n, i, j);
    let out = if start > end || start > n {
        String::new()
    } else {
        s.as_bytes()[(start - 1) as usize..end as usize].iter().map(|&b| b as char).collect()
    };
    let id = l.vm.pool.intern_string(&out);
    l.push(LuaValue::string(id));
    Ok(1)
}

fn upper(l: &mut LuaState) -> LuaResult<usize> {
    let s = l.check_string(0)?.to_uppercase();
    let id = l.vm.pool.intern_string(&s);
    l.push(LuaValue::string(id));
    Ok(1)
}

fn lower(l: &mut LuaState) -> LuaResult<usize> {
    let s = l.check_string(0)?.to_lowercase();
    let id = l.vm.pool.intern_string(&s);
    l.push(LuaValue::string(id));
    Ok(1)
}

fn rep(l: &mut LuaState) -> LuaResult<usize> {
    let s = l.check_string(0)?;
    let n = l.check_integer(1)?.max(0) as usize;
    let sep = if l.arg_count() > 2 { l.check_string(2)? } else { String::new() };
    let out = if n == 0 {
        String::new()
    } else {
        std::iter::repeat(s.as_str()).take(n).collect::<Vec<_>>().join(&sep)
    };
    let id = l.vm.pool.intern_string(&out);
    l.push(LuaValue::string(id));
    Ok(1)
}

fn reverse(l: &mut LuaState) -> LuaResult<usize> {
    let s = l.check_string(0)?;
    let out: String = s.bytes().rev().map(|b| b as char).collect();
    let id = l.vm.pool.intern_string(&out);
    l.push(LuaValue::string(id));
    Ok(1)
}

fn byte(l: &mut LuaState) -> LuaResult<usize> {
    let s = l.check_string(0)?;
    let n = s.len() as i64;
    let i = if l.arg_count() > 1 { l.check_integer(1)? } else { 1 };
    let j = if l.arg_count() > 2 { l.check_integer(2)? } else { i };
    let (start, end) = resolve_range(n, i, j);
    if start > end || start > n {
        return Ok(0);
    }
    let bytes = s.as_bytes();
    let mut count = 0;
    for idx in start..=end {
        l.push(LuaValue::integer(bytes[(idx - 1) as usize] as i64));
        count += 1;
    }
    Ok(count)
}

fn char_(l: &mut LuaState) -> LuaResult<usize> {
    let mut bytes = Vec::with_capacity(l.arg_count());
    for i in 0..l.arg_count() {
        let code = l.check_integer(i)?;
        if !(0..=255).contains(&code) {
            return Err(l.vm.raise_string(format!("bad argument #{} to 'char' (value out of range)", i + 1)));
        }
        bytes.push(code as u8);
    }
    let s = bytes.iter().map(|&b| b as char).collect::<String>();
    let id = l.vm.pool.intern_string(&s);
    l.push(LuaValue::string(id));
    Ok(1)
}

/// `%s`/`%d`/`%x`/`%f`/`%%` only — no width/precision flags, no `%q`/`%c`.
fn format(l: &mut LuaState) -> LuaResult<usize> {
    let fmt = l.check_string(0)?;
    let mut out = String::with_capacity(fmt.len());
    let mut arg_index = 1;
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('s') => {
                out.push_str(&crate::vm::interp::tostring(l.vm, l.arg(arg_index))?);
                arg_index += 1;
            }
            Some('d') => {
                let n = l.check_integer(arg_index)?;
                out.push_str(&n.to_string());
                arg_index += 1;
            }
            Some('x') => {
                let n = l.check_integer(arg_index)?;
                out.push_str(&format!("{n:x}"));
                arg_index += 1;
            }
            Some('f') => {
                let n = l.arg(arg_index).as_float().unwrap_or(0.0);
                out.push_str(&format!("{n:.6}"));
                arg_index += 1;
            }
            Some(other) => {
                return Err(l.vm.raise_string(format!("invalid conversion '%{other}' to 'format'")));
            }
            None => return Err(l.vm.raise_string("invalid conversion to 'format'")),
        }
    }
    let id = l.vm.pool.intern_string(&out);
    l.push(LuaValue::string(id));
    Ok(1)
}
