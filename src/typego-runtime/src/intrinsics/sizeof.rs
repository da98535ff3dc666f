//! `sizeof` (spec §4.4) and the supplemented `typego.memoryStats()`
//! (`SPEC_FULL.md` §10.3, ported from the Go implementation's
//! `bridge/memory.go` `goMemory.stats()`). Both are best-effort,
//! informational-only estimates, never used for correctness.

use rquickjs::{Ctx, Function, Object, Type, Value};

/// Best-effort estimate of the resident bytes of `v`, using type-based
/// constants and slice capacity the way the Go original walks `reflect.Kind`.
pub fn sizeof(v: Value<'_>) -> usize {
    match v.type_of() {
        Type::Undefined | Type::Null => 0,
        Type::Bool => 4,
        Type::Int => 8,
        Type::Float => 8,
        Type::String => v
            .as_string()
            .and_then(|s| s.to_string().ok())
            .map(|s| s.len())
            .unwrap_or(0),
        Type::Array => {
            if let Some(arr) = v.as_array() {
                arr.iter::<Value>()
                    .filter_map(|v| v.ok())
                    .map(sizeof)
                    .sum::<usize>()
                    + 24
            } else {
                24
            }
        }
        Type::Object => {
            if let Some(obj) = v.as_object() {
                if let Some(typed) = obj.as_typed_array::<u8>() {
                    return typed.as_bytes().map(|b| b.len()).unwrap_or(0) + 16;
                }
                obj.keys::<String>()
                    .filter_map(|k| k.ok())
                    .map(|k| k.len() + 16)
                    .sum()
            } else {
                16
            }
        }
        Type::Function => 32,
        _ => 8,
    }
}

pub fn setup(ctx: &Ctx<'_>, stats: impl Fn() -> (u64, u64, u64) + 'static) -> rquickjs::Result<()> {
    let globals = ctx.globals();
    globals.set("sizeof", Function::new(ctx.clone(), sizeof)?)?;

    let typego: Object = globals.get("typego")?;
    let memory_stats = Function::new(ctx.clone(), move |ctx: Ctx<'_>| -> rquickjs::Result<Object<'_>> {
        let (allocated, resident, gc_cycles) = stats();
        let obj = Object::new(ctx)?;
        obj.set("allocated", allocated)?;
        obj.set("resident", resident)?;
        obj.set("gcCycles", gc_cycles)?;
        Ok(obj)
    })?;
    typego.set("memoryStats", memory_stats)?;
    Ok(())
}
