//! `make`/`cap`/`copy` (spec §4.4), ported from the Go implementation's
//! `bridge/intrinsics/slices.go` typed-array equivalents.

use rquickjs::{Ctx, Function, Object, Value};

/// `make(ctor, len, cap?)`: constructs a typed array of `cap` elements
/// (defaulting to `len`) and returns a subarray of length `len` when
/// `cap > len`.
pub fn make<'js>(
    ctx: Ctx<'js>,
    ctor: Function<'js>,
    len: usize,
    cap: Option<usize>,
) -> rquickjs::Result<Value<'js>> {
    let cap = cap.unwrap_or(len).max(len);
    let full: Object<'js> = ctor.construct((cap,))?;
    if cap == len {
        return Ok(full.into_value());
    }
    let subarray: Function = full.get("subarray")?;
    subarray.call((0, len))
}

/// `cap(arr)`: `buffer.byteLength / bytes_per_element` for typed arrays,
/// else `arr.length`.
pub fn cap(arr: Object<'_>) -> rquickjs::Result<usize> {
    if let Ok(buffer) = arr.get::<_, Object>("buffer") {
        let byte_length: usize = buffer.get("byteLength").unwrap_or(0);
        let bytes_per_element: usize = arr.get("BYTES_PER_ELEMENT").unwrap_or(1);
        return Ok(byte_length / bytes_per_element.max(1));
    }
    arr.get("length")
}

/// `copy(dst, src)`: copies `min(dst.length, src.length)` elements via
/// `dst.set(src.subarray(0, n))`, returning the count.
pub fn copy<'js>(dst: Object<'js>, src: Object<'js>) -> rquickjs::Result<usize> {
    let dst_len: usize = dst.get("length").unwrap_or(0);
    let src_len: usize = src.get("length").unwrap_or(0);
    let n = dst_len.min(src_len);

    let subarray: Function = src.get("subarray")?;
    let slice: Value = subarray.call((0, n))?;

    let set: Function = dst.get("set")?;
    set.call::<_, ()>((slice,))?;
    Ok(n)
}

pub fn setup(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let globals = ctx.globals();
    globals.set("make", Function::new(ctx.clone(), make)?)?;
    globals.set("cap", Function::new(ctx.clone(), cap)?)?;
    globals.set("copy", Function::new(ctx.clone(), copy)?)?;
    Ok(())
}
