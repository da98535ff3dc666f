//! `TextEncoder`/`TextDecoder`/`Buffer` (spec §4.4): web-compat constructors
//! whose `encode`/`decode` delegate to host UTF-8 conversion, and
//! `Buffer.from`/`Buffer.alloc` producing typed-array views over
//! host-allocated byte arrays.

use rquickjs::{Ctx, Function, Object, TypedArray, Value};

use crate::utils::as_bytes;

fn text_encoder_encode<'js>(ctx: Ctx<'js>, text: String) -> rquickjs::Result<TypedArray<'js, u8>> {
    TypedArray::new(ctx, text.into_bytes())
}

fn text_decoder_decode(data: Value<'_>) -> rquickjs::Result<String> {
    let bytes = as_bytes(data)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn buffer_from<'js>(ctx: Ctx<'js>, data: Value<'js>) -> rquickjs::Result<TypedArray<'js, u8>> {
    let bytes = as_bytes(data)?;
    TypedArray::new(ctx, bytes)
}

fn buffer_alloc<'js>(ctx: Ctx<'js>, size: usize) -> rquickjs::Result<TypedArray<'js, u8>> {
    TypedArray::new(ctx, vec![0u8; size])
}

pub fn setup(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let text_encoder = Object::new(ctx.clone())?;
    text_encoder.set("encode", Function::new(ctx.clone(), text_encoder_encode)?)?;
    globals.set("TextEncoder", text_encoder)?;

    let text_decoder = Object::new(ctx.clone())?;
    text_decoder.set("decode", Function::new(ctx.clone(), text_decoder_decode)?)?;
    globals.set("TextDecoder", text_decoder)?;

    let buffer = Object::new(ctx.clone())?;
    buffer.set("from", Function::new(ctx.clone(), buffer_from)?)?;
    buffer.set("alloc", Function::new(ctx.clone(), buffer_alloc)?)?;
    globals.set("Buffer", buffer)?;

    Ok(())
}
