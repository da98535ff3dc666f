use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use rquickjs::object::Property;
use rquickjs::{Ctx, Exception, Function, Object, String as JsString, Value};

use crate::utils::as_bytes;

/// `String.bytesFrom(data, encoding)`: decode `data` (a string or
/// `Uint8Array`) into a UTF-8 string, given its source encoding. Ported from
/// the teacher's `base64url`-only version and generalized to the encodings
/// `original_source/bridge/polyfills/encoding.go` supports, per
/// `SPEC_FULL.md` §10.3.
#[rquickjs::function(rename = "bytesFrom")]
fn bytes_from<'js>(
    ctx: Ctx<'js>,
    data: Value<'js>,
    encoding: String,
) -> rquickjs::Result<JsString<'js>> {
    let mut data = as_bytes(data)?;

    let decoded = match encoding.as_str() {
        "utf8" => data,
        "base64" => STANDARD
            .decode(&data)
            .map_err(|e| Exception::throw_internal(&ctx, &e.to_string()))?,
        "base64url" => {
            while data.last() == Some(&b'=') {
                data.pop();
            }
            STANDARD_NO_PAD
                .decode(&data)
                .or_else(|_| URL_SAFE_NO_PAD.decode(&data))
                .map_err(|e| Exception::throw_internal(&ctx, &e.to_string()))?
        }
        "hex" => hex::decode(&data).map_err(|e| Exception::throw_internal(&ctx, &e.to_string()))?,
        other => {
            return Err(Exception::throw_type(
                &ctx,
                &format!("Unsupported encoding {other:?}, expected one of utf8/base64/base64url/hex"),
            ))
        }
    };

    JsString::from_str(ctx, &String::from_utf8_lossy(&decoded))
}

pub fn setup(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let bytes_from = Function::new(ctx.clone(), bytes_from)?;
    let string: Object = globals.get("String")?;
    string.prop("bytesFrom", Property::from(bytes_from))?;
    Ok(())
}
