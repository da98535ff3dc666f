use rquickjs::{Exception, Result, Value};

/// Extracts a human-readable message from a caught panic payload, for
/// reporting through `Engine::on_error` without re-panicking.
pub fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Converts a JavaScript value to a byte vector.
/// The value can be a String, or a Uint8Array
pub fn as_bytes(key: Value) -> Result<Vec<u8>> {
    // TODO: implement ArrayBuffer, DataView and other TypedArray's

    if let Some(txt) = key.as_string() {
        return Ok(txt.to_string()?.as_bytes().to_vec());
    }

    if let Some(obj) = key.as_object()
        && let Some(array) = obj.as_typed_array::<u8>()
    {
        return Ok(array.as_bytes().unwrap().to_vec());
    };

    Err(Exception::throw_type(
        key.ctx(),
        "Expected a String or Uint8Array",
    ))
}
