//! `typego.scope`/`panic`/`recover` (spec §4.4), ported from the Go
//! implementation's `bridge/intrinsics/scope.go`: a LIFO stack of deferred
//! callables plus an optional active-panic value, restored around a single
//! synchronous call so nesting composes the way Go's native
//! defer/panic/recover does underneath the JS-visible surface.

use std::cell::RefCell;
use std::rc::Rc;

use rquickjs::{Ctx, Exception, Function, Object, Value};

/// `typego.scope(fn)`: calls `fn(defer, recover)`. Every callback pushed via
/// `defer` runs exactly once, in LIFO order, on every exit path (normal
/// return, guest throw treated as a panic, or a `panic(v)` call). If the
/// active panic survives to the end of that run (no `recover()` consumed
/// it), it is re-raised.
pub fn scope<'js>(ctx: Ctx<'js>, callback: Function<'js>) -> rquickjs::Result<Value<'js>> {
    let defers: Rc<RefCell<Vec<Function<'js>>>> = Rc::new(RefCell::new(Vec::new()));
    let active_panic: Rc<RefCell<Option<Value<'js>>>> = Rc::new(RefCell::new(None));

    let defer_fn = {
        let defers = defers.clone();
        Function::new(ctx.clone(), move |cb: Function<'js>| {
            defers.borrow_mut().push(cb);
        })?
    };

    let recover_fn = {
        let active_panic = active_panic.clone();
        let ctx = ctx.clone();
        Function::new(ctx.clone(), move || -> Value<'js> {
            active_panic
                .borrow_mut()
                .take()
                .unwrap_or_else(|| Value::new_undefined(ctx.clone()))
        })?
    };

    let call_result = callback.call::<_, Value<'js>>((defer_fn, recover_fn));

    let normal_result = match call_result {
        Ok(v) => Some(v),
        Err(rquickjs::Error::Exception) => {
            *active_panic.borrow_mut() = Some(ctx.catch());
            None
        }
        Err(e) => return Err(e),
    };

    // Run every deferred callback exactly once, LIFO, regardless of how we
    // got here. A callback that itself throws becomes the new active panic,
    // same as a second `panic()` during unwind in Go.
    let pending: Vec<_> = defers.borrow_mut().drain(..).rev().collect();
    for cb in pending {
        if let Err(rquickjs::Error::Exception) = cb.call::<_, ()>(()) {
            *active_panic.borrow_mut() = Some(ctx.catch());
        }
    }

    if let Some(panic) = active_panic.borrow_mut().take() {
        return Err(ctx.throw(panic));
    }

    Ok(normal_result.unwrap_or_else(|| Value::new_undefined(ctx)))
}

/// `panic(v)`: raises an engine-level exception whose message is
/// `"panic: " + string(v)`.
pub fn panic<'js>(ctx: Ctx<'js>, v: Value<'js>) -> rquickjs::Result<()> {
    let s = display_value(&ctx, &v)?;
    Err(Exception::throw_message(&ctx, &format!("panic: {s}")))
}

fn display_value<'js>(ctx: &Ctx<'js>, v: &Value<'js>) -> rquickjs::Result<String> {
    if let Some(s) = v.as_string() {
        return s.to_string();
    }
    if let Some(json) = ctx.json_stringify(v.clone())? {
        return json.to_string();
    }
    Ok("undefined".to_string())
}

pub fn setup(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let typego: Object = match globals.get("typego") {
        Ok(obj) => obj,
        Err(_) => {
            let obj = Object::new(ctx.clone())?;
            globals.set("typego", obj.clone())?;
            obj
        }
    };
    typego.set("scope", Function::new(ctx.clone(), scope)?)?;
    globals.set("panic", Function::new(ctx.clone(), panic)?)?;
    Ok(())
}
