//! `ref`/`deref` (spec §4.4), ported from the Go implementation's
//! `bridge/intrinsics/pointers.go`. Also installs the `Ptr` alias
//! (`SPEC_FULL.md` §10.3): the original exposes both a `ref()` function and
//! a `Ptr` constructor over the same boxing logic.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rquickjs::object::Accessor;
use rquickjs::{Ctx, Function, Object, Value};

static NEXT_PTR: AtomicUsize = AtomicUsize::new(1);

/// `ref(v)`: boxes `v` in a fresh host cell, returns a guest object with a
/// read/write `value` accessor and a numeric `ptr` identity. The box lives
/// as long as the guest object referencing it (it's just an `Rc`).
pub fn make_ref<'js>(ctx: Ctx<'js>, v: Value<'js>) -> rquickjs::Result<Object<'js>> {
    let cell = Rc::new(RefCell::new(v));
    let ptr = NEXT_PTR.fetch_add(1, Ordering::Relaxed);

    let obj = Object::new(ctx.clone())?;

    let getter = {
        let cell = cell.clone();
        Function::new(ctx.clone(), move || -> Value<'js> { cell.borrow().clone() })?
    };
    let setter = {
        let cell = cell.clone();
        Function::new(ctx.clone(), move |v: Value<'js>| {
            *cell.borrow_mut() = v;
        })?
    };

    obj.prop("value", Accessor::new(getter, setter))?;
    obj.set("ptr", ptr as f64)?;
    Ok(obj)
}

/// `deref(r)`: returns `r.value`.
pub fn deref<'js>(r: Object<'js>) -> rquickjs::Result<Value<'js>> {
    r.get("value")
}

pub fn setup(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let globals = ctx.globals();
    globals.set("ref", Function::new(ctx.clone(), make_ref)?)?;
    globals.set("deref", Function::new(ctx.clone(), deref)?)?;
    globals.set("Ptr", Function::new(ctx.clone(), make_ref)?)?;
    Ok(())
}
