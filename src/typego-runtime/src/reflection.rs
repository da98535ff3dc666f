//! The Reflection Bridge (spec §4.3), ported from the Go implementation's
//! `bridge/core/reflection.go` (`bindValue`/`bindStruct`/`bindMethods`/
//! `convertJSToGo`/`wrapJSCallback`).
//!
//! Go's `reflect` package has no Rust equivalent, so this crate uses the two
//! mechanisms recorded as the Rust mapping decision in `SPEC_FULL.md` §10.4
//! instead of one runtime walker:
//!
//! - `#[rquickjs::class]` for host types the embedder annotates at compile
//!   time (used by `modules::crypto::Hmac`) — the zero-reflection path.
//! - [`Bound`], below, for a host value the embedder only has at runtime:
//!   its exported fields are captured once via a `serde_json` round trip
//!   (standing in for the field-walk) and its methods are registered
//!   explicitly (standing in for the method-walk, since Rust cannot enumerate
//!   a type's methods at runtime the way `reflect.Value.Method` does).
//!   `Bound::embed` stands in for Go's embedded/anonymous-field promotion:
//!   an embedded `Bound<U>`'s fields and methods are flattened onto the
//!   parent's guest object rather than nested under a key.
//!
//! Because bound fields pass through `serde_json::Value`, which cannot
//! represent a cycle, the "visited-pointer map" that Go's version needs for
//! self-referential struct graphs has no counterpart here: a value graph
//! that cycles through owned data simply cannot reach `Bound` in the first
//! place. This is recorded as an accepted Open Question resolution in
//! `DESIGN.md`, not a silent gap.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context as _, Result as AnyResult};
use rquickjs::{Ctx, Function, Object, Value};
use serde::Serialize;
use serde_json::Value as Json;

/// A method callable on a [`Bound`] host value: receives the current value
/// and the JSON-encoded guest argument array, returns the JSON-encoded
/// guest return value. Mirrors the Method-call steps in spec §4.3: argument
/// fetch/convert happens host-side via `serde_json`, zero-value-fill is
/// `serde_json::Value::Null` deserializing to `Default`, and the
/// two-return-value `(value, error)` convention maps to `Result<Json>`.
pub type HostMethod<T> = Arc<dyn Fn(&T, Json) -> AnyResult<Json> + Send + Sync>;

/// A host value exposed under a guest name: `bind(name, v)` in spec terms.
/// `T` must be `Serialize` so its exported fields can be captured; methods
/// are registered explicitly since Rust has no method reflection.
type Embedder = Box<dyn for<'js> Fn(&Ctx<'js>, &Object<'js>) -> rquickjs::Result<()> + Send + Sync>;

pub struct Bound<T> {
    value: Arc<Mutex<T>>,
    methods: Vec<(&'static str, HostMethod<T>)>,
    embeds: Vec<Embedder>,
}

impl<T: Serialize + Send + 'static> Bound<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Arc::new(Mutex::new(value)),
            methods: Vec::new(),
            embeds: Vec::new(),
        }
    }

    /// Flattens an embedded host value's fields and methods onto this
    /// value's guest object, the "embedded/anonymous fields are flattened:
    /// their fields and methods are lifted onto the parent" clause of spec
    /// §4.3's struct/record row. Installed before this value's own fields
    /// and methods, so a name both export ends up holding this value's own
    /// version — the same outer-shadows-inner precedence Go's field
    /// promotion gives a struct's own members over an embedded one's.
    pub fn embed<U: Serialize + Send + 'static>(mut self, embedded: Bound<U>) -> Self {
        self.embeds
            .push(Box::new(move |ctx: &Ctx<'_>, obj: &Object<'_>| embedded.install_into(ctx, obj)));
        self
    }

    /// Registers an exported method. `f` receives the bound value and the
    /// guest argument array (already JSON-decoded) and returns the bound
    /// return value, matching steps 1-8 of the Method-call rule: arity zero
    /// becomes guest `undefined` (an empty JSON array round-trips to
    /// `null`), arity one is the bound value directly, and `Err` is raised
    /// as a guest error (step 6).
    pub fn method(
        mut self,
        name: &'static str,
        f: impl Fn(&T, Json) -> AnyResult<Json> + Send + Sync + 'static,
    ) -> Self {
        self.methods.push((name, Arc::new(f)));
        self
    }

    pub fn handle(&self) -> Arc<Mutex<T>> {
        self.value.clone()
    }

    /// Builds the guest object: embedded values' fields and methods
    /// (`embed`) are installed first, then each of this value's own exported
    /// fields (from the `Serialize` impl) becomes a data property and each
    /// registered method becomes a function property, overwriting any
    /// same-named embedded property — the struct/record row of spec §4.3's
    /// mapping table.
    pub fn install<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Object<'js>> {
        let obj = Object::new(ctx.clone())?;
        self.install_into(ctx, &obj)?;
        Ok(obj)
    }

    fn install_into<'js>(&self, ctx: &Ctx<'js>, obj: &Object<'js>) -> rquickjs::Result<()> {
        for embedder in &self.embeds {
            embedder(ctx, obj)?;
        }

        let fields = {
            let guard = self.value.lock().unwrap();
            serde_json::to_value(&*guard)
        };
        if let Ok(Json::Object(map)) = fields {
            for (key, field_value) in map {
                let encoded = serde_json::to_string(&field_value)
                    .map_err(|_| rquickjs::Error::new_from_js("serde_json::Value", "string"))?;
                let guest_value: Value = ctx.json_parse(encoded)?;
                obj.set(key, guest_value)?;
            }
        }

        for (name, method) in &self.methods {
            let value = self.value.clone();
            let method = method.clone();
            let func = Function::new(ctx.clone(), move |ctx: Ctx<'_>, args: rquickjs::prelude::Rest<Value<'_>>| -> rquickjs::Result<Value<'_>> {
                let args_json = ctx
                    .json_stringify(args.into_inner())?
                    .map(|s| s.to_string())
                    .transpose()?
                    .unwrap_or_else(|| "[]".to_string());
                let args: Json = serde_json::from_str(&args_json)
                    .map_err(|e| rquickjs::Exception::throw_type(&ctx, &e.to_string()))?;

                let result = {
                    let guard = value.lock().unwrap();
                    method(&guard, args)
                };

                match result {
                    Ok(json) => {
                        let encoded = serde_json::to_string(&json)
                            .map_err(|e| rquickjs::Exception::throw_internal(&ctx, &e.to_string()))?;
                        ctx.json_parse(encoded)
                    }
                    Err(e) => Err(rquickjs::Exception::throw_type(&ctx, &e.to_string())),
                }
            })?
            .with_name(*name)?;
            obj.set(*name, func)?;
        }

        Ok(())
    }
}

/// Wraps a guest callable as a host closure, the "guest-callable ->
/// host-callable adapter" of spec §4.3. On call it marshals the supplied
/// JSON arguments to guest values, invokes the callable, and converts the
/// result back. If the guest callable throws, it returns `Ok(Json::Null)`
/// (the "zero value" substitute) rather than propagating — the spec calls
/// this intentionally lossy and suitable only for event-handler callbacks.
pub fn wrap_guest_callback<'js>(
    ctx: &Ctx<'js>,
    callable: Function<'js>,
) -> impl Fn(Json) -> AnyResult<Json> + 'js {
    let ctx = ctx.clone();
    move |args: Json| -> AnyResult<Json> {
        let encoded = serde_json::to_string(&args).context("encoding callback arguments")?;
        let guest_args: Value = ctx
            .json_parse(encoded)
            .map_err(|e| anyhow!("parsing callback arguments: {e}"))?;
        let array = rquickjs::Array::from_value(guest_args)
            .map_err(|e| anyhow!("callback arguments must encode as an array: {e}"))?;
        let mut rest = Vec::with_capacity(array.len());
        for item in array.iter::<Value>() {
            rest.push(item.map_err(|e| anyhow!("{e}"))?);
        }
        let result = callable
            .call::<_, Value>((rquickjs::prelude::Rest(rest),))
            .unwrap_or(Value::new_undefined(ctx.clone()));
        let json = ctx
            .json_stringify(result)
            .ok()
            .flatten()
            .map(|s| s.to_string())
            .transpose()
            .unwrap_or(None)
            .unwrap_or_else(|| "null".to_string());
        Ok(serde_json::from_str(&json).unwrap_or(Json::Null))
    }
}
