use std::collections::HashMap;

use rquickjs::prelude::Rest;
use rquickjs::{Ctx, Exception, Function, Object, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;
use typego_runtime::Engine;

// This Function trait uses `serde`'s Serialize and DeserializeOwned traits for input and output types.

/// A trait representing a host function that can be called from the guest JavaScript code.
///
/// This trait lets us workaround the lack of variadic generics in Rust by defining implementations
/// for tuples of different sizes.
/// The `call` method takes a single argument of type `Args`, which is expected to be a tuple
/// containing all the arguments for the function, and spreads them to the arguments n-arity when calling
/// the underlying function.
///
/// This trait has a blanket implementation for any function that takes arguments that are serde deserializable,
/// and return a serde serializable result, so you would never need to implement this trait directly.
pub trait Function<Output: Serialize, Args: DeserializeOwned> {
    fn call(&self, args: Args) -> Output;
}

// This blanket implementation allows us to implement the `Function` trait for any function that takes
// arguments that are serde deserializable, and return a serde serializable result.
impl<Output, Args, F> Function<Output, Args> for F
where
    Output: Serialize,
    Args: DeserializeOwned,
    F: fn_traits::Fn<Args, Output = Output>,
{
    fn call(&self, args: Args) -> Output {
        F::call(self, args)
    }
}

type BoxFunction = Box<dyn Fn(String) -> crate::Result<String> + Send + Sync>;

fn type_erased<Output: Serialize, Args: DeserializeOwned>(
    func: impl Function<Output, Args> + Send + Sync + 'static,
) -> BoxFunction {
    Box::new(move |args: String| {
        let args: Args = serde_json::from_str(&args).map_err(|e| crate::new_error!("invalid host call arguments: {e}"))?;
        let output: Output = func.call(args);
        serde_json::to_string(&output).map_err(|e| crate::new_error!("failed to encode host call result: {e}"))
    })
}

/// A module containing host functions that can be called from the guest JavaScript code.
#[derive(Default)]
pub struct HostModule {
    functions: HashMap<String, BoxFunction>,
}

impl HostModule {
    /// Register a host function that can be called from the guest JavaScript code.
    ///
    /// Registering a function with the same `name` as an existing function
    /// overwrites the previous registration.
    pub fn register<Output: Serialize, Args: DeserializeOwned>(
        &mut self,
        name: impl Into<String>,
        func: impl Function<Output, Args> + Send + Sync + 'static,
    ) -> &mut Self {
        self.functions.insert(name.into(), type_erased(func));
        self
    }

    fn into_functions(self) -> HashMap<String, BoxFunction> {
        self.functions
    }
}

/// Installs every registered host module as a guest global object, each
/// registered function becoming a guest-callable method that marshals
/// arguments and the return value through JSON — the direct-call
/// replacement for `ProtoJSSandbox`'s old `CallHostJsFunction`/`RegisterHostModules`
/// guest-to-host round trip.
pub(crate) fn install_host_modules(
    engine: &Engine,
    host_modules: HashMap<String, HostModule>,
) -> anyhow::Result<()> {
    engine.vm_lock().with_lock(|| {
        engine.context().with(|ctx| -> anyhow::Result<()> {
            for (module_name, module) in host_modules {
                let obj = Object::new(ctx.clone())?;
                for (func_name, func) in module.into_functions() {
                    let js_func = Function::new(
                        ctx.clone(),
                        move |ctx: Ctx<'_>, args: Rest<Value<'_>>| -> rquickjs::Result<Value<'_>> {
                            let args_json = ctx
                                .json_stringify(args.into_inner())?
                                .map(|s| s.to_string())
                                .transpose()?
                                .unwrap_or_else(|| "[]".to_string());
                            let result_json = func(args_json)
                                .map_err(|e| Exception::throw_type(&ctx, &e.to_string()))?;
                            ctx.json_parse(result_json)
                        },
                    )?
                    .with_name(&func_name)?;
                    obj.set(func_name, js_func)?;
                }
                ctx.globals().set(module_name, obj)?;
            }
            Ok(())
        })
    })
}
