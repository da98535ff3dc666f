//! The `process` global (spec §4.4), ported from the Go implementation's
//! `bridge/intrinsics/process.go`, including its environment allow-list
//! (shared with the host via [`typego_common::env_var_allowed`]).

use rquickjs::{Ctx, Object};
use typego_common::env_var_allowed;

pub fn setup(ctx: &Ctx<'_>, argv: &[String]) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let process = Object::new(ctx.clone())?;

    let env = Object::new(ctx.clone())?;
    for (key, value) in std::env::vars() {
        if env_var_allowed(&key) {
            env.set(key, value)?;
        }
    }
    process.set("env", env)?;

    let cwd = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    process.set("cwd", cwd)?;
    process.set("platform", std::env::consts::OS)?;
    process.set("argv", argv.to_vec())?;
    process.set("version", env!("CARGO_PKG_VERSION"))?;

    globals.set("process", process)?;
    Ok(())
}
