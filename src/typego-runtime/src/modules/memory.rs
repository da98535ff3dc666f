//! `makeShared` (spec §4.5), the synthetic import target `__typego_memory__`
//! (spec §6), ported from the Go implementation's `bridge/memory.go`. Backed
//! by [`crate::shared_memory::MemoryFactory`], which is what a parent engine
//! and its workers actually share (spec §4.6 step 2).
//!
//! The per-`Engine` [`MemoryFactory`]/[`EventLoop`]/[`Context`]/[`VmLock`]
//! this module needs is injected via `ctx` userdata by [`crate::Engine::new`],
//! the same mechanism `host_fn::HostModuleLoader` uses to reach per-context
//! state from inside a `#[rquickjs::module]` declaration.
//!
//! No independent `rquickjs::Runtime` can alias another runtime's
//! `ArrayBuffer` storage, so the guest `buffer` cannot be a true zero-copy
//! window onto the host segment once a worker (a separate `Engine`, hence a
//! separate `Runtime`) is in the picture. Instead, the mutex's synchronous
//! acquire/release points are the explicit copy boundary spec §4.5 requires
//! to be visible: `lock`/`rlock` refresh the guest buffer from the host
//! segment right before resolving, and `unlock` writes the guest buffer back
//! to the host segment right before releasing — the same "copy on
//! acquire/release" discipline CUDA/OpenCL use for host/device buffers that
//! cannot alias, and strictly more than the single unsynchronized copy this
//! module built before.

use std::sync::Arc;

use rquickjs::{Ctx, Exception, JsLifetime, Persistent, TypedArray};

use crate::event_loop::EventLoop;
use crate::shared_memory::{MemoryFactory, SharedSegment};
use crate::vm_lock::VmLock;

#[derive(Clone, JsLifetime)]
pub struct MemoryContext {
    pub factory: Arc<MemoryFactory>,
    pub event_loop: EventLoop,
    pub context: rquickjs::Context,
    pub vm_lock: Arc<VmLock>,
}

fn memory_context<'js>(ctx: &Ctx<'js>) -> rquickjs::Result<MemoryContext> {
    ctx.userdata::<MemoryContext>()
        .map(|c| (*c).clone())
        .ok_or_else(|| Exception::throw_internal(ctx, "MemoryContext not installed"))
}

#[rquickjs::module(rename_vars = "camelCase")]
#[allow(clippy::module_inception)]
pub mod memory {
    use super::*;
    use rquickjs::{Function, Object};

    #[rquickjs::function]
    pub fn make_shared<'js>(ctx: Ctx<'js>, name: String, size: usize) -> rquickjs::Result<Object<'js>> {
        let mc = memory_context(&ctx)?;
        let segment = mc.factory.make_shared(&name, size);

        let obj = Object::new(ctx.clone())?;
        let buffer: TypedArray<'js, u8> = TypedArray::new(ctx.clone(), segment.read_copy())?;
        obj.set("buffer", buffer.clone())?;

        // SAFETY: same invariant `intrinsics::concurrency`'s channel values
        // rely on — this is only ever restored against `mc.context`, which
        // outlives the closures below (owned by the `Engine`).
        let persisted_buffer: Persistent<TypedArray<'static, u8>> =
            unsafe { Persistent::save(&ctx, buffer).transmute() };

        let mutex = Object::new(ctx.clone())?;

        let lock_segment = segment.clone();
        let lock_mc = mc.clone();
        let lock_buffer = persisted_buffer.clone();
        mutex.set(
            "lock",
            Function::new(ctx.clone(), move |ctx: Ctx<'_>| -> rquickjs::Result<_> {
                let (promise, resolve, reject) = lock_mc.event_loop.create_promise(lock_mc.context.clone(), ctx)?;
                let segment = lock_segment.clone();
                let buffer = lock_buffer.clone();
                let vm_lock = lock_mc.vm_lock.clone();
                let context = lock_mc.context.clone();
                std::thread::spawn(move || {
                    let snapshot = segment.read_copy();
                    vm_lock.with_lock(|| {
                        context.with(|ctx| {
                            if let Ok(ta) = buffer.restore(&ctx) {
                                let _ = copy_into_guest(&ta, &snapshot);
                            }
                        });
                    });
                    resolve();
                    let _ = &reject;
                });
                Ok(promise)
            })?,
        )?;

        let rlock_segment = segment.clone();
        let rlock_mc = mc.clone();
        let rlock_buffer = persisted_buffer.clone();
        mutex.set(
            "rlock",
            Function::new(ctx.clone(), move |ctx: Ctx<'_>| -> rquickjs::Result<_> {
                let (promise, resolve, reject) =
                    rlock_mc.event_loop.create_promise(rlock_mc.context.clone(), ctx)?;
                let segment = rlock_segment.clone();
                let buffer = rlock_buffer.clone();
                let vm_lock = rlock_mc.vm_lock.clone();
                let context = rlock_mc.context.clone();
                std::thread::spawn(move || {
                    let _guard = segment.lock_read();
                    let snapshot = segment.read_copy();
                    vm_lock.with_lock(|| {
                        context.with(|ctx| {
                            if let Ok(ta) = buffer.restore(&ctx) {
                                let _ = copy_into_guest(&ta, &snapshot);
                            }
                        });
                    });
                    resolve();
                    let _ = &reject;
                });
                Ok(promise)
            })?,
        )?;

        let unlock_segment = segment.clone();
        let unlock_buffer = persisted_buffer.clone();
        mutex.set(
            "unlock",
            Function::new(ctx.clone(), move |ctx: Ctx<'_>| -> rquickjs::Result<()> {
                let ta = unlock_buffer.clone().restore(&ctx)?;
                copy_from_guest(&ta, &unlock_segment)
            })?,
        )?;

        mutex.set("runlock", Function::new(ctx.clone(), || {})?)?;

        obj.set("mutex", mutex)?;
        Ok(obj)
    }

    /// Writes host-segment bytes into the guest-visible typed array, making
    /// host writes visible to the guest as of `lock`/`rlock` acquisition.
    fn copy_into_guest(buffer: &TypedArray<'_, u8>, bytes: &[u8]) -> rquickjs::Result<()> {
        let len = bytes.len().min(buffer.len());
        for (i, byte) in bytes.iter().take(len).enumerate() {
            buffer.set(i, *byte)?;
        }
        Ok(())
    }

    /// Reads the guest-visible typed array back into the host segment,
    /// making guest writes visible to the host (and to other engines
    /// sharing the same [`MemoryFactory`]) as of `unlock` (spec §4.5).
    fn copy_from_guest(buffer: &TypedArray<'_, u8>, segment: &SharedSegment) -> rquickjs::Result<()> {
        let len = buffer.len();
        let mut bytes = Vec::with_capacity(len);
        for i in 0..len {
            let byte: u8 = buffer.get(i)?;
            bytes.push(byte);
        }
        segment.write_at(0, &bytes);
        Ok(())
    }
}
