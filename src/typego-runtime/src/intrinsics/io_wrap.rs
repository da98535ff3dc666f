//! `wrapReader`/`wrapWriter` (spec §4.4), ported from the Go implementation's
//! `bridge/intrinsics/io.go`. Takes a guest object exposing a
//! `read(buffer) → n` or `write(buffer) → n` method and produces a host
//! value implementing [`std::io::Read`]/[`std::io::Write`] that calls back
//! into the engine through the VM Lock for every byte transferred.
//!
//! The returned class instances are opaque from the guest's point of view;
//! they exist so other host-side code (module functions taking a reader or
//! writer, e.g. a future stream-copy helper) can accept guest-backed I/O
//! without knowing it originated in script.

use std::io;
use std::sync::Arc;

use rquickjs::class::Trace;
use rquickjs::{Context, Ctx, Function, JsLifetime, Object, Persistent, TypedArray};

use crate::vm_lock::VmLock;

struct ReaderInner {
    context: Context,
    vm_lock: Arc<VmLock>,
    obj: Persistent<Object<'static>>,
    read: Persistent<Function<'static>>,
}

impl io::Read for ReaderInner {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let context = self.context.clone();
        let obj = self.obj.clone();
        let read = self.read.clone();
        let len = buf.len();
        let result = self.vm_lock.with_lock(|| {
            context.with(|ctx| -> rquickjs::Result<(usize, Vec<u8>)> {
                let this = obj.restore(&ctx)?;
                let read_fn = read.restore(&ctx)?;
                let arr: TypedArray<'_, u8> = TypedArray::new(ctx.clone(), vec![0u8; len])?;
                let n: i64 = read_fn.call((this, arr.clone()))?;
                let n = n.max(0) as usize;
                let bytes = arr.as_bytes().map(|b| b[..n.min(b.len())].to_vec()).unwrap_or_default();
                Ok((n, bytes))
            })
        });
        match result {
            Ok((n, bytes)) => {
                let n = n.min(buf.len()).min(bytes.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Err(e) => Err(io::Error::other(e.to_string())),
        }
    }
}

struct WriterInner {
    context: Context,
    vm_lock: Arc<VmLock>,
    obj: Persistent<Object<'static>>,
    write: Persistent<Function<'static>>,
}

impl io::Write for WriterInner {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let context = self.context.clone();
        let obj = self.obj.clone();
        let write = self.write.clone();
        let owned = buf.to_vec();
        let result = self.vm_lock.with_lock(|| {
            context.with(|ctx| -> rquickjs::Result<i64> {
                let this = obj.restore(&ctx)?;
                let write_fn = write.restore(&ctx)?;
                let arr: TypedArray<'_, u8> = TypedArray::new(ctx.clone(), owned)?;
                write_fn.call((this, arr))
            })
        });
        result
            .map(|n| n.max(0) as usize)
            .map_err(|e| io::Error::other(e.to_string()))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A host-side `Read` handle backed by a guest object (spec §4.4
/// `wrapReader`).
#[rquickjs::class]
#[derive(Clone, Trace, JsLifetime)]
pub struct HostReader {
    #[qjs(skip_trace)]
    inner: Arc<std::sync::Mutex<ReaderInner>>,
}

#[rquickjs::methods]
impl HostReader {}

impl io::Read for HostReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.lock().unwrap().read(buf)
    }
}

/// A host-side `Write` handle backed by a guest object (spec §4.4
/// `wrapWriter`).
#[rquickjs::class]
#[derive(Clone, Trace, JsLifetime)]
pub struct HostWriter {
    #[qjs(skip_trace)]
    inner: Arc<std::sync::Mutex<WriterInner>>,
}

#[rquickjs::methods]
impl HostWriter {}

impl io::Write for HostWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().unwrap().flush()
    }
}

fn wrap_reader<'js>(
    ctx: Ctx<'js>,
    context: Context,
    vm_lock: Arc<VmLock>,
    obj: Object<'js>,
) -> rquickjs::Result<HostReader> {
    let read: Function = obj.get("read").map_err(|_| {
        rquickjs::Exception::throw_type(&ctx, "object must have a read(buffer) method")
    })?;
    Ok(HostReader {
        inner: Arc::new(std::sync::Mutex::new(ReaderInner {
            context,
            vm_lock,
            obj: unsafe { Persistent::save(&ctx, obj).transmute() },
            read: unsafe { Persistent::save(&ctx, read).transmute() },
        })),
    })
}

fn wrap_writer<'js>(
    ctx: Ctx<'js>,
    context: Context,
    vm_lock: Arc<VmLock>,
    obj: Object<'js>,
) -> rquickjs::Result<HostWriter> {
    let write: Function = obj.get("write").map_err(|_| {
        rquickjs::Exception::throw_type(&ctx, "object must have a write(buffer) method")
    })?;
    Ok(HostWriter {
        inner: Arc::new(std::sync::Mutex::new(WriterInner {
            context,
            vm_lock,
            obj: unsafe { Persistent::save(&ctx, obj).transmute() },
            write: unsafe { Persistent::save(&ctx, write).transmute() },
        })),
    })
}

pub fn setup(ctx: &Ctx<'_>, context: Context, vm_lock: Arc<VmLock>) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let reader_context = context.clone();
    let reader_lock = vm_lock.clone();
    globals.set(
        "wrapReader",
        Function::new(ctx.clone(), move |ctx: Ctx<'_>, obj: Object<'_>| {
            wrap_reader(ctx, reader_context.clone(), reader_lock.clone(), obj)
        })?,
    )?;

    globals.set(
        "wrapWriter",
        Function::new(ctx.clone(), move |ctx: Ctx<'_>, obj: Object<'_>| {
            wrap_writer(ctx, context.clone(), vm_lock.clone(), obj)
        })?,
    )?;

    Ok(())
}
