#![allow(clippy::disallowed_macros)]
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use env_logger::Env;
use typego_runtime::host::Host;
use typego_runtime::{EventLoop, MemoryFactory, Worker};

/// A host with no module resolution, since the worker's script below is
/// self-contained.
struct NullHost;

impl Host for NullHost {
    fn resolve_module(&self, base: String, specifier: String) -> Result<String> {
        Err(anyhow!("no module loader configured (tried resolving '{specifier}' from '{base}')"))
    }

    fn load_module(&self, name: String) -> Result<String> {
        Err(anyhow!("no module loader configured (tried loading '{name}')"))
    }
}

fn main() -> Result<()> {
    #[cfg(not(debug_assertions))]
    env_logger::Builder::from_env(Env::default().default_filter_or("error")).init();
    #[cfg(debug_assertions)]
    env_logger::Builder::from_env(Env::default().default_filter_or("typego=trace")).init();

    let parent_loop = EventLoop::new(true);
    let received = Arc::new(Mutex::new(Vec::new()));
    let received_worker = received.clone();

    let mut worker = Worker::spawn(
        NullHost,
        r#"
        self.postMessage({greeting: "hello from the worker"});
        onmessage = (event) => {
            self.postMessage({echoed: event.data});
        };
        "#
        .to_string(),
        None,
        MemoryFactory::new(),
        parent_loop.clone(),
        move |payload| received_worker.lock().unwrap().push(payload),
    );

    // Drain the parent's Event Loop until the worker's initial message
    // arrives, the way an embedder driving the parent engine would.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while parent_loop.pending() == 0 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    parent_loop.start();

    worker.post_message(r#"{"ping":1}"#.to_string());

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while received.lock().unwrap().len() < 2 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
        parent_loop.start();
    }

    for payload in received.lock().unwrap().iter() {
        println!("received from worker: {payload}");
    }

    worker.terminate();
    Ok(())
}
