//! Test manual termination of the sandbox (i.e., without using a monitor)

#![allow(clippy::disallowed_macros)]

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use typego::{Error, Result, SandboxBuilder, Script};

#[ignore]
#[test]
fn handle_termination() -> Result<()> {
    let handler = Script::from_content(
        r#"
    function handler(event) {
        const start = Date.now();
        let now = start;
        while (now - start < 4000) {
            now = Date.now();
        }
        return event
    }
    "#,
    );

    let empty_event = "{}";

    let proto_js_sandbox = SandboxBuilder::new().build()?;

    let mut sandbox = proto_js_sandbox.load_runtime()?;

    sandbox.add_handler("handler", handler)?;

    let mut loaded_sandbox = sandbox.get_loaded_sandbox()?;

    // Verify sandbox is not poisoned before we start
    assert!(
        !loaded_sandbox.poisoned(),
        "Sandbox should not be poisoned initially"
    );

    let interrupt_handle = loaded_sandbox.interrupt_handle();
    let barrier1 = Arc::new(Barrier::new(2));
    let barrier2 = barrier1.clone();

    let thread = std::thread::spawn(move || {
        barrier1.wait();
        println!(
            "{} - Waiting for 1 sec before sending interrupts...",
            std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_secs_f64()
        );
        thread::sleep(Duration::from_secs(1));
        println!(
            "{} - Sending interrupts...",
            std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_secs_f64()
        );
        interrupt_handle.kill();
        println!(
            "{} - Interrupts sent",
            std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_secs_f64()
        );
    });

    let res = {
        barrier2.wait();
        println!(
            "{} - Starting to handle event",
            std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_secs_f64()
        );
        let res = loaded_sandbox
            .handle_event("handler", empty_event.to_string(), None)
            .unwrap_err();
        println!(
            "{} - Finished handling event",
            std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_secs_f64()
        );
        res
    };

    thread.join().expect("kill thread panicked");

    assert!(matches!(res, Error::Interrupted));

    // Verify sandbox is poisoned after interruption, and stays that way -
    // there is no VM snapshot to restore, only a fresh sandbox to build.
    assert!(
        loaded_sandbox.poisoned(),
        "Sandbox should be poisoned after interruption"
    );

    Ok(())
}
