//! Tests for output printing from the sandbox
//!
//! `console.log` and `print` write straight to the host's stdout (see
//! `typego_runtime::modules::io`); there is no injectable writer hook to
//! capture that output in-process, so these tests only assert that calling
//! them does not error.

#![allow(clippy::disallowed_macros)]

use typego::{SandboxBuilder, Script};

#[test]
fn console_log_does_not_error() {
    let handler = Script::from_content(
        r#"
    function handler(event) {
        console.log("Hello, World!!");
        return event
    }
    "#,
    );

    let event = r#"
    {
    }"#;

    let proto_js_sandbox = SandboxBuilder::new().build().unwrap();
    let mut sandbox = proto_js_sandbox.load_runtime().unwrap();
    sandbox.add_handler("handler", handler).unwrap();
    let mut loaded_sandbox = sandbox.get_loaded_sandbox().unwrap();

    let res = loaded_sandbox.handle_event("handler", event.to_string(), None);
    assert!(res.is_ok());
}

#[test]
fn print_does_not_error() {
    let handler = Script::from_content(
        r#"
    function handler(event) {
        print("Hello, World!!");
        return event
    }
    "#,
    );

    let event = r#"
    {
    }"#;

    let proto_js_sandbox = SandboxBuilder::new().build().unwrap();
    let mut sandbox = proto_js_sandbox.load_runtime().unwrap();
    sandbox.add_handler("handler", handler).unwrap();
    let mut loaded_sandbox = sandbox.get_loaded_sandbox().unwrap();

    let res = loaded_sandbox.handle_event("handler", event.to_string(), None);
    assert!(res.is_ok());
}
