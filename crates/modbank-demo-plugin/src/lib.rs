//! Audio output that accepts every stream and discards it.
//!
//! Build with `cargo build -p modbank-demo-plugin` and point the bank at the
//! target directory to see it picked up by a scan.

use std::any::Any;

use modbank_sdk::prelude::*;

/// Context handed to the output when it is opened.
#[derive(Debug, Default)]
pub struct NullSink {
    pub open: bool,
}

fn open(ctx: &mut dyn Any) -> ProbeOutcome {
    if let Some(sink) = ctx.downcast_mut::<NullSink>() {
        sink.open = true;
    }
    ProbeOutcome::Success
}

fn close(ctx: &mut dyn Any) {
    if let Some(sink) = ctx.downcast_mut::<NullSink>() {
        sink.open = false;
    }
}

pub fn module() -> ModuleDecl {
    ModuleDecl::new("null_output")
        .capability("audio output", 1)
        .shortcut("null")
        .shortcut("dummy")
        .long_name("Null audio output")
        .help("Accepts audio and throws it away.")
        .option(ConfigOption::new(
            "null-output-latency",
            "Reported latency in milliseconds",
            OptionKind::Integer {
                default: 0,
                range: Some((0, 1000)),
            },
        ))
        .activate(open)
        .deactivate(close)
}

declare_module!(module());
