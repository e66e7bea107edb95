use std::io::{self, Write};

use indicatif::MultiProgress;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

const CRATES: [&str; 3] = ["parget", "parget_fetch", "parget_ledger"];

/// Install the global subscriber. Lines go to stderr with the live
/// display suspended so they never tear a progress bar.
pub fn init(verbose: u8, multi: &MultiProgress) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(Suspended(multi.clone())))
        .init();
}

fn directives(verbose: u8) -> String {
    let level = match verbose {
        0 => return "warn".to_string(),
        1 => "info",
        _ => "debug",
    };
    let mut out = String::from("warn");
    for krate in CRATES {
        out.push_str(&format!(",{krate}={level}"));
    }
    out
}

#[derive(Clone)]
struct Suspended(MultiProgress);

impl Write for Suspended {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.suspend(|| io::stderr().write_all(buf)).map(|()| buf.len())
    }

    fn flush(&mut self) -> io::Result<()> { io::stderr().flush() }
}

impl<'a> MakeWriter<'a> for Suspended {
    type Writer = Suspended;

    fn make_writer(&'a self) -> Self::Writer { self.clone() }
}
