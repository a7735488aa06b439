//! Propline messaging server binary.
//! Run with: cargo run --bin propline-server

use std::process::ExitCode;

use propline::start_propline;

fn main() -> ExitCode {
    start_propline::run()
}
