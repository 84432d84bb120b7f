//! The Choixe command line binary.

#![allow(missing_docs)]
#![allow(clippy::missing_docs_in_private_items)]

use std::process::ExitCode;

fn main() -> ExitCode {
    choixe::choixe_main()
}
