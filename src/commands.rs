//! `App::cmd_*` entry points behind each CLI subcommand.
//!
//! Every command writes its result to the supplied writer so the output can be
//! captured in tests.

mod branches;
mod checkout;
mod content;
mod history;
mod info;
mod settings;
