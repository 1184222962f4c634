//! CLI commands for the straddle trader.

pub mod login;
pub mod run;

pub use login::{run_login, LoginArgs};
pub use run::{run_session, RunArgs};
