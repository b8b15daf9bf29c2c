//! Root of the `pyval-core` library.

// Library code reports through `tracing`; only the binaries print.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod blacklist;
pub mod commands;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod help;
pub mod input;
mod locate;
pub mod paste;
pub mod sandbox;
pub mod sanitize;
pub mod state;
pub mod util;

pub use blacklist::Blacklist;
pub use commands::BotAction;
pub use commands::ChatMessage;
pub use commands::CommandHandler;
pub use commands::Response;
pub use config::Config;
pub use error::PyvalErr;
pub use evaluate::EvaluationReply;
pub use evaluate::EvaluationRequest;
pub use evaluate::Evaluator;
pub use input::InputMode;
pub use locate::locate_executable;
pub use sandbox::EvaluationResult;
pub use sandbox::ExitOutcome;
pub use sandbox::SandboxInvoker;
pub use state::BotState;
