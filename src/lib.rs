//! flyscript: a budget-limited stack machine for autopilot scripts.
//!
//! A host drives [`Cpu::update`] once per frame. Programs run in stacked
//! contexts above a permanent interpreter context, triggers fire every tick
//! while a program is active, and user variables can be saved and reloaded.

pub mod ast;
pub mod compiler;
pub mod config;
pub mod diagnostic;
pub mod functions;
pub mod host;
pub mod lexer;
pub mod parser;
pub mod vm;

pub use compiler::{CompileError, ScriptCompiler};
pub use config::EngineConfig;
pub use host::{BindingManager, BufferScreen, CompileOptions, Host, Screen, ScriptHandler, StdoutScreen};
pub use vm::persist::PersistedState;
pub use vm::value::{Address, Operand, Value};
pub use vm::{Cpu, EngineError, EngineResult, Status};
