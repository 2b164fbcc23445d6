//! The execution engine: a stack-based opcode interpreter that advances in
//! bounded slices, one slice per host tick.
//!
//! Each [`Cpu::update`] runs the binding hooks, every armed trigger of the
//! active program, the wait timer, and at most
//! [`EngineConfig::instructions_per_update`] opcodes of normal flow. Errors
//! never leave `update`: a failing trigger is disarmed, and any other failure
//! either skips the offending interactive statement or unwinds every pushed
//! program back to the interpreter context.

pub mod context;
pub mod opcode;
pub mod persist;
pub mod program;
pub mod stack;
pub mod stats;
pub mod value;
pub mod variables;

use std::rc::Rc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::compiler::CompileError;
use crate::config::EngineConfig;
use crate::functions::FunctionRegistry;
use crate::host::{CompileOptions, Host};
use context::{ContextStack, ProgramContext};
use opcode::{Instruction, Opcode};
use program::ProgramBuilder;
use stack::Stack;
use stats::ExecutionStats;
use value::{Address, Operand, Value};
use variables::{VariableTable, is_pointer_name};

pub const INTERPRETER_CONTEXT: &str = "interpreter";
pub const PROGRAM_CONTEXT: &str = "program";

pub const PROGRAM_ENDED: &str = "Program ended.";
pub const PROGRAM_ABORTED: &str = "Program aborted.";

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("undefined variable: {name}")]
    UndefinedVariable { name: String },
    #[error("undefined function: {name}")]
    UndefinedFunction { name: String },
    #[error("stack underflow")]
    StackUnderflow,
    #[error("{0}")]
    InvalidOperandType(String),
    #[error("{collaborator} is not available")]
    HostUnavailable { collaborator: &'static str },
    #[error("division by zero")]
    DivisionByZero,
    #[error("instruction pointer {ip} is outside the program")]
    InstructionPointerOutOfRange { ip: usize },
    #[error("trigger at {ip} did not finish within {limit} instructions")]
    TriggerLimitExceeded { ip: usize, limit: usize },
    #[error(transparent)]
    Compile(#[from] CompileError),
}

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running,
    Waiting,
}

/// Outcome of one fetch/execute step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    EndOfFunction,
    EndOfProgram,
}

pub struct Cpu {
    config: EngineConfig,
    variables: VariableTable,
    stack: Stack,
    contexts: ContextStack,
    status: Status,
    current_time: f64,
    wait_until: f64,
    functions: FunctionRegistry,
    host: Host,
    stats: ExecutionStats,
}

impl Cpu {
    /// Build an engine wired to `host` and boot it.
    pub fn new(config: EngineConfig, host: Host) -> Self {
        let mut cpu = Cpu {
            config,
            variables: VariableTable::new(),
            stack: Stack::new(),
            contexts: ContextStack::new(),
            status: Status::Running,
            current_time: 0.0,
            wait_until: 0.0,
            functions: FunctionRegistry::with_defaults(),
            host,
            stats: ExecutionStats::default(),
        };
        cpu.boot();
        cpu
    }

    /// Reset every piece of execution state and run the boot script, if any.
    pub fn boot(&mut self) {
        info!("booting");
        if let Some(bindings) = self.host.bindings.as_deref_mut() {
            bindings.unbind_all();
            bindings.set_input_lock(false);
        }
        self.contexts.reset();
        self.stack.clear();
        self.variables.clear();
        self.status = Status::Running;
        self.current_time = 0.0;
        self.wait_until = 0.0;
        self.stats.reset();

        match self.host.bindings.as_deref_mut() {
            Some(bindings) => bindings.load_bindings(&mut self.variables),
            None => debug!("no binding manager; no host variables bound"),
        }
        if let Some(scripts) = self.host.scripts.as_deref_mut() {
            scripts.clear_context(INTERPRETER_CONTEXT);
        }

        if let Some(script) = self.config.boot_script.clone() {
            if let Err(err) = self.run_program(&script, "boot", true) {
                error!(error = %err, "boot script failed to compile");
                self.print(&err.to_string());
            }
        }
    }

    // ── Tick ────────────────────────────────────────────────────────

    /// Advance the engine by one host tick of `delta_time` seconds.
    pub fn update(&mut self, delta_time: f64) {
        let started = Instant::now();
        self.current_time += delta_time;

        if let Err(err) = self.tick() {
            self.recover(err);
        }

        self.stats.update += started.elapsed();
    }

    fn tick(&mut self) -> EngineResult<()> {
        self.pre_update_bindings()?;
        if self.contexts.len() > 1 {
            self.process_triggers();
        }
        self.process_wait();
        if self.status == Status::Running {
            self.continue_execution()?;
        }
        self.post_update_bindings()
    }

    fn pre_update_bindings(&mut self) -> EngineResult<()> {
        match self.host.bindings.as_deref_mut() {
            Some(bindings) => bindings.pre_update(&mut self.variables),
            None => Ok(()),
        }
    }

    fn post_update_bindings(&mut self) -> EngineResult<()> {
        match self.host.bindings.as_deref_mut() {
            Some(bindings) => bindings.post_update(&mut self.variables),
            None => Ok(()),
        }
    }

    /// Run every armed trigger of the current context to completion. The
    /// main instruction pointer is restored afterwards.
    fn process_triggers(&mut self) {
        let triggers = self.contexts.current().triggers().to_vec();
        if triggers.is_empty() {
            return;
        }
        let started = Instant::now();
        let level = self.contexts.len() - 1;
        let saved_ip = self.contexts.current().instruction_pointer;

        for entry in triggers {
            // an earlier trigger may have disarmed this one
            if !self.contexts.current().has_trigger(entry) {
                continue;
            }
            let depth = self.stack.len();
            self.contexts.current_mut().instruction_pointer = entry;
            if let Err(err) = self.run_trigger(entry) {
                warn!(error = %err, trigger = entry, "trigger failed and was disarmed");
                self.contexts.current_mut().remove_trigger(entry);
                self.discard_to(depth);
            }
        }

        if let Some(context) = self.contexts.get_mut(level) {
            context.instruction_pointer = saved_ip;
        }
        self.stats.triggers += started.elapsed();
    }

    fn run_trigger(&mut self, entry: usize) -> EngineResult<()> {
        let limit = self.config.trigger_instruction_limit;
        for _ in 0..limit {
            match self.execute_instruction()? {
                Flow::Continue => {}
                Flow::EndOfFunction | Flow::EndOfProgram => return Ok(()),
            }
        }
        Err(EngineError::TriggerLimitExceeded { ip: entry, limit })
    }

    fn process_wait(&mut self) {
        if self.status == Status::Waiting && self.wait_until > 0.0 && self.current_time >= self.wait_until {
            self.end_wait();
        }
    }

    /// Execute up to the per-tick instruction cap of normal flow.
    fn continue_execution(&mut self) -> EngineResult<()> {
        let started = Instant::now();
        let cap = self.config.instructions_per_update;
        let mut executed = 0;

        let result = loop {
            if self.status != Status::Running || executed >= cap {
                break Ok(());
            }
            match self.execute_instruction() {
                Ok(Flow::Continue) => executed += 1,
                Ok(Flow::EndOfFunction) => break Ok(()),
                Ok(Flow::EndOfProgram) => {
                    self.break_execution(false);
                    break Ok(());
                }
                Err(err) => break Err(err),
            }
        };

        self.stats.execution += started.elapsed();
        result
    }

    fn execute_instruction(&mut self) -> EngineResult<Flow> {
        let context = self.contexts.current();
        let ip = context.instruction_pointer;
        let program = Rc::clone(context.program());
        let instruction = program.get(ip).ok_or(EngineError::InstructionPointerOutOfRange { ip })?;

        match instruction.op {
            Opcode::EndOfFunction => return Ok(Flow::EndOfFunction),
            Opcode::EndOfProgram => return Ok(Flow::EndOfProgram),
            _ => {}
        }

        let delta = instruction.op.execute(self)?;
        let next = ip
            .checked_add_signed(delta)
            .ok_or(EngineError::InstructionPointerOutOfRange { ip })?;
        self.contexts.current_mut().instruction_pointer = next;
        Ok(Flow::Continue)
    }

    /// Per-tick recovery: skip the failed interactive statement, or tear down
    /// every pushed program.
    fn recover(&mut self, err: EngineError) {
        let context = self.contexts.current();
        error!(
            error = %err,
            ip = context.instruction_pointer,
            depth = self.contexts.len(),
            "execution error"
        );
        debug!(stack = %self.stack.dump(8), code = ?context.code_fragment(2), "state at failure");

        self.print(&err.to_string());
        self.stack.clear();
        if self.contexts.len() == 1 {
            self.skip_current_instruction_id();
        } else {
            self.break_execution(true);
        }
    }

    /// Move past every remaining opcode of the current source statement.
    /// Never steps over a sentinel.
    fn skip_current_instruction_id(&mut self) {
        let context = self.contexts.current_mut();
        let program = Rc::clone(context.program());
        let start = context.instruction_pointer;
        let Some(current) = program.get(start) else { return };
        if current.op.is_sentinel() {
            return;
        }
        let id = current.id;
        let skipped = program[start..]
            .iter()
            .take_while(|i| i.id == id && !i.op.is_sentinel())
            .count();
        context.instruction_pointer = start + skipped;
    }

    fn discard_to(&mut self, depth: usize) {
        let excess = self.stack.len().saturating_sub(depth) as isize;
        if let Err(err) = self.stack.move_pointer(-excess) {
            debug!(error = %err, "stack cleanup failed");
        }
    }

    // ── Wait ────────────────────────────────────────────────────────

    /// Suspend normal flow. `seconds <= 0` waits until [`Cpu::end_wait`].
    pub fn start_wait(&mut self, seconds: f64) {
        self.wait_until = if seconds > 0.0 { self.current_time + seconds } else { 0.0 };
        self.status = Status::Waiting;
        debug!(seconds, until = self.wait_until, "waiting");
    }

    pub fn end_wait(&mut self) {
        self.wait_until = 0.0;
        self.status = Status::Running;
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    // ── Contexts ────────────────────────────────────────────────────

    /// Push `program` as a new context. Empty programs are ignored; a
    /// missing `EndOfProgram` is appended.
    pub fn push_program(&mut self, mut program: Vec<Instruction>, silent: bool) {
        if program.is_empty() {
            return;
        }
        if program.last().map(|i| &i.op) != Some(&Opcode::EndOfProgram) {
            program.push(Instruction::sentinel(Opcode::EndOfProgram));
        }
        self.push_context(ProgramContext::new(program, silent));
    }

    /// Compile `source` in the program compile context and push it.
    pub fn run_program(&mut self, source: &str, name: &str, silent: bool) -> EngineResult<()> {
        // each program starts without locks from an earlier one
        if let Some(scripts) = self.host.scripts.as_deref_mut() {
            scripts.clear_context(PROGRAM_CONTEXT);
        }
        let parts = self.compile(source, PROGRAM_CONTEXT)?;
        let mut builder = ProgramBuilder::new();
        builder.add(parts);
        let program = builder.build();
        debug!(name, opcodes = program.len(), silent, "running program");
        self.push_program(program, silent);
        Ok(())
    }

    /// Compile an interactive command into the interpreter context. It runs
    /// once the interpreter is the current context again.
    pub fn run_command(&mut self, source: &str) -> EngineResult<()> {
        let parts = self.compile(source, INTERPRETER_CONTEXT)?;
        self.contexts.interpreter_mut().add_code(parts);
        Ok(())
    }

    fn compile(&mut self, source: &str, context: &str) -> EngineResult<Vec<program::CodePart>> {
        let started = Instant::now();
        let scripts = self
            .host
            .scripts
            .as_deref_mut()
            .ok_or(EngineError::HostUnavailable { collaborator: "script handler" })?;
        let result = scripts.compile(source, context, &CompileOptions::new());
        self.stats.compile += started.elapsed();
        Ok(result?)
    }

    fn push_context(&mut self, context: ProgramContext) {
        let pointers = self.variables.take_pointers();
        let current = self.contexts.current_mut();
        current.save_pointers(pointers);
        current.disable_active_fly_by_wire(self.host.bindings_mut());

        self.contexts.push(context);
        if let Some(bindings) = self.host.bindings.as_deref_mut() {
            bindings.set_input_lock(true);
        }
        debug!(depth = self.contexts.len(), "pushed program context");
    }

    /// Pop the current program context and hand its namespace back to the
    /// one below. Pointers the popped context defined are dropped; a saved
    /// pointer it shadowed is discarded too, disarming its trigger.
    fn pop_context(&mut self) {
        let Some(popped) = self.contexts.pop() else { return };
        popped.disable_active_fly_by_wire(self.host.bindings_mut());

        let defined = self.variables.take_pointers();
        let current = self.contexts.current_mut();
        for (name, variable) in current.take_saved_pointers() {
            if !defined.contains_key(&name) {
                self.variables.insert(variable);
                continue;
            }
            if let Some(Value::Address(Address::Trigger(entry))) = variable.value {
                current.remove_trigger(entry);
            }
            debug!(name = %name, "discarded shadowed pointer");
        }
        current.enable_active_fly_by_wire(self.host.bindings_mut());

        if self.contexts.len() == 1 {
            if let Some(bindings) = self.host.bindings.as_deref_mut() {
                bindings.set_input_lock(false);
            }
        }
        debug!(depth = self.contexts.len(), "popped program context");
    }

    fn unwind_programs(&mut self) {
        while self.contexts.len() > 1 {
            self.pop_context();
        }
    }

    /// Stop execution. `manual` aborts every program at once; otherwise the
    /// current program has reached its end and only it is popped. With no
    /// program running, the interpreter's triggers are cleared and its
    /// current statement skipped.
    pub fn break_execution(&mut self, manual: bool) {
        if self.contexts.len() > 1 {
            self.end_wait();
            if manual {
                self.unwind_programs();
                self.print(PROGRAM_ABORTED);
                if let Some(bindings) = self.host.bindings.as_deref_mut() {
                    bindings.unbind_all();
                }
                self.print_statistics();
            } else {
                let silent = self.contexts.current().silent;
                self.pop_context();
                if self.contexts.len() == 1 && !silent {
                    self.print(PROGRAM_ENDED);
                    self.print_statistics();
                }
            }
        } else {
            self.contexts.current_mut().clear_triggers();
            self.skip_current_instruction_id();
        }
    }

    pub fn context_depth(&self) -> usize {
        self.contexts.len()
    }

    pub fn current_context(&self) -> &ProgramContext {
        self.contexts.current()
    }

    /// True when no program is running and the interpreter has nothing queued.
    pub fn is_idle(&self) -> bool {
        self.contexts.len() == 1
            && self
                .contexts
                .current()
                .current_instruction()
                .is_none_or(|i| i.op.is_sentinel())
    }

    pub fn code_fragment(&self, context_lines: usize) -> Vec<String> {
        self.contexts.current().code_fragment(context_lines)
    }

    pub(crate) fn instruction_pointer(&self) -> usize {
        self.contexts.current().instruction_pointer
    }

    pub(crate) fn add_trigger(&mut self, entry: usize) {
        self.contexts.current_mut().add_trigger(entry);
    }

    pub(crate) fn remove_trigger(&mut self, entry: usize) {
        self.contexts.current_mut().remove_trigger(entry);
    }

    pub(crate) fn toggle_fly_by_wire(&mut self, name: &str, enabled: bool) {
        let bindings = self.host.bindings_mut();
        self.contexts.current_mut().toggle_fly_by_wire(name, enabled, bindings);
    }

    // ── Stack and variables ─────────────────────────────────────────

    pub fn push_value(&mut self, value: Value) {
        self.stack.push(Operand::Literal(value));
    }

    pub fn push_operand(&mut self, operand: Operand) {
        self.stack.push(operand);
    }

    pub fn pop_operand(&mut self) -> EngineResult<Operand> {
        self.stack.pop()
    }

    /// Pop and dereference: variable operands resolve through the table.
    pub fn pop_value(&mut self) -> EngineResult<Value> {
        match self.stack.pop()? {
            Operand::Literal(value) => Ok(value),
            Operand::Variable(name) => self.variables.value(&name).cloned(),
            Operand::Reserved => Err(EngineError::InvalidOperandType(
                "reserved stack slot holds no value".into(),
            )),
        }
    }

    pub fn set_value(&mut self, name: &str, value: Value) {
        self.variables.set(name, value);
    }

    pub fn get_value(&self, name: &str) -> EngineResult<&Value> {
        self.variables.value(name)
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut Stack {
        &mut self.stack
    }

    pub fn variables(&self) -> &VariableTable {
        &self.variables
    }

    pub fn variables_mut(&mut self) -> &mut VariableTable {
        &mut self.variables
    }

    pub fn functions_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.functions
    }

    /// Pop `argc` arguments, invoke the builtin `name`, push its result.
    pub fn call_builtin_function(&mut self, name: &str, argc: usize) -> EngineResult<()> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| EngineError::UndefinedFunction { name: name.to_string() })?;
        let mut args = Vec::with_capacity(argc);
        for _ in 0..argc {
            args.push(self.pop_value()?);
        }
        args.reverse();
        if let Some(result) = function(self, &args)? {
            self.push_value(result);
        }
        Ok(())
    }

    /// `Call` opcode body. Returns the instruction-pointer delta.
    pub(crate) fn call(&mut self, destination: &str, argc: usize) -> EngineResult<isize> {
        if !is_pointer_name(destination) {
            self.call_builtin_function(destination, argc)?;
            return Ok(1);
        }
        let entry = match self.variables.value(destination)? {
            Value::Address(Address::Function(entry)) => *entry,
            other => {
                return Err(EngineError::InvalidOperandType(format!(
                    "{} is not callable ({})", destination, other.type_name()
                )))
            }
        };
        let ip = self.instruction_pointer();
        self.push_value(Value::Address(Address::Return(ip + 1)));
        Ok(entry as isize - ip as isize)
    }

    /// `Return` opcode body: pop the result and return address, push the
    /// result back, jump to the caller.
    pub(crate) fn return_from_call(&mut self) -> EngineResult<isize> {
        let result = self.pop_value()?;
        let target = match self.stack.pop()? {
            Operand::Literal(Value::Address(Address::Return(target))) => target,
            other => {
                return Err(EngineError::InvalidOperandType(format!(
                    "expected a return address, found {other}"
                )))
            }
        };
        self.push_value(result);
        let ip = self.instruction_pointer();
        Ok(target as isize - ip as isize)
    }

    // ── Output ──────────────────────────────────────────────────────

    pub fn print(&mut self, text: &str) {
        self.host.print(text);
    }

    fn print_statistics(&mut self) {
        if !self.config.show_statistics {
            return;
        }
        let report = self.stats.take_report();
        for line in report.lines() {
            self.host.print(line);
        }
    }

    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn host_mut(&mut self) -> &mut Host {
        &mut self.host
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ScriptCompiler;
    use crate::host::BufferScreen;

    fn cpu_with_screen(config: EngineConfig) -> (Cpu, BufferScreen) {
        let screen = BufferScreen::new();
        let host = Host::new()
            .with_screen(screen.clone())
            .with_script_handler(ScriptCompiler::new());
        (Cpu::new(config, host), screen)
    }

    fn ins(op: Opcode, id: u32) -> Instruction {
        Instruction::new(op, id, id)
    }

    fn push_num(n: f64, id: u32) -> Instruction {
        ins(Opcode::Push(Operand::Literal(Value::Number(n))), id)
    }

    #[test]
    fn push_pop_round_trip_through_engine() {
        let (mut cpu, _) = cpu_with_screen(EngineConfig::default());
        cpu.push_value(Value::Number(1.0));
        cpu.push_value(Value::Text("two".into()));
        assert_eq!(cpu.pop_value().unwrap(), Value::Text("two".into()));
        assert_eq!(cpu.pop_value().unwrap(), Value::Number(1.0));
        assert!(matches!(cpu.pop_value(), Err(EngineError::StackUnderflow)));
    }

    #[test]
    fn pop_value_dereferences_variables() {
        let (mut cpu, _) = cpu_with_screen(EngineConfig::default());
        cpu.set_value("Alt", Value::Number(3.0));
        cpu.push_operand(Operand::from_token("$ALT"));
        assert_eq!(cpu.pop_value().unwrap(), Value::Number(3.0));
        cpu.push_operand(Operand::from_token("$missing"));
        assert!(matches!(cpu.pop_value(), Err(EngineError::UndefinedVariable { .. })));
    }

    #[test]
    fn unknown_builtin_is_undefined_function() {
        let (mut cpu, _) = cpu_with_screen(EngineConfig::default());
        match cpu.call_builtin_function("warpdrive", 0) {
            Err(EngineError::UndefinedFunction { name }) => assert_eq!(name, "warpdrive"),
            other => panic!("expected UndefinedFunction, got {:?}", other),
        }
    }

    #[test]
    fn builtin_call_consumes_arguments() {
        let (mut cpu, _) = cpu_with_screen(EngineConfig::default());
        cpu.push_value(Value::Number(-4.0));
        cpu.call_builtin_function("abs", 1).unwrap();
        assert_eq!(cpu.pop_value().unwrap(), Value::Number(4.0));
        assert!(cpu.stack().is_empty());
    }

    #[test]
    fn empty_program_is_not_pushed() {
        let (mut cpu, _) = cpu_with_screen(EngineConfig::default());
        cpu.push_program(Vec::new(), false);
        assert_eq!(cpu.context_depth(), 1);
    }

    #[test]
    fn natural_end_announces_once() {
        let (mut cpu, screen) = cpu_with_screen(EngineConfig::default());
        cpu.push_program(
            vec![ins(Opcode::Nop, 1), ins(Opcode::Nop, 2), Instruction::sentinel(Opcode::EndOfProgram)],
            false,
        );
        assert_eq!(cpu.context_depth(), 2);
        for _ in 0..3 {
            cpu.update(0.02);
        }
        assert_eq!(cpu.context_depth(), 1);
        assert_eq!(screen.count(PROGRAM_ENDED), 1);
    }

    #[test]
    fn silent_program_ends_quietly() {
        let (mut cpu, screen) = cpu_with_screen(EngineConfig::default());
        cpu.push_program(vec![ins(Opcode::Nop, 1)], true);
        cpu.update(0.02);
        assert_eq!(cpu.context_depth(), 1);
        assert_eq!(screen.count(PROGRAM_ENDED), 0);
    }

    #[test]
    fn instruction_cap_bounds_each_tick() {
        let config = EngineConfig { instructions_per_update: 3, ..EngineConfig::default() };
        let (mut cpu, _) = cpu_with_screen(config);
        let mut program: Vec<Instruction> = (1..=10).map(|i| ins(Opcode::Nop, i)).collect();
        program.push(Instruction::sentinel(Opcode::EndOfProgram));
        cpu.push_program(program, true);

        cpu.update(100.0);
        assert_eq!(cpu.current_context().instruction_pointer, 3);
        cpu.update(0.0);
        assert_eq!(cpu.current_context().instruction_pointer, 6);
    }

    #[test]
    fn wait_blocks_normal_flow_until_time_passes() {
        let (mut cpu, _) = cpu_with_screen(EngineConfig::default());
        cpu.push_program(
            vec![
                push_num(1.0, 1),
                ins(Opcode::Wait, 1),
                push_num(5.0, 2),
                ins(Opcode::Store("x".into()), 2),
            ],
            true,
        );
        cpu.update(0.5);
        assert_eq!(cpu.status(), Status::Waiting);
        assert!(cpu.get_value("x").is_err());
        cpu.update(0.4);
        assert_eq!(cpu.status(), Status::Waiting);
        cpu.update(0.7);
        assert_eq!(cpu.status(), Status::Running);
        assert_eq!(cpu.get_value("x").unwrap(), &Value::Number(5.0));
    }

    #[test]
    fn non_positive_wait_lasts_until_ended() {
        let (mut cpu, _) = cpu_with_screen(EngineConfig::default());
        cpu.start_wait(0.0);
        cpu.update(1000.0);
        assert_eq!(cpu.status(), Status::Waiting);
        cpu.end_wait();
        assert_eq!(cpu.status(), Status::Running);
    }

    #[test]
    fn interpreter_error_skips_only_the_statement() {
        let (mut cpu, screen) = cpu_with_screen(EngineConfig::default());
        cpu.run_command("set a to 1. set b to nothere + 1. set c to 3.").unwrap();
        cpu.update(0.02);
        cpu.update(0.02);
        assert_eq!(cpu.get_value("a").unwrap(), &Value::Number(1.0));
        assert!(cpu.get_value("b").is_err());
        assert_eq!(cpu.get_value("c").unwrap(), &Value::Number(3.0));
        assert!(screen.lines().iter().any(|l| l.contains("undefined variable: $nothere")));
        assert!(cpu.is_idle());
    }

    #[test]
    fn program_error_unwinds_to_interpreter() {
        let (mut cpu, screen) = cpu_with_screen(EngineConfig::default());
        cpu.run_program("wait 10.", "outer", false).unwrap();
        cpu.run_program("set x to 1 / 0.", "div", false).unwrap();
        assert_eq!(cpu.context_depth(), 3);
        cpu.update(0.02);
        assert_eq!(cpu.context_depth(), 1);
        assert_eq!(screen.count(PROGRAM_ABORTED), 1);
        assert_eq!(cpu.status(), Status::Running);
        assert!(cpu.stack().is_empty());
    }

    #[test]
    fn manual_break_with_only_interpreter_clears_triggers() {
        let (mut cpu, screen) = cpu_with_screen(EngineConfig::default());
        cpu.contexts.current_mut().add_trigger(0);
        cpu.break_execution(true);
        cpu.break_execution(true);
        assert!(cpu.current_context().triggers().is_empty());
        assert_eq!(screen.count(PROGRAM_ABORTED), 0);
        assert_eq!(cpu.context_depth(), 1);
    }

    #[test]
    fn out_of_range_ip_is_an_error() {
        let (mut cpu, screen) = cpu_with_screen(EngineConfig::default());
        cpu.push_program(vec![ins(Opcode::Jump(50), 1)], false);
        cpu.update(0.02);
        assert_eq!(cpu.context_depth(), 1);
        assert!(screen.lines().iter().any(|l| l.contains("outside the program")));
    }

    #[test]
    fn boot_resets_state() {
        let (mut cpu, _) = cpu_with_screen(EngineConfig::default());
        cpu.set_value("x", Value::Number(1.0));
        cpu.push_value(Value::Number(1.0));
        cpu.run_program("wait 5.", "w", true).unwrap();
        cpu.update(0.1);
        cpu.boot();
        assert_eq!(cpu.context_depth(), 1);
        assert!(cpu.variables().is_empty());
        assert!(cpu.stack().is_empty());
        assert_eq!(cpu.status(), Status::Running);
        assert_eq!(cpu.current_time(), 0.0);
    }

    #[test]
    fn missing_script_handler_is_reported() {
        let mut cpu = Cpu::new(EngineConfig::default(), Host::new());
        assert!(matches!(
            cpu.run_command("print 1."),
            Err(EngineError::HostUnavailable { collaborator: "script handler" })
        ));
    }
}
