//! Collaborators the engine is driven against. The engine only talks to a
//! host through these traits; anything left unset is treated as unavailable
//! and the corresponding effect becomes a logged no-op.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use crate::compiler::CompileError;
use crate::vm::program::CodePart;
use crate::vm::variables::VariableTable;
use crate::vm::{EngineError, EngineResult};

/// Text output device for prints and engine announcements.
pub trait Screen {
    fn print(&mut self, text: &str);
}

/// Real-time bindings between host state and script variables.
///
/// Every hook has a no-op default so hosts implement only what they bind.
pub trait BindingManager {
    /// Register host-bound variables after boot.
    fn load_bindings(&mut self, _variables: &mut VariableTable) {}

    /// Refresh bound variables before the tick's instructions run.
    fn pre_update(&mut self, _variables: &mut VariableTable) -> EngineResult<()> {
        Ok(())
    }

    /// Read back bound variables after the tick's instructions ran.
    fn post_update(&mut self, _variables: &mut VariableTable) -> EngineResult<()> {
        Ok(())
    }

    /// Lock direct user input while a program owns the controls.
    fn set_input_lock(&mut self, _locked: bool) {}

    fn toggle_fly_by_wire(&mut self, _name: &str, _enabled: bool) {}

    fn unbind_all(&mut self) {}
}

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Line number reported for the first source line.
    pub first_line: u32,
}

impl CompileOptions {
    pub fn new() -> Self {
        CompileOptions { first_line: 1 }
    }
}

/// Turns source text into linkable code parts.
pub trait ScriptHandler {
    fn compile(
        &mut self,
        source: &str,
        context: &str,
        options: &CompileOptions,
    ) -> Result<Vec<CodePart>, CompileError>;

    /// Forget compile-time state remembered for `context`.
    fn clear_context(&mut self, context: &str);
}

#[derive(Default)]
pub struct Host {
    pub screen: Option<Box<dyn Screen>>,
    pub bindings: Option<Box<dyn BindingManager>>,
    pub scripts: Option<Box<dyn ScriptHandler>>,
}

impl Host {
    pub fn new() -> Self {
        Host::default()
    }

    pub fn with_screen(mut self, screen: impl Screen + 'static) -> Self {
        self.screen = Some(Box::new(screen));
        self
    }

    pub fn with_bindings(mut self, bindings: impl BindingManager + 'static) -> Self {
        self.bindings = Some(Box::new(bindings));
        self
    }

    pub fn with_script_handler(mut self, scripts: impl ScriptHandler + 'static) -> Self {
        self.scripts = Some(Box::new(scripts));
        self
    }

    pub fn bindings_mut(&mut self) -> Option<&mut dyn BindingManager> {
        match self.bindings.as_deref_mut() {
            Some(bindings) => Some(bindings),
            None => None,
        }
    }

    pub fn print(&mut self, text: &str) {
        match self.screen.as_deref_mut() {
            Some(screen) => screen.print(text),
            None => {
                let err = EngineError::HostUnavailable { collaborator: "screen" };
                debug!(error = %err, text, "dropped screen output");
            }
        }
    }
}

/// Writes every line to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutScreen;

impl Screen for StdoutScreen {
    fn print(&mut self, text: &str) {
        println!("{text}");
    }
}

/// Collects printed lines in memory. Clones share the same buffer, so a host
/// can keep one handle after moving the other into the engine.
#[derive(Debug, Default, Clone)]
pub struct BufferScreen {
    lines: Rc<RefCell<Vec<String>>>,
}

impl BufferScreen {
    pub fn new() -> Self {
        BufferScreen::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }

    pub fn count(&self, text: &str) -> usize {
        self.lines.borrow().iter().filter(|line| line.as_str() == text).count()
    }

    pub fn clear(&self) {
        self.lines.borrow_mut().clear();
    }
}

impl Screen for BufferScreen {
    fn print(&mut self, text: &str) {
        self.lines.borrow_mut().push(text.to_string());
    }
}
