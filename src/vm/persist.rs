//! Saving and restoring user variables.
//!
//! Values are stored as source literals and come back through the compiler
//! as ordinary `set` statements, so reloaded state takes the same path as
//! live user code.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::program::ProgramBuilder;
use super::{Cpu, PROGRAM_CONTEXT};
use crate::lexer::Token;
use super::value::{SIGIL, Value};
use super::variables::has_internal_marker;

pub const RELOAD_CONTEXT: &str = "reloadvariables";

static NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z_][a-z0-9_]*$").unwrap()
});

static LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(?:-?[0-9]+(?:\.[0-9]+)?(?:[eE][+-]?[0-9]+)?|"(?:[^"\\\n]|\\.)*"|true|false)$"#)
        .unwrap()
});

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("invalid variable name '{0}'")]
    InvalidName(String),
    #[error("{name}: {type_name} values cannot be persisted")]
    Unencodable { name: String, type_name: String },
    #[error("{name}: '{encoded}' is not a literal")]
    InvalidLiteral { name: String, encoded: String },
    #[error("malformed state document: {0}")]
    Document(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub context: ContextNode,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextNode {
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

impl PersistedState {
    pub fn from_json(text: &str) -> Result<Self, PersistError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, PersistError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// One `set` statement per saved variable. Entries that fail
    /// validation are logged and left out.
    pub fn reload_statements(&self) -> Vec<String> {
        self.context
            .variables
            .iter()
            .filter_map(|(name, encoded)| match validate(name, encoded) {
                Ok(()) => Some(format!("set {name} to {encoded}.")),
                Err(err) => {
                    warn!(error = %err, "skipping persisted variable");
                    None
                }
            })
            .collect()
    }
}

fn validate(name: &str, encoded: &str) -> Result<(), PersistError> {
    if !NAME.is_match(name) || Token::keyword(name).is_some() {
        return Err(PersistError::InvalidName(name.to_string()));
    }
    if !LITERAL.is_match(encoded) {
        return Err(PersistError::InvalidLiteral { name: name.to_string(), encoded: encoded.to_string() });
    }
    Ok(())
}

fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

/// Render `value` as a literal the compiler reads back to the same value.
pub fn encode_value(name: &str, value: &Value) -> Result<String, PersistError> {
    match value {
        Value::Number(n) if n.is_finite() => Ok(format!("{n}")),
        Value::Text(s) => Ok(quote(s)),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(PersistError::Unencodable {
            name: name.to_string(),
            type_name: other.type_name().to_string(),
        }),
    }
}

impl Cpu {
    /// Snapshot every removable user variable without internal markers.
    pub fn save_state(&self) -> PersistedState {
        let mut state = PersistedState::default();
        for variable in self.variables().iter() {
            if variable.is_bound() || has_internal_marker(&variable.name) {
                continue;
            }
            let Some(value) = &variable.value else { continue };
            let name = variable.name.trim_start_matches(SIGIL);
            match encode_value(name, value) {
                Ok(encoded) => {
                    state.context.variables.insert(name.to_string(), encoded);
                }
                Err(err) => debug!(error = %err, "not persisted"),
            }
        }
        state
    }

    /// Serialize the snapshot. Failures are logged and yield `None`.
    pub fn save_document(&self) -> Option<String> {
        match self.save_state().to_json() {
            Ok(json) => Some(json),
            Err(err) => {
                error!(error = %err, "failed to save state");
                None
            }
        }
    }

    /// Queue the saved variables for re-creation. They exist once the
    /// silent reload program has run on a following tick.
    ///
    /// Each entry is compiled on its own, so one that fails is skipped
    /// without costing the rest.
    pub fn load_state(&mut self, state: &PersistedState) {
        if let Some(scripts) = self.host.scripts.as_deref_mut() {
            scripts.clear_context(PROGRAM_CONTEXT);
        }
        let mut builder = ProgramBuilder::new();
        let mut loaded = 0;
        for statement in state.reload_statements() {
            match self.compile(&statement, PROGRAM_CONTEXT) {
                Ok(parts) => {
                    builder.add(parts);
                    loaded += 1;
                }
                Err(err) => warn!(error = %err, statement = %statement, "skipping persisted variable"),
            }
        }
        debug!(context = RELOAD_CONTEXT, loaded, "reloading persisted variables");
        self.push_program(builder.build(), true);
    }

    pub fn load_document(&mut self, json: &str) {
        match PersistedState::from_json(json) {
            Ok(state) => self.load_state(&state),
            Err(err) => error!(error = %err, "failed to load state"),
        }
    }
}
