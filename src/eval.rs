use std::collections::HashMap;

use miette::Diagnostic;
use thiserror::Error;

use crate::{
    Error,
    config::{Config, UndefinedFlags},
    parse::{Atom, Parser, TokenTree},
    system::{Arg, Arity, Env, NativeFn, Registry},
    template::Template,
    tree::TreeBuilder,
    value::{Value, ValueType},
    world::World,
};

#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("unknown function `{name}`")]
    #[diagnostic(code(tunascript::eval::unknown_function))]
    UnknownFunction { name: String },

    #[error("`{name}` takes {expected} argument(s), got {got}")]
    #[diagnostic(code(tunascript::eval::arity_mismatch))]
    ArityMismatch {
        name: String,
        expected: Arity,
        got: usize,
    },

    #[error("`{function}` expected a {expected}, got a {found}")]
    #[diagnostic(code(tunascript::eval::type_mismatch))]
    TypeMismatch {
        function: String,
        expected: &'static str,
        found: ValueType,
    },

    #[error("flag `{name}` was never set")]
    #[diagnostic(
        code(tunascript::eval::undefined_flag),
        help("set it first, or run without strict flags")
    )]
    UndefinedFlag { name: String },

    #[error("the host could not complete `{function}`")]
    #[diagnostic(code(tunascript::eval::host_call_failed))]
    HostCallFailed { function: String },

    #[error("function `{name}` is already registered")]
    #[diagnostic(code(tunascript::eval::duplicate_function))]
    DuplicateFunction { name: String },

    #[error("division by zero in `{function}`")]
    #[diagnostic(code(tunascript::eval::division_by_zero))]
    DivisionByZero { function: String },

    #[error("`{function}` overflowed")]
    #[diagnostic(code(tunascript::eval::overflow))]
    Overflow { function: String },
}

/// Named flag values. Names are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flags {
    values: HashMap<String, Value>,
}

impl Flags {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(&name.to_ascii_uppercase())
    }

    /// Reads a flag, applying `policy` when it was never written.
    pub fn read(&self, name: &str, policy: UndefinedFlags) -> Result<Value, EvalError> {
        match (self.get(name), policy) {
            (Some(value), _) => Ok(value.clone()),
            (None, UndefinedFlags::False) => Ok(Value::Bool(false)),
            (None, UndefinedFlags::Error) => Err(EvalError::UndefinedFlag {
                name: name.to_ascii_uppercase(),
            }),
        }
    }

    /// Returns the previous value, if any.
    pub fn set(&mut self, name: &str, value: Value) -> Option<Value> {
        self.values.insert(name.to_ascii_uppercase(), value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(&name.to_ascii_uppercase())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Flags in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        let mut entries: Vec<_> = self.values.iter().map(|(k, v)| (k.as_str(), v)).collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.into_iter()
    }
}

/// Evaluates scripts against a flag store and a borrowed host world.
///
/// Arguments are evaluated left to right before their call, with no short
/// circuiting, so `AND(INC($A), INC($B))` bumps both flags. Writes made
/// before an error are kept.
pub struct Interpreter<'w> {
    registry: Registry,
    flags: Flags,
    world: &'w mut dyn World,
    config: Config,
}

impl<'w> Interpreter<'w> {
    pub fn new(world: &'w mut dyn World) -> Result<Self, EvalError> {
        Self::with_config(world, Config::default())
    }

    pub fn with_config(world: &'w mut dyn World, config: Config) -> Result<Self, EvalError> {
        Ok(Interpreter {
            registry: Registry::with_builtins()?,
            flags: Flags::default(),
            world,
            config,
        })
    }

    /// Adds a host function next to the built-ins.
    pub fn register(&mut self, name: &str, arity: Arity, call: NativeFn) -> Result<(), EvalError> {
        self.registry.register(name, arity, call)
    }

    pub fn flags(&self) -> &Flags {
        &self.flags
    }

    pub fn flags_mut(&mut self) -> &mut Flags {
        &mut self.flags
    }

    pub fn call(&mut self, name: &str, args: &[Arg]) -> Result<Value, EvalError> {
        let mut env = Env {
            flags: &mut self.flags,
            world: &mut *self.world,
            undefined_flags: self.config.undefined_flags,
        };
        self.registry.call(&mut env, name, args)
    }

    pub fn evaluate(&mut self, tree: &TokenTree) -> Result<Value, EvalError> {
        match tree {
            TokenTree::Atom(Atom::Literal(value)) => Ok(value.clone()),
            TokenTree::Atom(Atom::Flag(name)) => {
                self.flags.read(name, self.config.undefined_flags)
            }
            TokenTree::Call { name, args } => {
                let args = args
                    .iter()
                    .map(|arg| match arg {
                        TokenTree::Atom(Atom::Flag(name)) => Ok(Arg::Flag(name.clone())),
                        other => self.evaluate(other).map(Arg::Value),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(name, &args)
            }
            TokenTree::Concat(parts) => {
                let mut out = String::new();
                for part in parts {
                    out.push_str(&self.evaluate(part)?.to_string());
                }
                Ok(Value::Str(out))
            }
        }
    }

    /// Runs one piece of text-dialect source, e.g. `$SET($HP, 10)`.
    pub fn exec(&mut self, source: &str) -> Result<Value, Error> {
        self.exec_named(None, source)
    }

    /// [`Interpreter::exec`], with `name` labelling `source` in diagnostics.
    pub fn exec_named(&mut self, name: Option<&str>, source: &str) -> Result<Value, Error> {
        let tree = TreeBuilder::new(name, source, self.config.max_depth).build()?;
        Ok(self.evaluate(&tree.lower())?)
    }

    /// Runs one expression-dialect condition or action, e.g. `$HP += 5`.
    pub fn eval_expr(&mut self, source: &str) -> Result<Value, Error> {
        self.eval_expr_named(None, source)
    }

    pub fn eval_expr_named(&mut self, name: Option<&str>, source: &str) -> Result<Value, Error> {
        let tree = Parser::new(name, source, self.config.max_depth).parse_expression()?;
        Ok(self.evaluate(&tree)?)
    }

    /// Renders text with its `$[[IF]]` blocks resolved and every kept
    /// fragment interpolated.
    pub fn expand(&mut self, source: &str) -> Result<String, Error> {
        self.expand_named(None, source)
    }

    pub fn expand_named(&mut self, name: Option<&str>, source: &str) -> Result<String, Error> {
        let template = Template::parse(name, source, self.config.max_depth)?;
        template.render(self)
    }

    /// Interpolates a fragment of text without trimming or classifying it.
    pub fn interpolate(&mut self, source: &str) -> Result<String, Error> {
        self.interpolate_named(None, source)
    }

    pub fn interpolate_named(&mut self, name: Option<&str>, source: &str) -> Result<String, Error> {
        let tree = TreeBuilder::new(name, source, self.config.max_depth).build()?;
        Ok(self.evaluate(&tree.lower_verbatim())?.to_string())
    }
}
