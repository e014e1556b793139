//! TunaScript: the small scripting language of an interactive-fiction engine.
//!
//! Two dialects share one evaluator. The text dialect is prose with `$FLAG`
//! references and `$FUNC(args)` calls; the expression dialect is an
//! operator language (`$HP += 5`, `$GOLD >= 3 && !$DOOR`) used for
//! conditions and actions. Both lower to a [`TokenTree`] that an
//! [`Interpreter`] evaluates against its flags and a host [`World`].

use miette::Diagnostic;

pub mod config;
pub mod eval;
pub mod lex;
pub mod parse;
pub mod system;
pub mod template;
pub mod tree;
pub mod value;
pub mod world;

pub use config::{Config, UndefinedFlags};
pub use eval::{EvalError, Flags, Interpreter};
pub use lex::{LexError, Lexer, Token, TokenKind};
pub use parse::{Atom, ParseError, Parser, TokenTree};
pub use system::{Arg, Arity, Env, NativeFn, Registry};
pub use template::Template;
pub use tree::{Tree, TreeBuilder};
pub use value::{Value, ValueType};
pub use world::{MemoryWorld, World};

/// Any failure from lexing, parsing or running a script.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Eval(#[from] EvalError),
}
