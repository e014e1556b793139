//! The function registry and the built-in catalogue.

use std::{cmp::Ordering, collections::HashMap, fmt::Display};

use crate::{
    config::UndefinedFlags,
    eval::{EvalError, Flags},
    lex::is_ident_char,
    value::Value,
    world::World,
};

/// A native function. Arity is checked before it is called.
pub type NativeFn = fn(&mut Env<'_>, &[Arg]) -> Result<Value, EvalError>;

/// An evaluated argument. Flag references are passed unresolved so that
/// writers like `SET` and `INC` can name their target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Value(Value),
    Flag(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub required: usize,
    pub optional: usize,
}

impl Arity {
    pub const fn exactly(count: usize) -> Self {
        Arity {
            required: count,
            optional: 0,
        }
    }

    pub const fn between(required: usize, optional: usize) -> Self {
        Arity { required, optional }
    }

    pub fn accepts(&self, count: usize) -> bool {
        count >= self.required && count <= self.required + self.optional
    }
}

impl Display for Arity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.optional {
            0 => write!(f, "{}", self.required),
            n => write!(f, "{} to {}", self.required, self.required + n),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub arity: Arity,
    pub call: NativeFn,
}

/// What a native function can reach while it runs.
pub struct Env<'a> {
    pub flags: &'a mut Flags,
    pub world: &'a mut dyn World,
    pub undefined_flags: UndefinedFlags,
}

impl Env<'_> {
    /// Resolves an argument, reading flags under the configured policy.
    pub fn value(&self, arg: &Arg) -> Result<Value, EvalError> {
        match arg {
            Arg::Value(value) => Ok(value.clone()),
            Arg::Flag(name) => self.flags.read(name, self.undefined_flags),
        }
    }

    /// Resolves the flag a reader asks about. Bare identifier text reads the
    /// flag of that name, matching what [`Env::target`] writes.
    pub fn subject(&self, arg: &Arg) -> Result<Value, EvalError> {
        match arg {
            Arg::Value(Value::Str(name)) if is_flag_name(name.trim()) => {
                self.flags.read(name.trim(), self.undefined_flags)
            }
            other => self.value(other),
        }
    }

    /// The flag an argument names. Bare identifier text names a flag too, so
    /// `SET(HP, 3)` and `SET($HP, 3)` agree.
    pub fn target(&self, function: &str, arg: &Arg) -> Result<String, EvalError> {
        match arg {
            Arg::Flag(name) => Ok(name.to_ascii_uppercase()),
            Arg::Value(Value::Str(name)) if is_flag_name(name.trim()) => {
                Ok(name.trim().to_ascii_uppercase())
            }
            Arg::Value(other) => Err(mismatch(function, "flag", other)),
        }
    }
}

fn is_flag_name(text: &str) -> bool {
    !text.is_empty() && text.chars().all(is_ident_char)
}

/// Name-keyed function table. Names are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    functions: HashMap<String, Function>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Result<Self, EvalError> {
        let mut registry = Self::new();
        for (name, arity, call) in BUILTINS {
            registry.register(name, *arity, *call)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, name: &str, arity: Arity, call: NativeFn) -> Result<(), EvalError> {
        let name = name.to_ascii_uppercase();
        if self.functions.contains_key(&name) {
            return Err(EvalError::DuplicateFunction { name });
        }
        self.functions.insert(name.clone(), Function { name, arity, call });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.functions.get(&name.to_ascii_uppercase())
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn call(&self, env: &mut Env<'_>, name: &str, args: &[Arg]) -> Result<Value, EvalError> {
        let Some(function) = self.get(name) else {
            return Err(EvalError::UnknownFunction {
                name: name.to_ascii_uppercase(),
            });
        };
        if !function.arity.accepts(args.len()) {
            return Err(arity(&function.name, function.arity, args.len()));
        }
        tracing::debug!(function = %function.name, args = args.len(), "call");
        (function.call)(env, args)
    }
}

const BUILTINS: &[(&str, Arity, NativeFn)] = &[
    ("FLAG_ENABLED", Arity::exactly(1), flag_enabled),
    ("FLAG_DISABLED", Arity::exactly(1), flag_disabled),
    ("FLAG_IS", Arity::exactly(2), flag_is),
    ("FLAG_LESS_THAN", Arity::exactly(2), flag_less_than),
    ("FLAG_GREATER_THAN", Arity::exactly(2), flag_greater_than),
    ("IN_INVEN", Arity::exactly(1), in_inven),
    ("ENABLE", Arity::exactly(1), enable),
    ("DISABLE", Arity::exactly(1), disable),
    ("INC", Arity::between(1, 1), inc),
    ("DEC", Arity::between(1, 1), dec),
    ("SET", Arity::exactly(2), set),
    ("MOVE", Arity::exactly(2), move_to),
    ("OUTPUT", Arity::exactly(1), output),
    ("ADD", Arity::exactly(2), add),
    ("SUB", Arity::exactly(2), sub),
    ("MULT", Arity::exactly(2), mult),
    ("DIV", Arity::exactly(2), div),
    ("AND", Arity::exactly(2), and),
    ("OR", Arity::exactly(2), or),
    ("NOT", Arity::exactly(1), not),
];

fn mismatch(function: &str, expected: &'static str, found: &Value) -> EvalError {
    EvalError::TypeMismatch {
        function: function.to_string(),
        expected,
        found: found.value_type(),
    }
}

fn arity(function: &str, expected: Arity, got: usize) -> EvalError {
    EvalError::ArityMismatch {
        name: function.to_string(),
        expected,
        got,
    }
}

fn number(env: &Env<'_>, function: &str, arg: &Arg) -> Result<i64, EvalError> {
    match env.value(arg)? {
        Value::Number(n) => Ok(n),
        other => Err(mismatch(function, "number", &other)),
    }
}

fn arithmetic(
    env: &Env<'_>,
    function: &str,
    args: &[Arg],
    op: fn(i64, i64) -> Option<i64>,
) -> Result<Value, EvalError> {
    let [lhs, rhs] = args else {
        return Err(arity(function, Arity::exactly(2), args.len()));
    };
    let (lhs, rhs) = (number(env, function, lhs)?, number(env, function, rhs)?);
    op(lhs, rhs)
        .map(Value::Number)
        .ok_or_else(|| EvalError::Overflow {
            function: function.to_string(),
        })
}

pub fn add(env: &mut Env<'_>, args: &[Arg]) -> Result<Value, EvalError> {
    arithmetic(env, "ADD", args, i64::checked_add)
}

pub fn sub(env: &mut Env<'_>, args: &[Arg]) -> Result<Value, EvalError> {
    arithmetic(env, "SUB", args, i64::checked_sub)
}

pub fn mult(env: &mut Env<'_>, args: &[Arg]) -> Result<Value, EvalError> {
    arithmetic(env, "MULT", args, i64::checked_mul)
}

pub fn div(env: &mut Env<'_>, args: &[Arg]) -> Result<Value, EvalError> {
    if let [_, rhs] = args {
        if number(env, "DIV", rhs)? == 0 {
            return Err(EvalError::DivisionByZero {
                function: "DIV".to_string(),
            });
        }
    }
    arithmetic(env, "DIV", args, i64::checked_div)
}

fn unary(env: &Env<'_>, function: &str, args: &[Arg]) -> Result<Value, EvalError> {
    match args {
        [arg] => env.value(arg),
        _ => Err(arity(function, Arity::exactly(1), args.len())),
    }
}

fn binary(env: &Env<'_>, function: &str, args: &[Arg]) -> Result<(Value, Value), EvalError> {
    match args {
        [lhs, rhs] => Ok((env.value(lhs)?, env.value(rhs)?)),
        _ => Err(arity(function, Arity::exactly(2), args.len())),
    }
}

pub fn and(env: &mut Env<'_>, args: &[Arg]) -> Result<Value, EvalError> {
    let (lhs, rhs) = binary(env, "AND", args)?;
    Ok(Value::Bool(lhs.truthy() && rhs.truthy()))
}

pub fn or(env: &mut Env<'_>, args: &[Arg]) -> Result<Value, EvalError> {
    let (lhs, rhs) = binary(env, "OR", args)?;
    Ok(Value::Bool(lhs.truthy() || rhs.truthy()))
}

pub fn not(env: &mut Env<'_>, args: &[Arg]) -> Result<Value, EvalError> {
    Ok(Value::Bool(!unary(env, "NOT", args)?.truthy()))
}

/// A flag reader's operands: the flag asked about, then what it is compared
/// with, if anything.
fn subject(env: &Env<'_>, function: &str, args: &[Arg]) -> Result<Value, EvalError> {
    match args {
        [flag] => env.subject(flag),
        _ => Err(arity(function, Arity::exactly(1), args.len())),
    }
}

fn subject_and_value(env: &Env<'_>, function: &str, args: &[Arg]) -> Result<(Value, Value), EvalError> {
    match args {
        [flag, value] => Ok((env.subject(flag)?, env.value(value)?)),
        _ => Err(arity(function, Arity::exactly(2), args.len())),
    }
}

pub fn flag_enabled(env: &mut Env<'_>, args: &[Arg]) -> Result<Value, EvalError> {
    Ok(Value::Bool(subject(env, "FLAG_ENABLED", args)?.truthy()))
}

pub fn flag_disabled(env: &mut Env<'_>, args: &[Arg]) -> Result<Value, EvalError> {
    Ok(Value::Bool(!subject(env, "FLAG_DISABLED", args)?.truthy()))
}

pub fn flag_is(env: &mut Env<'_>, args: &[Arg]) -> Result<Value, EvalError> {
    let (lhs, rhs) = subject_and_value(env, "FLAG_IS", args)?;
    Ok(Value::Bool(lhs.loosely_equals(&rhs)))
}

/// Numbers (and anything that reads as one) compare numerically, two
/// strings compare lexicographically.
fn ordering(env: &Env<'_>, function: &str, args: &[Arg]) -> Result<Ordering, EvalError> {
    let (lhs, rhs) = subject_and_value(env, function, args)?;
    match (lhs.as_number(), rhs.as_number()) {
        (Some(a), Some(b)) => Ok(a.cmp(&b)),
        _ => match (&lhs, &rhs) {
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (offending, _) if offending.as_number().is_none() => {
                Err(mismatch(function, "number", offending))
            }
            (_, offending) => Err(mismatch(function, "number", offending)),
        },
    }
}

pub fn flag_less_than(env: &mut Env<'_>, args: &[Arg]) -> Result<Value, EvalError> {
    Ok(Value::Bool(ordering(env, "FLAG_LESS_THAN", args)?.is_lt()))
}

pub fn flag_greater_than(env: &mut Env<'_>, args: &[Arg]) -> Result<Value, EvalError> {
    Ok(Value::Bool(ordering(env, "FLAG_GREATER_THAN", args)?.is_gt()))
}

pub fn in_inven(env: &mut Env<'_>, args: &[Arg]) -> Result<Value, EvalError> {
    let label = unary(env, "IN_INVEN", args)?.to_string();
    Ok(Value::Bool(env.world.in_inventory(label.trim())))
}

fn write(env: &mut Env<'_>, function: &str, target: &Arg, value: Value) -> Result<Value, EvalError> {
    let name = env.target(function, target)?;
    tracing::debug!(flag = %name, %value, "write");
    env.flags.set(&name, value.clone());
    Ok(value)
}

pub fn enable(env: &mut Env<'_>, args: &[Arg]) -> Result<Value, EvalError> {
    match args {
        [target] => write(env, "ENABLE", target, Value::Bool(true)),
        _ => Err(arity("ENABLE", Arity::exactly(1), args.len())),
    }
}

pub fn disable(env: &mut Env<'_>, args: &[Arg]) -> Result<Value, EvalError> {
    match args {
        [target] => write(env, "DISABLE", target, Value::Bool(false)),
        _ => Err(arity("DISABLE", Arity::exactly(1), args.len())),
    }
}

pub fn set(env: &mut Env<'_>, args: &[Arg]) -> Result<Value, EvalError> {
    match args {
        [target, value] => {
            let value = env.value(value)?;
            write(env, "SET", target, value)
        }
        _ => Err(arity("SET", Arity::exactly(2), args.len())),
    }
}

/// Shared by `INC` and `DEC`. An unset target counts from zero.
fn step(
    env: &mut Env<'_>,
    function: &str,
    args: &[Arg],
    op: fn(i64, i64) -> Option<i64>,
) -> Result<Value, EvalError> {
    let (target, amount) = match args {
        [target] => (target, 1),
        [target, amount] => (target, number(env, function, amount)?),
        _ => return Err(arity(function, Arity::between(1, 1), args.len())),
    };
    let name = env.target(function, target)?;
    let current = match env.flags.get(&name) {
        None => 0,
        Some(Value::Number(n)) => *n,
        Some(other) => return Err(mismatch(function, "number", other)),
    };
    let next = op(current, amount).ok_or_else(|| EvalError::Overflow {
        function: function.to_string(),
    })?;
    write(env, function, target, Value::Number(next))
}

pub fn inc(env: &mut Env<'_>, args: &[Arg]) -> Result<Value, EvalError> {
    step(env, "INC", args, i64::checked_add)
}

pub fn dec(env: &mut Env<'_>, args: &[Arg]) -> Result<Value, EvalError> {
    step(env, "DEC", args, i64::checked_sub)
}

pub fn move_to(env: &mut Env<'_>, args: &[Arg]) -> Result<Value, EvalError> {
    let (label, destination) = binary(env, "MOVE", args)?;
    let moved = env
        .world
        .move_to(label.to_string().trim(), destination.to_string().trim());
    Ok(Value::Bool(moved))
}

pub fn output(env: &mut Env<'_>, args: &[Arg]) -> Result<Value, EvalError> {
    let text = unary(env, "OUTPUT", args)?.to_string();
    if !env.world.output(&text) {
        return Err(EvalError::HostCallFailed {
            function: "OUTPUT".to_string(),
        });
    }
    Ok(Value::Bool(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::MemoryWorld;

    fn run(registry: &Registry, flags: &mut Flags, name: &str, args: &[Arg]) -> Result<Value, EvalError> {
        let mut world = MemoryWorld::new();
        let mut env = Env {
            flags,
            world: &mut world,
            undefined_flags: UndefinedFlags::False,
        };
        registry.call(&mut env, name, args)
    }

    fn num(n: i64) -> Arg {
        Arg::Value(Value::Number(n))
    }

    #[test]
    fn catalogue_is_complete() {
        let registry = Registry::with_builtins().unwrap();
        assert_eq!(registry.len(), 20);
        assert_eq!(registry.get("flag_is").unwrap().arity, Arity::exactly(2));
        assert_eq!(registry.get("INC").unwrap().arity, Arity::between(1, 1));
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = Registry::with_builtins().unwrap();
        let err = registry.register("add", Arity::exactly(2), add).unwrap_err();
        assert_eq!(
            err,
            EvalError::DuplicateFunction {
                name: "ADD".to_string()
            }
        );
    }

    #[test]
    fn arity_is_checked_before_the_call() {
        let registry = Registry::with_builtins().unwrap();
        let mut flags = Flags::default();
        let err = run(&registry, &mut flags, "SET", &[Arg::Flag("HP".into())]).unwrap_err();
        assert_eq!(
            err,
            EvalError::ArityMismatch {
                name: "SET".to_string(),
                expected: Arity::exactly(2),
                got: 1
            }
        );
        assert!(flags.is_empty());
    }

    #[test]
    fn unknown_function() {
        let registry = Registry::with_builtins().unwrap();
        let mut flags = Flags::default();
        assert!(matches!(
            run(&registry, &mut flags, "nope", &[]),
            Err(EvalError::UnknownFunction { name }) if name == "NOPE"
        ));
    }

    #[test]
    fn arithmetic_is_checked() {
        let registry = Registry::with_builtins().unwrap();
        let mut flags = Flags::default();
        assert_eq!(run(&registry, &mut flags, "MULT", &[num(6), num(7)]), Ok(Value::Number(42)));
        assert_eq!(run(&registry, &mut flags, "DIV", &[num(7), num(2)]), Ok(Value::Number(3)));
        assert!(matches!(
            run(&registry, &mut flags, "DIV", &[num(1), num(0)]),
            Err(EvalError::DivisionByZero { .. })
        ));
        assert!(matches!(
            run(&registry, &mut flags, "ADD", &[num(i64::MAX), num(1)]),
            Err(EvalError::Overflow { .. })
        ));
        assert!(matches!(
            run(&registry, &mut flags, "SUB", &[Arg::Value("x".into()), num(1)]),
            Err(EvalError::TypeMismatch { expected: "number", .. })
        ));
    }

    #[test]
    fn inc_and_dec_count_from_zero() {
        let registry = Registry::with_builtins().unwrap();
        let mut flags = Flags::default();
        let hp = Arg::Flag("HP".into());
        assert_eq!(run(&registry, &mut flags, "INC", &[hp.clone()]), Ok(Value::Number(1)));
        assert_eq!(run(&registry, &mut flags, "INC", &[hp.clone(), num(5)]), Ok(Value::Number(6)));
        assert_eq!(run(&registry, &mut flags, "DEC", &[hp.clone(), num(10)]), Ok(Value::Number(-4)));
        assert_eq!(flags.get("hp"), Some(&Value::Number(-4)));

        flags.set("NAME", Value::from("bob"));
        assert!(matches!(
            run(&registry, &mut flags, "INC", &[Arg::Flag("NAME".into())]),
            Err(EvalError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn bare_text_names_a_target() {
        let registry = Registry::with_builtins().unwrap();
        let mut flags = Flags::default();
        run(&registry, &mut flags, "ENABLE", &[Arg::Value(" door ".into())]).unwrap();
        assert_eq!(flags.get("DOOR"), Some(&Value::Bool(true)));
        assert!(matches!(
            run(&registry, &mut flags, "ENABLE", &[num(3)]),
            Err(EvalError::TypeMismatch { expected: "flag", .. })
        ));
    }

    #[test]
    fn comparisons() {
        let registry = Registry::with_builtins().unwrap();
        let mut flags = Flags::default();
        let hp = Arg::Flag("HP".into());
        assert_eq!(
            run(&registry, &mut flags, "FLAG_GREATER_THAN", &[hp.clone(), num(5)]),
            Ok(Value::Bool(false))
        );
        assert_eq!(
            run(&registry, &mut flags, "FLAG_LESS_THAN", &[Arg::Value("an apple".into()), Arg::Value("a pear".into())]),
            Ok(Value::Bool(true))
        );
        assert!(matches!(
            run(&registry, &mut flags, "FLAG_LESS_THAN", &[num(1), Arg::Value("pear".into())]),
            Err(EvalError::TypeMismatch { .. })
        ));
        assert_eq!(
            run(&registry, &mut flags, "FLAG_IS", &[hp, Arg::Value(Value::Bool(false))]),
            Ok(Value::Bool(true))
        );
    }

    #[test]
    fn readers_take_bare_names_like_writers() {
        let registry = Registry::with_builtins().unwrap();
        let mut flags = Flags::default();
        let door = || Arg::Value("door".into());
        run(&registry, &mut flags, "ENABLE", &[door()]).unwrap();
        assert_eq!(run(&registry, &mut flags, "FLAG_ENABLED", &[door()]), Ok(Value::Bool(true)));
        run(&registry, &mut flags, "DISABLE", &[door()]).unwrap();
        assert_eq!(run(&registry, &mut flags, "FLAG_DISABLED", &[door()]), Ok(Value::Bool(true)));

        run(&registry, &mut flags, "SET", &[Arg::Value("hp".into()), num(10)]).unwrap();
        let hp = || Arg::Value(" HP ".into());
        assert_eq!(run(&registry, &mut flags, "FLAG_IS", &[hp(), num(10)]), Ok(Value::Bool(true)));
        assert_eq!(run(&registry, &mut flags, "FLAG_LESS_THAN", &[hp(), num(11)]), Ok(Value::Bool(true)));
        assert_eq!(run(&registry, &mut flags, "FLAG_GREATER_THAN", &[hp(), num(11)]), Ok(Value::Bool(false)));

        // only the flag position resolves; the compared value stays text
        flags.set("NAME", Value::from("hp"));
        assert_eq!(
            run(&registry, &mut flags, "FLAG_IS", &[Arg::Value("name".into()), Arg::Value("hp".into())]),
            Ok(Value::Bool(true))
        );
    }

    #[test]
    fn host_calls_reach_the_world() {
        let registry = Registry::with_builtins().unwrap();
        let mut flags = Flags::default();
        let mut world = MemoryWorld::new();
        world.carry("LAMP");
        let mut env = Env {
            flags: &mut flags,
            world: &mut world,
            undefined_flags: UndefinedFlags::False,
        };
        assert_eq!(
            registry.call(&mut env, "IN_INVEN", &[Arg::Value("lamp".into())]),
            Ok(Value::Bool(true))
        );
        assert_eq!(
            registry.call(&mut env, "MOVE", &[Arg::Value("lamp".into()), Arg::Value("cellar".into())]),
            Ok(Value::Bool(true))
        );
        assert_eq!(
            registry.call(&mut env, "OUTPUT", &[Arg::Value("It is dark.".into())]),
            Ok(Value::Bool(true))
        );
        assert_eq!(world.transcript(), ["It is dark.".to_string()]);
        assert_eq!(world.location("LAMP"), Some("CELLAR"));
    }
}
