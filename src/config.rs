pub const DEFAULT_MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Deepest parenthesis nesting either parser accepts.
    pub max_depth: usize,
    pub undefined_flags: UndefinedFlags,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_depth: DEFAULT_MAX_DEPTH,
            undefined_flags: UndefinedFlags::default(),
        }
    }
}

/// What reading a flag that was never written yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UndefinedFlags {
    /// The flag reads as boolean `false`.
    #[default]
    False,
    /// Reading it is an [`EvalError::UndefinedFlag`](crate::EvalError::UndefinedFlag).
    Error,
}
