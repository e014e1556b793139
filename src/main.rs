use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use clap::Subcommand;
use miette::IntoDiagnostic;
use miette::WrapErr;
use tracing_subscriber::EnvFilter;
use tunascript::config::DEFAULT_MAX_DEPTH;
use tunascript::lex::is_ident_char;
use tunascript::{
    Config, Error, Interpreter, Lexer, MemoryWorld, TreeBuilder, UndefinedFlags, Value,
};

/// Runs and inspects TunaScript sources.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Deepest parenthesis nesting either parser accepts.
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,

    /// Treat reading a flag that was never set as an error.
    #[arg(long, global = true)]
    strict_flags: bool,

    /// Seeds a flag before running, e.g. `--flag HP=10`.
    #[arg(long = "flag", value_name = "NAME=VALUE", global = true, value_parser = parse_flag)]
    flags: Vec<(String, Value)>,

    /// Puts an item in the player's inventory before running.
    #[arg(long = "item", value_name = "LABEL", global = true)]
    items: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Prints the expression-dialect token stream.
    Tokenize { filename: PathBuf },
    /// Prints the text-dialect tree.
    Tree { filename: PathBuf },
    /// Prints each line's expression tree.
    Parse { filename: PathBuf },
    /// Runs each line as text-dialect source.
    Exec { filename: PathBuf },
    /// Runs each line as an expression.
    Eval { filename: PathBuf },
    /// Expands the file as conditional text.
    Expand { filename: PathBuf },
}

fn parse_flag(arg: &str) -> Result<(String, Value), String> {
    let Some((name, value)) = arg.split_once('=') else {
        return Err(format!("expected NAME=VALUE, got `{arg}`"));
    };
    let name = name.trim();
    if name.is_empty() || !name.chars().all(is_ident_char) {
        return Err(format!("`{name}` is not a flag name"));
    }
    Ok((name.to_ascii_uppercase(), Value::from_literal(value.trim())))
}

fn read(filename: &Path) -> miette::Result<String> {
    fs::read_to_string(filename)
        .into_diagnostic()
        .wrap_err_with(|| format!("reading `{}` failed", filename.display()))
}

/// Reports an error and exits: 65 for malformed input, 70 for a failed run.
fn fail(e: Error) -> ! {
    let code = match e {
        Error::Lex(_) | Error::Parse(_) => 65,
        Error::Eval(_) => 70,
    };
    eprintln!("{:?}", miette::Report::new(e));
    std::process::exit(code);
}

/// Non-blank lines, each with the name diagnostics give it: `file:line`.
fn lines<'a>(filename: &'a Path, source: &'a str) -> impl Iterator<Item = (String, &'a str)> {
    source
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(move |(n, line)| (format!("{}:{}", filename.display(), n + 1), line))
}

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("TUNASCRIPT_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config {
        max_depth: args.max_depth,
        undefined_flags: if args.strict_flags {
            UndefinedFlags::Error
        } else {
            UndefinedFlags::False
        },
    };

    let mut world = MemoryWorld::echoing();
    for item in &args.items {
        world.carry(item);
    }
    let mut interp = Interpreter::with_config(&mut world, config)?;
    for (name, value) in args.flags {
        interp.flags_mut().set(&name, value);
    }

    match args.command {
        Commands::Tokenize { filename } => {
            let file_contents = read(&filename)?;
            for token in Lexer::new(filename.to_str(), &file_contents) {
                match token {
                    Ok(token) => println!("{token}"),
                    Err(e) => {
                        eprintln!("[line {}] Error: Unterminated string", e.line());
                        fail(e.into());
                    }
                }
            }
        }
        Commands::Tree { filename } => {
            let file_contents = read(&filename)?;
            match TreeBuilder::new(filename.to_str(), &file_contents, config.max_depth).build() {
                Ok(tree) => print!("{tree}"),
                Err(e) => fail(e.into()),
            }
        }
        Commands::Parse { filename } => {
            let file_contents = read(&filename)?;
            for (name, line) in lines(&filename, &file_contents) {
                match tunascript::Parser::new(Some(&name), line, config.max_depth)
                    .parse_expression()
                {
                    Ok(tree) => println!("{tree}"),
                    Err(e) => fail(e.into()),
                }
            }
        }
        Commands::Exec { filename } => {
            let file_contents = read(&filename)?;
            for (name, line) in lines(&filename, &file_contents) {
                match interp.exec_named(Some(&name), line) {
                    Ok(value) => println!("{value}"),
                    Err(e) => fail(e),
                }
            }
        }
        Commands::Eval { filename } => {
            let file_contents = read(&filename)?;
            for (name, line) in lines(&filename, &file_contents) {
                match interp.eval_expr_named(Some(&name), line) {
                    Ok(value) => println!("{value}"),
                    Err(e) => fail(e),
                }
            }
        }
        Commands::Expand { filename } => {
            let file_contents = read(&filename)?;
            match interp.expand_named(filename.to_str(), &file_contents) {
                Ok(text) => print!("{text}"),
                Err(e) => fail(e),
            }
        }
    }

    for (name, value) in interp.flags().iter() {
        tracing::info!(flag = name, %value, "final");
    }
    Ok(())
}
