//! exprjit internals.
//!
//! This is a deliberately small just-in-time compiler: it takes one
//! arithmetic expression over constants, variables, and named functions,
//! plus a table mapping each free name to an absolute 32-bit address, and
//! turns it into a callable ARM A32 subroutine. The pipeline is strictly
//! linear:
//!
//!  - source text is parsed into an [ExpressionTree] ([parsing])
//!  - the tree is _lowered_ into a stack-machine [ir::PseudoProgram],
//!    resolving every name against the [SymbolTable] on the way
//!  - the pseudo-instructions are encoded into little-endian A32 words
//!    ([codegen]), framed as an AAPCS subroutine that leaves its result
//!    in r0
//!
//! Mapping the output buffer executable and flushing the instruction cache
//! are the host's problem; this crate only produces the bytes.

use std::error::Error;
use std::str::FromStr;

use log::debug;
use structopt::StructOpt;

pub mod codegen;
pub mod errors;
pub mod ir;
pub mod parsing;
pub mod symbols;

mod asm;

pub use crate::codegen::CodeGenerator;
pub use crate::errors::CompilationError;
pub use crate::parsing::{parse, Expression, ExpressionTree};
pub use crate::symbols::SymbolTable;

/// Compiles an expression to ARM machine code, resolving free names against
/// `symbols`.
///
/// The returned bytes are a complete subroutine; jump to them under AAPCS
/// and the expression's value comes back in r0. On any error nothing is
/// emitted.
///
/// ```
/// use exprjit::{compile_expression, SymbolTable};
///
/// let code = compile_expression("(1+2)*3", &SymbolTable::new()).unwrap();
/// assert_eq!(code.len() % 4, 0);
/// ```
pub fn compile_expression(
    expression: &str,
    symbols: &SymbolTable,
) -> Result<Vec<u8>, CompilationError> {
    let tree = parsing::parse(expression)?;
    debug!("parsed {} nodes", tree.node_count());

    let program = ir::lower(&tree, symbols)?;
    debug!(
        "lowered to {} pseudo-instructions, {} bytes of code",
        program.instructions().len(),
        program.encoded_len()
    );

    let mut gen = CodeGenerator::new();
    Ok(gen.compile(&program).to_vec())
}

/// Like [compile_expression], but writes into a caller-provided buffer and
/// returns the number of bytes written.
///
/// # Panics
///
/// If `out_buffer` is smaller than the emitted code. An
/// [ir::PseudoProgram::encoded_len] gives the exact size up front, and
/// `12 + 28 * nodes` bytes is a safe upper bound.
pub fn compile_into(
    expression: &str,
    symbols: &SymbolTable,
    out_buffer: &mut [u8],
) -> Result<usize, CompilationError> {
    let code = compile_expression(expression, symbols)?;
    out_buffer[..code.len()].copy_from_slice(&code);
    Ok(code.len())
}

/// Command-line options.
#[derive(Debug, StructOpt)]
#[structopt(
    name = "exprjit",
    about = "Compiles arithmetic expressions to 32-bit ARM machine code."
)]
pub struct Opt {
    /// The expression to compile, e.g. "(1+a)*c + div(2+4,2)"
    expression: String,

    /// Defines a symbol, e.g. --symbol a=0x2000F000. Repeatable.
    #[structopt(long = "symbol", number_of_values = 1, parse(try_from_str = parse_symbol_definition))]
    symbols: Vec<(String, u32)>,

    /// What to print: "asm" for an assembly listing, "words" for hex
    /// machine words
    #[structopt(long, default_value = "asm")]
    emit: Emit,

    /// Log the pipeline stages as they run
    #[structopt(short, long)]
    verbose: bool,
}

#[derive(Debug)]
enum Emit {
    Asm,
    Words,
}

impl FromStr for Emit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asm" => Ok(Emit::Asm),
            "words" => Ok(Emit::Words),
            other => Err(format!("unknown emit mode '{}'; try asm or words", other)),
        }
    }
}

fn parse_symbol_definition(definition: &str) -> Result<(String, u32), String> {
    let mut parts = definition.splitn(2, '=');
    let name = parts.next().unwrap_or_default();
    let address = parts
        .next()
        .ok_or_else(|| format!("'{}' is not of the form name=address", definition))?;

    if name.is_empty() {
        return Err(format!("'{}' has an empty symbol name", definition));
    }

    let address = if let Some(hex) = address.strip_prefix("0x") {
        u32::from_str_radix(hex, 16)
    } else {
        address.parse()
    }
    .map_err(|_| format!("'{}' is not a 32-bit address", address))?;

    Ok((name.to_string(), address))
}

/// CLI entry point: compile the expression and print the requested form.
pub fn run(opt: Opt) -> Result<(), Box<dyn Error>> {
    if opt.verbose {
        simplelog::SimpleLogger::init(log::LevelFilter::Debug, simplelog::Config::default())?;
    }

    let symbols: SymbolTable = opt.symbols.into_iter().collect();

    let tree = parsing::parse(&opt.expression)?;
    let program = ir::lower(&tree, &symbols)?;

    match opt.emit {
        Emit::Asm => print!("{}", program),
        Emit::Words => {
            let mut gen = CodeGenerator::new();
            for chunk in gen.compile(&program).chunks(4) {
                let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                println!("{:08x}", word);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_into_reports_bytes_written() {
        let mut buffer = [0u8; 256];
        let n = compile_into("1+2", &SymbolTable::new(), &mut buffer).unwrap();
        assert_eq!(n % 4, 0);
        assert!(n > 0);
        // Everything past the code is untouched.
        assert!(buffer[n..].iter().all(|&b| b == 0));
    }

    #[test]
    fn nothing_is_written_on_error() {
        let mut buffer = [0xAAu8; 64];
        let err = compile_into("1+", &SymbolTable::new(), &mut buffer);
        assert!(err.is_err());
        assert!(buffer.iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn symbol_definitions_parse_hex_and_decimal() {
        assert_eq!(
            parse_symbol_definition("a=0x2000F000").unwrap(),
            ("a".to_string(), 0x2000_F000)
        );
        assert_eq!(
            parse_symbol_definition("counter=4096").unwrap(),
            ("counter".to_string(), 4096)
        );
        assert!(parse_symbol_definition("nameonly").is_err());
        assert!(parse_symbol_definition("=0x10").is_err());
        assert!(parse_symbol_definition("a=0x100000000").is_err());
    }
}
