use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser as ClapParser, error::ErrorKind};

use crate::{
    backend::{codegen_module, CodegenOptions},
    diagnostics::{report_fatal_error, DiagnosticEngine},
    frontend::{lexer::Lexer, parser::Parser, SourceFile},
    middle::{
        lir::{ast_lowering::lower_to_lir, pretty_print},
        optimization::{optimize_module, OptLevel, ProfileData},
        ssa::{builder::build_module, type_annotation::annotate_module},
    },
};

mod backend;
mod diagnostics;
mod frontend;
mod index;
mod middle;

#[derive(Debug, ClapParser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Stop after the named phase and write its output
    #[arg(short = 'e', value_enum)]
    emit: Option<EmitFormat>,
    #[arg(short = 'O', value_enum, default_value_t = Default::default())]
    optimization_level: OptLevel,

    /// Profile data (JSON) consumed by the level-3 passes
    #[arg(long)]
    profile: Option<PathBuf>,

    #[arg(short = 'o')]
    output_path: Option<PathBuf>,
    source_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EmitFormat {
    #[value(name = "tokens")]
    Tokens,
    #[value(name = "ast")]
    Ast,
    #[value(name = "lir")]
    Lir,
    #[value(name = "ssa")]
    Ssa,
    #[value(name = "asm")]
    Assembly,
}

fn main() {
    env_logger::init();

    let args = Args::parse();

    if args.source_files.is_empty() {
        Args::command()
            .error(ErrorKind::MissingRequiredArgument, "Missing source files!")
            .exit();
    }

    for source_file in &args.source_files {
        if !source_file.exists() {
            Args::command()
                .error(
                    ErrorKind::InvalidValue,
                    format!("Source file '{}' does not exist!", source_file.display()),
                )
                .exit()
        }

        if !source_file.is_file() {
            Args::command()
                .error(
                    ErrorKind::InvalidValue,
                    format!("Input path '{}' is not a file!", source_file.display()),
                )
                .exit()
        }
    }

    let profile = args
        .profile
        .as_deref()
        .map(load_profile_data)
        .unwrap_or_default();

    /* Read in source files */

    let source_files = args
        .source_files
        .iter()
        .map(|path| {
            SourceFile::from_path(path).expect("Failed to read input file (or invalid UTF-8)")
        })
        .collect::<Vec<_>>();

    let mut failed = false;

    for source_file in &source_files {
        failed |= compile(source_file, &args, &profile);
    }

    std::process::exit(if failed { 1 } else { 0 });
}

/// Runs the pipeline over one source file. Returns true when any error
/// diagnostic was recorded.
fn compile(source_file: &SourceFile, args: &Args, profile: &ProfileData) -> bool {
    let mut diagnostics = DiagnosticEngine::new();

    if args.emit == Some(EmitFormat::Tokens) {
        let mut lexer = Lexer::new(source_file);
        let tokens = lexer.tokenize_all();

        for token in &tokens {
            println!(
                "{:?} `{}` at {}",
                token.kind,
                source_file.value_of_span(token.span),
                token.location
            );
        }

        let stats = lexer.statistics();
        log::info!(
            "{} tokens across {} lines ({} keywords, {} identifiers, {} literals, {} errors)",
            stats.total_tokens,
            stats.total_lines,
            stats.keywords,
            stats.identifiers,
            stats.literals,
            stats.errors
        );

        for error in lexer.errors() {
            diagnostics.error(error.location.clone(), error.to_string());
        }

        diagnostics.flush();
        return diagnostics.has_errors();
    }

    // Construct the AST from the source code
    let parse = Parser::parse_program(source_file, &mut diagnostics);
    diagnostics.flush();

    if parse.had_error {
        log::warn!("continuing past syntax errors; output may be incomplete");
    }

    if args.emit == Some(EmitFormat::Ast) {
        println!("{:#?}", parse.program);
        return diagnostics.has_errors();
    }

    // Lower to the linear IR and optimize it
    let mut lir = lower_to_lir(&parse.program, &mut diagnostics);
    diagnostics.flush();

    let stats = optimize_module(&mut lir, args.optimization_level, profile);
    log::info!("optimizer: {stats}");

    if args.emit == Some(EmitFormat::Lir) {
        match &args.output_path {
            Some(path) => {
                let mut out = Vec::new();
                pretty_print::write_lir(&mut out, &lir)
                    .unwrap_or_else(|e| report_fatal_error(&format!("failed to write IR: {e}")));
                std::fs::write(path, out)
                    .unwrap_or_else(|e| report_fatal_error(&format!("failed to write IR: {e}")));
            }
            None => {
                for function in &lir.functions {
                    pretty_print::pretty_print_lir(function);
                }
            }
        }

        return diagnostics.has_errors();
    }

    // Construct SSA form and annotate its values with types
    let mut ssa = build_module(&lir);
    annotate_module(&mut ssa);

    for function in &ssa.functions {
        function.assert_invariants();
    }

    if args.emit == Some(EmitFormat::Ssa) {
        println!("{ssa:#?}");
        return diagnostics.has_errors();
    }

    let output_path = args
        .output_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("out.s"));

    codegen_module(&ssa, &output_path, &CodegenOptions { verbose: true })
        .unwrap_or_else(|e| report_fatal_error(&format!("failed to write assembly: {e}")));

    diagnostics.flush();
    diagnostics.has_errors()
}

fn load_profile_data(path: &Path) -> ProfileData {
    let contents = std::fs::read_to_string(path)
        .unwrap_or_else(|e| report_fatal_error(&format!("failed to read profile data: {e}")));

    serde_json::from_str(&contents)
        .unwrap_or_else(|e| report_fatal_error(&format!("malformed profile data: {e}")))
}
