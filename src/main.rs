//! Punto de entrada ("driver").
//!
//! Este módulo orquesta las diferentes fases de compilación, traducción y
//! ensamblado y expone una CLI.

use anyhow::{self, bail, Context};
use clap::{self, crate_version, Arg, ArgMatches, Command};
use jackc::{
    asm,
    codegen::{TranslateOptions, Translator},
    cpu::Cpu,
    error::Diagnostics,
    lex::Lexer,
    parse, source, vm,
};

use std::{
    fs::{self, File},
    io::{self, BufReader, Write},
    path::{Path, PathBuf},
};

/// Límite de instrucciones por defecto para `run`.
const DEFAULT_CYCLES: u64 = 10_000_000;

fn main() -> anyhow::Result<()> {
    // Parsing de CLI
    let path = || {
        Arg::new("path")
            .required(true)
            .value_name("PATH")
            .help("Source file or directory")
    };

    let output = |value_name: &'static str| {
        Arg::new("output")
            .short('o')
            .long("output")
            .takes_value(true)
            .value_name(value_name)
    };

    let args = Command::new("Jack compiler")
        .version(crate_version!())
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .help("Report each processed unit"),
        )
        .subcommand(
            Command::new("compile")
                .about("Compile Jack classes to VM code")
                .arg(path())
                .arg(output("DIR").help("Output directory for .vm files")),
        )
        .subcommand(
            Command::new("translate")
                .about("Translate VM code to Hack assembly")
                .arg(path())
                .arg(output("FILE").help("Output file ('-' for stdout)"))
                .arg(
                    Arg::new("no-bootstrap")
                        .long("no-bootstrap")
                        .help("Do not emit the startup sequence"),
                )
                .arg(
                    Arg::new("annotate")
                        .long("annotate")
                        .help("Emit each VM instruction as a comment"),
                ),
        )
        .subcommand(
            Command::new("assemble")
                .about("Assemble Hack assembly to machine code")
                .arg(path().help("Source .asm file"))
                .arg(output("FILE").help("Output file ('-' for stdout)")),
        )
        .subcommand(
            Command::new("run")
                .about("Assemble and emulate a Hack program")
                .arg(path().help("Source .asm file"))
                .arg(
                    Arg::new("cycles")
                        .long("cycles")
                        .takes_value(true)
                        .value_name("N")
                        .help("Maximum number of instructions to execute"),
                )
                .arg(
                    Arg::new("peek")
                        .long("peek")
                        .takes_value(true)
                        .multiple_occurrences(true)
                        .value_name("ADDR")
                        .help("RAM address to print after execution"),
                ),
        )
        .get_matches();

    let (command, sub) = match args.subcommand() {
        Some(subcommand) => subcommand,
        None => bail!("No subcommand given"),
    };

    let verbose = args.is_present("verbose") || sub.is_present("verbose");
    match command {
        "compile" => compile(sub, verbose),
        "translate" => translate(sub, verbose),
        "assemble" => assemble(sub, verbose),
        "run" => run(sub, verbose),
        other => bail!("Unknown subcommand: {}", other),
    }
}

fn compile(args: &ArgMatches, verbose: bool) -> anyhow::Result<()> {
    let path = required_path(args)?;
    let output = args.value_of("output").map(Path::new);

    compile_batch(path, output, verbose)
}

/// Compila cada unidad de `path`, continuando tras una falla.
fn compile_batch(path: &Path, output: Option<&Path>, verbose: bool) -> anyhow::Result<()> {
    let units = sources(path, "jack")?;
    let mut failed = 0;

    // Cada unidad se compila en aislamiento
    for unit in &units {
        if let Err(error) = compile_unit(unit, output, verbose) {
            eprintln!("error: {:#}", error);
            failed += 1;
        }
    }

    summary(units.len(), failed, "compiled", verbose)
}

fn compile_unit(path: &Path, output: Option<&Path>, verbose: bool) -> anyhow::Result<()> {
    let name = unit_name(path)?;
    let target = match output {
        Some(directory) => directory.join(name).with_extension("vm"),
        None => path.with_extension("vm"),
    };

    if verbose {
        eprintln!("Compiling {} -> {}", path.display(), target.display());
    }

    let file = open(path)?;
    let (start, stream) = source::consume(BufReader::new(file), display_name(path));

    let tokens = match Lexer::new(start.clone(), stream).try_exhaustive() {
        Ok(tokens) => tokens,
        Err(errors) => return fail(Diagnostics::from(errors).kind("lexical error"), path),
    };

    let class = match parse::parse(tokens, start) {
        Ok(class) => class,
        Err(error) => return fail(Diagnostics::from(error).kind("syntax error"), path),
    };

    let code = match class.compile() {
        Ok(code) => code,
        Err(error) => return fail(Diagnostics::from(error).kind("semantic error"), path),
    };

    let mut text = String::new();
    for instruction in &code {
        text.push_str(&instruction.to_string());
        text.push('\n');
    }

    fs::write(&target, text).with_context(|| format!("Failed to write {}", target.display()))
}

fn translate(args: &ArgMatches, verbose: bool) -> anyhow::Result<()> {
    let path = required_path(args)?;
    let units = sources(path, "vm")?;

    let mut options = TranslateOptions::default();
    if args.is_present("no-bootstrap") {
        options.remove(TranslateOptions::BOOTSTRAP);
    }

    if args.is_present("annotate") {
        options |= TranslateOptions::ANNOTATE;
    }

    // Todas las unidades se leen antes de traducir, para reportar cada falla
    let mut parsed = Vec::with_capacity(units.len());
    let mut failed = 0;

    for unit in &units {
        if verbose {
            eprintln!("Reading {}", unit.display());
        }

        let result = open(unit).and_then(|file| {
            match vm::parse(BufReader::new(file), display_name(unit)) {
                Ok(instructions) => Ok(instructions),
                Err(error) => fail(Diagnostics::from(error).kind("VM error"), unit),
            }
        });

        match result {
            Ok(instructions) => parsed.push((unit_name(unit)?, instructions)),
            Err(error) => {
                eprintln!("error: {:#}", error);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return summary(units.len(), failed, "read", verbose);
    }

    let mut translator = Translator::new(Vec::new(), options).context("Failed to translate")?;
    for (name, instructions) in &parsed {
        if let Err(error) = translator.unit(name, instructions) {
            eprint!("{}", Diagnostics::from(error).kind("translation error"));
            bail!("Failed to translate {}", name);
        }
    }

    let asm = translator.finish().context("Failed to translate")?;

    let target = match args.value_of("output") {
        Some(target) => PathBuf::from(target),
        None if path.is_dir() => {
            let name = path
                .canonicalize()
                .ok()
                .and_then(|path| path.file_name().map(ToOwned::to_owned))
                .context("Cannot derive an output name, use -o")?;

            path.join(name).with_extension("asm")
        }

        None => path.with_extension("asm"),
    };

    if verbose {
        eprintln!("Writing {}", target.display());
    }

    write_output(&target, &asm)
}

fn assemble(args: &ArgMatches, verbose: bool) -> anyhow::Result<()> {
    let path = required_path(args)?;
    let words = assemble_file(path)?;

    let target = match args.value_of("output") {
        Some(target) => PathBuf::from(target),
        None => path.with_extension("hack"),
    };

    if verbose {
        eprintln!("Assembling {} -> {}", path.display(), target.display());
    }

    write_output(&target, asm::to_hack(&words).as_bytes())
}

fn run(args: &ArgMatches, verbose: bool) -> anyhow::Result<()> {
    let path = required_path(args)?;

    let cycles = match args.value_of("cycles") {
        Some(cycles) => cycles
            .parse()
            .with_context(|| format!("Bad cycle count: {}", cycles))?,
        None => DEFAULT_CYCLES,
    };

    let peeks = args
        .values_of("peek")
        .into_iter()
        .flatten()
        .map(|address| {
            address
                .parse::<u16>()
                .with_context(|| format!("Bad RAM address: {}", address))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut cpu = Cpu::new(assemble_file(path)?);
    let executed = cpu.run(cycles);

    if verbose {
        eprintln!("Executed {} instructions, PC = {}", executed, cpu.pc());
    }

    for address in peeks {
        println!("RAM[{}] = {}", address, cpu.peek(address) as i16);
    }

    Ok(())
}

fn assemble_file(path: &Path) -> anyhow::Result<Vec<u16>> {
    let file = open(path)?;
    match asm::assemble(BufReader::new(file), display_name(path)) {
        Ok(words) => Ok(words),
        Err(error) => fail(Diagnostics::from(error).kind("assembly error"), path),
    }
}

/// Unidades a procesar, en orden de nombre si `path` es un directorio.
fn sources(path: &Path, extension: &str) -> anyhow::Result<Vec<PathBuf>> {
    if !path.is_dir() {
        return Ok(vec![path.to_owned()]);
    }

    let entries = fs::read_dir(path)
        .with_context(|| format!("Failed to read directory {}", path.display()))?;

    let mut units = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to read directory {}", path.display()))?;
        let unit = entry.path();

        let matches = unit
            .extension()
            .and_then(|found| found.to_str())
            .map_or(false, |found| unicase::eq_ascii(found, extension));

        if matches && unit.is_file() {
            units.push(unit);
        }
    }

    if units.is_empty() {
        bail!("No .{} files found in {}", extension, path.display());
    }

    units.sort();
    Ok(units)
}

fn summary(total: usize, failed: usize, verb: &str, verbose: bool) -> anyhow::Result<()> {
    if failed > 0 {
        bail!("{} units {}, {} failed", total - failed, verb, failed);
    }

    if verbose {
        eprintln!("{} units {}", total, verb);
    }

    Ok(())
}

fn fail<T>(diagnostics: Diagnostics, path: &Path) -> anyhow::Result<T> {
    eprint!("{}", diagnostics);
    bail!("Failed to process {}", path.display())
}

fn write_output(target: &Path, contents: &[u8]) -> anyhow::Result<()> {
    if target == Path::new("-") {
        let stdout = io::stdout();
        let mut stdout = stdout.lock();

        stdout.write_all(contents).context("Failed to write to stdout")?;
        return stdout.flush().context("Failed to write to stdout");
    }

    fs::write(target, contents).with_context(|| format!("Failed to write {}", target.display()))
}

fn required_path(args: &ArgMatches) -> anyhow::Result<&Path> {
    args.value_of("path")
        .map(Path::new)
        .context("Missing input path")
}

fn open(path: &Path) -> anyhow::Result<File> {
    File::open(path).with_context(|| format!("Failed to open for reading: {}", path.display()))
}

fn unit_name(path: &Path) -> anyhow::Result<&str> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .with_context(|| format!("Bad unit name: {}", path.display()))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
