use std::{env, fs, io, path::Path};

use minic::bytecode::text;
use minic::frontend::{Lexer, TokenDumper};
use minic::{Code, Config, Vm, compile_source, parse_source};
use tracing_subscriber::EnvFilter;

/// Flags that take the next argument as their value.
const VALUE_FLAGS: [&str; 6] = [
    "--emit",
    "--emit-bin",
    "--run-bc",
    "--config",
    "--stack-size",
    "--max-steps",
];

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }

    let tokens_only = has_flag(&args, "--tokens");
    let no_color = has_flag(&args, "--no-color");
    let pretty = has_flag(&args, "--pretty");
    let ast = has_flag(&args, "--ast");
    let listing = has_flag(&args, "--bc");

    let mut config = match flag_value(&args, "--config") {
        Some(path) => Config::load(path).unwrap_or_else(|e| fail(&e.to_string())),
        None => Config::default(),
    };
    if let Some(n) = flag_value(&args, "--stack-size") {
        config.vm.stack_capacity = parse_count("--stack-size", n);
    }
    if let Some(n) = flag_value(&args, "--max-steps") {
        config.vm.max_steps = Some(parse_count("--max-steps", n));
    }

    if let Some(path) = flag_value(&args, "--run-bc") {
        let code = load_code(path);
        if listing {
            text::print_listing(&code);
        }
        execute(&code, &config);
        return;
    }

    let Some(filename) = source_file(&args) else {
        print_usage();
        std::process::exit(1);
    };
    ensure_extension(filename);

    let source = fs::read_to_string(filename)
        .unwrap_or_else(|e| fail(&format!("Failed to read '{}': {}", filename, e)));

    if tokens_only {
        dump_tokens(&source, no_color, pretty);
        return;
    }

    if ast {
        match parse_source(&source) {
            Ok(program) => println!("{:#?}", program),
            Err(e) => fail(&e.to_string()),
        }
        return;
    }

    let code = compile_source(&source).unwrap_or_else(|e| fail(&e.to_string()));

    if listing {
        text::print_listing(&code);
    }

    let mut emitted = false;
    if let Some(out) = flag_value(&args, "--emit") {
        write_file(out, code.to_string().as_bytes());
        emitted = true;
    }
    if let Some(out) = flag_value(&args, "--emit-bin") {
        let bytes = code
            .to_bytes()
            .unwrap_or_else(|e| fail(&format!("cannot encode bytecode: {}", e)));
        write_file(out, &bytes);
        emitted = true;
    }

    if !emitted && !listing {
        execute(&code, &config);
    }
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a String> {
    let at = args.iter().position(|a| a == flag)?;
    match args.get(at + 1) {
        Some(value) if !value.starts_with("--") => Some(value),
        _ => fail(&format!("{} needs a value", flag)),
    }
}

/// First argument that is neither a flag nor the value of one.
fn source_file(args: &[String]) -> Option<&String> {
    let mut rest = args.iter().skip(1);
    while let Some(arg) = rest.next() {
        if VALUE_FLAGS.contains(&arg.as_str()) {
            rest.next();
        } else if !arg.starts_with('-') {
            return Some(arg);
        }
    }
    None
}

fn parse_count(flag: &str, value: &str) -> usize {
    value
        .parse()
        .unwrap_or_else(|_| fail(&format!("{} expects a number, got '{}'", flag, value)))
}

fn ensure_extension(filename: &str) {
    let path = Path::new(filename);
    if path.extension().and_then(|e| e.to_str()) != Some("c") {
        fail(&format!("Error: expected a .c file, got {}", filename));
    }
}

fn dump_tokens(source: &str, no_color: bool, pretty: bool) {
    let tokens = Lexer::new(source)
        .tokenize()
        .unwrap_or_else(|e| fail(&format!("lexer error: {}", e)));

    let mut dumper = TokenDumper::new();
    if no_color {
        dumper = dumper.no_color();
    }
    if pretty {
        dumper = dumper.pretty();
    }

    if let Err(e) = dumper.dump(&tokens, &mut io::stdout().lock()) {
        fail(&e.to_string());
    }
}

/// Reads a saved program: the text form when it parses, the binary image
/// otherwise.
fn load_code(path: &str) -> Code {
    let bytes = fs::read(path).unwrap_or_else(|e| fail(&format!("Failed to read '{}': {}", path, e)));

    let text_error = match std::str::from_utf8(&bytes).map(text::parse) {
        Ok(Ok(code)) => return code,
        Ok(Err(e)) => e.to_string(),
        Err(_) => "not valid UTF-8".to_string(),
    };

    Code::from_bytes(&bytes).unwrap_or_else(|e| {
        fail(&format!(
            "'{}' is neither bytecode text ({}) nor a binary image ({})",
            path, text_error, e
        ))
    })
}

fn execute(code: &Code, config: &Config) {
    let mut vm = Vm::with_config(config.vm.clone());
    if let Err(e) = vm.run_program(code, &mut io::stdout().lock()) {
        fail(&e.to_string());
    }
}

fn write_file(path: &str, bytes: &[u8]) {
    if let Err(e) = fs::write(path, bytes) {
        fail(&format!("Failed to write '{}': {}", path, e));
    }
}

fn fail(message: &str) -> ! {
    eprintln!("{}", message);
    std::process::exit(1);
}

fn print_usage() {
    println!("MINIC - C subset compiler and stack machine");
    println!();
    println!("Usage:");
    println!("  minic <file.c>                  Compile and run a program");
    println!("  minic --tokens <file.c>         Show tokens only (--no-color, --pretty)");
    println!("  minic --ast <file.c>            Show the syntax tree");
    println!("  minic --bc <file.c>             Show the bytecode listing");
    println!("  minic --emit <out> <file.c>     Write the bytecode text form");
    println!("  minic --emit-bin <out> <file.c> Write the binary bytecode image");
    println!("  minic --run-bc <file>           Run saved bytecode (text or binary)");
    println!();
    println!("Options:");
    println!("  --config <file.toml>            Load VM settings");
    println!("  --stack-size <n>                Stack capacity in cells");
    println!("  --max-steps <n>                 Abort after n instructions");
    println!();
    println!("Set RUST_LOG=debug (or trace) for compiler and VM logging.");
}
