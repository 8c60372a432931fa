use std::fs::File;
use std::io::{self, Read, Write};
use std::process;

use clap::{App, Arg, ArgGroup};

use bfnasm::{assemble, emit, link, parse, Target, MAX_TAPE_SIZE};

enum Action {
    Compile,
    OutputAssembly,
    OutputBf,
    DumpIr,
}

struct Options {
    action: Action,
    output: Option<String>,
    input: String,
    tape_size: u16,
    libc: bool,
}

impl Options {
    fn match_options() -> Self {
        let matches = App::new("bfnasm")
            .version("0.1.0")
            .about("Brainfuck to NASM compiler")
            .arg(
                Arg::with_name("output_asm")
                    .short("S")
                    .help("Emit assembly but do not assemble and link"),
            )
            .arg(
                Arg::with_name("output_bf")
                    .short("b")
                    .long("bf")
                    .help("Emit normalized brainfuck instead of assembly"),
            )
            .arg(
                Arg::with_name("dump_ir")
                    .long("dump-ir")
                    .help("Dump intermediate representation; for debugging"),
            )
            .group(ArgGroup::with_name("actions").args(&["output_asm", "output_bf", "dump_ir"]))
            .arg(
                Arg::with_name("libc")
                    .long("libc")
                    .help("Do I/O through the C runtime instead of raw system calls")
                    .conflicts_with("output_bf"),
            )
            .arg(
                Arg::with_name("out_name")
                    .short("o")
                    .help("Output file name")
                    .takes_value(true)
                    .empty_values(false)
                    .value_name("file"),
            )
            .arg(
                Arg::with_name("tape_size")
                    .long("tape-size")
                    .help("Number of cells on the tape")
                    .takes_value(true)
                    .empty_values(false)
                    .default_value("3000")
                    .value_name("cells"),
            )
            .arg(
                Arg::with_name("FILENAME")
                    .help("Source file to compile")
                    .required(true)
                    .index(1),
            )
            .get_matches();

        let action = if matches.is_present("dump_ir") {
            Action::DumpIr
        } else if matches.is_present("output_bf") {
            Action::OutputBf
        } else if matches.is_present("output_asm") {
            Action::OutputAssembly
        } else {
            Action::Compile
        };

        let tape_size = match matches.value_of("tape_size").unwrap().parse::<u16>() {
            Ok(size) if (1..=MAX_TAPE_SIZE).contains(&size) => size,
            _ => {
                println!("Tape size must be between 1 and {}", MAX_TAPE_SIZE);
                process::exit(1);
            }
        };

        Options {
            action,
            output: matches.value_of("out_name").map(str::to_string),
            input: matches.value_of("FILENAME").unwrap().to_string(),
            tape_size,
            libc: matches.is_present("libc"),
        }
    }

    fn target(&self) -> Target {
        if self.libc {
            Target::NasmLibc
        } else {
            Target::NasmLinux
        }
    }

    fn get_output<'a>(&'a self, default: &'a str) -> &'a str {
        match self.output.as_ref() {
            Some(output) => output,
            None => default,
        }
    }
}

fn main() -> io::Result<()> {
    let options = Options::match_options();

    let name = options.input.rsplitn(2, '.').last().unwrap();
    let mut file = File::open(&options.input)?;
    let mut code = Vec::new();
    file.read_to_end(&mut code)?;

    let program = match parse(&code, options.tape_size) {
        Ok(program) => program,
        Err(err) => {
            println!("Parsing error: {}", err);
            process::exit(1);
        }
    };

    match options.action {
        Action::DumpIr => {
            let mut irfile = open_output_file(options.get_output("-"))?;
            writeln!(irfile, "{:#?}", program)?;
        }
        Action::OutputBf => {
            let mut output = Vec::new();
            emit(&program, Target::Bf, &mut output)?;
            open_output_file(options.get_output("-"))?.write_all(&output)?;
        }
        Action::OutputAssembly => {
            let mut output = Vec::new();
            emit(&program, options.target(), &mut output)?;
            let def_name = format!("{}.s", name);
            open_output_file(options.get_output(&def_name))?.write_all(&output)?;
        }
        Action::Compile => {
            println!("Compiling...");
            let mut output = Vec::new();
            emit(&program, options.target(), &mut output)?;
            let s_name = format!("{}.s", name);
            let o_name = format!("{}.o", name);
            File::create(&s_name)?.write_all(&output)?;

            println!("Assembling...");
            if assemble(&s_name, &o_name)? != Some(0) {
                process::exit(1);
            }

            println!("Linking...");
            if link(&o_name, options.get_output(name), options.libc)? != Some(0) {
                process::exit(1);
            }
        }
    }

    Ok(())
}

fn open_output_file(name: &str) -> io::Result<Box<dyn Write>> {
    if name == "-" {
        Ok(Box::new(io::stdout()))
    } else {
        Ok(Box::new(File::create(name)?))
    }
}
