use std::io;
use std::process::Command;

/// Assembles a NASM source file into an ELF64 object file, returning the
/// assembler's exit code.
pub fn assemble(s_name: &str, o_name: &str) -> io::Result<Option<i32>> {
    Ok(Command::new("nasm")
        .arg("-f")
        .arg("elf64")
        .arg("-o")
        .arg(o_name)
        .arg(s_name)
        .spawn()?
        .wait()?
        .code())
}

/// Links an object file into an executable. The C-runtime convention
/// needs libc and the dynamic linker to resolve its externs.
pub fn link(o_name: &str, out_name: &str, libc: bool) -> io::Result<Option<i32>> {
    let mut command = Command::new("ld");
    command.arg("-o").arg(out_name).arg(o_name);
    if libc {
        command
            .arg("-lc")
            .arg("--dynamic-linker")
            .arg("/lib64/ld-linux-x86-64.so.2");
    }
    Ok(command.spawn()?.wait()?.code())
}
