use std::io::{self, Write};

use static_assertions::const_assert;

use crate::ir::{BlockId, Op, Program};

#[cfg(test)]
use pretty_assertions::assert_eq;

/// Upper bound on the tape size accepted by the assembly targets.
///
/// The cursor lives in a 16-bit register and `Move` adds the shift
/// distance before reducing modulo the tape size, so `cursor + shift`
/// must stay below 65536.
pub const MAX_TAPE_SIZE: u16 = 1 << 15;
const_assert!(tape_headroom; (MAX_TAPE_SIZE as u32) * 2 <= 1 << 16);

/// Output language, selected once per translation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    /// Normalized brainfuck, one operation per line.
    Bf,
    /// NASM source doing I/O through raw Linux system calls.
    NasmLinux,
    /// NASM source doing I/O through the C runtime.
    NasmLibc,
}

/// Per-target rendering of each construct the emitter visits: file head
/// and tail, loop head and tail, and the four operation kinds. The shared
/// traversal in `emit` walks the block graph and calls into one of these.
trait CodeGen {
    fn file_head(&self, tape_size: u16, out: &mut dyn Write) -> io::Result<()>;
    fn file_tail(&self, out: &mut dyn Write) -> io::Result<()>;
    fn loop_head(&self, label: BlockId, level: usize, out: &mut dyn Write) -> io::Result<()>;
    fn loop_tail(&self, label: BlockId, level: usize, out: &mut dyn Write) -> io::Result<()>;
    fn add(&self, value: u8, level: usize, out: &mut dyn Write) -> io::Result<()>;
    fn shift(&self, offset: u16, tape_size: u16, level: usize, out: &mut dyn Write)
        -> io::Result<()>;
    fn input(&self, level: usize, out: &mut dyn Write) -> io::Result<()>;
    fn output(&self, level: usize, out: &mut dyn Write) -> io::Result<()>;
}

/// Translates the program for the given target, writing the result to
/// `out`. Loops are tracked with an explicit stack of open headers, so
/// nesting depth is bounded by memory rather than the call stack. A sink
/// write failure aborts emission immediately; whatever was already
/// written is the caller's to discard.
pub fn emit(program: &Program, target: Target, out: &mut dyn Write) -> io::Result<()> {
    let gen: &dyn CodeGen = match target {
        Target::Bf => &BfCodeGen,
        Target::NasmLinux => &NasmLinuxCodeGen,
        Target::NasmLibc => &NasmLibcCodeGen,
    };

    let tape_size = program.tape_size();
    // Open loop headers, paired with the block to continue from once the
    // loop closes. The depth counter only matters to the bf target.
    let mut open_loops: Vec<(BlockId, BlockId)> = Vec::new();
    let mut level = 0;
    let mut id = program.root();

    gen.file_head(tape_size, out)?;
    loop {
        let block = program.block(id);

        if let Some(exit) = block.exit {
            gen.loop_head(id, level, out)?;
            open_loops.push((id, exit));
            level += 1;
        }

        for op in &block.ops {
            match *op {
                Op::Add(value) => gen.add(value, level, out)?,
                Op::Move(offset) => gen.shift(offset, tape_size, level, out)?,
                Op::Input => gen.input(level, out)?,
                Op::Output => gen.output(level, out)?,
            }
        }

        id = match block.next {
            Some(next) => next,
            // A block with no successor ends the innermost open loop's
            // body, or the program itself once no loop is open.
            None => match open_loops.pop() {
                Some((header, exit)) => {
                    gen.loop_tail(header, level, out)?;
                    level -= 1;
                    exit
                }
                None => break,
            },
        };
    }
    gen.file_tail(out)?;

    debug_assert_eq!(level, 0);
    Ok(())
}

/// Signed rendering distance for an increment: whichever of adding or
/// subtracting needs fewer characters.
fn add_signed(value: u8) -> i32 {
    if value > i8::MAX as u8 {
        value as i32 - 256
    } else {
        value as i32
    }
}

/// Signed rendering distance for a move: forward, or backward when that
/// is shorter (a shift of 2990 on a 3000-cell tape is 10 cells back).
fn shift_signed(offset: u16, tape_size: u16) -> i32 {
    if offset > tape_size / 2 {
        offset as i32 - tape_size as i32
    } else {
        offset as i32
    }
}

struct BfCodeGen;

fn indent(level: usize, out: &mut dyn Write) -> io::Result<()> {
    for _ in 0..level {
        out.write_all(b"    ")?;
    }
    Ok(())
}

impl CodeGen for BfCodeGen {
    fn file_head(&self, _tape_size: u16, _out: &mut dyn Write) -> io::Result<()> {
        Ok(())
    }

    fn file_tail(&self, _out: &mut dyn Write) -> io::Result<()> {
        Ok(())
    }

    fn loop_head(&self, _label: BlockId, level: usize, out: &mut dyn Write) -> io::Result<()> {
        indent(level, out)?;
        writeln!(out, "[")
    }

    fn loop_tail(&self, _label: BlockId, level: usize, out: &mut dyn Write) -> io::Result<()> {
        // The closing bracket lines up with its header, one level out
        // from the body.
        indent(level - 1, out)?;
        writeln!(out, "]")
    }

    fn add(&self, value: u8, level: usize, out: &mut dyn Write) -> io::Result<()> {
        indent(level, out)?;
        let count = add_signed(value);
        if count > 0 {
            writeln!(out, "{}", "+".repeat(count as usize))
        } else {
            writeln!(out, "{}", "-".repeat((-count) as usize))
        }
    }

    fn shift(
        &self,
        offset: u16,
        tape_size: u16,
        level: usize,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        indent(level, out)?;
        let count = shift_signed(offset, tape_size);
        if count > 0 {
            writeln!(out, "{}", ">".repeat(count as usize))
        } else {
            writeln!(out, "{}", "<".repeat((-count) as usize))
        }
    }

    fn input(&self, level: usize, out: &mut dyn Write) -> io::Result<()> {
        indent(level, out)?;
        writeln!(out, ",")
    }

    fn output(&self, level: usize, out: &mut dyn Write) -> io::Result<()> {
        indent(level, out)?;
        writeln!(out, ".")
    }
}

// The two NASM conventions share every template except I/O and program
// setup/teardown.

fn nasm_loop_head(label: BlockId, out: &mut dyn Write) -> io::Result<()> {
    write!(
        out,
        concat!(
            ".loop_{label}:\n",
            "cmp byte [mem + esi], 0\n",
            "je .end_{label}\n",
        ),
        label = label
    )
}

fn nasm_loop_tail(label: BlockId, out: &mut dyn Write) -> io::Result<()> {
    write!(
        out,
        concat!("jmp .loop_{label}\n", ".end_{label}:\n"),
        label = label
    )
}

fn nasm_add(value: u8, out: &mut dyn Write) -> io::Result<()> {
    write!(
        out,
        concat!(
            "mov al, [mem + esi]\n",
            "add al, {value}\n",
            "mov [mem + esi], al\n",
        ),
        value = value
    )
}

fn nasm_shift(offset: u16, tape_size: u16, out: &mut dyn Write) -> io::Result<()> {
    // Advance the cursor, then reduce it modulo the tape size; the
    // remainder of the 16-bit division lands in dx.
    write!(
        out,
        concat!(
            "add si, {offset}\n",
            "xor dx, dx\n",
            "mov ax, si\n",
            "mov bx, {tape_size}\n",
            "div bx\n",
            "mov si, dx\n",
        ),
        offset = offset,
        tape_size = tape_size
    )
}

struct NasmLinuxCodeGen;

impl CodeGen for NasmLinuxCodeGen {
    fn file_head(&self, tape_size: u16, out: &mut dyn Write) -> io::Result<()> {
        write!(
            out,
            concat!(
                "global _start\n",
                "\n",
                "section .bss\n",
                "tmp resd 1\n",
                "\n",
                "section .data\n",
                "mem times {tape_size} db 0\n",
                "\n",
                "section .text\n",
                "_start:\n",
                "xor esi, esi\n",
            ),
            tape_size = tape_size
        )
    }

    fn file_tail(&self, out: &mut dyn Write) -> io::Result<()> {
        write!(
            out,
            concat!("mov eax, 1\n", "mov ebx, 0\n", "int 80h\n")
        )
    }

    fn loop_head(&self, label: BlockId, _level: usize, out: &mut dyn Write) -> io::Result<()> {
        nasm_loop_head(label, out)
    }

    fn loop_tail(&self, label: BlockId, _level: usize, out: &mut dyn Write) -> io::Result<()> {
        nasm_loop_tail(label, out)
    }

    fn add(&self, value: u8, _level: usize, out: &mut dyn Write) -> io::Result<()> {
        nasm_add(value, out)
    }

    fn shift(
        &self,
        offset: u16,
        tape_size: u16,
        _level: usize,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        nasm_shift(offset, tape_size, out)
    }

    fn input(&self, _level: usize, out: &mut dyn Write) -> io::Result<()> {
        write!(
            out,
            concat!(
                "mov eax, 0x3\n",
                "mov ebx, 0x0\n",
                "mov ecx, tmp\n",
                "mov edx, 0x1\n",
                "int 80h\n",
                "mov al, [tmp]\n",
                "mov [mem + esi], al\n",
            )
        )
    }

    fn output(&self, _level: usize, out: &mut dyn Write) -> io::Result<()> {
        write!(
            out,
            concat!(
                "xor eax, eax\n",
                "mov al, [mem + esi]\n",
                "mov [tmp], eax\n",
                "mov eax, 0x4\n",
                "mov ebx, 0x1\n",
                "mov ecx, tmp\n",
                "mov edx, 0x1\n",
                "int 80h\n",
            )
        )
    }
}

struct NasmLibcCodeGen;

impl CodeGen for NasmLibcCodeGen {
    fn file_head(&self, tape_size: u16, out: &mut dyn Write) -> io::Result<()> {
        write!(
            out,
            concat!(
                "extern putchar\n",
                "extern getchar\n",
                "extern exit\n",
                "global _start\n",
                "\n",
                "section .data\n",
                "mem times {tape_size} db 0\n",
                "\n",
                "section .text\n",
                "_start:\n",
                "xor esi, esi\n",
            ),
            tape_size = tape_size
        )
    }

    fn file_tail(&self, out: &mut dyn Write) -> io::Result<()> {
        write!(out, concat!("xor edi, edi\n", "call exit\n"))
    }

    fn loop_head(&self, label: BlockId, _level: usize, out: &mut dyn Write) -> io::Result<()> {
        nasm_loop_head(label, out)
    }

    fn loop_tail(&self, label: BlockId, _level: usize, out: &mut dyn Write) -> io::Result<()> {
        nasm_loop_tail(label, out)
    }

    fn add(&self, value: u8, _level: usize, out: &mut dyn Write) -> io::Result<()> {
        nasm_add(value, out)
    }

    fn shift(
        &self,
        offset: u16,
        tape_size: u16,
        _level: usize,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        nasm_shift(offset, tape_size, out)
    }

    fn input(&self, _level: usize, out: &mut dyn Write) -> io::Result<()> {
        write!(
            out,
            concat!("call getchar\n", "mov [mem + esi], al\n")
        )
    }

    fn output(&self, _level: usize, out: &mut dyn Write) -> io::Result<()> {
        write!(
            out,
            concat!(
                "xor rdi, rdi\n",
                "mov dil, [mem + esi]\n",
                "call putchar\n",
            )
        )
    }
}

#[cfg(test)]
fn emit_string(source: &[u8], tape_size: u16, target: Target) -> String {
    let program = crate::parser::parse(source, tape_size).unwrap();
    let mut out = Vec::new();
    emit(&program, target, &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn bf_renders_coalesced_loop() {
    assert_eq!(
        emit_string(b"++[>+<-]", 4, Target::Bf),
        "++\n[\n    >\n    +\n    <\n    -\n]\n"
    );
}

#[test]
fn bf_renders_shorter_direction() {
    // 200 forward is 56 back mod 256.
    let source = "+".repeat(200);
    assert_eq!(
        emit_string(source.as_bytes(), 3000, Target::Bf),
        format!("{}\n", "-".repeat(56))
    );

    assert_eq!(emit_string(b"<", 3000, Target::Bf), "<\n");
    let source = ">".repeat(2990);
    assert_eq!(
        emit_string(source.as_bytes(), 3000, Target::Bf),
        format!("{}\n", "<".repeat(10))
    );
}

#[test]
fn bf_renders_half_modulus_forward() {
    // Exactly half the modulus is not "closer to zero" in either
    // direction; it stays forward.
    assert_eq!(emit_string(b">>", 4, Target::Bf), ">>\n");
}

#[test]
fn bf_keeps_empty_loops() {
    assert_eq!(emit_string(b"[]", 3000, Target::Bf), "[\n]\n");
    // A body that coalesces away entirely still emits its guard.
    assert_eq!(emit_string(b"[+-]", 3000, Target::Bf), "[\n]\n");
}

#[test]
fn bf_indents_nested_loops() {
    assert_eq!(
        emit_string(b"[[+]]", 3000, Target::Bf),
        "[\n    [\n        +\n    ]\n]\n"
    );
}

#[test]
fn nasm_linux_golden() {
    assert_eq!(
        emit_string(b"[-]", 30, Target::NasmLinux),
        concat!(
            "global _start\n",
            "\n",
            "section .bss\n",
            "tmp resd 1\n",
            "\n",
            "section .data\n",
            "mem times 30 db 0\n",
            "\n",
            "section .text\n",
            "_start:\n",
            "xor esi, esi\n",
            ".loop_1:\n",
            "cmp byte [mem + esi], 0\n",
            "je .end_1\n",
            "mov al, [mem + esi]\n",
            "add al, 255\n",
            "mov [mem + esi], al\n",
            "jmp .loop_1\n",
            ".end_1:\n",
            "mov eax, 1\n",
            "mov ebx, 0\n",
            "int 80h\n",
        )
    );
}

#[test]
fn nasm_linux_shift_reduces_modulo_tape() {
    let output = emit_string(b">>>", 30, Target::NasmLinux);
    assert!(output.contains(
        concat!(
            "add si, 3\n",
            "xor dx, dx\n",
            "mov ax, si\n",
            "mov bx, 30\n",
            "div bx\n",
            "mov si, dx\n",
        )
    ));
}

#[test]
fn nasm_linux_io_syscalls() {
    let output = emit_string(b",.", 30, Target::NasmLinux);
    assert!(output.contains("mov eax, 0x3\n"));
    assert!(output.contains("mov eax, 0x4\n"));
    assert!(output.contains("mov al, [tmp]\n"));
}

#[test]
fn nasm_libc_golden() {
    assert_eq!(
        emit_string(b",.", 5, Target::NasmLibc),
        concat!(
            "extern putchar\n",
            "extern getchar\n",
            "extern exit\n",
            "global _start\n",
            "\n",
            "section .data\n",
            "mem times 5 db 0\n",
            "\n",
            "section .text\n",
            "_start:\n",
            "xor esi, esi\n",
            "call getchar\n",
            "mov [mem + esi], al\n",
            "xor rdi, rdi\n",
            "mov dil, [mem + esi]\n",
            "call putchar\n",
            "xor edi, edi\n",
            "call exit\n",
        )
    );
}

#[test]
fn nasm_labels_use_block_identity() {
    // Sibling loops at the same depth still get distinct labels.
    let output = emit_string(b"[-][-]", 30, Target::NasmLinux);
    assert!(output.contains(".loop_1:\n"));
    assert!(output.contains(".loop_3:\n"));
    assert_eq!(output.matches("jmp .loop_").count(), 2);
}

#[test]
fn emit_deep_nesting_does_not_recurse() {
    let mut source = vec![b'['; 10_000];
    source.push(b'+');
    source.extend(vec![b']'; 10_000]);
    let output = emit_string(&source, 3000, Target::NasmLinux);
    // One ".loop_N:" per head and one "jmp .loop_N" per tail.
    assert_eq!(output.matches(".loop_").count(), 20_000);
}

#[test]
fn emit_propagates_write_failure() {
    struct FailingSink;
    impl Write for FailingSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let program = crate::parser::parse(b"+", 30).unwrap();
    let err = emit(&program, Target::NasmLinux, &mut FailingSink).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
}
