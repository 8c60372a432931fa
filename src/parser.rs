use std::error::Error;
use std::fmt;

use unicode_width::UnicodeWidthStr;

use crate::ir::{BlockId, Op, Program};

#[cfg(test)]
use pretty_assertions::assert_eq;

/// Which way the source's loop delimiters failed to balance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseErrorType {
    /// A `[` was still open when the input ended.
    UnmatchedOpen,
    /// A `]` appeared with no loop open.
    UnmatchedClose,
}
use ParseErrorType::*;

#[derive(Debug)]
pub struct ParseError {
    err: ParseErrorType,
    line: Vec<u8>,
    linenum: usize,
    offset: usize,
}

impl ParseError {
    fn new(err: ParseErrorType, code: &[u8], i: usize) -> Self {
        let (line, linenum, offset) = find_line(code, i);
        Self {
            err,
            line: line.into(),
            linenum,
            offset,
        }
    }

    pub fn kind(&self) -> ParseErrorType {
        self.err
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let line = String::from_utf8_lossy(&self.line);
        let width = UnicodeWidthStr::width(&line[0..self.offset]);

        match self.err {
            UnmatchedOpen => {
                write!(f, "reached end of input with an unclosed loop\n")?;
                write!(f, "loop started at {}:{}\n", self.linenum, self.offset)?;
            }
            UnmatchedClose => {
                write!(
                    f,
                    "] found at {}:{} when not in a loop\n",
                    self.linenum, self.offset
                )?;
            }
        };

        write!(f, "{}\n", line)?;
        write!(f, "{}^", " ".repeat(width))?;

        Ok(())
    }
}

impl Error for ParseError {}

/// Builds the intermediate representation from brainfuck source in a
/// single left-to-right scan, coalescing adjacent same-kind operations as
/// they are appended. Loop nesting is tracked with a growable stack, so
/// depth is bounded by memory rather than the call stack. Unbalanced loop
/// delimiters are the only possible error; every byte outside the
/// eight-character alphabet is a comment.
pub fn parse(code: &[u8], tape_size: u16) -> Result<Program, ParseError> {
    let mut program = Program::new(tape_size);
    let mut block = program.root();
    // Loop headers still waiting for their ], with the position of the [.
    let mut unclosed: Vec<(BlockId, usize)> = Vec::new();

    for (i, &c) in code.iter().enumerate() {
        match c {
            b'+' => program.push_op(block, Op::Add(1)),
            b'-' => program.push_op(block, Op::Add(u8::MAX)),
            b'>' => program.push_op(block, Op::Move(1 % tape_size)),
            b'<' => program.push_op(block, Op::Move(tape_size - 1)),
            b',' => program.push_op(block, Op::Input),
            b'.' => program.push_op(block, Op::Output),
            b'[' => {
                let header = program.push_block();
                program.block_mut(block).next = Some(header);
                unclosed.push((header, i));
                block = header;
            }
            b']' => match unclosed.pop() {
                Some((header, _)) => {
                    let exit = program.push_block();
                    program.block_mut(header).exit = Some(exit);
                    block = exit;
                }
                None => return Err(ParseError::new(UnmatchedClose, code, i)),
            },
            _ => (),
        }
    }

    if let Some(&(_, i)) = unclosed.last() {
        return Err(ParseError::new(UnmatchedOpen, code, i));
    }

    Ok(program)
}

fn find_line(code: &[u8], i: usize) -> (&[u8], usize, usize) {
    let offset = code[0..i].iter().rev().take_while(|x| **x != b'\n').count();
    let end = i + code[i..].iter().take_while(|x| **x != b'\n').count();
    let linenum = code[0..(i - offset)]
        .iter()
        .filter(|x| **x == b'\n')
        .count();
    (&code[(i - offset)..end], linenum, offset)
}

#[cfg(test)]
use crate::ir::Op::*;

#[test]
fn parse_coalesces_increments() {
    let program = parse(b"+++", 3000).unwrap();
    assert_eq!(program.block(program.root()).ops, [Add(3)]);
}

#[test]
fn parse_decrement_is_complement() {
    let program = parse(b"-", 3000).unwrap();
    assert_eq!(program.block(program.root()).ops, [Add(255)]);
}

#[test]
fn parse_left_move_is_complement() {
    let program = parse(b"<", 3000).unwrap();
    assert_eq!(program.block(program.root()).ops, [Move(2999)]);
}

#[test]
fn parse_cancelling_runs_leave_no_op() {
    let program = parse(b"+-", 3000).unwrap();
    assert_eq!(program.block(program.root()).ops, []);

    let program = parse(b"><", 3000).unwrap();
    assert_eq!(program.block(program.root()).ops, []);

    let program = parse(b"++-->><<", 3000).unwrap();
    assert_eq!(program.block(program.root()).ops, []);
}

#[test]
fn parse_moves_coalesce_modulo_tape_size() {
    // Three cells forward on a four-cell tape, one character at a time.
    let program = parse(b">>>>>>>", 4).unwrap();
    assert_eq!(program.block(program.root()).ops, [Move(3)]);
}

#[test]
fn parse_io_never_coalesces() {
    let program = parse(b"..,,", 3000).unwrap();
    assert_eq!(
        program.block(program.root()).ops,
        [Output, Output, Input, Input]
    );
}

#[test]
fn parse_run_length_equivalence() {
    // A run and any rewriting of it with the same net effect build the
    // same IR.
    assert_eq!(parse(b"+++", 3000).unwrap(), parse(b"++-++", 3000).unwrap());
    assert_eq!(parse(b">>", 3000).unwrap(), parse(b">><>", 3000).unwrap());
}

#[test]
fn parse_skips_comments() {
    assert_eq!(parse(b"foo! +", 3000).unwrap(), parse(b"+", 3000).unwrap());
}

#[test]
fn parse_loop_structure() {
    let program = parse(b"++[>+<-]", 4).unwrap();

    let root = program.block(program.root());
    assert_eq!(root.ops, [Add(2)]);
    assert_eq!(root.exit, None);

    let header = program.block(root.next.unwrap());
    assert_eq!(header.ops, [Move(1), Add(1), Move(3), Add(255)]);
    assert_eq!(header.next, None);

    let exit = program.block(header.exit.unwrap());
    assert_eq!(exit.ops, []);
    assert_eq!(exit.next, None);
    assert_eq!(exit.exit, None);
}

#[test]
fn parse_empty_loop_keeps_its_block() {
    let program = parse(b"[]", 3000).unwrap();
    let header = program.block(program.block(program.root()).next.unwrap());
    assert_eq!(header.ops, []);
    assert!(header.exit.is_some());
}

#[test]
fn parse_unmatched_open() {
    let err = parse(b"[[+]", 3000).unwrap_err();
    assert_eq!(err.kind(), UnmatchedOpen);
}

#[test]
fn parse_unmatched_close() {
    let err = parse(b"+]", 3000).unwrap_err();
    assert_eq!(err.kind(), UnmatchedClose);
}

#[test]
fn parse_error_reports_line_and_column() {
    let err = parse(b"++\n+]", 3000).unwrap_err();
    let rendered = format!("{}", err);
    assert!(rendered.contains("] found at 1:1 when not in a loop"));
    assert!(rendered.ends_with("+]\n ^"));
}

#[test]
fn parse_deep_nesting_does_not_recurse() {
    let mut source = vec![b'['; 10_000];
    source.push(b'+');
    source.extend(vec![b']'; 10_000]);
    assert!(parse(&source, 3000).is_ok());
}
