//! Bytecode dump — human-readable text output for one function.

use std::fmt::Write;

use crate::module::{Function, Module};
use crate::opcode::{OpCode, RegIdx};

fn fmt_reg(r: RegIdx, buf: &mut String) {
    let i = r.0;
    write!(buf, "r{i}").unwrap();
}

fn fmt_regs(regs: &[RegIdx], buf: &mut String) {
    buf.push('(');
    for (i, r) in regs.iter().enumerate() {
        if i > 0 {
            buf.push_str(", ");
        }
        fmt_reg(*r, buf);
    }
    buf.push(')');
}

/// Render one function as text, one opcode per line.
pub fn dump_function(module: &Module, fun: &Function) -> String {
    let mut out = String::new();
    let sig = module.sig_of(fun);
    let fidx = fun.fidx.0;
    let nargs = sig.args.len();
    let nregs = fun.regs.len();
    writeln!(out, "fn f{fidx} ({nargs} args, {nregs} regs)").unwrap();

    for (i, op) in fun.ops.iter().enumerate() {
        let mut line = String::new();
        write!(line, "  {i:4}: {}", op.name()).unwrap();
        match op {
            OpCode::Mov { dst, src } | OpCode::Neg { dst, src } => {
                line.push(' ');
                fmt_reg(*dst, &mut line);
                line.push_str(", ");
                fmt_reg(*src, &mut line);
            }
            OpCode::Int { dst, value } => {
                line.push(' ');
                fmt_reg(*dst, &mut line);
                write!(line, ", {value}").unwrap();
            }
            OpCode::Float { dst, value } => {
                line.push(' ');
                fmt_reg(*dst, &mut line);
                write!(line, ", {value}").unwrap();
            }
            OpCode::Bool { dst, value } => {
                line.push(' ');
                fmt_reg(*dst, &mut line);
                write!(line, ", {value}").unwrap();
            }
            OpCode::Null { dst } | OpCode::New { dst } => {
                line.push(' ');
                fmt_reg(*dst, &mut line);
            }
            OpCode::Add { dst, a, b }
            | OpCode::Sub { dst, a, b }
            | OpCode::Mul { dst, a, b }
            | OpCode::SDiv { dst, a, b }
            | OpCode::UDiv { dst, a, b }
            | OpCode::SMod { dst, a, b }
            | OpCode::UMod { dst, a, b }
            | OpCode::Shl { dst, a, b }
            | OpCode::SShr { dst, a, b }
            | OpCode::UShr { dst, a, b }
            | OpCode::And { dst, a, b }
            | OpCode::Or { dst, a, b }
            | OpCode::Xor { dst, a, b } => {
                line.push(' ');
                fmt_reg(*dst, &mut line);
                line.push_str(", ");
                fmt_reg(*a, &mut line);
                line.push_str(", ");
                fmt_reg(*b, &mut line);
            }
            OpCode::Call { dst, fun, args } => {
                line.push(' ');
                fmt_reg(*dst, &mut line);
                write!(line, ", f{}", fun.0).unwrap();
                fmt_regs(args, &mut line);
            }
            OpCode::CallNative { dst, native, args } => {
                line.push(' ');
                fmt_reg(*dst, &mut line);
                write!(line, ", n{}", native.0).unwrap();
                fmt_regs(args, &mut line);
            }
            OpCode::CallClosure { dst, fun, args } => {
                line.push(' ');
                fmt_reg(*dst, &mut line);
                line.push_str(", ");
                fmt_reg(*fun, &mut line);
                fmt_regs(args, &mut line);
            }
            OpCode::StaticClosure { dst, fun } => {
                line.push(' ');
                fmt_reg(*dst, &mut line);
                write!(line, ", f{}", fun.0).unwrap();
            }
            OpCode::InstanceClosure { dst, fun, obj } => {
                line.push(' ');
                fmt_reg(*dst, &mut line);
                write!(line, ", f{}, ", fun.0).unwrap();
                fmt_reg(*obj, &mut line);
            }
            OpCode::VirtualClosure { dst, obj, proto } => {
                line.push(' ');
                fmt_reg(*dst, &mut line);
                line.push_str(", ");
                fmt_reg(*obj, &mut line);
                write!(line, ", proto {proto}").unwrap();
            }
            OpCode::Jmp { target } => {
                write!(line, " -> {}", target.0).unwrap();
            }
            OpCode::JTrue { cond, target } | OpCode::JFalse { cond, target } => {
                line.push(' ');
                fmt_reg(*cond, &mut line);
                write!(line, " -> {}", target.0).unwrap();
            }
            OpCode::JNull { reg, target } | OpCode::JNotNull { reg, target } => {
                line.push(' ');
                fmt_reg(*reg, &mut line);
                write!(line, " -> {}", target.0).unwrap();
            }
            OpCode::JEq { a, b, target }
            | OpCode::JNe { a, b, target }
            | OpCode::JSLt { a, b, target }
            | OpCode::JSGte { a, b, target }
            | OpCode::JULt { a, b, target } => {
                line.push(' ');
                fmt_reg(*a, &mut line);
                line.push_str(", ");
                fmt_reg(*b, &mut line);
                write!(line, " -> {}", target.0).unwrap();
            }
            OpCode::Switch { reg, targets } => {
                line.push(' ');
                fmt_reg(*reg, &mut line);
                line.push_str(" -> [");
                for (j, t) in targets.iter().enumerate() {
                    if j > 0 {
                        line.push_str(", ");
                    }
                    write!(line, "{}", t.0).unwrap();
                }
                line.push(']');
            }
            OpCode::Ret { reg } => {
                line.push(' ');
                fmt_reg(*reg, &mut line);
            }
            OpCode::GetField { dst, obj, field } => {
                line.push(' ');
                fmt_reg(*dst, &mut line);
                line.push_str(", ");
                fmt_reg(*obj, &mut line);
                write!(line, "[{field}]").unwrap();
            }
            OpCode::SetField { obj, field, src } => {
                line.push(' ');
                fmt_reg(*obj, &mut line);
                write!(line, "[{field}], ").unwrap();
                fmt_reg(*src, &mut line);
            }
            OpCode::DynGet { dst, obj, hash } => {
                line.push(' ');
                fmt_reg(*dst, &mut line);
                line.push_str(", ");
                fmt_reg(*obj, &mut line);
                write!(line, "[#{hash:x}]").unwrap();
            }
            OpCode::DynSet { obj, hash, src } => {
                line.push(' ');
                fmt_reg(*obj, &mut line);
                write!(line, "[#{hash:x}], ").unwrap();
                fmt_reg(*src, &mut line);
            }
            OpCode::MakeEnum { dst, construct, args } => {
                line.push(' ');
                fmt_reg(*dst, &mut line);
                write!(line, ", c{construct}").unwrap();
                fmt_regs(args, &mut line);
            }
            OpCode::EnumField { dst, value, construct, field } => {
                line.push(' ');
                fmt_reg(*dst, &mut line);
                line.push_str(", ");
                fmt_reg(*value, &mut line);
                write!(line, ".c{construct}[{field}]").unwrap();
            }
            OpCode::SetEnumField { value, construct, field, src } => {
                line.push(' ');
                fmt_reg(*value, &mut line);
                write!(line, ".c{construct}[{field}], ").unwrap();
                fmt_reg(*src, &mut line);
            }
            OpCode::ToDyn { dst, src } | OpCode::SafeCast { dst, src } => {
                line.push(' ');
                fmt_reg(*dst, &mut line);
                line.push_str(", ");
                fmt_reg(*src, &mut line);
            }
            OpCode::Trap { dst, handler } => {
                line.push(' ');
                fmt_reg(*dst, &mut line);
                write!(line, " -> {}", handler.0).unwrap();
            }
            OpCode::Throw { exc } => {
                line.push(' ');
                fmt_reg(*exc, &mut line);
            }
            OpCode::NullCheck { reg } => {
                line.push(' ');
                fmt_reg(*reg, &mut line);
            }
            OpCode::EndTrap | OpCode::Nop => {}
        }
        out.push_str(&line);
        out.push('\n');
    }
    out
}
