//! Textual form of the IR, used for trace logging and tests.

use std::fmt;

use crate::function::{Function, Linkage};
use crate::instruction::{write_values, BlockCall, Terminator};
use crate::unit::CompilationUnit;

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Linkage::External => write!(f, "external"),
            Linkage::Internal => write!(f, "internal"),
        }
    }
}

struct Label<'a>(&'a Function, crate::instruction::Block);

impl fmt::Display for Label<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self
            .0
            .blocks
            .get(self.1.index() as usize)
            .map(|b| b.name.as_str())
            .unwrap_or("");
        if name.is_empty() {
            write!(f, "bb{}", self.1.index())
        } else {
            write!(f, "{}.{}", name, self.1.index())
        }
    }
}

fn write_call(f: &mut fmt::Formatter<'_>, func: &Function, call: &BlockCall) -> fmt::Result {
    write!(f, "{}", Label(func, call.block))?;
    if !call.args.is_empty() {
        write!(f, "(")?;
        write_values(f, &call.args)?;
        write!(f, ")")?;
    }
    Ok(())
}

fn write_terminator(f: &mut fmt::Formatter<'_>, func: &Function, term: &Terminator) -> fmt::Result {
    match term {
        Terminator::Jump(call) => {
            write!(f, "jump ")?;
            write_call(f, func, call)
        }
        Terminator::Branch {
            cond,
            then_dest,
            else_dest,
        } => {
            write!(f, "br {}, ", cond)?;
            write_call(f, func, then_dest)?;
            write!(f, ", ")?;
            write_call(f, func, else_dest)
        }
        Terminator::Switch {
            value,
            cases,
            default,
        } => {
            write!(f, "switch {} [", value)?;
            for (i, (case, target)) in cases.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}: {}", case, Label(func, *target))?;
            }
            write!(f, "], default {}", Label(func, *default))
        }
        Terminator::Return(Some(v)) => write!(f, "ret {}", v),
        Terminator::Return(None) => write!(f, "ret"),
        Terminator::Suspend {
            is_final,
            resume,
            cleanup,
        } => {
            let kw = if *is_final { "suspend final" } else { "suspend" };
            write!(f, "{} resume {}, cleanup {}", kw, Label(func, *resume), Label(func, *cleanup))
        }
        Terminator::Trap => write!(f, "trap"),
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "define {} @{}(", self.linkage, self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", self.value_type(*p), p)?;
        }
        write!(f, ")")?;
        if let Some(ret) = self.signature.ret {
            write!(f, " -> {}", ret)?;
        }
        writeln!(f, " {{")?;

        for block in self.block_ids() {
            let data = self.block(block);
            write!(f, "{}", Label(self, block))?;
            if !data.params.is_empty() {
                write!(f, "(")?;
                for (i, p) in data.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", self.value_type(*p), p)?;
                }
                write!(f, ")")?;
            }
            writeln!(f, ":")?;
            for inst in &data.insts {
                match inst.result {
                    Some(v) => writeln!(f, "  {} = {}", v, inst.kind)?,
                    None => writeln!(f, "  {}", inst.kind)?,
                }
            }
            match &data.terminator {
                Some(term) => {
                    write!(f, "  ")?;
                    write_terminator(f, self, term)?;
                    writeln!(f)?;
                }
                None => writeln!(f, "  <unterminated>")?,
            }
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for CompilationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; unit {}", self.name())?;
        if let Some(layout) = self.data_layout() {
            writeln!(f, "; layout {}", layout)?;
        }
        for (name, sig) in &self.extern_functions {
            writeln!(f, "declare @{}{}", name, sig)?;
        }
        for name in &self.extern_globals {
            writeln!(f, "declare global @{}", name)?;
        }
        for global in &self.globals {
            let kind = if global.writable { "global" } else { "constant" };
            writeln!(
                f,
                "{} {} @{} [{} bytes, align {}]",
                global.linkage, kind, global.name, global.size, global.align
            )?;
        }
        for func in &self.functions {
            writeln!(f)?;
            write!(f, "{}", func)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::Builder;
    use crate::function::{Function, Linkage};
    use crate::types::{Signature, Type};

    #[test]
    fn test_function_display() {
        let sig = Signature::new(vec![Type::I32, Type::I32], Some(Type::I32));
        let mut f = Function::new("mul", sig, Linkage::External);
        {
            let mut b = Builder::new(&mut f);
            let entry = b.create_block("entry");
            b.switch_to_block(entry);
            let (x, y) = (b.param(0), b.param(1));
            let r = b.mul(x, y);
            b.ret(Some(r));
        }
        let text = f.to_string();
        assert_eq!(
            text,
            "define external @mul(i32 %0, i32 %1) -> i32 {\nentry.0:\n  %2 = mul %0, %1\n  ret %2\n}\n"
        );
    }
}
