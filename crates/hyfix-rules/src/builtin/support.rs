//! Shared pattern matching and code snippets for the built-in rules

use crate::error::RuleError;
use crate::rule::RuleEffect;
use hyfix_classfile::{ClassError, ClassFile, Code, ConstantPool, Constant, Insn, Label, Opcode};

pub(crate) const SYSTEM: &str = "java/lang/System";
pub(crate) const PRINT_STREAM: &str = "java/io/PrintStream";
pub(crate) const THREAD: &str = "java/lang/Thread";

/// `System.out` or `System.err`
#[derive(Debug, Clone, Copy)]
pub(crate) enum Stream {
    Out,
    Err,
}

/// `System.<stream>.println(message)`; net stack effect zero
pub(crate) fn println(
    pool: &mut ConstantPool,
    stream: Stream,
    message: &str,
) -> Result<[Insn; 3], ClassError> {
    let name = match stream {
        Stream::Out => "out",
        Stream::Err => "err",
    };
    let field = pool.intern_field_ref(SYSTEM, name, "Ljava/io/PrintStream;")?;
    let text = pool.intern_string(message)?;
    let println = pool.intern_method_ref(PRINT_STREAM, "println", "(Ljava/lang/String;)V")?;
    Ok([
        Insn::field(Opcode::Getstatic, field),
        Insn::ldc(text),
        Insn::method(Opcode::Invokevirtual, println),
    ])
}

/// Is `insn` a call to `owner.name:descriptor`
pub(crate) fn is_call(
    pool: &ConstantPool,
    insn: &Insn,
    owner: &str,
    name: &str,
    descriptor: &str,
) -> bool {
    let (Insn::Method { index, .. } | Insn::InvokeInterface { index, .. }) = insn else {
        return false;
    };
    pool.member(*index)
        .is_ok_and(|m| m.owner == owner && m.name == name && m.descriptor == descriptor)
}

/// Is `insn` an `ldc` of the string `value`
pub(crate) fn is_string_ldc(pool: &ConstantPool, insn: &Insn, value: &str) -> bool {
    match insn {
        Insn::Ldc { index, .. } => {
            matches!(pool.get(*index), Ok(Constant::String(_)))
                && pool.string(*index).is_ok_and(|s| s == value)
        }
        _ => false,
    }
}

/// Is `insn` a type instruction naming `class`
pub(crate) fn is_type_insn(pool: &ConstantPool, insn: &Insn, op: Opcode, class: &str) -> bool {
    match insn {
        Insn::Type { op: actual, index } if *actual == op => {
            pool.class_name(*index).is_ok_and(|n| n == class)
        }
        _ => false,
    }
}

/// The first `n` real instructions
pub(crate) fn leading(code: &Code, n: usize) -> Vec<&Insn> {
    code.instructions().take(n).map(|(_, insn)| insn).collect()
}

/// A label bound in the run of labels starting at `pos` that already carries
/// a frame; branching there needs no new frame
pub(crate) fn framed_label_at(code: &Code, pos: usize) -> Option<Label> {
    code.insns[pos.min(code.insns.len())..]
        .iter()
        .map_while(|insn| match insn {
            Insn::Label(label) => Some(*label),
            _ => None,
        })
        .find(|label| code.frames.contains_key(label))
}

/// Position of the only method with this signature
pub(crate) fn require_method(
    class: &ClassFile,
    name: &str,
    descriptor: &str,
) -> Result<usize, RuleError> {
    class.find_method(name, descriptor).ok_or_else(|| {
        RuleError::method_not_found(
            class.name().unwrap_or("?"),
            format!("{name}{descriptor}"),
        )
    })
}

/// Per-method result of looking for a rule's pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Site {
    /// Pattern found and edited at this many places
    Patched(usize),
    /// The rule's own edit is already there
    Already,
    /// Neither the pattern nor the edit
    Missing,
}

/// Fold per-method sites into the rule's effect
pub(crate) fn conclude(
    sites: impl IntoIterator<Item = Site>,
    method: &str,
    pattern: &str,
) -> Result<RuleEffect, RuleError> {
    let mut edits = 0;
    let mut already = false;
    for site in sites {
        match site {
            Site::Patched(n) => edits += n,
            Site::Already => already = true,
            Site::Missing => {}
        }
    }
    if edits > 0 {
        Ok(RuleEffect::Applied { edits })
    } else if already {
        Ok(RuleEffect::AlreadyApplied)
    } else {
        Err(RuleError::pattern_not_found(method, pattern))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conclude_prefers_edits() {
        assert_eq!(
            conclude([Site::Missing, Site::Patched(2), Site::Already], "m", "p").unwrap(),
            RuleEffect::Applied { edits: 2 }
        );
        assert_eq!(
            conclude([Site::Missing, Site::Already], "m", "p").unwrap(),
            RuleEffect::AlreadyApplied
        );
        assert!(matches!(
            conclude([Site::Missing], "m", "p"),
            Err(RuleError::TargetPatternNotFound { .. })
        ));
    }

    #[test]
    fn println_references_stream() {
        let mut pool = ConstantPool::new();
        let insns = println(&mut pool, Stream::Err, "hello").unwrap();
        let Insn::Field { index, .. } = insns[0] else {
            panic!("expected getstatic");
        };
        assert_eq!(pool.member(index).unwrap().name, "err");
        assert!(is_string_ldc(&pool, &insns[1], "hello"));
        assert!(is_call(
            &pool,
            &insns[2],
            PRINT_STREAM,
            "println",
            "(Ljava/lang/String;)V"
        ));
    }

    #[test]
    fn framed_label_found_in_label_run() {
        let mut code = Code::new(1);
        let plain = code.new_label();
        let framed = code.new_label();
        code.insns = vec![
            Insn::Label(plain),
            Insn::Label(framed),
            Insn::simple(Opcode::Return),
        ];
        assert_eq!(framed_label_at(&code, 0), None);
        code.frames.insert(framed, hyfix_classfile::Frame::default());
        assert_eq!(framed_label_at(&code, 0), Some(framed));
        assert_eq!(framed_label_at(&code, 2), None);
        assert_eq!(framed_label_at(&code, 3), None);
    }
}
