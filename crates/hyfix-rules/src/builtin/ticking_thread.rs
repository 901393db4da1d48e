//! `tickingThread`: survive `Thread.stop()` on Java 21+
//!
//! `Thread.stop()` throws `UnsupportedOperationException` on current JVMs,
//! which kills world shutdown. Every call is wrapped so the exception is
//! caught and the thread is interrupted instead:
//!
//! ```text
//!     astore tmp
//! start:
//!     aload tmp
//!     invokevirtual java/lang/Thread.stop()V
//! end:
//!     goto after
//! handler:                      ; catch UnsupportedOperationException
//!     pop
//!     <System.err.println warning>
//!     aload tmp
//!     invokevirtual java/lang/Thread.interrupt()V
//! after:
//! ```
//!
//! The receiver is parked in a fresh local because the handler is entered
//! with an empty operand stack.

use super::support::{conclude, framed_label_at, is_call, println, Site, Stream, THREAD};
use crate::error::RuleError;
use crate::rule::{RuleEffect, Target, TransformRule};
use hyfix_classfile::analysis::{compute_max_locals, infer_frame};
use hyfix_classfile::{ClassFile, Code, ConstantPool, Frame, Handler, Insn, MethodContext, Opcode, VType};

const TARGET: &str = "com/hypixel/hytale/server/core/util/thread/TickingThread";
const UNSUPPORTED: &str = "java/lang/UnsupportedOperationException";
const WARNING: &str = "[HyFixes] Thread.stop() not supported on Java 21+, using interrupt() instead";

/// Wrap `Thread.stop()` calls in a try/catch falling back to `interrupt()`
#[derive(Debug, Default)]
pub struct TickingThreadRule;

impl TickingThreadRule {
    /// Create rule
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn is_stop(pool: &ConstantPool, insn: &Insn) -> bool {
    matches!(insn, Insn::Method { op: Opcode::Invokevirtual, .. })
        && is_call(pool, insn, THREAD, "stop", "()V")
}

/// Is `pos` inside a handler range catching `UnsupportedOperationException`
fn is_guarded(code: &Code, pool: &ConstantPool, pos: usize) -> bool {
    code.handlers.iter().any(|h| {
        let catches = h
            .catch_type
            .is_some_and(|c| pool.class_name(c).is_ok_and(|n| n == UNSUPPORTED));
        let (Some(start), Some(end)) = (code.position_of(h.start), code.position_of(h.end)) else {
            return false;
        };
        catches && start < pos && pos < end
    })
}

fn unguarded_stop(code: &Code, pool: &ConstantPool) -> Option<usize> {
    code.instructions()
        .find(|(pos, insn)| is_stop(pool, insn) && !is_guarded(code, pool, *pos))
        .map(|(pos, _)| pos)
}

fn wrap(
    pool: &mut ConstantPool,
    code: &mut Code,
    context: &MethodContext,
    pos: usize,
) -> Result<(), RuleError> {
    let (frame, pos) = infer_frame(code, pool, context, pos)?;
    let receiver = match frame.stack.as_slice() {
        [receiver @ VType::Object(_)] => receiver.clone(),
        [_] => return Err(RuleError::conflict("Thread.stop() receiver is not an object")),
        _ => {
            return Err(RuleError::conflict(
                "Thread.stop() called with values below the receiver on the stack",
            ))
        }
    };

    let slot = code.max_locals.max(compute_max_locals(code, context));
    let mut slots = frame.local_slots();
    slots.resize(usize::from(slot), VType::Top);
    slots.push(receiver);
    let handler_frame = Frame::from_slots(&slots, vec![VType::object(UNSUPPORTED)]);
    let after_frame = Frame::from_slots(&frame.local_slots(), Vec::new());

    let catch_type = pool.intern_class(UNSUPPORTED)?;
    let interrupt = pool.intern_method_ref(THREAD, "interrupt", "()V")?;
    let warn = println(pool, Stream::Err, WARNING)?;

    let start = code.new_label();
    let end = code.new_label();
    let handler = code.new_label();
    let after = framed_label_at(code, pos + 1).unwrap_or_else(|| code.new_label());
    let bind_after = !code.frames.contains_key(&after);

    let call = code.insns[pos].clone();
    let mut wrapped = vec![
        Insn::astore(slot),
        Insn::Label(start),
        Insn::aload(slot),
        call,
        Insn::Label(end),
        Insn::jump(Opcode::Goto, after),
        Insn::Label(handler),
        Insn::simple(Opcode::Pop),
    ];
    wrapped.extend(warn);
    wrapped.push(Insn::aload(slot));
    wrapped.push(Insn::method(Opcode::Invokevirtual, interrupt));
    if bind_after {
        wrapped.push(Insn::Label(after));
        code.frames.insert(after, after_frame);
    }
    code.replace(pos, wrapped);

    code.handlers.insert(
        0,
        Handler {
            start,
            end,
            handler,
            catch_type: Some(catch_type),
        },
    );
    code.frames.insert(handler, handler_frame);
    code.max_locals = slot + 1;
    code.max_stack = code.max_stack.max(2);
    Ok(())
}

impl TransformRule for TickingThreadRule {
    fn id(&self) -> &'static str {
        "tickingThread"
    }

    fn description(&self) -> &'static str {
        "TickingThread: catch UnsupportedOperationException from Thread.stop() and interrupt instead"
    }

    fn targets(&self) -> Vec<Target> {
        vec![Target::exact(TARGET)]
    }

    fn apply(&self, class: &mut ClassFile) -> Result<RuleEffect, RuleError> {
        let mut sites = Vec::new();
        for index in 0..class.methods.len() {
            let Some(code) = class.methods[index].code() else {
                continue;
            };
            let calls = code
                .instructions()
                .filter(|(_, insn)| is_stop(&class.pool, insn))
                .count();
            if calls == 0 {
                continue;
            }
            if unguarded_stop(code, &class.pool).is_none() {
                sites.push(Site::Already);
                continue;
            }

            let edit = class.edit_method(index)?;
            let mut wrapped = 0;
            while let Some(pos) = unguarded_stop(edit.code, edit.pool) {
                wrap(edit.pool, edit.code, &edit.context, pos)?;
                wrapped += 1;
            }
            tracing::debug!(
                rule = "tickingThread",
                method = %edit.context.name,
                wrapped,
                "wrapped Thread.stop() calls"
            );
            sites.push(Site::Patched(wrapped));
        }
        conclude(sites, "any method", "invokevirtual java/lang/Thread.stop()V")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyfix_classfile::analysis::compute_max_stack;
    use hyfix_classfile::validate::check_integrity;
    use hyfix_test_utils as fixtures;

    fn thread_class() -> ClassFile {
        ClassFile::parse(&fixtures::ticking_thread()).unwrap()
    }

    fn stop_method(class: &ClassFile) -> usize {
        class.find_method("stop", "()V").unwrap()
    }

    #[test]
    fn wraps_stop_in_handler() {
        let mut class = thread_class();
        assert_eq!(
            TickingThreadRule.apply(&mut class).unwrap(),
            RuleEffect::Applied { edits: 1 }
        );

        let index = stop_method(&class);
        let code = class.methods[index].code().unwrap();
        assert_eq!(code.handlers.len(), 1);
        assert_eq!(code.max_locals, 3);
        let handler = code.handlers[0].handler;
        assert_eq!(
            code.frames[&handler],
            Frame::new(
                vec![
                    VType::object(fixtures::TICKING_THREAD),
                    VType::object(THREAD),
                    VType::object(THREAD),
                ],
                vec![VType::object(UNSUPPORTED)],
            )
        );
        assert!(code
            .instructions()
            .any(|(_, i)| is_call(&class.pool, i, THREAD, "interrupt", "()V")));
    }

    #[test]
    fn reuses_existing_frame_after_call() {
        let mut class = thread_class();
        let index = stop_method(&class);
        let frames_before = class.methods[index].code().unwrap().frames.len();
        TickingThreadRule.apply(&mut class).unwrap();
        // the call is followed by a framed branch target, so only the
        // handler gains a frame
        let code = class.methods[index].code().unwrap();
        assert_eq!(code.frames.len(), frames_before + 1);
    }

    #[test]
    fn wrapped_method_is_consistent() {
        let mut class = thread_class();
        TickingThreadRule.apply(&mut class).unwrap();
        let index = stop_method(&class);
        let depth = compute_max_stack(class.methods[index].code().unwrap(), &class.pool).unwrap();
        class.methods[index].code_mut().unwrap().max_stack = depth;
        check_integrity(&class, &[index]).unwrap();

        let bytes = class.to_bytes().unwrap();
        let reparsed = ClassFile::parse(&bytes).unwrap();
        assert_eq!(reparsed.methods[index].code().unwrap().handlers.len(), 1);
    }

    #[test]
    fn second_application_is_noop() {
        let mut class = thread_class();
        TickingThreadRule.apply(&mut class).unwrap();
        assert_eq!(
            TickingThreadRule.apply(&mut class).unwrap(),
            RuleEffect::AlreadyApplied
        );
    }

    #[test]
    fn every_call_gets_its_own_local() {
        let mut class = thread_class();
        let index = stop_method(&class);
        let code = class.methods[index].code_mut().unwrap();
        let pos = code
            .insns
            .iter()
            .position(|i| matches!(i, Insn::Method { .. }))
            .unwrap();
        let call = code.insns[pos].clone();
        code.insert(pos + 1, [Insn::aload(1), call]);

        assert_eq!(
            TickingThreadRule.apply(&mut class).unwrap(),
            RuleEffect::Applied { edits: 2 }
        );
        let code = class.methods[index].code().unwrap();
        assert_eq!(code.handlers.len(), 2);
        assert_eq!(code.max_locals, 4);
    }

    #[test]
    fn class_without_stop_is_pattern_error() {
        let mut class = ClassFile::parse(&fixtures::unrelated_system()).unwrap();
        assert!(matches!(
            TickingThreadRule.apply(&mut class),
            Err(RuleError::TargetPatternNotFound { .. })
        ));
    }
}
