//! `respawnBlock`: remember structures destroyed with a bed
//!
//! Breaking a bed releases the respawn structure at its location, and the
//! host forgets it. Right after every `releaseStructure(location)` call the
//! rule records the location through the coordinate-store bridge
//! (`StructureMemory.rememberDestroyed`), which fronts a
//! [`CoordinateStore`](crate::store::CoordinateStore) on the plugin side.

use super::support::{conclude, is_call, require_method, Site};
use crate::error::RuleError;
use crate::rule::{RuleEffect, Target, TransformRule};
use hyfix_classfile::{ClassFile, Code, ConstantPool, Insn, Opcode};

const TARGET: &str = "world/BedManager";
const LOCATION: &str = "world/Location";
const METHOD: &str = "onBedBreak";
const ANCHOR: &str = "releaseStructure";
const BRIDGE: &str = "com/hyfixes/bridge/StructureMemory";
const BRIDGE_METHOD: &str = "rememberDestroyed";

/// Record released bed structures in the coordinate store
#[derive(Debug, Default)]
pub struct RespawnBlockRule;

impl RespawnBlockRule {
    /// Create rule
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn location_descriptor() -> String {
    format!("(L{LOCATION};)V")
}

fn is_anchor(pool: &ConstantPool, insn: &Insn) -> bool {
    is_call(pool, insn, TARGET, ANCHOR, &location_descriptor())
}

fn is_bridge(pool: &ConstantPool, insn: &Insn) -> bool {
    is_call(pool, insn, BRIDGE, BRIDGE_METHOD, &location_descriptor())
}

/// Anchor calls split into those still missing the bridge call and those
/// already followed by it
fn anchors(code: &Code, pool: &ConstantPool) -> (Vec<usize>, usize) {
    let mut pending = Vec::new();
    let mut bridged = 0;
    for (pos, insn) in code.instructions() {
        if !is_anchor(pool, insn) {
            continue;
        }
        // `aload loc; invokestatic bridge` follows a patched anchor
        let next = code.next_insn(pos);
        let after = next.and_then(|n| code.next_insn(n));
        match after {
            Some(call) if is_bridge(pool, &code.insns[call]) => bridged += 1,
            _ => pending.push(pos),
        }
    }
    (pending, bridged)
}

impl TransformRule for RespawnBlockRule {
    fn id(&self) -> &'static str {
        "respawnBlock"
    }

    fn description(&self) -> &'static str {
        "BedManager.onBedBreak: remember the released structure's location"
    }

    fn targets(&self) -> Vec<Target> {
        vec![Target::exact(TARGET)]
    }

    fn apply(&self, class: &mut ClassFile) -> Result<RuleEffect, RuleError> {
        let descriptor = location_descriptor();
        let index = require_method(class, METHOD, &descriptor)?;
        let code = class.methods[index]
            .code()
            .ok_or_else(|| RuleError::conflict(format!("{METHOD} has no body")))?;
        let (pending, bridged) = anchors(code, &class.pool);

        let mut sites = vec![if bridged > 0 { Site::Already } else { Site::Missing }];
        if !pending.is_empty() {
            let edit = class.edit_method(index)?;
            let slot = u16::from(!edit.context.is_static);
            let bridge = edit
                .pool
                .intern_method_ref(BRIDGE, BRIDGE_METHOD, &descriptor)?;
            // back to front so earlier positions stay valid
            for pos in pending.iter().rev() {
                edit.code.insert(
                    pos + 1,
                    [Insn::aload(slot), Insn::method(Opcode::Invokestatic, bridge)],
                );
            }
            edit.code.max_stack = edit.code.max_stack.max(1);
            tracing::debug!(
                rule = "respawnBlock",
                calls = pending.len(),
                "injected structure memory bridge"
            );
            sites.push(Site::Patched(pending.len()));
        }
        conclude(
            sites,
            METHOD,
            "invokevirtual world/BedManager.releaseStructure:(Lworld/Location;)V",
        )
    }
}
