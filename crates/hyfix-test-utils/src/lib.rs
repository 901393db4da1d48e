//! Testing utilities for HyFix workspace
//!
//! Shared class fixtures shaped like the host classes the built-in rules
//! target, plus small assertions over instruction listings.

#![allow(missing_docs)]

use hyfix_classfile::{
    access, disasm, ClassFile, Code, Frame, Handler, Insn, Opcode, VType,
};

pub const BED_MANAGER: &str = "world/BedManager";
pub const LOCATION: &str = "world/Location";
pub const UNRELATED_SYSTEM: &str = "world/UnrelatedSystem";
pub const WORLD: &str = "com/hypixel/hytale/server/core/universe/world/World";
pub const PLAYER_REF: &str = "com/hypixel/hytale/server/core/universe/PlayerRef";
pub const TICKING_THREAD: &str = "com/hypixel/hytale/server/core/util/thread/TickingThread";
pub const SPAWN_MARKER_ENTITY: &str =
    "com/hypixel/hytale/server/spawning/spawnmarkers/SpawnMarkerEntity";
pub const PERSISTENT_REF: &str =
    "com/hypixel/hytale/server/core/entity/reference/InvalidatablePersistentRef";
pub const PACKET_HANDLER: &str = "com/hypixel/hytale/server/core/io/PacketHandler";
pub const LIVING_ENTITY: &str = "com/hypixel/hytale/server/core/entity/LivingEntity";
pub const INVENTORY: &str = "com/hypixel/hytale/server/core/inventory/Inventory";

const OBJECT: &str = "java/lang/Object";
const JAVA_8: u16 = 52;
const JAVA_21: u16 = 65;

/// Binary name (`a.b.C`) of an internal name
pub fn binary_name(internal: &str) -> String {
    internal.replace('/', ".")
}

pub fn empty_class(name: &str) -> ClassFile {
    let mut class = ClassFile::new(name, Some(OBJECT), access::PUBLIC | access::SUPER, JAVA_21).unwrap();
    add_constructor(&mut class);
    class
}

/// `<init>()V` calling `Object.<init>`
pub fn add_constructor(class: &mut ClassFile) {
    let init = class.pool.intern_method_ref(OBJECT, "<init>", "()V").unwrap();
    let mut code = Code::new(1);
    code.max_stack = 1;
    code.insns = vec![
        Insn::aload(0),
        Insn::method(Opcode::Invokespecial, init),
        Insn::simple(Opcode::Return),
    ];
    class.add_method(access::PUBLIC, "<init>", "()V", code).unwrap();
}

pub fn to_bytes(class: &ClassFile) -> Vec<u8> {
    class.to_bytes().unwrap()
}

/// `world/BedManager`, optionally without the `releaseStructure` call the
/// respawn rule anchors on
pub fn bed_manager(with_anchor: bool) -> Vec<u8> {
    let mut class = empty_class(BED_MANAGER);
    let location = format!("(L{LOCATION};)V");

    let mut release = Code::new(2);
    release.insns = vec![Insn::simple(Opcode::Return)];
    class.add_method(access::PUBLIC, "releaseStructure", &location, release).unwrap();

    let mut on_break = Code::new(2);
    if with_anchor {
        let call = class
            .pool
            .intern_method_ref(BED_MANAGER, "releaseStructure", &location)
            .unwrap();
        on_break.max_stack = 2;
        on_break.insns = vec![
            Insn::aload(0),
            Insn::aload(1),
            Insn::method(Opcode::Invokevirtual, call),
            Insn::simple(Opcode::Return),
        ];
    } else {
        on_break.insns = vec![Insn::simple(Opcode::Return)];
    }
    class.add_method(access::PUBLIC, "onBedBreak", &location, on_break).unwrap();
    to_bytes(&class)
}

/// A class no rule targets, with a loop so the body carries frames
pub fn unrelated_system() -> Vec<u8> {
    let mut class = ClassFile::new(UNRELATED_SYSTEM, Some(OBJECT), access::PUBLIC, JAVA_8).unwrap();
    add_constructor(&mut class);

    let mut code = Code::new(2);
    let head = code.new_label();
    let done = code.new_label();
    code.max_stack = 2;
    code.insns = vec![
        Insn::Push { op: Opcode::Bipush, value: 0 },
        Insn::var(Opcode::Istore, 1),
        Insn::Label(head),
        Insn::var(Opcode::Iload, 1),
        Insn::Push { op: Opcode::Bipush, value: 10 },
        Insn::jump(Opcode::IfIcmpge, done),
        Insn::Iinc { index: 1, delta: 1 },
        Insn::jump(Opcode::Goto, head),
        Insn::Label(done),
        Insn::simple(Opcode::Return),
    ];
    let this = VType::object(UNRELATED_SYSTEM);
    code.frames
        .insert(head, Frame::new(vec![this.clone(), VType::Integer], vec![]));
    code.frames
        .insert(done, Frame::new(vec![this, VType::Integer], vec![]));
    class.add_method(access::PUBLIC, "tick", "()V", code).unwrap();
    to_bytes(&class)
}

/// `World.addPlayer` throwing when the player is still attached elsewhere
pub fn world() -> Vec<u8> {
    let mut class = empty_class(WORLD);
    let descriptor = format!("(L{PLAYER_REF};)V");
    let pool = &mut class.pool;
    let get_reference = pool
        .intern_method_ref(PLAYER_REF, "getReference", "()Ljava/lang/Object;")
        .unwrap();
    let exception = pool.intern_class("java/lang/IllegalStateException").unwrap();
    let message = pool.intern_string("Player is already in a world").unwrap();
    let init = pool
        .intern_method_ref("java/lang/IllegalStateException", "<init>", "(Ljava/lang/String;)V")
        .unwrap();

    let mut code = Code::new(2);
    let ok = code.new_label();
    code.max_stack = 3;
    code.insns = vec![
        Insn::aload(1),
        Insn::method(Opcode::Invokevirtual, get_reference),
        Insn::jump(Opcode::Ifnull, ok),
        Insn::type_insn(Opcode::New, exception),
        Insn::simple(Opcode::Dup),
        Insn::ldc(message),
        Insn::method(Opcode::Invokespecial, init),
        Insn::simple(Opcode::Athrow),
        Insn::Label(ok),
        Insn::simple(Opcode::Return),
    ];
    code.frames.insert(
        ok,
        Frame::new(vec![VType::object(WORLD), VType::object(PLAYER_REF)], vec![]),
    );
    class.add_method(access::PUBLIC, "addPlayer", &descriptor, code).unwrap();
    to_bytes(&class)
}

/// `TickingThread.stop()` calling the removed `Thread.stop()`
pub fn ticking_thread() -> Vec<u8> {
    let mut class = empty_class(TICKING_THREAD);
    class.add_field(access::PRIVATE, "thread", "Ljava/lang/Thread;").unwrap();
    let field = class
        .pool
        .intern_field_ref(TICKING_THREAD, "thread", "Ljava/lang/Thread;")
        .unwrap();
    let stop = class
        .pool
        .intern_method_ref("java/lang/Thread", "stop", "()V")
        .unwrap();

    let mut code = Code::new(2);
    let end = code.new_label();
    code.max_stack = 1;
    code.insns = vec![
        Insn::aload(0),
        Insn::field(Opcode::Getfield, field),
        Insn::astore(1),
        Insn::aload(1),
        Insn::jump(Opcode::Ifnull, end),
        Insn::aload(1),
        Insn::method(Opcode::Invokevirtual, stop),
        Insn::Label(end),
        Insn::simple(Opcode::Return),
    ];
    code.frames.insert(
        end,
        Frame::new(
            vec![VType::object(TICKING_THREAD), VType::object("java/lang/Thread")],
            vec![],
        ),
    );
    class.add_method(access::PUBLIC, "stop", "()V", code).unwrap();
    to_bytes(&class)
}

/// `SpawnMarkerEntity.setNpcReferences` storing its argument as-is
pub fn spawn_marker_entity() -> Vec<u8> {
    let mut class = empty_class(SPAWN_MARKER_ENTITY);
    let array = format!("[L{PERSISTENT_REF};");
    class.add_field(access::PRIVATE, "npcReferences", &array).unwrap();
    let field = class
        .pool
        .intern_field_ref(SPAWN_MARKER_ENTITY, "npcReferences", &array)
        .unwrap();

    let mut code = Code::new(2);
    code.max_stack = 2;
    code.insns = vec![
        Insn::aload(0),
        Insn::aload(1),
        Insn::field(Opcode::Putfield, field),
        Insn::simple(Opcode::Return),
    ];
    class
        .add_method(access::PUBLIC, "setNpcReferences", &format!("({array})V"), code)
        .unwrap();
    to_bytes(&class)
}

/// `PacketHandler.getOperationTimeoutThreshold` computing
/// `(long) (ping * 2.0) + 3000`
pub fn packet_handler() -> Vec<u8> {
    let mut class = empty_class(PACKET_HANDLER);
    let pool = &mut class.pool;
    let ping = pool
        .intern_method_ref(PACKET_HANDLER, "getAveragePing", "()J")
        .unwrap();
    let multiplier = pool.intern_double(2.0).unwrap();
    let base = pool.intern_long(3000).unwrap();

    let mut ping_code = Code::new(1);
    ping_code.max_stack = 2;
    ping_code.insns = vec![Insn::simple(Opcode::Lconst0), Insn::simple(Opcode::Lreturn)];
    class.add_method(access::PUBLIC, "getAveragePing", "()J", ping_code).unwrap();

    let mut code = Code::new(1);
    code.max_stack = 4;
    code.insns = vec![
        Insn::aload(0),
        Insn::method(Opcode::Invokevirtual, ping),
        Insn::simple(Opcode::L2d),
        Insn::ldc2(multiplier),
        Insn::simple(Opcode::Dmul),
        Insn::simple(Opcode::D2l),
        Insn::ldc2(base),
        Insn::simple(Opcode::Ladd),
        Insn::simple(Opcode::Lreturn),
    ];
    class
        .add_method(access::PUBLIC, "getOperationTimeoutThreshold", "()J", code)
        .unwrap();
    to_bytes(&class)
}

/// `LivingEntity` with two `setInventory` overloads
pub fn living_entity() -> Vec<u8> {
    let mut class = empty_class(LIVING_ENTITY);
    let inventory = format!("L{INVENTORY};");
    class.add_field(access::PRIVATE, "inventory", &inventory).unwrap();
    let field = class
        .pool
        .intern_field_ref(LIVING_ENTITY, "inventory", &inventory)
        .unwrap();
    let setter = format!("({inventory}){inventory}");
    let delegate = class
        .pool
        .intern_method_ref(LIVING_ENTITY, "setInventory", &setter)
        .unwrap();

    let mut code = Code::new(3);
    code.max_stack = 2;
    code.insns = vec![
        Insn::aload(0),
        Insn::field(Opcode::Getfield, field),
        Insn::astore(2),
        Insn::aload(0),
        Insn::aload(1),
        Insn::field(Opcode::Putfield, field),
        Insn::aload(2),
        Insn::simple(Opcode::Areturn),
    ];
    class.add_method(access::PUBLIC, "setInventory", &setter, code).unwrap();

    let mut code = Code::new(3);
    code.max_stack = 2;
    code.insns = vec![
        Insn::aload(0),
        Insn::aload(1),
        Insn::method(Opcode::Invokevirtual, delegate),
        Insn::simple(Opcode::Areturn),
    ];
    class
        .add_method(
            access::PUBLIC,
            "setInventory",
            &format!("({inventory}Z){inventory}"),
            code,
        )
        .unwrap();
    to_bytes(&class)
}

/// A class whose `run()` body catches everything, for handler round trips
pub fn guarded_runner(name: &str) -> Vec<u8> {
    let mut class = empty_class(name);
    let work = class.pool.intern_method_ref(name, "work", "()V").unwrap();

    let mut work_code = Code::new(1);
    work_code.insns = vec![Insn::simple(Opcode::Return)];
    class.add_method(access::PUBLIC, "work", "()V", work_code).unwrap();

    let mut code = Code::new(2);
    let start = code.new_label();
    let end = code.new_label();
    let handler = code.new_label();
    let done = code.new_label();
    code.max_stack = 1;
    code.insns = vec![
        Insn::Label(start),
        Insn::aload(0),
        Insn::method(Opcode::Invokevirtual, work),
        Insn::Label(end),
        Insn::jump(Opcode::Goto, done),
        Insn::Label(handler),
        Insn::astore(1),
        Insn::Label(done),
        Insn::simple(Opcode::Return),
    ];
    code.handlers.push(Handler {
        start,
        end,
        handler,
        catch_type: None,
    });
    code.frames.insert(
        handler,
        Frame::new(vec![VType::object(name)], vec![VType::object("java/lang/Throwable")]),
    );
    code.frames
        .insert(done, Frame::new(vec![VType::object(name)], vec![]));
    class.add_method(access::PUBLIC, "run", "()V", code).unwrap();
    to_bytes(&class)
}

/// Local slot past the one-byte index range
pub const WIDE_SLOT: u16 = 300;

/// A class whose static `dispatch(I)I` uses both switch forms, wide local
/// access and a wide `iinc`, for alignment and wide-encoding round trips
pub fn switch_dispatch(name: &str) -> Vec<u8> {
    let mut class = empty_class(name);

    let mut code = Code::new(WIDE_SLOT + 1);
    let arm0 = code.new_label();
    let arm1 = code.new_label();
    let arm2 = code.new_label();
    let fallback = code.new_label();
    code.max_stack = 1;
    code.insns = vec![
        Insn::var(Opcode::Iload, 0),
        Insn::TableSwitch {
            default: fallback,
            low: 0,
            targets: vec![arm0, arm1, arm2],
        },
        Insn::Label(arm0),
        Insn::var(Opcode::Iload, 0),
        Insn::LookupSwitch {
            default: fallback,
            pairs: vec![(-5, arm1), (100, arm2)],
        },
        Insn::Label(arm1),
        Insn::var(Opcode::Iload, 0),
        Insn::var(Opcode::Istore, WIDE_SLOT),
        Insn::Iinc {
            index: WIDE_SLOT,
            delta: 200,
        },
        Insn::var(Opcode::Iload, WIDE_SLOT),
        Insn::simple(Opcode::Ireturn),
        Insn::Label(arm2),
        Insn::simple(Opcode::Iconst2),
        Insn::simple(Opcode::Ireturn),
        Insn::Label(fallback),
        Insn::simple(Opcode::IconstM1),
        Insn::simple(Opcode::Ireturn),
    ];
    for label in [arm0, arm1, arm2, fallback] {
        code.frames.insert(label, Frame::new(vec![VType::Integer], vec![]));
    }
    class
        .add_method(access::PUBLIC | access::STATIC, "dispatch", "(I)I", code)
        .unwrap();
    to_bytes(&class)
}

/// Rendered instructions of one method, labels omitted
pub fn listing(bytes: &[u8], name: &str, descriptor: &str) -> Vec<String> {
    let class = ClassFile::parse(bytes).unwrap();
    let index = class
        .find_method(name, descriptor)
        .unwrap_or_else(|| panic!("no method {name}{descriptor}"));
    let code = class.methods[index].code().unwrap();
    code.instructions()
        .map(|(_, insn)| disasm::render_insn(insn, &class.pool).unwrap())
        .collect()
}

/// Whether a method's listing contains `needle` as a whole line
pub fn has_insn(bytes: &[u8], name: &str, descriptor: &str, needle: &str) -> bool {
    listing(bytes, name, descriptor).iter().any(|line| line == needle)
}
