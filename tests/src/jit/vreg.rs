use kestrel_core::{FunIdx, Function, FunSig, OpCode, OpIdx, RegIdx, TypeCatalogue, TypeDesc};
use kestrel_jit::VRegTable;

fn cat() -> (TypeCatalogue, Vec<kestrel_core::TypeIdx>) {
    let mut c = TypeCatalogue::new();
    let void = c.add(TypeDesc::Void);
    let boolean = c.add(TypeDesc::Bool);
    let i32_t = c.add(TypeDesc::I32);
    let i64_t = c.add(TypeDesc::I64);
    let f64_t = c.add(TypeDesc::F64);
    let dynamic = c.add(TypeDesc::Dyn);
    (c, vec![void, boolean, i32_t, i64_t, f64_t, dynamic])
}

fn fun(
    c: &mut TypeCatalogue,
    args: Vec<kestrel_core::TypeIdx>,
    ret: kestrel_core::TypeIdx,
    regs: Vec<kestrel_core::TypeIdx>,
    ops: Vec<OpCode>,
) -> Function {
    let ty = c.add(TypeDesc::Fun(FunSig { args, ret }));
    Function {
        fidx: FunIdx(0),
        ty,
        regs,
        ops,
    }
}

#[test]
fn argument_slots_ascend_above_frame_base() {
    let (mut c, t) = cat();
    let (i64_t, i32_t) = (t[3], t[2]);
    let f = fun(
        &mut c,
        vec![i64_t, i32_t, i64_t],
        i64_t,
        vec![i64_t, i32_t, i64_t],
        vec![OpCode::Ret { reg: RegIdx(0) }],
    );
    let v = VRegTable::layout(&f, &c).unwrap();
    assert_eq!(v.nargs, 3);
    assert_eq!(v.info(RegIdx(0)).slot, 16);
    assert_eq!(v.info(RegIdx(1)).slot, 24);
    assert_eq!(v.info(RegIdx(2)).slot, 32);
}

#[test]
fn local_slots_descend_with_natural_alignment() {
    let (mut c, t) = cat();
    let (boolean, i32_t, i64_t) = (t[1], t[2], t[3]);
    // bool, i64, i32, bool: -1, then -16 (8-aligned), -20, -21
    let f = fun(
        &mut c,
        vec![],
        i64_t,
        vec![boolean, i64_t, i32_t, boolean],
        vec![OpCode::Ret { reg: RegIdx(1) }],
    );
    let v = VRegTable::layout(&f, &c).unwrap();
    assert_eq!(v.info(RegIdx(0)).slot, -1);
    assert_eq!(v.info(RegIdx(1)).slot, -16);
    assert_eq!(v.info(RegIdx(2)).slot, -20);
    assert_eq!(v.info(RegIdx(3)).slot, -21);
    assert_eq!(v.frame_size % 16, 0);
    assert!(v.frame_size >= 21);
}

#[test]
fn void_registers_take_no_space() {
    let (mut c, t) = cat();
    let (void, i64_t) = (t[0], t[3]);
    let f = fun(
        &mut c,
        vec![],
        i64_t,
        vec![void, i64_t],
        vec![OpCode::Ret { reg: RegIdx(1) }],
    );
    let v = VRegTable::layout(&f, &c).unwrap();
    assert_eq!(v.info(RegIdx(0)).width, 0);
    assert_eq!(v.info(RegIdx(1)).slot, -8);
    assert_eq!(v.frame_size, 16);
}

#[test]
fn trap_areas_reserved_per_nesting_level() {
    let (mut c, t) = cat();
    let (i64_t, dynamic) = (t[3], t[5]);
    let ops = vec![
        OpCode::Trap {
            dst: RegIdx(1),
            handler: OpIdx(5),
        },
        OpCode::Trap {
            dst: RegIdx(2),
            handler: OpIdx(4),
        },
        OpCode::EndTrap,
        OpCode::EndTrap,
        OpCode::Ret { reg: RegIdx(0) },
        OpCode::Ret { reg: RegIdx(0) },
    ];
    let f = fun(
        &mut c,
        vec![],
        i64_t,
        vec![i64_t, dynamic, dynamic],
        ops,
    );
    let v = VRegTable::layout(&f, &c).unwrap();
    let t0 = v.trap_slot(0);
    let t1 = v.trap_slot(1);
    assert!(t0 < 0 && t1 < t0);
    assert!(t0 - t1 >= 80);
    assert_eq!(t0 % 16, 0);
    assert_eq!(t1 % 16, 0);
}

#[test]
fn slots_are_immutable_operands() {
    let (mut c, t) = cat();
    let i64_t = t[3];
    let f = fun(
        &mut c,
        vec![i64_t],
        i64_t,
        vec![i64_t, i64_t],
        vec![OpCode::Ret { reg: RegIdx(0) }],
    );
    let v = VRegTable::layout(&f, &c).unwrap();
    let a = v.slot_operand(RegIdx(0));
    let b = v.slot_operand(RegIdx(0));
    assert_eq!(a, b);
}
