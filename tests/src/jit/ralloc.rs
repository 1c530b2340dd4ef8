use kestrel_core::{FunIdx, Function, FunSig, OpCode, RegIdx, TypeCatalogue, TypeDesc};
use kestrel_jit::{
    AllocatorState, CodeBuffer, FirstFit, RegFile, RoundRobin, VRegTable,
};

fn setup(nregs: usize) -> (VRegTable, CodeBuffer) {
    let mut c = TypeCatalogue::new();
    let i64_t = c.add(TypeDesc::I64);
    let ty = c.add(TypeDesc::Fun(FunSig {
        args: vec![],
        ret: i64_t,
    }));
    let f = Function {
        fidx: FunIdx(0),
        ty,
        regs: vec![i64_t; nregs],
        ops: vec![OpCode::Ret { reg: RegIdx(0) }],
    };
    (VRegTable::layout(&f, &c).unwrap(), CodeBuffer::new())
}

#[test]
fn acquire_prefers_free_registers() {
    let (mut vregs, mut buf) = setup(4);
    let mut alloc = AllocatorState::new(Box::new(FirstFit));
    alloc.begin_op();
    let p0 = alloc.acquire(RegFile::Cpu, &mut buf, &mut vregs);
    alloc.bind(&mut vregs, RegIdx(0), p0, false);
    let p1 = alloc.acquire(RegFile::Cpu, &mut buf, &mut vregs);
    assert_ne!(p0, p1);
    // Nothing dirty, so no spill code was emitted.
    assert_eq!(buf.offset(), 0);
}

#[test]
fn binding_is_one_to_one() {
    let (mut vregs, mut buf) = setup(4);
    let mut alloc = AllocatorState::new(Box::new(FirstFit));
    alloc.begin_op();
    let p0 = alloc.acquire(RegFile::Cpu, &mut buf, &mut vregs);
    alloc.bind(&mut vregs, RegIdx(0), p0, true);
    alloc.check_invariant(&vregs);

    // Rebinding the vreg to another register severs the old link first.
    let p1 = {
        alloc.lock(p0);
        alloc.acquire(RegFile::Cpu, &mut buf, &mut vregs)
    };
    alloc.bind(&mut vregs, RegIdx(0), p1, true);
    alloc.check_invariant(&vregs);
    assert_eq!(vregs.binding(RegIdx(0)), Some(p1));
    assert_eq!(alloc.owner(p0), None);
    assert_eq!(alloc.owner(p1), Some(RegIdx(0)));
}

#[test]
fn eviction_flushes_dirty_value_first() {
    let (mut vregs, mut buf) = setup(16);
    let mut alloc = AllocatorState::new(Box::new(FirstFit));
    alloc.begin_op();

    // Occupy every CPU register with dirty bindings.
    let mut held = Vec::new();
    for i in 0..7 {
        let p = alloc.acquire(RegFile::Cpu, &mut buf, &mut vregs);
        alloc.bind(&mut vregs, RegIdx(i), p, true);
        held.push(p);
    }
    let before = buf.offset();
    assert_eq!(before, 0);

    // The next acquire must evict one holder and emit its spill store.
    alloc.begin_op();
    let p = alloc.acquire(RegFile::Cpu, &mut buf, &mut vregs);
    assert!(buf.offset() > before, "eviction must flush to the home slot");
    assert_eq!(alloc.owner(p), None);
    alloc.check_invariant(&vregs);
}

#[test]
fn locked_registers_are_never_victims() {
    let (mut vregs, mut buf) = setup(16);
    let mut alloc = AllocatorState::new(Box::new(FirstFit));
    alloc.begin_op();

    let first = alloc.acquire(RegFile::Cpu, &mut buf, &mut vregs);
    alloc.bind(&mut vregs, RegIdx(0), first, true);
    alloc.lock(first);
    for i in 1..7 {
        let p = alloc.acquire(RegFile::Cpu, &mut buf, &mut vregs);
        alloc.bind(&mut vregs, RegIdx(i as u32), p, false);
    }
    // All full; first is locked, so the victim must be someone else.
    let p = alloc.acquire(RegFile::Cpu, &mut buf, &mut vregs);
    assert_ne!(p, first);
    assert_eq!(alloc.owner(first), Some(RegIdx(0)));
}

#[test]
fn sync_all_keeps_bindings() {
    let (mut vregs, mut buf) = setup(4);
    let mut alloc = AllocatorState::new(Box::new(FirstFit));
    alloc.begin_op();
    let p = alloc.acquire(RegFile::Cpu, &mut buf, &mut vregs);
    alloc.bind(&mut vregs, RegIdx(0), p, true);
    alloc.sync_all(&mut buf, &vregs);
    assert!(buf.offset() > 0);
    assert_eq!(vregs.binding(RegIdx(0)), Some(p));
    assert!(!alloc.is_dirty(p));
}

#[test]
fn discard_all_unbinds_everything() {
    let (mut vregs, mut buf) = setup(4);
    let mut alloc = AllocatorState::new(Box::new(FirstFit));
    alloc.begin_op();
    let p = alloc.acquire(RegFile::Cpu, &mut buf, &mut vregs);
    alloc.bind(&mut vregs, RegIdx(0), p, true);
    let q = alloc.acquire(RegFile::Fpu, &mut buf, &mut vregs);
    alloc.bind(&mut vregs, RegIdx(1), q, false);
    alloc.discard_all(&mut buf, &mut vregs);
    assert_eq!(vregs.binding(RegIdx(0)), None);
    assert_eq!(vregs.binding(RegIdx(1)), None);
    assert_eq!(alloc.owner(p), None);
    assert_eq!(alloc.owner(q), None);
}

#[test]
fn round_robin_rotates_choices() {
    let (mut vregs, mut buf) = setup(4);
    let mut alloc = AllocatorState::new(Box::new(RoundRobin::default()));
    alloc.begin_op();
    let a = alloc.acquire(RegFile::Cpu, &mut buf, &mut vregs);
    let b = alloc.acquire(RegFile::Cpu, &mut buf, &mut vregs);
    // Neither is bound, yet the rotation still spreads the picks.
    assert_ne!(a, b);
}

#[test]
fn acquire_named_takes_the_exact_register() {
    use kestrel_jit::x86_64::regs::{Reg, ALLOC_CPU};
    let (mut vregs, mut buf) = setup(8);
    let mut alloc = AllocatorState::new(Box::new(FirstFit));
    alloc.begin_op();

    // Fill RCX with a dirty binding, then demand it.
    let target = ALLOC_CPU.iter().position(|&r| r == Reg::Rcx).unwrap();
    loop {
        let p = alloc.acquire(RegFile::Cpu, &mut buf, &mut vregs);
        let taken = p.slot as usize == target;
        alloc.bind(&mut vregs, RegIdx(p.slot as u32), p, true);
        if taken {
            break;
        }
    }
    let before = buf.offset();
    let p = alloc.acquire_named(Reg::Rcx, &mut buf, &mut vregs);
    assert_eq!(p.cpu(), Reg::Rcx);
    assert_eq!(alloc.owner(p), None);
    assert!(buf.offset() > before, "dirty occupant must be flushed");
}
