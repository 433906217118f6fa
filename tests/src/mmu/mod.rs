//! Software MMU over a page-mapped address space.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use proptest::prelude::*;
use xlat_core::{AccessKind, FaultKind, MemOp, MemOpIdx};
use xlat_mmu::{
    AddressSpace, MmioDevice, SoftMmu, MMU_USER_IDX, PAGE_SIZE, PROT_EXEC, PROT_READ, PROT_RWX,
    PROT_USER, PROT_WRITE,
};

use crate::common::machine::init_logger;

const RAM: u64 = 0x10_0000;
const M_IDX: usize = 3;

fn paged_space() -> Arc<AddressSpace> {
    init_logger();
    let space = Arc::new(AddressSpace::with_page_map());
    space.add_ram(RAM, 16 * PAGE_SIZE).unwrap();
    space
}

fn oi(op: MemOp, idx: usize) -> MemOpIdx {
    MemOpIdx::new(op, idx as u32)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn access_faults_iff_denied(
        prot in 0u8..16,
        user in any::<bool>(),
        write in any::<bool>(),
        page in 0u64..4,
        offset in 0u64..(PAGE_SIZE - 8),
    ) {
        let space = paged_space();
        space.map(0x4000_0000, RAM, 4 * PAGE_SIZE, prot).unwrap();
        let mmu = SoftMmu::new(space.clone(), 4);
        let idx = if user { MMU_USER_IDX } else { M_IDX };
        let addr = 0x4000_0000 + page * PAGE_SIZE + offset;

        let need = if write { PROT_WRITE } else { PROT_READ };
        let allowed = prot & need != 0 && (!user || prot & PROT_USER != 0);
        let result = if write {
            mmu.store(addr, 0x1122, oi(MemOp::uw(), idx)).map(|_| 0)
        } else {
            mmu.load(addr, oi(MemOp::uw(), idx))
        };
        match result {
            Ok(_) => prop_assert!(allowed),
            Err(f) => {
                prop_assert!(!allowed);
                prop_assert_eq!(f.kind, FaultKind::Permission);
                prop_assert_eq!(f.addr, addr);
                let access = if write { AccessKind::Write } else { AccessKind::Read };
                prop_assert_eq!(f.access, access);
            }
        }
    }
}

#[test]
fn unmapped_page_faults() {
    let space = paged_space();
    let mmu = SoftMmu::new(space, 4);
    let f = mmu.load(0x5000, oi(MemOp::uq(), M_IDX)).unwrap_err();
    assert_eq!(f.kind, FaultKind::PageFault);
    assert_eq!(f.access, AccessKind::Read);
    let f = mmu.fetch_code(0x5000, M_IDX).unwrap_err();
    assert_eq!(f.access, AccessKind::Execute);
}

#[test]
fn mapping_changes_reach_cached_translations() {
    let space = paged_space();
    space.map(0x2000, RAM, PAGE_SIZE, PROT_RWX).unwrap();
    let mmu = SoftMmu::new(space.clone(), 4);
    let e0 = space.epoch();

    mmu.store(0x2008, 0xdead_beef, oi(MemOp::ul(), M_IDX)).unwrap();
    assert_eq!(mmu.load(0x2008, oi(MemOp::ul(), M_IDX)), Ok(0xdead_beef));

    space.protect(0x2000, PAGE_SIZE, PROT_READ).unwrap();
    assert!(space.epoch() > e0);
    let f = mmu.store(0x2008, 0, oi(MemOp::ul(), M_IDX)).unwrap_err();
    assert_eq!(f.kind, FaultKind::Permission);

    // Remap the same virtual page onto the next physical page.
    space.map(0x2000, RAM + PAGE_SIZE, PAGE_SIZE, PROT_RWX).unwrap();
    assert_eq!(mmu.load(0x2008, oi(MemOp::ul(), M_IDX)), Ok(0));

    space.unmap(0x2000, PAGE_SIZE).unwrap();
    let f = mmu.load(0x2008, oi(MemOp::ul(), M_IDX)).unwrap_err();
    assert_eq!(f.kind, FaultKind::PageFault);
}

#[test]
fn sign_extension_and_page_crossing() {
    let space = paged_space();
    space.map(0x2000, RAM, 2 * PAGE_SIZE, PROT_RWX).unwrap();
    let mmu = SoftMmu::new(space.clone(), 4);
    let idx = M_IDX;

    mmu.store(0x2010, 0x80, oi(MemOp::ub(), idx)).unwrap();
    assert_eq!(mmu.load(0x2010, oi(MemOp::sb(), idx)), Ok(u64::MAX - 0x7f));
    assert_eq!(mmu.load(0x2010, oi(MemOp::ub(), idx)), Ok(0x80));

    let edge = 0x2000 + PAGE_SIZE - 3;
    mmu.store(edge, 0x0807_0605_0403_0201, oi(MemOp::uq(), idx)).unwrap();
    assert_eq!(mmu.load(edge, oi(MemOp::uq(), idx)), Ok(0x0807_0605_0403_0201));
    let mut raw = [0u8; 8];
    space.read_phys(RAM + PAGE_SIZE - 3, &mut raw).unwrap();
    assert_eq!(raw, [1, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn faulting_cross_page_store_writes_nothing() {
    let space = paged_space();
    space.map(0x2000, RAM, PAGE_SIZE, PROT_RWX).unwrap();
    space.map(0x3000, RAM + PAGE_SIZE, PAGE_SIZE, PROT_READ).unwrap();
    let mmu = SoftMmu::new(space.clone(), 4);

    let f = mmu
        .store(0x2ffc, u64::MAX, oi(MemOp::uq(), M_IDX))
        .unwrap_err();
    assert_eq!(f.kind, FaultKind::Permission);
    assert_eq!(f.addr, 0x3003);
    let mut raw = [0xaau8; 4];
    space.read_phys(RAM + PAGE_SIZE - 4, &mut raw).unwrap();
    assert_eq!(raw, [0; 4]);
}

#[test]
fn alignment_only_when_requested() {
    let space = paged_space();
    space.map(0x2000, RAM, PAGE_SIZE, PROT_RWX).unwrap();
    let mmu = SoftMmu::new(space, 4);
    assert!(mmu.load(0x2003, oi(MemOp::ul(), M_IDX)).is_ok());
    let f = mmu
        .load(0x2003, oi(MemOp::ul().with(MemOp::ALIGN), M_IDX))
        .unwrap_err();
    assert_eq!(f.kind, FaultKind::Misaligned);
    let f = mmu
        .atomic_rmw(xlat_core::AtomicOp::Add, 0x2004, 1, oi(MemOp::uq(), M_IDX))
        .unwrap_err();
    assert_eq!((f.kind, f.access), (FaultKind::Misaligned, AccessKind::Write));
}

#[test]
fn atomics() {
    let space = paged_space();
    space.map(0x2000, RAM, PAGE_SIZE, PROT_RWX).unwrap();
    let mmu = SoftMmu::new(space, 4);
    let w = oi(MemOp::sl(), M_IDX);
    mmu.store(0x2000, 0xffff_fff0, w).unwrap();
    assert_eq!(
        mmu.atomic_rmw(xlat_core::AtomicOp::Add, 0x2000, 0x20, w),
        Ok(0xffff_ffff_ffff_fff0)
    );
    assert_eq!(mmu.load(0x2000, w), Ok(0x10));
    assert_eq!(mmu.atomic_cmpxchg(0x2000, 0x11, 5, w), Ok(0x10));
    assert_eq!(mmu.load(0x2000, w), Ok(0x10));
    assert_eq!(mmu.atomic_cmpxchg(0x2000, 0x10, 5, w), Ok(0x10));
    assert_eq!(mmu.load(0x2000, w), Ok(5));
}

/// Remembers the last write and answers reads with `offset + size`.
#[derive(Default)]
struct Probe {
    last: AtomicU64,
}

impl MmioDevice for Probe {
    fn read(&self, offset: u64, size: u32) -> u64 {
        offset + size as u64
    }

    fn write(&self, offset: u64, size: u32, val: u64) {
        self.last.store(offset << 32 | (size as u64) << 16 | val, Ordering::SeqCst);
    }
}

#[test]
fn mmio_dispatch() {
    let space = paged_space();
    let dev = Arc::new(Probe::default());
    space.add_mmio(0x20_0000, PAGE_SIZE, dev.clone()).unwrap();
    space.map(0x9000, 0x20_0000, PAGE_SIZE, PROT_READ | PROT_WRITE).unwrap();
    let mmu = SoftMmu::new(space, 4);

    assert_eq!(mmu.load(0x9010, oi(MemOp::ul(), M_IDX)), Ok(0x14));
    mmu.store(0x9008, 0x55, oi(MemOp::uw(), M_IDX)).unwrap();
    assert_eq!(dev.last.load(Ordering::SeqCst), 8 << 32 | 2 << 16 | 0x55);

    let f = mmu
        .atomic_rmw(xlat_core::AtomicOp::Add, 0x9000, 1, oi(MemOp::ul(), M_IDX))
        .unwrap_err();
    assert_eq!(f.kind, FaultKind::Unsupported);
}

#[test]
fn fetch_needs_exec() {
    let space = paged_space();
    space.map(0x2000, RAM, PAGE_SIZE, PROT_READ | PROT_WRITE).unwrap();
    space.map(0x3000, RAM, PAGE_SIZE, PROT_EXEC).unwrap();
    space.write_phys(RAM, &0x0000_0013u32.to_le_bytes()).unwrap();
    let mmu = SoftMmu::new(space, 4);
    assert_eq!(mmu.fetch_code(0x3000, M_IDX), Ok(0x13));
    let f = mmu.fetch_code(0x2000, M_IDX).unwrap_err();
    assert_eq!(f.kind, FaultKind::Permission);
    let f = mmu.fetch_code(0x3000, MMU_USER_IDX).unwrap_err();
    assert_eq!(f.kind, FaultKind::Permission);
}
