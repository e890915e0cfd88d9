//! AMD64 `CONTEXT` record as the managed runtime expects it.
//!
//! The layout is bit-exact with the Windows definition: 1232 bytes, 16-byte
//! aligned. Only control, integer and segment registers are ever filled in.

use crate::debug::types::RegisterState;

pub const CONTEXT_AMD64: u32 = 0x0010_0000;
pub const CONTEXT_CONTROL: u32 = CONTEXT_AMD64 | 0x01;
pub const CONTEXT_INTEGER: u32 = CONTEXT_AMD64 | 0x02;
pub const CONTEXT_SEGMENTS: u32 = CONTEXT_AMD64 | 0x04;
pub const CONTEXT_FLOATING_POINT: u32 = CONTEXT_AMD64 | 0x08;
pub const CONTEXT_DEBUG_REGISTERS: u32 = CONTEXT_AMD64 | 0x10;
pub const CONTEXT_FULL: u32 = CONTEXT_CONTROL | CONTEXT_INTEGER | CONTEXT_FLOATING_POINT;
pub const CONTEXT_ALL: u32 = CONTEXT_FULL | CONTEXT_SEGMENTS | CONTEXT_DEBUG_REGISTERS;

/// 128-bit register slot
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct M128A {
    pub low: u64,
    pub high: i64,
}

/// Legacy FPU/SSE save area (`FXSAVE` format)
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct XmmSaveArea32 {
    pub control_word: u16,
    pub status_word: u16,
    pub tag_word: u8,
    pub reserved1: u8,
    pub error_opcode: u16,
    pub error_offset: u32,
    pub error_selector: u16,
    pub reserved2: u16,
    pub data_offset: u32,
    pub data_selector: u16,
    pub reserved3: u16,
    pub mx_csr: u32,
    pub mx_csr_mask: u32,
    pub float_registers: [M128A; 8],
    pub xmm_registers: [M128A; 16],
    pub reserved4: [u8; 96],
}

/// Thread context record
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy)]
pub struct DtContext {
    pub p1_home: u64,
    pub p2_home: u64,
    pub p3_home: u64,
    pub p4_home: u64,
    pub p5_home: u64,
    pub p6_home: u64,

    pub context_flags: u32,
    pub mx_csr: u32,

    pub seg_cs: u16,
    pub seg_ds: u16,
    pub seg_es: u16,
    pub seg_fs: u16,
    pub seg_gs: u16,
    pub seg_ss: u16,
    pub eflags: u32,

    pub dr0: u64,
    pub dr1: u64,
    pub dr2: u64,
    pub dr3: u64,
    pub dr6: u64,
    pub dr7: u64,

    pub rax: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rbx: u64,
    pub rsp: u64,
    pub rbp: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,

    pub rip: u64,

    pub flt_save: XmmSaveArea32,

    pub vector_register: [M128A; 26],
    pub vector_control: u64,

    pub debug_control: u64,
    pub last_branch_to_rip: u64,
    pub last_branch_from_rip: u64,
    pub last_exception_to_rip: u64,
    pub last_exception_from_rip: u64,
}

impl DtContext {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// An all-zero record
    pub fn zeroed() -> Self {
        // SAFETY: plain integers and arrays of integers; all-zero is valid
        unsafe { std::mem::zeroed() }
    }

    /// Record holding the control, integer and segment registers of `regs`
    pub fn from_registers(regs: &RegisterState, flags: u32) -> Self {
        let mut context = Self::zeroed();
        context.context_flags = flags;

        context.rip = regs.rip;
        context.rsp = regs.rsp;
        context.rbp = regs.rbp;
        context.eflags = regs.rflags as u32;

        context.rax = regs.rax;
        context.rbx = regs.rbx;
        context.rcx = regs.rcx;
        context.rdx = regs.rdx;
        context.rsi = regs.rsi;
        context.rdi = regs.rdi;
        context.r8 = regs.r8;
        context.r9 = regs.r9;
        context.r10 = regs.r10;
        context.r11 = regs.r11;
        context.r12 = regs.r12;
        context.r13 = regs.r13;
        context.r14 = regs.r14;
        context.r15 = regs.r15;

        context.seg_cs = regs.cs as u16;
        context.seg_ds = regs.ds as u16;
        context.seg_es = regs.es as u16;
        context.seg_fs = regs.fs as u16;
        context.seg_gs = regs.gs as u16;
        context.seg_ss = regs.ss as u16;

        context
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: repr(C) without padding; every byte is initialized
        unsafe { std::slice::from_raw_parts(self as *const Self as *const u8, Self::SIZE) }
    }

    /// Copy the record into the front of `buffer`; false if it does not fit
    pub fn write_to(&self, buffer: &mut [u8]) -> bool {
        match buffer.get_mut(..Self::SIZE) {
            Some(dest) => {
                dest.copy_from_slice(self.as_bytes());
                true
            }
            None => false,
        }
    }
}
