//! Processor control
//!
//! The [`Processor`] owns all architectural state: the register
//! file, program counter, CSR file, privilege level, breakpoint,
//! executed-instruction counter, and the memory. The command
//! interface drives it through the `show_*`/`set_*` operations and
//! [`Processor::execute`].
//!
//! The simulator runs in one of two modes. In the basic mode the
//! system instructions print a diagnostic and continue; with the
//! privilege model enabled the CSR file becomes writeable and ecall,
//! ebreak, illegal instructions and CSR accesses trap through mtvec.

use crate::csr::{
    csr_is_valid, csr_is_writeable, CsrFile, CSR_MCAUSE, CSR_MEPC, CSR_MIE, CSR_MIP,
    CSR_MSTATUS, CSR_MTVAL, CSR_MTVEC, MSTATUS_MIE, MSTATUS_MPIE, MSTATUS_MPP,
};
use crate::decode::{decode, instruction_to_assembly};
use crate::exec;
use crate::instr::{decode_itype, decode_stype};
use crate::memory::Memory;
use crate::registers::Registers;
use crate::trap::{Exception, Interrupt, Trap};
use crate::utils::{address_is_word_aligned, sign_extend};

/// Current operating privilege level. Only user and machine mode
/// exist; all other levels are invalid.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PrivilegeLevel {
    User = 0,
    Machine = 3,
}

impl PrivilegeLevel {
    fn from_level(level: u32) -> Self {
        match level {
            0 => Self::User,
            3 => Self::Machine,
            _ => panic!("invalid privilege level {level}"),
        }
    }
}

/// Interrupt polling order: decreasing priority as required for
/// simultaneous pending interrupts
const INTERRUPT_PRIORITY: [Interrupt; 6] = [
    Interrupt::MachineExternal,
    Interrupt::MachineSoftware,
    Interrupt::MachineTimer,
    Interrupt::UserExternal,
    Interrupt::UserSoftware,
    Interrupt::UserTimer,
];

#[derive(Debug)]
pub struct Processor {
    pc: u32,
    registers: Registers,
    csrs: CsrFile,
    prv: PrivilegeLevel,
    breakpoint: Option<u32>,
    instruction_count: u64,
    privileged: bool,
    pub memory: Memory,
}

impl Processor {
    /// Create a processor owning the given memory. `privileged`
    /// enables the machine/user privilege model (stage two of the
    /// simulator); without it the CSR file is inert and the system
    /// instructions print diagnostics instead of trapping.
    pub fn new(memory: Memory, privileged: bool) -> Self {
        Self {
            pc: 0,
            registers: Registers::default(),
            csrs: CsrFile::default(),
            prv: PrivilegeLevel::Machine,
            breakpoint: None,
            instruction_count: 0,
            privileged,
            memory,
        }
    }

    pub fn privileged(&self) -> bool {
        self.privileged
    }

    pub fn get_pc(&self) -> u32 {
        self.pc
    }

    pub fn set_pc(&mut self, new_value: u32) {
        self.pc = new_value;
        log::trace!("pc <- {new_value:08x}");
    }

    pub fn increment_pc(&mut self) {
        self.pc = self.pc.wrapping_add(4);
    }

    pub fn show_pc(&self) {
        println!("{:08x}", self.pc);
    }

    pub fn get_reg(&self, reg_num: u8) -> u32 {
        self.registers.read(reg_num)
    }

    pub fn set_reg(&mut self, reg_num: u8, new_value: u32) {
        self.registers.write(reg_num, new_value);
    }

    pub fn show_reg(&self, reg_num: u8) {
        println!("{:08x}", self.registers.read(reg_num));
    }

    pub fn show_registers(&self) {
        print!("{}", self.registers);
    }

    pub fn set_breakpoint(&mut self, address: u32) {
        self.breakpoint = Some(address);
        log::debug!("breakpoint set to address {address:08x}");
    }

    pub fn clear_breakpoint(&mut self) {
        self.breakpoint = None;
    }

    /// Get the value of a CSR. The code must be valid.
    pub fn get_csr(&self, csr: u16) -> u32 {
        assert!(csr_is_valid(csr), "invalid CSR number 0x{csr:03x}");
        self.csrs.read(csr)
    }

    pub fn show_csr(&self, csr: u16) {
        if !csr_is_valid(csr) {
            println!("Illegal CSR number");
            return;
        }
        println!("{:08x}", self.csrs.read(csr));
    }

    /// Set a CSR to a new value, applying its field policy. The code
    /// must be valid. `from_instr` selects the CSR-instruction write
    /// discipline for mip. Writes are ignored entirely when the
    /// privilege model is disabled.
    pub fn set_csr(&mut self, csr: u16, new_value: u32, from_instr: bool) {
        assert!(csr_is_valid(csr), "invalid CSR number 0x{csr:03x}");
        if !self.privileged {
            log::debug!("not setting CSR: privilege model is disabled");
            return;
        }
        if !csr_is_writeable(csr) {
            println!("Illegal write to read-only CSR");
            return;
        }
        self.csrs.write(csr, new_value, from_instr);
    }

    pub fn get_prv(&self) -> PrivilegeLevel {
        self.prv
    }

    /// Set the privilege level; only levels 0 (user) and 3 (machine)
    /// exist.
    pub fn set_prv(&mut self, level: u32) {
        log::debug!("setting privilege to {level}");
        self.prv = PrivilegeLevel::from_level(level);
    }

    pub fn show_prv(&self) {
        match self.prv {
            PrivilegeLevel::Machine => println!("3 (machine)"),
            PrivilegeLevel::User => println!("0 (user)"),
        }
    }

    /// The number of instructions executed. Excludes instructions
    /// that were interrupted or raised an exception.
    pub fn get_instruction_count(&self) -> u64 {
        self.instruction_count
    }

    /// Execute a number of instructions.
    ///
    /// Each step polls for pending interrupts, taking one as a trap
    /// if it is enabled, then fetches, decodes and executes the
    /// instruction at the program counter. A step interrupted this
    /// way continues at the handler, so the handler's first
    /// instruction executes in the same step. If `check_breakpoints`
    /// is set and the breakpoint address matches the program counter,
    /// execution stops after the fetch without advancing.
    pub fn execute(&mut self, num: u32, check_breakpoints: bool) {
        for _ in 0..num {
            if let Some(int) = self.pending_interrupt() {
                log::debug!("taking interrupt {int:?}");
                self.handle_trap(Trap::Interrupt(int), 0);
            }

            let mut word = 0;
            let result = if !address_is_word_aligned(self.pc) {
                log::debug!("pc {:08x} is misaligned, skipping fetch", self.pc);
                Err(Exception::InstructionAddressMisaligned)
            } else {
                word = self.memory.read_word(self.pc);

                if check_breakpoints && self.breakpoint == Some(self.pc) {
                    println!("Breakpoint reached at {:08x}", self.pc);
                    return;
                }

                let id = decode(word);
                log::debug!(
                    "pc {:08x} -> memory {word:08x} -> {}",
                    self.pc,
                    instruction_to_assembly(word)
                );
                exec::execute_instr(self, id, word)
            };

            match result {
                Ok(()) => self.instruction_count += 1,
                Err(ex) => self.handle_trap(Trap::Exception(ex), word),
            }
        }
    }

    /// Evaluate the conditions for taking a pending interrupt.
    ///
    /// Interrupts are enabled in user mode unconditionally, and in
    /// machine mode when mstatus.MIE is set. The pending/enabled
    /// pairs are checked in decreasing priority order and the first
    /// match is returned.
    fn pending_interrupt(&self) -> Option<Interrupt> {
        let enabled = match self.prv {
            PrivilegeLevel::User => true,
            PrivilegeLevel::Machine => {
                (self.csrs.read(CSR_MSTATUS) >> MSTATUS_MIE) & 1 != 0
            }
        };
        if !enabled {
            return None;
        }
        let mip = self.csrs.read(CSR_MIP);
        let mie = self.csrs.read(CSR_MIE);
        INTERRUPT_PRIORITY
            .into_iter()
            .find(|int| mip & mie & (1 << int.bit()) != 0)
    }

    /// Take a trap: push the privilege stack, record the cause,
    /// faulting pc and trap value, and redirect through mtvec.
    ///
    /// `instr` is the fetched instruction word, used to recompute the
    /// effective address of a misaligned load or store for mtval.
    fn handle_trap(&mut self, trap: Trap, instr: u32) {
        log::debug!("trapped: {trap:?} (mcause {:08x})", trap.mcause());

        // Push the privilege stack: MPIE <- MIE, MIE <- 0, MPP <-
        // current privilege, then elevate to machine mode
        let mstatus = self.csrs.read(CSR_MSTATUS);
        let mie = (mstatus >> MSTATUS_MIE) & 1;
        let pushed = (mie << MSTATUS_MPIE) | ((self.prv as u32) << MSTATUS_MPP);
        self.set_csr(CSR_MSTATUS, pushed, false);
        if self.prv == PrivilegeLevel::User {
            self.set_prv(PrivilegeLevel::Machine as u32);
        }

        self.set_csr(CSR_MCAUSE, trap.mcause(), false);
        self.set_csr(CSR_MEPC, self.pc, false);

        if let Trap::Exception(ex) = trap {
            match ex {
                Exception::IllegalInstruction => {
                    let faulting_instr = self.memory.read_word_unaligned(self.pc);
                    self.set_csr(CSR_MTVAL, faulting_instr, false);
                }
                Exception::LoadAddressMisaligned => {
                    let fields = decode_itype(instr);
                    let bad_address = self
                        .get_reg(fields.rs1)
                        .wrapping_add(sign_extend(fields.imm.into(), 12));
                    self.set_csr(CSR_MTVAL, bad_address, false);
                }
                Exception::StoreAddressMisaligned => {
                    let fields = decode_stype(instr);
                    let bad_address = self
                        .get_reg(fields.rs1)
                        .wrapping_add(sign_extend(fields.imm.into(), 12));
                    self.set_csr(CSR_MTVAL, bad_address, false);
                }
                Exception::InstructionAddressMisaligned => {
                    self.set_csr(CSR_MTVAL, self.pc, false);
                }
                _ => (),
            }
        }

        let mtvec = self.csrs.read(CSR_MTVEC);
        let handler_address = mtvec & !0b11;
        let mode = mtvec & 0b11;

        // Exceptions ignore the mtvec mode and always jump to the
        // base address
        if let Trap::Exception(_) = trap {
            self.set_pc(handler_address);
            return;
        }

        match mode {
            // Direct
            0b00 => self.set_pc(handler_address),
            // Vectored: the offset uses the full mcause value, top
            // bit included, with wrapping arithmetic
            0b01 => self.set_pc(handler_address.wrapping_add(trap.mcause().wrapping_mul(4))),
            // Reserved modes leave the pc alone. Unreachable through
            // the mtvec write policy, which hard-wires bit 1 to zero.
            _ => log::warn!("mtvec mode {mode} is reserved, trap not redirected"),
        }
    }
}
