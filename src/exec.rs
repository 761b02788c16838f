//! Instruction execution
//!
//! The executor dispatches on the instruction identifier, projecting
//! typed fields out of the raw instruction word as needed. Executors
//! own the program counter update: ordinary instructions increment it
//! by four, jumps and branches set it to their target directly, and
//! an executor that raises an exception leaves the program counter
//! pointing at the faulting instruction for the trap handler.
//!
//! Reads of rs1/rs2 go through the register-file contract (x0 reads
//! as zero) and writes to rd respect the x0 discard.

use crate::csr::{
    csr_is_valid, csr_is_writeable, CSR_MEPC, CSR_MSTATUS, MSTATUS_MIE, MSTATUS_MPIE,
    MSTATUS_MPP,
};
use crate::instr::{
    decode_btype, decode_csrtype, decode_itype, decode_jtype, decode_rtype, decode_stype,
    decode_utype, InstrId,
};
use crate::processor::{PrivilegeLevel, Processor};
use crate::trap::Exception;
use crate::utils::{
    interpret_i32_as_unsigned, interpret_u32_as_signed, set_bit, sign_extend, zero_extend,
};

pub(crate) fn execute_instr(
    cpu: &mut Processor,
    id: InstrId,
    instr: u32,
) -> Result<(), Exception> {
    use InstrId::*;
    match id {
        Lui | Auipc => execute_upper(cpu, id, instr),
        Jal => execute_jal(cpu, instr),
        Jalr => execute_jalr(cpu, instr),
        Beq | Bne | Blt | Bge | Bltu | Bgeu => execute_branch(cpu, id, instr),
        Lb | Lh | Lw | Lbu | Lhu => execute_load(cpu, id, instr),
        Sb | Sh | Sw => execute_store(cpu, id, instr),
        Addi | Slti | Sltiu | Xori | Ori | Andi => execute_reg_imm(cpu, id, instr),
        Slli | Srli | Srai | Add | Sub | Sll | Slt | Sltu | Xor | Srl | Sra | Or | And => {
            execute_reg_reg(cpu, id, instr)
        }
        // No memory ordering to enforce in this simulator
        Fence => {
            cpu.increment_pc();
            Ok(())
        }
        Ecall => execute_ecall(cpu),
        Ebreak => execute_ebreak(cpu),
        Csrrw | Csrrs | Csrrc | Csrrwi | Csrrsi | Csrrci => execute_csr(cpu, id, instr),
        Mret => execute_mret(cpu),
        Unknown => execute_unknown(cpu),
    }
}

fn execute_upper(cpu: &mut Processor, id: InstrId, instr: u32) -> Result<(), Exception> {
    let fields = decode_utype(instr);
    let imm = fields.imm << 12;
    let value = match id {
        InstrId::Lui => imm,
        InstrId::Auipc => cpu.get_pc().wrapping_add(imm),
        _ => unreachable!(),
    };
    cpu.set_reg(fields.rd, value);
    cpu.increment_pc();
    Ok(())
}

fn execute_jal(cpu: &mut Processor, instr: u32) -> Result<(), Exception> {
    let fields = decode_jtype(instr);
    let offset = sign_extend(fields.imm, 20).wrapping_mul(2);
    let return_address = cpu.get_pc().wrapping_add(4);
    let target = cpu.get_pc().wrapping_add(offset);
    cpu.set_reg(fields.rd, return_address);
    cpu.set_pc(target);
    Ok(())
}

fn execute_jalr(cpu: &mut Processor, instr: u32) -> Result<(), Exception> {
    let fields = decode_itype(instr);
    let offset = sign_extend(fields.imm.into(), 12);
    // The least-significant bit of the target is forced to zero
    let target = set_bit(cpu.get_reg(fields.rs1).wrapping_add(offset), 1, false);
    let return_address = cpu.get_pc().wrapping_add(4);
    cpu.set_reg(fields.rd, return_address);
    cpu.set_pc(target);
    Ok(())
}

fn execute_branch(cpu: &mut Processor, id: InstrId, instr: u32) -> Result<(), Exception> {
    let fields = decode_btype(instr);
    let src1 = cpu.get_reg(fields.rs1);
    let src2 = cpu.get_reg(fields.rs2);
    let branch_taken = match id {
        InstrId::Beq => src1 == src2,
        InstrId::Bne => src1 != src2,
        InstrId::Blt => interpret_u32_as_signed(src1) < interpret_u32_as_signed(src2),
        InstrId::Bge => interpret_u32_as_signed(src1) >= interpret_u32_as_signed(src2),
        InstrId::Bltu => src1 < src2,
        InstrId::Bgeu => src1 >= src2,
        _ => unreachable!(),
    };
    if branch_taken {
        let offset = sign_extend(fields.imm.into(), 12).wrapping_mul(2);
        cpu.set_pc(cpu.get_pc().wrapping_add(offset));
    } else {
        cpu.increment_pc();
    }
    Ok(())
}

fn execute_load(cpu: &mut Processor, id: InstrId, instr: u32) -> Result<(), Exception> {
    let fields = decode_itype(instr);
    let offset = sign_extend(fields.imm.into(), 12);
    let load_address = cpu.get_reg(fields.rs1).wrapping_add(offset);

    let misaligned = match id {
        InstrId::Lw => load_address % 4 != 0,
        InstrId::Lh | InstrId::Lhu => load_address % 2 != 0,
        _ => false,
    };
    if misaligned {
        log::debug!("misaligned load from address {load_address:08x}");
        return Err(Exception::LoadAddressMisaligned);
    }

    let word = cpu.memory.read_word(load_address);
    let shift = 8 * (load_address % 4);
    let value = match id {
        InstrId::Lb => sign_extend((word >> shift) & 0xff, 8),
        InstrId::Lbu => zero_extend(word >> shift, 8),
        InstrId::Lh => sign_extend((word >> shift) & 0xffff, 16),
        InstrId::Lhu => zero_extend(word >> shift, 16),
        InstrId::Lw => word,
        _ => unreachable!(),
    };
    cpu.set_reg(fields.rd, value);
    cpu.increment_pc();
    Ok(())
}

fn execute_store(cpu: &mut Processor, id: InstrId, instr: u32) -> Result<(), Exception> {
    let fields = decode_stype(instr);
    let offset = sign_extend(fields.imm.into(), 12);
    let store_address = cpu.get_reg(fields.rs1).wrapping_add(offset);

    let misaligned = match id {
        InstrId::Sw => store_address % 4 != 0,
        InstrId::Sh => store_address % 2 != 0,
        _ => false,
    };
    if misaligned {
        log::debug!("misaligned store to address {store_address:08x}");
        return Err(Exception::StoreAddressMisaligned);
    }

    let data = cpu.get_reg(fields.rs2);
    let shift = 8 * (store_address % 4);
    let (data, mask) = match id {
        InstrId::Sb => ((data & 0xff) << shift, 0xffu32 << shift),
        InstrId::Sh => ((data & 0xffff) << shift, 0xffffu32 << shift),
        InstrId::Sw => (data, 0xffff_ffff),
        _ => unreachable!(),
    };
    cpu.memory.write_word(store_address, data, mask);
    cpu.increment_pc();
    Ok(())
}

fn execute_reg_imm(cpu: &mut Processor, id: InstrId, instr: u32) -> Result<(), Exception> {
    let fields = decode_itype(instr);
    let src = cpu.get_reg(fields.rs1);
    let imm = sign_extend(fields.imm.into(), 12);
    let value = match id {
        InstrId::Addi => src.wrapping_add(imm),
        InstrId::Slti => {
            (interpret_u32_as_signed(src) < interpret_u32_as_signed(imm)) as u32
        }
        InstrId::Sltiu => (src < imm) as u32,
        InstrId::Xori => src ^ imm,
        InstrId::Ori => src | imm,
        InstrId::Andi => src & imm,
        _ => unreachable!(),
    };
    cpu.set_reg(fields.rd, value);
    cpu.increment_pc();
    Ok(())
}

fn execute_reg_reg(cpu: &mut Processor, id: InstrId, instr: u32) -> Result<(), Exception> {
    let fields = decode_rtype(instr);
    let src1 = cpu.get_reg(fields.rs1);
    let src2 = cpu.get_reg(fields.rs2);
    let value = match id {
        InstrId::Add => src1.wrapping_add(src2),
        InstrId::Sub => src1.wrapping_sub(src2),
        InstrId::Slt => {
            (interpret_u32_as_signed(src1) < interpret_u32_as_signed(src2)) as u32
        }
        InstrId::Sltu => (src1 < src2) as u32,
        InstrId::Xor => src1 ^ src2,
        InstrId::Or => src1 | src2,
        InstrId::And => src1 & src2,
        InstrId::Sll => src1 << (0x1f & src2),
        InstrId::Srl => src1 >> (0x1f & src2),
        InstrId::Sra => {
            interpret_i32_as_unsigned(interpret_u32_as_signed(src1) >> (0x1f & src2))
        }
        // The shift-immediate instructions take the shift amount from
        // the rs2 field
        InstrId::Slli => src1 << fields.rs2,
        InstrId::Srli => src1 >> fields.rs2,
        InstrId::Srai => {
            interpret_i32_as_unsigned(interpret_u32_as_signed(src1) >> fields.rs2)
        }
        _ => unreachable!(),
    };
    cpu.set_reg(fields.rd, value);
    cpu.increment_pc();
    Ok(())
}

fn execute_ecall(cpu: &mut Processor) -> Result<(), Exception> {
    if !cpu.privileged() {
        println!("ecall: not implemented");
        cpu.increment_pc();
        return Ok(());
    }
    Err(match cpu.get_prv() {
        PrivilegeLevel::Machine => Exception::EcallFromMachineMode,
        PrivilegeLevel::User => Exception::EcallFromUserMode,
    })
}

fn execute_ebreak(cpu: &mut Processor) -> Result<(), Exception> {
    if !cpu.privileged() {
        println!("ebreak: not implemented");
        cpu.increment_pc();
        return Ok(());
    }
    Err(Exception::Breakpoint)
}

fn execute_unknown(cpu: &mut Processor) -> Result<(), Exception> {
    if !cpu.privileged() {
        println!("Error: illegal instruction");
        cpu.increment_pc();
        return Ok(());
    }
    Err(Exception::IllegalInstruction)
}

fn execute_csr(cpu: &mut Processor, id: InstrId, instr: u32) -> Result<(), Exception> {
    // The CSR instructions have no effect without the privilege model
    if !cpu.privileged() {
        cpu.increment_pc();
        return Ok(());
    }

    let fields = decode_csrtype(instr);
    if !csr_is_valid(fields.csr) {
        log::debug!("illegal instruction: invalid CSR 0x{:03x}", fields.csr);
        return Err(Exception::IllegalInstruction);
    }

    let can_write_csr =
        cpu.get_prv() == PrivilegeLevel::Machine && csr_is_writeable(fields.csr);

    match id {
        InstrId::Csrrw | InstrId::Csrrwi => {
            if !can_write_csr {
                return Err(Exception::IllegalInstruction);
            }
            // Only read the CSR if rd is not x0
            if fields.rd != 0 {
                cpu.set_reg(fields.rd, cpu.get_csr(fields.csr));
            }
            let value = if id == InstrId::Csrrwi {
                u32::from(fields.rs1)
            } else {
                cpu.get_reg(fields.rs1)
            };
            cpu.set_csr(fields.csr, value, false);
        }
        InstrId::Csrrs | InstrId::Csrrsi => {
            if fields.rs1 != 0 && !can_write_csr {
                return Err(Exception::IllegalInstruction);
            }
            let old_csr = cpu.get_csr(fields.csr);
            let mask = if id == InstrId::Csrrsi {
                u32::from(fields.rs1)
            } else {
                cpu.get_reg(fields.rs1)
            };
            cpu.set_reg(fields.rd, old_csr);
            if fields.rs1 != 0 {
                cpu.set_csr(fields.csr, old_csr | mask, true);
            }
        }
        InstrId::Csrrc | InstrId::Csrrci => {
            if fields.rs1 != 0 && !can_write_csr {
                return Err(Exception::IllegalInstruction);
            }
            let old_csr = cpu.get_csr(fields.csr);
            let mask = if id == InstrId::Csrrci {
                u32::from(fields.rs1)
            } else {
                cpu.get_reg(fields.rs1)
            };
            cpu.set_reg(fields.rd, old_csr);
            if fields.rs1 != 0 {
                cpu.set_csr(fields.csr, old_csr & !mask, false);
            }
        }
        _ => unreachable!(),
    }

    cpu.increment_pc();
    Ok(())
}

fn execute_mret(cpu: &mut Processor) -> Result<(), Exception> {
    if !cpu.privileged() {
        cpu.increment_pc();
        return Ok(());
    }
    if cpu.get_prv() != PrivilegeLevel::Machine {
        log::debug!("mret requires machine mode");
        return Err(Exception::IllegalInstruction);
    }

    cpu.set_pc(cpu.get_csr(CSR_MEPC));

    // Pop the privilege stack: MIE is restored from MPIE, the
    // privilege level from MPP, then MPIE is set to 1 and MPP to USER
    let mstatus = cpu.get_csr(CSR_MSTATUS);
    let mpie = (mstatus >> MSTATUS_MPIE) & 1;
    let mpp = (mstatus >> MSTATUS_MPP) & 0b11;
    cpu.set_csr(
        CSR_MSTATUS,
        (mpie << MSTATUS_MIE) | (1 << MSTATUS_MPIE),
        false,
    );
    cpu.set_prv(mpp);
    Ok(())
}
