//! Instruction decoding
//!
//! Decoding walks a fixed-order table of (identifier, pattern) pairs.
//! For each entry the instruction word is masked by the field mask of
//! the entry's type (the bits that uniquely identify an instruction
//! within that type) and compared with the canonical pattern; the
//! first match wins. Instructions that do not fit the table — the
//! exact-encoding system instructions, the CSR group and fence — are
//! checked afterwards.

use crate::instr::{
    decode_btype, decode_csrtype, decode_itype, decode_jtype, decode_rtype, decode_stype,
    decode_utype, funct3, opcode, InstrId, EBREAK_INSTR, ECALL_INSTR, FUNCT3_CSRRC,
    FUNCT3_CSRRCI, FUNCT3_CSRRS, FUNCT3_CSRRSI, FUNCT3_CSRRW, FUNCT3_CSRRWI, FUNCT3_BEQ,
    FUNCT3_BGE, FUNCT3_BGEU, FUNCT3_BLT, FUNCT3_BLTU, FUNCT3_BNE, FUNCT7_ALT, MRET_INSTR,
    OP, OP_AUIPC, OP_BRANCH, OP_IMM, OP_JAL, OP_JALR, OP_LOAD, OP_LUI, OP_MISC_MEM,
    OP_STORE, OP_SYSTEM,
};
use crate::utils::{interpret_u32_as_signed, sign_extend};

/// Canonical match patterns in decode order. Each pattern is the
/// instruction word with every field outside the type's field mask
/// set to zero.
const DECODE_TABLE: [(InstrId, u32); 37] = [
    (InstrId::Lui, OP_LUI),
    (InstrId::Auipc, OP_AUIPC),
    (InstrId::Jal, OP_JAL),
    (InstrId::Jalr, OP_JALR),
    (InstrId::Beq, FUNCT3_BEQ << 12 | OP_BRANCH),
    (InstrId::Bne, FUNCT3_BNE << 12 | OP_BRANCH),
    (InstrId::Blt, FUNCT3_BLT << 12 | OP_BRANCH),
    (InstrId::Bge, FUNCT3_BGE << 12 | OP_BRANCH),
    (InstrId::Bltu, FUNCT3_BLTU << 12 | OP_BRANCH),
    (InstrId::Bgeu, FUNCT3_BGEU << 12 | OP_BRANCH),
    (InstrId::Lb, OP_LOAD),
    (InstrId::Lh, 0b001 << 12 | OP_LOAD),
    (InstrId::Lw, 0b010 << 12 | OP_LOAD),
    (InstrId::Lbu, 0b100 << 12 | OP_LOAD),
    (InstrId::Lhu, 0b101 << 12 | OP_LOAD),
    (InstrId::Sb, OP_STORE),
    (InstrId::Sh, 0b001 << 12 | OP_STORE),
    (InstrId::Sw, 0b010 << 12 | OP_STORE),
    (InstrId::Addi, OP_IMM),
    (InstrId::Slti, 0b010 << 12 | OP_IMM),
    (InstrId::Sltiu, 0b011 << 12 | OP_IMM),
    (InstrId::Xori, 0b100 << 12 | OP_IMM),
    (InstrId::Ori, 0b110 << 12 | OP_IMM),
    (InstrId::Andi, 0b111 << 12 | OP_IMM),
    (InstrId::Slli, 0b001 << 12 | OP_IMM),
    (InstrId::Srli, 0b101 << 12 | OP_IMM),
    (InstrId::Srai, FUNCT7_ALT << 25 | 0b101 << 12 | OP_IMM),
    (InstrId::Add, OP),
    (InstrId::Sub, FUNCT7_ALT << 25 | OP),
    (InstrId::Sll, 0b001 << 12 | OP),
    (InstrId::Slt, 0b010 << 12 | OP),
    (InstrId::Sltu, 0b011 << 12 | OP),
    (InstrId::Xor, 0b100 << 12 | OP),
    (InstrId::Srl, 0b101 << 12 | OP),
    (InstrId::Sra, FUNCT7_ALT << 25 | 0b101 << 12 | OP),
    (InstrId::Or, 0b110 << 12 | OP),
    (InstrId::And, 0b111 << 12 | OP),
];

/// Map a 32-bit instruction word to its identifier
pub fn decode(instr: u32) -> InstrId {
    for (id, pattern) in DECODE_TABLE {
        if instr & id.instr_type().field_mask() == pattern {
            return id;
        }
    }

    // The system instructions with no operand fields only ever take
    // these exact values
    match instr {
        ECALL_INSTR => return InstrId::Ecall,
        EBREAK_INSTR => return InstrId::Ebreak,
        MRET_INSTR => return InstrId::Mret,
        _ => (),
    }

    if opcode(instr) == OP_SYSTEM {
        match u32::from(funct3(instr)) {
            FUNCT3_CSRRW => return InstrId::Csrrw,
            FUNCT3_CSRRS => return InstrId::Csrrs,
            FUNCT3_CSRRC => return InstrId::Csrrc,
            FUNCT3_CSRRWI => return InstrId::Csrrwi,
            FUNCT3_CSRRSI => return InstrId::Csrrsi,
            FUNCT3_CSRRCI => return InstrId::Csrrci,
            _ => (),
        }
    }

    if opcode(instr) == OP_MISC_MEM {
        return InstrId::Fence;
    }

    InstrId::Unknown
}

/// Render an instruction word as assembly for tracing
pub fn instruction_to_assembly(instr: u32) -> String {
    use InstrId::*;

    let id = decode(instr);
    let name = id.mnemonic();

    match id {
        Lui | Auipc => {
            let fields = decode_utype(instr);
            format!("{name:<6} x{}, 0x{:05x}", fields.rd, fields.imm)
        }
        Jal => {
            let fields = decode_jtype(instr);
            let offset = interpret_u32_as_signed(sign_extend(fields.imm, 20).wrapping_mul(2));
            format!("{name:<6} x{}, {offset}", fields.rd)
        }
        Beq | Bne | Blt | Bge | Bltu | Bgeu => {
            let fields = decode_btype(instr);
            let offset =
                interpret_u32_as_signed(sign_extend(fields.imm.into(), 12).wrapping_mul(2));
            format!("{name:<6} x{}, x{}, {offset}", fields.rs1, fields.rs2)
        }
        Jalr | Lb | Lh | Lw | Lbu | Lhu | Addi | Slti | Sltiu | Xori | Ori | Andi => {
            let fields = decode_itype(instr);
            let imm = interpret_u32_as_signed(sign_extend(fields.imm.into(), 12));
            format!("{name:<6} x{}, x{}, {imm}", fields.rd, fields.rs1)
        }
        Sb | Sh | Sw => {
            let fields = decode_stype(instr);
            let imm = interpret_u32_as_signed(sign_extend(fields.imm.into(), 12));
            format!("{name:<6} x{}, x{}, {imm}", fields.rs1, fields.rs2)
        }
        Slli | Srli | Srai => {
            let fields = decode_rtype(instr);
            format!("{name:<6} x{}, x{}, {}", fields.rd, fields.rs1, fields.rs2)
        }
        Add | Sub | Sll | Slt | Sltu | Xor | Srl | Sra | Or | And => {
            let fields = decode_rtype(instr);
            format!("{name:<6} x{}, x{}, x{}", fields.rd, fields.rs1, fields.rs2)
        }
        Csrrw | Csrrs | Csrrc => {
            let fields = decode_csrtype(instr);
            format!("{name} x{}, x{}, 0x{:x}", fields.rd, fields.rs1, fields.csr)
        }
        Csrrwi | Csrrsi | Csrrci => {
            let fields = decode_csrtype(instr);
            format!("{name} x{}, {}, 0x{:x}", fields.rd, fields.rs1, fields.csr)
        }
        Fence | Ecall | Ebreak | Mret => name.to_string(),
        Unknown => "[unknown instruction]".to_string(),
    }
}
