use crate::{
    pattern::{InstructionPattern, Operand},
    register, INSTRUCTION_SIZE,
};
use std::fmt;
use strum::VariantNames;

#[derive(VariantNames, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum Mnenomic {
    Add,
    Addi,
    Addiu,
    Addu,
    And,
    Andi,
    Beq,
    Beql,
    Bgez,
    Bgezal,
    Bgezall,
    Bgezl,
    Bgtz,
    Bgtzl,
    Blez,
    Blezl,
    Bltz,
    Bltzal,
    Bltzall,
    Bltzl,
    Bne,
    Bnel,
    Break,
    Cache,
    Clo,
    Clz,
    Div,
    Divu,
    J,
    Jal,
    Jalr,
    Jr,
    Lb,
    Lbu,
    Lh,
    Lhu,
    Lui,
    Lw,
    Lwl,
    Lwr,
    Max,
    Mfhi,
    Mflo,
    Min,
    Movn,
    Movz,
    Mthi,
    Mtlo,
    Mult,
    Multu,
    Nor,
    Or,
    Ori,
    Sb,
    Seb,
    Seh,
    Sh,
    Sll,
    Sllv,
    Slt,
    Slti,
    Sltiu,
    Sltu,
    Sra,
    Srav,
    Srl,
    Srlv,
    Sub,
    Subu,
    Sw,
    Swl,
    Swr,
    Sync,
    Syscall,
    Xor,
    Xori,
}

impl Mnenomic {
    pub const fn is_branch(&self) -> bool {
        matches!(
            self,
            Mnenomic::Beq
                | Mnenomic::Beql
                | Mnenomic::Bgez
                | Mnenomic::Bgezal
                | Mnenomic::Bgezall
                | Mnenomic::Bgezl
                | Mnenomic::Bgtz
                | Mnenomic::Bgtzl
                | Mnenomic::Blez
                | Mnenomic::Blezl
                | Mnenomic::Bltz
                | Mnenomic::Bltzal
                | Mnenomic::Bltzall
                | Mnenomic::Bltzl
                | Mnenomic::Bne
                | Mnenomic::Bnel
        )
    }

    pub const fn is_jump(&self) -> bool {
        matches!(
            self,
            Mnenomic::J | Mnenomic::Jal | Mnenomic::Jalr | Mnenomic::Jr
        )
    }

    pub const fn ends_block(&self) -> bool {
        self.is_branch() || self.is_jump() || matches!(self, Mnenomic::Syscall | Mnenomic::Break)
    }

    pub const fn discards_delay_slot(&self) -> bool {
        matches!(
            self,
            Mnenomic::Beql
                | Mnenomic::Bgezall
                | Mnenomic::Bgezl
                | Mnenomic::Bgtzl
                | Mnenomic::Blezl
                | Mnenomic::Bltzall
                | Mnenomic::Bltzl
                | Mnenomic::Bnel
        )
    }

    pub const fn has_delay_slot(&self) -> bool {
        self.is_branch() || self.is_jump()
    }

    /// Whether the instruction writes the return address into `ra`, regardless of the branch outcome.
    pub const fn links(&self) -> bool {
        matches!(
            self,
            Mnenomic::Jal
                | Mnenomic::Bgezal
                | Mnenomic::Bgezall
                | Mnenomic::Bltzal
                | Mnenomic::Bltzall
        )
    }

    /// Estimated number of guest cycles the instruction takes, used for scheduling.
    pub const fn cycles(&self) -> u32 {
        match self {
            Mnenomic::Mult | Mnenomic::Multu => 5,
            Mnenomic::Div | Mnenomic::Divu => 36,
            _ => 1,
        }
    }

    pub const fn name(&self) -> &'static str {
        Self::VARIANTS[*self as usize]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Signedness {
    Signed16,
    Unsigned32,
    Unsigned16,
}

impl Signedness {
    pub fn format(&self, num: u32) -> String {
        match self {
            Signedness::Signed16 => format!("{}", num as i16),
            Signedness::Unsigned32 => format!("{num:#x}"),
            Signedness::Unsigned16 => format!("{:#x}", num as u16),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pattern: InstructionPattern,
    mnenomic: Mnenomic,
    operands: &'static [(Operand, Signedness)],
}

impl Instruction {
    pub const fn new(
        mnenomic: Mnenomic,
        pattern: &str,
        operands: &'static [(Operand, Signedness)],
    ) -> Self {
        Self {
            pattern: InstructionPattern::new(pattern),
            mnenomic,
            operands,
        }
    }

    pub fn format(&self, raw: u32) -> String {
        if raw == 0 {
            // Pseudo instruction
            return "nop".to_string();
        }

        let mut operands = Vec::with_capacity(self.operands.len());
        let mut iter = self.operands.iter().peekable();
        while let Some((op, sign)) = iter.next() {
            let num = self.pattern.get(*op, raw).unwrap_or_default();
            match op {
                Operand::Offset if matches!(iter.peek(), Some((Operand::Base, _))) => {
                    let base = self.pattern.get(Operand::Base, raw).unwrap_or_default();
                    let base = register::GeneralPurpose::name_from_index(base as usize);
                    operands.push(format!("{}({base})", sign.format(num)));
                    break; // Always the last parameter
                }
                _ if op.is_register() => {
                    operands.push(register::GeneralPurpose::name_from_index(num as usize).to_string());
                }
                _ => operands.push(sign.format(num)),
            }
        }

        if operands.is_empty() {
            self.mnenomic.name().to_string()
        } else {
            format!("{: <8}{}", self.mnenomic.name(), operands.join(", "))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInstruction {
    instr: &'static Instruction,
    raw: u32,
}

impl ParsedInstruction {
    pub const fn new(raw: u32) -> Option<Self> {
        if let Some(instr) = decode(raw) {
            Some(Self { instr, raw })
        } else {
            None
        }
    }

    pub const fn raw(&self) -> u32 {
        self.raw
    }

    pub const fn mnemonic(&self) -> Mnenomic {
        self.instr.mnenomic
    }

    pub const fn ends_block(&self) -> bool {
        self.instr.mnenomic.ends_block()
    }

    pub const fn has_delay_slot(&self) -> bool {
        self.instr.mnenomic.has_delay_slot()
    }

    pub const fn discards_delay_slot(&self) -> bool {
        self.instr.mnenomic.discards_delay_slot()
    }

    pub const fn cycles(&self) -> u32 {
        self.instr.mnenomic.cycles()
    }

    pub const fn get(&self, op: Operand) -> Option<u32> {
        self.instr.pattern.get(op, self.raw)
    }

    fn operand(&self, op: Operand, what: &str) -> u32 {
        self.get(op).unwrap_or_else(|| {
            panic!(
                "failed to get {what} for instruction {:?}",
                self.instr.mnenomic.name()
            )
        })
    }

    pub fn rt(&self) -> u32 {
        self.operand(Operand::Target, "target register")
    }

    pub fn rs(&self) -> u32 {
        self.operand(Operand::Source, "source register")
    }

    pub fn rd(&self) -> u32 {
        self.operand(Operand::Destination, "destination register")
    }

    pub fn base(&self) -> u32 {
        self.operand(Operand::Base, "base register")
    }

    pub fn sa(&self) -> u32 {
        self.operand(Operand::Immediate, "shift amount")
    }

    /// The raw immediate field, without any sign extension.
    pub fn immediate(&self) -> u32 {
        self.operand(Operand::Immediate, "immediate")
    }

    /// The immediate field sign extended from 16 bits.
    pub fn signed_immediate(&self) -> u32 {
        self.immediate() as u16 as i16 as i32 as u32
    }

    /// The memory or branch offset, sign extended from 16 bits.
    pub fn offset(&self) -> i32 {
        self.operand(Operand::Offset, "offset") as u16 as i16 as i32
    }

    /// Resolves the target of a PC-relative branch or an absolute jump, given the address of this instruction.
    pub fn try_resolve_static_jump(&self, pc: u32) -> Option<u32> {
        let delay_slot = pc.wrapping_add(INSTRUCTION_SIZE);
        match self.instr.mnenomic {
            m if m.is_branch() => Some(delay_slot.wrapping_add((self.offset() << 2) as u32)),
            Mnenomic::J | Mnenomic::Jal => {
                Some((delay_slot & 0xF000_0000) | (self.immediate() << 2))
            }
            _ => None,
        }
    }

    /// The general purpose register this instruction writes, if any. Writes to `zero` are not reported.
    pub fn output_register(&self) -> Option<u32> {
        use Mnenomic::*;
        let reg = match self.instr.mnenomic {
            Add | Addu | Sub | Subu | And | Or | Xor | Nor | Slt | Sltu | Sll | Srl | Sra | Sllv
            | Srlv | Srav | Mfhi | Mflo | Movz | Movn | Clz | Clo | Max | Min | Seb | Seh
            | Jalr => self.rd(),
            Addi | Addiu | Slti | Sltiu | Andi | Ori | Xori | Lui | Lb | Lbu | Lh | Lhu | Lw
            | Lwl | Lwr => self.rt(),
            m if m.links() => register::GeneralPurpose::Ra.into(),
            _ => return None,
        };
        (reg != 0).then_some(reg)
    }
}

impl TryFrom<u32> for ParsedInstruction {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(())
    }
}

impl fmt::Display for ParsedInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.instr.format(self.raw))
    }
}

const fn decode(instr_raw: u32) -> Option<&'static Instruction> {
    let mut i = 0;
    while i < INSTRUCTIONS.len() {
        let instr = &INSTRUCTIONS[i];
        if instr.pattern.matches(instr_raw) {
            return Some(instr);
        }
        i += 1;
    }
    None
}

macro_rules! operand {
    ($name:ident) => {
        (Operand::$name, Signedness::Unsigned32)
    };

    ($name:ident, $sign:ident) => {
        (Operand::$name, Signedness::$sign)
    };
}

macro_rules! instr {
    ($mnenomic:ident, $pattern:expr) => {
        Instruction::new(Mnenomic::$mnenomic, $pattern, &[])
    };

    ($mnenomic:ident, $pattern:expr, $($operands:tt)*) => {
        Instruction::new(Mnenomic::$mnenomic, $pattern, &[$(operand! $operands),*])
    };
}

/// The 32-bit integer instruction set, plus the few Allegrex extensions common in guest code.
#[rustfmt::skip]
const INSTRUCTIONS: &[Instruction] = &[
    instr!(Add,     "0000 00ss ssst tttt dddd d000 0010 0000", (Destination)(Source)(Target)),
    instr!(Addi,    "0010 00ss ssst tttt kkkk kkkk kkkk kkkk", (Target)(Source)(Immediate, Signed16)),
    instr!(Addiu,   "0010 01ss ssst tttt kkkk kkkk kkkk kkkk", (Target)(Source)(Immediate, Signed16)),
    instr!(Addu,    "0000 00ss ssst tttt dddd d000 0010 0001", (Destination)(Source)(Target)),
    instr!(And,     "0000 00ss ssst tttt dddd d000 0010 0100", (Destination)(Source)(Target)),
    instr!(Andi,    "0011 00ss ssst tttt kkkk kkkk kkkk kkkk", (Target)(Source)(Immediate, Unsigned16)),
    instr!(Beq,     "0001 00ss ssst tttt ffff ffff ffff ffff", (Source)(Target)(Offset, Signed16)),
    instr!(Beql,    "0101 00ss ssst tttt ffff ffff ffff ffff", (Source)(Target)(Offset, Signed16)),
    instr!(Bgez,    "0000 01ss sss0 0001 ffff ffff ffff ffff", (Source)(Offset, Signed16)),
    instr!(Bgezal,  "0000 01ss sss1 0001 ffff ffff ffff ffff", (Source)(Offset, Signed16)),
    instr!(Bgezall, "0000 01ss sss1 0011 ffff ffff ffff ffff", (Source)(Offset, Signed16)),
    instr!(Bgezl,   "0000 01ss sss0 0011 ffff ffff ffff ffff", (Source)(Offset, Signed16)),
    instr!(Bgtz,    "0001 11ss sss0 0000 ffff ffff ffff ffff", (Source)(Offset, Signed16)),
    instr!(Bgtzl,   "0101 11ss sss0 0000 ffff ffff ffff ffff", (Source)(Offset, Signed16)),
    instr!(Blez,    "0001 10ss sss0 0000 ffff ffff ffff ffff", (Source)(Offset, Signed16)),
    instr!(Blezl,   "0101 10ss sss0 0000 ffff ffff ffff ffff", (Source)(Offset, Signed16)),
    instr!(Bltz,    "0000 01ss sss0 0000 ffff ffff ffff ffff", (Source)(Offset, Signed16)),
    instr!(Bltzal,  "0000 01ss sss1 0000 ffff ffff ffff ffff", (Source)(Offset, Signed16)),
    instr!(Bltzall, "0000 01ss sss1 0010 ffff ffff ffff ffff", (Source)(Offset, Signed16)),
    instr!(Bltzl,   "0000 01ss sss0 0010 ffff ffff ffff ffff", (Source)(Offset, Signed16)),
    instr!(Bne,     "0001 01ss ssst tttt ffff ffff ffff ffff", (Source)(Target)(Offset, Signed16)),
    instr!(Bnel,    "0101 01ss ssst tttt ffff ffff ffff ffff", (Source)(Target)(Offset, Signed16)),
    instr!(Break,   "0000 00kk kkkk kkkk kkkk kkkk kk00 1101"),
    instr!(Cache,   "1011 11bb bbbk kkkk ffff ffff ffff ffff", (Immediate)(Offset, Signed16)(Base)),
    instr!(Clo,     "0000 00ss sss0 0000 dddd d000 0001 0111", (Destination)(Source)),
    instr!(Clz,     "0000 00ss sss0 0000 dddd d000 0001 0110", (Destination)(Source)),
    instr!(Div,     "0000 00ss ssst tttt 0000 0000 0001 1010", (Source)(Target)),
    instr!(Divu,    "0000 00ss ssst tttt 0000 0000 0001 1011", (Source)(Target)),
    instr!(J,       "0000 10kk kkkk kkkk kkkk kkkk kkkk kkkk", (Immediate)),
    instr!(Jal,     "0000 11kk kkkk kkkk kkkk kkkk kkkk kkkk", (Immediate)),
    instr!(Jalr,    "0000 00ss sss0 0000 dddd d000 0000 1001", (Destination)(Source)),
    instr!(Jr,      "0000 00ss sss0 0000 0000 0000 0000 1000", (Source)),
    instr!(Lb,      "1000 00bb bbbt tttt ffff ffff ffff ffff", (Target)(Offset, Signed16)(Base)),
    instr!(Lbu,     "1001 00bb bbbt tttt ffff ffff ffff ffff", (Target)(Offset, Signed16)(Base)),
    instr!(Lh,      "1000 01bb bbbt tttt ffff ffff ffff ffff", (Target)(Offset, Signed16)(Base)),
    instr!(Lhu,     "1001 01bb bbbt tttt ffff ffff ffff ffff", (Target)(Offset, Signed16)(Base)),
    instr!(Lui,     "0011 1100 000t tttt kkkk kkkk kkkk kkkk", (Target)(Immediate, Unsigned16)),
    instr!(Lw,      "1000 11bb bbbt tttt ffff ffff ffff ffff", (Target)(Offset, Signed16)(Base)),
    instr!(Lwl,     "1000 10bb bbbt tttt ffff ffff ffff ffff", (Target)(Offset, Signed16)(Base)),
    instr!(Lwr,     "1001 10bb bbbt tttt ffff ffff ffff ffff", (Target)(Offset, Signed16)(Base)),
    instr!(Max,     "0000 00ss ssst tttt dddd d000 0010 1100", (Destination)(Source)(Target)),
    instr!(Mfhi,    "0000 0000 0000 0000 dddd d000 0001 0000", (Destination)),
    instr!(Mflo,    "0000 0000 0000 0000 dddd d000 0001 0010", (Destination)),
    instr!(Min,     "0000 00ss ssst tttt dddd d000 0010 1101", (Destination)(Source)(Target)),
    instr!(Movn,    "0000 00ss ssst tttt dddd d000 0000 1011", (Destination)(Source)(Target)),
    instr!(Movz,    "0000 00ss ssst tttt dddd d000 0000 1010", (Destination)(Source)(Target)),
    instr!(Mthi,    "0000 00ss sss0 0000 0000 0000 0001 0001", (Source)),
    instr!(Mtlo,    "0000 00ss sss0 0000 0000 0000 0001 0011", (Source)),
    instr!(Mult,    "0000 00ss ssst tttt 0000 0000 0001 1000", (Source)(Target)),
    instr!(Multu,   "0000 00ss ssst tttt 0000 0000 0001 1001", (Source)(Target)),
    instr!(Nor,     "0000 00ss ssst tttt dddd d000 0010 0111", (Destination)(Source)(Target)),
    instr!(Or,      "0000 00ss ssst tttt dddd d000 0010 0101", (Destination)(Source)(Target)),
    instr!(Ori,     "0011 01ss ssst tttt kkkk kkkk kkkk kkkk", (Target)(Source)(Immediate, Unsigned16)),
    instr!(Sb,      "1010 00bb bbbt tttt ffff ffff ffff ffff", (Target)(Offset, Signed16)(Base)),
    instr!(Seb,     "0111 1100 000t tttt dddd d100 0010 0000", (Destination)(Target)),
    instr!(Seh,     "0111 1100 000t tttt dddd d110 0010 0000", (Destination)(Target)),
    instr!(Sh,      "1010 01bb bbbt tttt ffff ffff ffff ffff", (Target)(Offset, Signed16)(Base)),
    instr!(Sll,     "0000 0000 000t tttt dddd dkkk kk00 0000", (Destination)(Target)(Immediate)),
    instr!(Sllv,    "0000 00ss ssst tttt dddd d000 0000 0100", (Destination)(Target)(Source)),
    instr!(Slt,     "0000 00ss ssst tttt dddd d000 0010 1010", (Destination)(Source)(Target)),
    instr!(Slti,    "0010 10ss ssst tttt kkkk kkkk kkkk kkkk", (Target)(Source)(Immediate, Signed16)),
    instr!(Sltiu,   "0010 11ss ssst tttt kkkk kkkk kkkk kkkk", (Target)(Source)(Immediate, Signed16)),
    instr!(Sltu,    "0000 00ss ssst tttt dddd d000 0010 1011", (Destination)(Source)(Target)),
    instr!(Sra,     "0000 0000 000t tttt dddd dkkk kk00 0011", (Destination)(Target)(Immediate)),
    instr!(Srav,    "0000 00ss ssst tttt dddd d000 0000 0111", (Destination)(Target)(Source)),
    instr!(Srl,     "0000 0000 000t tttt dddd dkkk kk00 0010", (Destination)(Target)(Immediate)),
    instr!(Srlv,    "0000 00ss ssst tttt dddd d000 0000 0110", (Destination)(Target)(Source)),
    instr!(Sub,     "0000 00ss ssst tttt dddd d000 0010 0010", (Destination)(Source)(Target)),
    instr!(Subu,    "0000 00ss ssst tttt dddd d000 0010 0011", (Destination)(Source)(Target)),
    instr!(Sw,      "1010 11bb bbbt tttt ffff ffff ffff ffff", (Target)(Offset, Signed16)(Base)),
    instr!(Swl,     "1010 10bb bbbt tttt ffff ffff ffff ffff", (Target)(Offset, Signed16)(Base)),
    instr!(Swr,     "1011 10bb bbbt tttt ffff ffff ffff ffff", (Target)(Offset, Signed16)(Base)),
    instr!(Sync,    "0000 0000 0000 0000 0000 0kkk kk00 1111"),
    instr!(Syscall, "0000 00kk kkkk kkkk kkkk kkkk kk00 1100", (Immediate)),
    instr!(Xor,     "0000 00ss ssst tttt dddd d000 0010 0110", (Destination)(Source)(Target)),
    instr!(Xori,    "0011 10ss ssst tttt kkkk kkkk kkkk kkkk", (Target)(Source)(Immediate, Unsigned16)),
];
