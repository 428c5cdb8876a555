//! Linear-sweep decoding of code sections into constant operand fields

use iced_x86::{ConstantOffsets, Decoder, DecoderOptions, Instruction, Mnemonic, OpKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum FieldKind {
    Displacement,
    RipDisplacement,
    Immediate,
}

/// A constant embedded in an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct OperandField {
    pub kind: FieldKind,
    /// Effective value: the target address for RIP-relative fields
    pub value: u64,
    pub field_offset: usize,
    pub width: usize,
    pub signed: bool,
}

#[derive(Debug, Clone, Copy)]
pub(super) struct DecodedInstruction {
    pub address: u64,
    pub next_ip: u64,
    pub displacement: Option<OperandField>,
    pub immediate: Option<OperandField>,
    /// `push imm` or `mov reg, imm`: the shapes that load a string length
    pub loads_immediate: bool,
    /// `lea reg, [...]` or an immediate operand: the address itself is used
    pub takes_address: bool,
}

impl DecodedInstruction {
    pub fn fields(&self) -> impl Iterator<Item = OperandField> {
        self.displacement.into_iter().chain(self.immediate)
    }

    pub fn length_candidate(&self) -> Option<OperandField> {
        self.immediate.filter(|_| self.loads_immediate)
    }
}

/// Iterates over the valid instructions of one code section
pub(super) struct CodeWalker<'a> {
    decoder: Decoder<'a>,
    instruction: Instruction,
    bitness: u32,
    base_ip: u64,
    raw_offset: usize,
}

impl<'a> CodeWalker<'a> {
    pub fn new(bitness: u32, code: &'a [u8], base_ip: u64, raw_offset: usize) -> Self {
        Self {
            decoder: Decoder::with_ip(bitness, code, base_ip, DecoderOptions::NONE),
            instruction: Instruction::default(),
            bitness,
            base_ip,
            raw_offset,
        }
    }

    fn describe(&self, offsets: &ConstantOffsets) -> DecodedInstruction {
        let instr = &self.instruction;
        let field_base = self.raw_offset + (instr.ip() - self.base_ip) as usize;

        let displacement = offsets.has_displacement().then(|| {
            let (kind, value, signed) = if instr.is_ip_rel_memory_operand() {
                (FieldKind::RipDisplacement, instr.ip_rel_memory_address(), true)
            } else {
                (
                    FieldKind::Displacement,
                    instr.memory_displacement64(),
                    self.bitness == 64,
                )
            };
            OperandField {
                kind,
                value,
                field_offset: field_base + offsets.displacement_offset(),
                width: offsets.displacement_size(),
                signed,
            }
        });

        // Branch displacements also show up as constants; only real
        // immediate operands are of interest here.
        let immediate_operand = (0..instr.op_count()).find(|&i| is_immediate(instr.op_kind(i)));
        let immediate = immediate_operand
            .filter(|_| offsets.has_immediate())
            .map(|i| OperandField {
                kind: FieldKind::Immediate,
                value: instr.immediate(i),
                field_offset: field_base + offsets.immediate_offset(),
                width: offsets.immediate_size(),
                signed: is_sign_extended(instr.op_kind(i)),
            });

        let loads_immediate = match instr.mnemonic() {
            Mnemonic::Push => instr.op_count() == 1 && immediate.is_some(),
            Mnemonic::Mov => instr.op0_kind() == OpKind::Register && immediate.is_some(),
            _ => false,
        };
        let takes_address = instr.mnemonic() == Mnemonic::Lea || immediate.is_some();

        DecodedInstruction {
            address: instr.ip(),
            next_ip: instr.next_ip(),
            displacement,
            immediate,
            loads_immediate,
            takes_address,
        }
    }
}

impl Iterator for CodeWalker<'_> {
    type Item = DecodedInstruction;

    fn next(&mut self) -> Option<Self::Item> {
        while self.decoder.can_decode() {
            self.decoder.decode_out(&mut self.instruction);
            if self.instruction.is_invalid() {
                continue;
            }
            let offsets = self.decoder.get_constant_offsets(&self.instruction);
            return Some(self.describe(&offsets));
        }
        None
    }
}

fn is_immediate(kind: OpKind) -> bool {
    matches!(
        kind,
        OpKind::Immediate8
            | OpKind::Immediate16
            | OpKind::Immediate32
            | OpKind::Immediate64
            | OpKind::Immediate8to16
            | OpKind::Immediate8to32
            | OpKind::Immediate8to64
            | OpKind::Immediate32to64
    )
}

fn is_sign_extended(kind: OpKind) -> bool {
    matches!(
        kind,
        OpKind::Immediate8to16
            | OpKind::Immediate8to32
            | OpKind::Immediate8to64
            | OpKind::Immediate32to64
    )
}
