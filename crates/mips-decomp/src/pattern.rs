//! Bit-pattern strings describing instruction encodings, parsed at compile time.
//!
//! A pattern is 32 characters (spaces are ignored) read from the most significant bit down.
//! `0` and `1` are fixed bits, any other character names an operand field that spans every
//! consecutive bit carrying the same character.

const MAX_FIELDS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Source,
    Target,
    Destination,
    Immediate,
    Base,
    Offset,
}

impl Operand {
    // Workaround for const fn's not being allowed in traits yet (From<char>)
    pub const fn from_char(value: char) -> Self {
        match value {
            's' => Self::Source,
            't' => Self::Target,
            'd' => Self::Destination,
            'k' => Self::Immediate,
            'b' => Self::Base,
            'f' => Self::Offset,
            _ => panic!("invalid operand"),
        }
    }

    pub const fn is_register(&self) -> bool {
        matches!(
            self,
            Self::Source | Self::Destination | Self::Target | Self::Base
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    operand: Operand,
    shift: u32,
    width: u32,
}

impl Field {
    const fn extract(&self, raw: u32) -> u32 {
        (raw >> self.shift) & (u32::MAX >> (u32::BITS - self.width))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionPattern {
    mask: u32,
    bits: u32,
    fields: [Option<Field>; MAX_FIELDS],
}

impl InstructionPattern {
    pub const fn new(identifier: &str) -> Self {
        let raw = identifier.as_bytes();
        let mut mask = 0;
        let mut bits = 0;
        let mut fields: [Option<Field>; MAX_FIELDS] = [None; MAX_FIELDS];
        let mut field_count = 0;
        let mut bit = u32::BITS;
        let mut previous = b' ';

        let mut i = 0;
        while i < raw.len() {
            let c = raw[i];
            i += 1;
            if c == b' ' {
                continue;
            }

            assert!(bit > 0, "pattern is longer than 32 bits");
            bit -= 1;
            match c {
                b'0' => mask |= 1 << bit,
                b'1' => {
                    mask |= 1 << bit;
                    bits |= 1 << bit;
                }
                _ if c == previous => {
                    if let Some(field) = fields[field_count - 1] {
                        fields[field_count - 1] = Some(Field {
                            operand: field.operand,
                            shift: bit,
                            width: field.width + 1,
                        });
                    }
                }
                _ => {
                    assert!(field_count < MAX_FIELDS, "too many operand fields");
                    fields[field_count] = Some(Field {
                        operand: Operand::from_char(c as char),
                        shift: bit,
                        width: 1,
                    });
                    field_count += 1;
                }
            }
            previous = c;
        }
        assert!(bit == 0, "pattern is shorter than 32 bits");

        Self { mask, bits, fields }
    }

    pub const fn matches(&self, raw: u32) -> bool {
        raw & self.mask == self.bits
    }

    pub const fn get(&self, op: Operand, raw: u32) -> Option<u32> {
        let mut i = 0;
        while i < MAX_FIELDS {
            if let Some(field) = self.fields[i] {
                if field.operand as u8 == op as u8 {
                    return Some(field.extract(raw));
                }
            }
            i += 1;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_bits() {
        let pattern = InstructionPattern::new("0010 01ss ssst tttt kkkk kkkk kkkk kkkk");
        assert!(pattern.matches(0x2484_0010));
        assert!(!pattern.matches(0x3484_0010));
    }

    #[test]
    fn operand_fields() {
        // addiu $a0, $a0, 0x10
        let pattern = InstructionPattern::new("0010 01ss ssst tttt kkkk kkkk kkkk kkkk");
        assert_eq!(pattern.get(Operand::Source, 0x2484_0010), Some(4));
        assert_eq!(pattern.get(Operand::Target, 0x2484_0010), Some(4));
        assert_eq!(pattern.get(Operand::Immediate, 0x2484_0010), Some(0x10));
        assert_eq!(pattern.get(Operand::Base, 0x2484_0010), None);
    }

    #[test]
    fn split_field_is_not_merged() {
        // The shift amount sits between two constant runs.
        let pattern = InstructionPattern::new("0000 0000 000t tttt dddd dkkk kk00 0000");
        let sll = 0x0004_2080; // sll $a0, $a0, 2
        assert!(pattern.matches(sll));
        assert_eq!(pattern.get(Operand::Immediate, sll), Some(2));
        assert_eq!(pattern.get(Operand::Destination, sll), Some(4));
    }
}
