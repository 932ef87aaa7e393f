//! Host code disassembly, for dumping compiled blocks.

use iced_x86::{Decoder, DecoderOptions, Formatter, IntelFormatter};

/// Disassembles x86-64 code, one line per instruction, prefixed with its address.
pub fn disassemble(code: &[u8], ip: u64) -> Vec<String> {
    let mut decoder = Decoder::with_ip(64, code, ip, DecoderOptions::NONE);
    let mut formatter = IntelFormatter::new();
    let mut lines = Vec::new();
    let mut text = String::new();

    while decoder.can_decode() {
        let instruction = decoder.decode();
        if instruction.is_invalid() {
            // Block padding, or the end of the buffer cutting an instruction short.
            lines.push(format!("{:016x} (bad)", instruction.ip()));
            continue;
        }
        text.clear();
        formatter.format(&instruction, &mut text);
        lines.push(format!("{:016x} {text}", instruction.ip()));
    }
    lines
}
