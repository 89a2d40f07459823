use crate::binary::read_i32;
use crate::operand::{
    CodeView, Operand, OperandKind, OPT_COMPARATOR, OPT_END, OPT_MATCH_TYPE, OPT_SIDE_EFFECT,
};
use crate::operation::read_operation;
use log::debug;
use std::fmt;

/// Output state shared by the dump routines of all operations.
///
/// Every line is prefixed with the address most recently marked and indented
/// by the current nesting depth. Dumping never changes the binary or any
/// interpreter state.
pub struct DumpEnv<'a> {
    pub view: &'a CodeView<'a>,
    out: String,
    indent: usize,
    mark: usize,
}

impl<'a> DumpEnv<'a> {
    pub fn new(view: &'a CodeView<'a>) -> Self {
        DumpEnv {
            view,
            out: String::new(),
            indent: 0,
            mark: 0,
        }
    }

    pub fn mark(&mut self, address: usize) {
        self.mark = address;
    }

    pub fn descend(&mut self) {
        self.indent += 1;
    }

    pub fn ascend(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }

    pub fn dumpf(&mut self, args: fmt::Arguments<'_>) {
        let indent = "  ".repeat(self.indent);
        self.out
            .push_str(&format!("{:08x}: {}{}\n", self.mark, indent, args));
    }

    pub fn into_output(self) -> String {
        self.out
    }

    fn labeled(label: Option<&str>, text: String) -> String {
        match label {
            Some(label) => format!("{}: {}", label, text),
            None => text,
        }
    }

    /// Dump any operand
    pub fn dump_operand(&mut self, address: &mut usize, label: Option<&str>) -> bool {
        self.mark(*address);
        let operand = match self.view.read_operand(address) {
            Ok(operand) => operand,
            Err(err) => {
                debug!("Dump stopped: {}", err);
                return false;
            }
        };
        self.dump_operand_data(&operand, address, label)
    }

    fn dump_operand_data(
        &mut self,
        operand: &Operand,
        address: &mut usize,
        label: Option<&str>,
    ) -> bool {
        let view = self.view;
        let text = match operand.kind {
            OperandKind::Number => view
                .read_number_data(operand, address)
                .map(|n| format!("NUM {}", n)),
            OperandKind::String => view
                .read_string_data(operand, address)
                .map(|s| format!("STR[{}] \"{}\"", s.len(), s)),
            OperandKind::StringList => view.read_stringlist_data(operand, address).and_then(|list| {
                let items = list.iter().collect::<Result<Vec<_>, _>>()?;
                let quoted: Vec<String> = items.iter().map(|s| format!("\"{}\"", s)).collect();
                Ok(format!("STRLIST [{}] ({})", items.len(), quoted.join(", ")))
            }),
            OperandKind::Comparator => view
                .read_comparator_data(operand, address)
                .map(|cmp| format!("CMP {}", cmp.name())),
            OperandKind::MatchType => view
                .read_match_type_data(operand, address)
                .map(|mcht| format!("MATCH {}", mcht.name())),
            OperandKind::Variable => view
                .read_variable_data(operand, address)
                .map(|var| format!("VAR ${}:{}", var.storage, var.slot)),
            OperandKind::Extension { def, .. } => {
                let text = Self::labeled(label, format!("{}:", def.name.to_uppercase()));
                self.dumpf(format_args!("{}", text));
                self.descend();
                let ok = (def.dump)(self, address);
                self.ascend();
                return ok;
            }
        };
        match text {
            Ok(text) => {
                let text = Self::labeled(label, text);
                self.dumpf(format_args!("{}", text));
                true
            }
            Err(err) => {
                debug!("Dump stopped: {}", err);
                false
            }
        }
    }

    /// Dump an operand that must be a number
    pub fn dump_number(&mut self, address: &mut usize, label: &str) -> bool {
        self.dump_expecting(address, label, |op| matches!(op.kind, OperandKind::Number))
    }

    pub fn dump_string(&mut self, address: &mut usize, label: &str) -> bool {
        self.dump_expecting(address, label, |op| matches!(op.kind, OperandKind::String))
    }

    pub fn dump_stringlist(&mut self, address: &mut usize, label: &str) -> bool {
        self.dump_expecting(address, label, |op| op.is_stringlist())
    }

    fn dump_expecting<F>(&mut self, address: &mut usize, label: &str, accept: F) -> bool
    where
        F: Fn(&Operand) -> bool,
    {
        self.mark(*address);
        match self.view.read_operand(address) {
            Ok(operand) if accept(&operand) => {
                self.dump_operand_data(&operand, address, Some(label))
            }
            _ => false,
        }
    }

    /// Dump a jump offset field together with its resolved target
    pub fn dump_offset(&mut self, address: &mut usize) -> bool {
        self.mark(*address);
        match read_i32(self.view.code(), address, self.view.len()) {
            Ok(offset) => {
                let target = *address as i64 + offset as i64;
                self.dumpf(format_args!("offset: {} [{:08x}]", offset, target));
                true
            }
            Err(_) => false,
        }
    }

    /// Dump an optional operand block. Markers other than comparator, match
    /// type and side effect are handed to `custom`.
    pub fn dump_optional_operands<F>(&mut self, address: &mut usize, mut custom: F) -> bool
    where
        F: FnMut(&mut DumpEnv<'a>, u8, &mut usize) -> bool,
    {
        loop {
            self.mark(*address);
            let marker = match self.view.read_byte(address) {
                Ok(marker) => marker,
                Err(_) => return false,
            };
            let ok = match marker {
                OPT_END => return true,
                OPT_COMPARATOR | OPT_MATCH_TYPE | OPT_SIDE_EFFECT => {
                    self.dump_operand(address, None)
                }
                other => custom(self, other, address),
            };
            if !ok {
                return false;
            }
        }
    }
}

/// Renders a linked binary one operation per line, operands indented below
pub struct Disassembler<'a> {
    view: &'a CodeView<'a>,
}

impl<'a> Disassembler<'a> {
    pub fn new(view: &'a CodeView<'a>) -> Self {
        Disassembler { view }
    }

    pub fn dump(&self) -> String {
        let mut denv = DumpEnv::new(self.view);
        let mut address = 0;

        denv.out.push_str(&format!(
            "Binary: {} bytes, extensions: [{}]\n",
            self.view.len(),
            self.view.binary.extensions().join(", ")
        ));

        while address < self.view.len() {
            denv.mark(address);
            let op = match read_operation(self.view, &mut address) {
                Ok(op) => op,
                Err(err) => {
                    denv.dumpf(format_args!("Binary is corrupt: {}", err.reason));
                    break;
                }
            };

            match op.def.extension {
                Some(ext) => {
                    denv.dumpf(format_args!("{}.{}", ext.to_uppercase(), op.def.mnemonic))
                }
                None => denv.dumpf(format_args!("{}", op.def.mnemonic)),
            }
            denv.descend();
            let ok = (op.def.dump)(&mut denv, &mut address);
            denv.ascend();
            if !ok {
                denv.mark(address);
                denv.dumpf(format_args!("Binary is corrupt."));
                break;
            }
        }
        denv.into_output()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::Binary;
    use crate::compiler::{Argument, CodeGenerator, Command, Script};
    use crate::extension::Registry;
    use test_log::test;

    #[test]
    fn test_dump_compiled_script() {
        let registry = Registry::standard().unwrap();
        let mut cmd = Command::new("if", vec![]);
        cmd.test = Some(Box::new(Command::new(
            "hasflag",
            vec![
                Argument::MatchType(crate::matching::MatchType::Contains),
                Argument::StringList(vec!["\\Seen".to_string()]),
            ],
        )));
        cmd.block = vec![Command::new("stop", vec![])];
        let script = Script {
            commands: vec![cmd, Command::new("keep", vec![])],
        };
        let binary = CodeGenerator::new(&registry).compile(&script).unwrap();
        let view = CodeView::link(&binary, &registry).unwrap();

        let dump = Disassembler::new(&view).dump();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines[0], "Binary: 33 bytes, extensions: [imap4flags]");
        assert_eq!(lines[1], "00000000: IMAP4FLAGS.HASFLAG");
        assert_eq!(lines[2], "00000003:   MATCH :contains");
        assert_eq!(lines[3], "00000006:   list of keys: STRLIST [1] (\"\\Seen\")");
        assert!(lines[4].ends_with(": JMPFALSE"));
        assert!(lines[5].contains("offset: 1"));
        assert!(lines[6].ends_with(": STOP"));
        assert!(lines[7].ends_with(": KEEP"));
        assert_eq!(lines.len(), 8);
    }

    #[test]
    fn test_dump_stops_at_corruption() {
        let registry = Registry::standard().unwrap();
        let binary = Binary::from_parts(vec![0x03, 0x3E], Vec::new());
        let view = CodeView::link(&binary, &registry).unwrap();
        let dump = Disassembler::new(&view).dump();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines[1], "00000000: STOP");
        assert!(lines[2].starts_with("00000001: Binary is corrupt"));
    }
}
