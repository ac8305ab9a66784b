//! Decoded instruction stream representation
//!
//! Contains the per-instruction record, switch tables, and the decoded method
//! body with its byte-pc to instruction-index mapping.

use crate::opcode::Opcode;

/// A single decoded instruction with the byte offset it was read from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instruction {
    /// The decoded operation
    pub opcode: Opcode,
    /// Byte offset of the instruction in the original code array
    pub pc: u16,
}

impl Instruction {
    /// Create a new instruction
    pub fn new(opcode: Opcode, pc: u16) -> Self {
        Self { opcode, pc }
    }
}

/// Case list of a switch instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchCases {
    /// `tableswitch`: targets for `low`, `low + 1`, ...
    Table {
        /// Key of the first target
        low: i32,
        /// Instruction indices
        targets: Vec<usize>,
    },
    /// `lookupswitch`: `(key, target)` pairs sorted by key
    Lookup(Vec<(i32, usize)>),
}

/// Decoded operands of a `tableswitch` or `lookupswitch`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchTable {
    /// Target when no case matches
    pub default: usize,
    /// Case list
    pub cases: SwitchCases,
}

impl SwitchTable {
    /// Instruction index to continue at for `key`.
    ///
    /// # Examples
    ///
    /// ```
    /// use bytecode_system::{SwitchCases, SwitchTable};
    ///
    /// let table = SwitchTable {
    ///     default: 9,
    ///     cases: SwitchCases::Table { low: 10, targets: vec![1, 2, 3] },
    /// };
    /// assert_eq!(table.target(11), 2);
    /// assert_eq!(table.target(13), 9);
    /// assert_eq!(table.target(i32::MIN), 9);
    /// ```
    pub fn target(&self, key: i32) -> usize {
        match &self.cases {
            SwitchCases::Table { low, targets } => {
                let offset = key as i64 - *low as i64;
                if offset < 0 {
                    return self.default;
                }
                targets.get(offset as usize).copied().unwrap_or(self.default)
            }
            SwitchCases::Lookup(pairs) => pairs
                .binary_search_by_key(&key, |(k, _)| *k)
                .map(|i| pairs[i].1)
                .unwrap_or(self.default),
        }
    }

    /// All targets including the default.
    pub fn all_targets(&self) -> Vec<usize> {
        let mut out = vec![self.default];
        match &self.cases {
            SwitchCases::Table { targets, .. } => out.extend_from_slice(targets),
            SwitchCases::Lookup(pairs) => out.extend(pairs.iter().map(|(_, t)| *t)),
        }
        out
    }

    pub(crate) fn targets_mut(&mut self) -> Vec<&mut usize> {
        let mut out = vec![&mut self.default];
        match &mut self.cases {
            SwitchCases::Table { targets, .. } => out.extend(targets.iter_mut()),
            SwitchCases::Lookup(pairs) => out.extend(pairs.iter_mut().map(|(_, t)| t)),
        }
        out
    }
}

const NOT_A_START: u32 = u32::MAX;

/// A method body after decoding
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedCode {
    /// Instructions in code order
    pub instructions: Vec<Instruction>,
    /// Switch tables referenced by `TableSwitch`/`LookupSwitch`
    pub switch_tables: Vec<SwitchTable>,
    pc_index: Vec<u32>,
}

impl DecodedCode {
    pub(crate) fn new(
        instructions: Vec<Instruction>,
        switch_tables: Vec<SwitchTable>,
        code_len: usize,
    ) -> Self {
        let mut pc_index = vec![NOT_A_START; code_len];
        for (i, insn) in instructions.iter().enumerate() {
            pc_index[insn.pc as usize] = i as u32;
        }
        Self {
            instructions,
            switch_tables,
            pc_index,
        }
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Returns true if there are no instructions.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Length of the original code array in bytes.
    pub fn code_len(&self) -> usize {
        self.pc_index.len()
    }

    /// Instruction index starting at byte offset `pc`.
    pub fn index_of_pc(&self, pc: usize) -> Option<usize> {
        match self.pc_index.get(pc) {
            Some(&i) if i != NOT_A_START => Some(i as usize),
            _ => None,
        }
    }

    /// Like [`index_of_pc`](Self::index_of_pc), but also maps the end of the
    /// code to `len()`. Used for exclusive range ends.
    pub fn boundary_index(&self, pc: usize) -> Option<usize> {
        if pc == self.code_len() {
            Some(self.len())
        } else {
            self.index_of_pc(pc)
        }
    }

    /// Byte offset of the instruction at `index`.
    pub fn pc_of(&self, index: usize) -> Option<u16> {
        self.instructions.get(index).map(|i| i.pc)
    }

    /// Instruction at `index`.
    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }
}
