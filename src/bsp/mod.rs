//! Board support package metadata
//!
//! Board metadata comes from an external BSP generator through the
//! [`BspProvider`] trait. The orchestrator asks for each board at most once
//! per run and feeds the result into the template context.

mod command;
mod provider;

pub use command::CommandBspProvider;
pub use provider::{BspProvider, StaticBspProvider};

use crate::util::naming::c_ident;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRegion {
    pub name: String,
    pub origin: u64,
    pub length: u64,
    #[serde(default)]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peripheral {
    pub name: String,
    pub base_address: u64,
    #[serde(default)]
    pub irq: Option<u32>,
    #[serde(default)]
    pub kind: String,
}

/// What the BSP generator reports for one board
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardMetadata {
    pub board: String,
    pub arch: String,
    #[serde(default)]
    pub cpu: String,
    #[serde(default)]
    pub memory: Vec<MemoryRegion>,
    #[serde(default)]
    pub peripherals: Vec<Peripheral>,
    #[serde(default)]
    pub defines: BTreeMap<String, String>,
}

fn hex(value: u64) -> String {
    format!("0x{value:08X}")
}

impl BoardMetadata {
    pub fn new(board: &str, arch: &str, cpu: &str) -> Self {
        Self {
            board: board.to_string(),
            arch: arch.to_string(),
            cpu: cpu.to_string(),
            memory: Vec::new(),
            peripherals: Vec::new(),
            defines: BTreeMap::new(),
        }
    }

    pub fn with_memory(mut self, name: &str, origin: u64, length: u64) -> Self {
        self.memory.push(MemoryRegion {
            name: name.to_string(),
            origin,
            length,
            kind: String::new(),
        });
        self
    }

    pub fn with_peripheral(mut self, name: &str, base_address: u64, irq: Option<u32>) -> Self {
        self.peripherals.push(Peripheral {
            name: name.to_string(),
            base_address,
            irq,
            kind: String::new(),
        });
        self
    }

    pub fn with_define(mut self, key: &str, value: &str) -> Self {
        self.defines.insert(key.to_string(), value.to_string());
        self
    }

    /// `board.*` template variables
    pub fn context_entries(&self) -> Vec<(String, String)> {
        let mut entries = vec![
            ("board.id".to_string(), self.board.clone()),
            ("board.arch".to_string(), self.arch.clone()),
            ("board.cpu".to_string(), self.cpu.clone()),
        ];

        for region in &self.memory {
            let key = format!("board.memory.{}", region.name);
            entries.push((format!("{key}.origin"), hex(region.origin)));
            entries.push((format!("{key}.length"), hex(region.length)));
        }
        for p in &self.peripherals {
            let key = format!("board.peripheral.{}", p.name);
            entries.push((format!("{key}.base"), hex(p.base_address)));
            if let Some(irq) = p.irq {
                entries.push((format!("{key}.irq"), irq.to_string()));
            }
        }
        for (k, v) in &self.defines {
            entries.push((format!("board.define.{k}"), v.clone()));
        }

        entries.push(("board.memory_map".to_string(), self.memory_map_block()));
        entries.push((
            "board.peripheral_defines".to_string(),
            self.peripheral_block(),
        ));
        entries.push(("board.define_block".to_string(), self.define_block()));
        entries
    }

    fn memory_map_block(&self) -> String {
        let mut out = String::new();
        for region in &self.memory {
            let name = c_ident(&region.name).to_uppercase();
            let _ = writeln!(out, "#define BOARD_MEM_{name}_ORIGIN {}u", hex(region.origin));
            let _ = writeln!(out, "#define BOARD_MEM_{name}_LENGTH {}u", hex(region.length));
        }
        out
    }

    fn peripheral_block(&self) -> String {
        let mut out = String::new();
        for p in &self.peripherals {
            let name = c_ident(&p.name).to_uppercase();
            let _ = writeln!(out, "#define BOARD_{name}_BASE {}u", hex(p.base_address));
            if let Some(irq) = p.irq {
                let _ = writeln!(out, "#define BOARD_{name}_IRQ {irq}");
            }
        }
        out
    }

    fn define_block(&self) -> String {
        let mut out = String::new();
        for (k, v) in &self.defines {
            let _ = writeln!(out, "#ifndef {0}\n#define {0} {1}\n#endif", c_ident(k), v);
        }
        out
    }
}
