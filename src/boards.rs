use std::collections::BTreeSet;

use tracing::debug;

use crate::error::{Error, Result};
use crate::machine::Board;
use crate::memory::RegionSpec;

pub mod s32k3;

/// Construction routine of a board family. Runs every step from an
/// uninitialized board up to boot.
pub type BoardInit = fn(&mut Board) -> Result<()>;

/// Immutable description of one buildable board.
#[derive(Debug, Clone)]
pub struct BoardDescriptor {
    pub name: String,
    pub alias: String,
    pub description: String,
    pub default_cpus: u32,
    pub min_cpus: u32,
    pub max_cpus: u32,
    pub valid_cpu_types: BTreeSet<String>,
    pub default_cpu_type: String,
    pub sysclk_hz: u64,
    pub enable_bitband: bool,
    pub memory_layout: Vec<RegionSpec>,
    pub supports_removable_media: bool,
    pub supports_parallel_port: bool,
    pub init: BoardInit,
}

impl BoardDescriptor {
    pub fn validate(&self) -> Result<()> {
        let invalid = |detail: &str| Error::InvalidDescriptor {
            board: self.name.clone(),
            detail: detail.to_string(),
        };

        if self.name.is_empty() {
            return Err(invalid("empty name"));
        }
        if !self.valid_cpu_types.contains(&self.default_cpu_type) {
            return Err(invalid("default CPU type is not in the valid CPU types"));
        }
        if self.default_cpus != 1 || self.min_cpus != 1 || self.max_cpus != 1 {
            return Err(invalid("only single-core boards are supported"));
        }
        Ok(())
    }

    pub fn matches(&self, name: &str) -> bool {
        self.name == name || (!self.alias.is_empty() && self.alias == name)
    }
}

/// Catalog of buildable boards. Append-only; entries are never replaced.
pub struct BoardRegistry {
    boards: Vec<BoardDescriptor>,
}

impl BoardRegistry {
    pub fn new() -> Self {
        BoardRegistry { boards: Vec::new() }
    }

    pub fn with_builtin() -> Result<Self> {
        let mut registry = BoardRegistry::new();
        registry.register(s32k3::descriptor())?;
        Ok(registry)
    }

    pub fn register(&mut self, descriptor: BoardDescriptor) -> Result<()> {
        descriptor.validate()?;
        let taken = |n: &str| self.boards.iter().any(|b| b.matches(n));
        if taken(&descriptor.name) {
            return Err(Error::DuplicateBoard(descriptor.name));
        }
        if !descriptor.alias.is_empty() && taken(&descriptor.alias) {
            return Err(Error::DuplicateBoard(descriptor.alias));
        }
        debug!("[BOARD] registered {}", descriptor.name);
        self.boards.push(descriptor);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&BoardDescriptor> {
        self.boards
            .iter()
            .find(|b| b.matches(name))
            .ok_or_else(|| Error::UnknownBoard(name.to_string()))
    }

    pub fn list(&self) -> Vec<&BoardDescriptor> {
        let mut boards: Vec<&BoardDescriptor> = self.boards.iter().collect();
        boards.sort_by(|a, b| a.name.cmp(&b.name));
        boards
    }
}

impl Default for BoardRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    pub fn example_board(name: &str) -> BoardDescriptor {
        BoardDescriptor {
            name: name.to_string(),
            alias: String::new(),
            description: "Example board".to_string(),
            valid_cpu_types: BTreeSet::from(["coreA".to_string()]),
            default_cpu_type: "coreA".to_string(),
            ..s32k3::descriptor()
        }
    }

    #[test]
    fn builtin_boards_hold_invariants() {
        let registry = BoardRegistry::with_builtin().unwrap();
        assert!(!registry.list().is_empty());
        for b in registry.list() {
            assert!(b.valid_cpu_types.contains(&b.default_cpu_type));
            assert_eq!((b.min_cpus, b.max_cpus, b.default_cpus), (1, 1, 1));
        }
    }

    #[test]
    fn lookup_by_name_or_alias() {
        let registry = BoardRegistry::with_builtin().unwrap();
        let by_name = registry.lookup(s32k3::BOARD_NAME).unwrap();
        let by_alias = registry.lookup(s32k3::BOARD_ALIAS).unwrap();
        assert_eq!(by_name.name, by_alias.name);
        assert!(matches!(registry.lookup("nope"), Err(Error::UnknownBoard(_))));
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut registry = BoardRegistry::new();
        registry.register(example_board("ExampleBoard")).unwrap();
        let err = registry.register(example_board("ExampleBoard")).unwrap_err();
        assert!(matches!(err, Error::DuplicateBoard(ref n) if n == "ExampleBoard"));
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn alias_clash_is_rejected() {
        let mut registry = BoardRegistry::with_builtin().unwrap();
        let before = registry.list().len();
        let mut b = example_board("Other");
        b.alias = s32k3::BOARD_NAME.to_string();
        assert!(matches!(registry.register(b), Err(Error::DuplicateBoard(_))));

        let b = example_board(s32k3::BOARD_ALIAS);
        assert!(matches!(registry.register(b), Err(Error::DuplicateBoard(_))));
        assert_eq!(registry.list().len(), before);
    }

    #[test]
    fn default_cpu_type_must_be_valid() {
        let mut registry = BoardRegistry::new();
        let mut b = example_board("ExampleBoard");
        b.default_cpu_type = "coreB".to_string();
        assert!(matches!(registry.register(b), Err(Error::InvalidDescriptor { .. })));
        assert!(registry.list().is_empty());
    }

    #[test]
    fn multi_core_descriptor_is_rejected() {
        let mut registry = BoardRegistry::new();
        let mut b = example_board("ExampleBoard");
        b.max_cpus = 2;
        assert!(matches!(registry.register(b), Err(Error::InvalidDescriptor { .. })));
    }

    #[test]
    fn list_is_sorted() {
        let mut registry = BoardRegistry::new();
        registry.register(example_board("b")).unwrap();
        registry.register(example_board("a")).unwrap();
        let names: Vec<&str> = registry.list().iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }
}
