/// Uniquely identifies a tile within a level set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub level: usize,
    pub row: u32,
    pub column: u32,
}

impl TileKey {
    pub fn new(level: usize, row: u32, column: u32) -> Self {
        Self { level, row, column }
    }

    /// The key of the parent tile one level up, `None` at level zero.
    pub fn parent(&self) -> Option<TileKey> {
        if self.level == 0 {
            return None;
        }
        return Some(TileKey::new(self.level - 1, self.row / 2, self.column / 2));
    }

    /// The four child keys at the next level, southwest first, row-major.
    pub fn children(&self) -> [TileKey; 4] {
        let level = self.level + 1;
        let row = 2 * self.row;
        let column = 2 * self.column;
        return [
            TileKey::new(level, row, column),
            TileKey::new(level, row, column + 1),
            TileKey::new(level, row + 1, column),
            TileKey::new(level, row + 1, column + 1),
        ];
    }
}

impl std::fmt::Display for TileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        return write!(f, "{}.{}.{}", self.level, self.row, self.column);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_round_trip_through_parent() {
        let key = TileKey::new(3, 5, 9);
        for child in key.children() {
            assert_eq!(child.parent(), Some(key));
        }
        assert_eq!(TileKey::new(0, 0, 0).parent(), None);
    }
}
