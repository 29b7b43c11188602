use serde::{Deserialize, Serialize};
use thiserror::Error;

const GAME_PASS_BASE: &str = "https://www.roblox.com/game-pass";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denomination {
    pub unit_size: u64,
    pub redemption_link: String,
}

impl Denomination {
    pub fn new(unit_size: u64, redemption_link: impl Into<String>) -> Self {
        Self { unit_size, redemption_link: redemption_link.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("denomination catalog must contain at least one unit")]
    Empty,
    #[error("denomination unit size must be greater than zero")]
    ZeroUnit,
    #[error("denomination unit size {0} is listed more than once")]
    DuplicateUnit(u64),
    #[error("denomination unit size {unit} is not a multiple of the minimum unit {minimum}")]
    NotMultipleOfMinimum { unit: u64, minimum: u64 },
}

/// Fixed set of purchasable units, held largest first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DenominationCatalog {
    entries: Vec<Denomination>,
}

impl DenominationCatalog {
    pub fn new(mut entries: Vec<Denomination>) -> Result<Self, CatalogError> {
        if entries.is_empty() {
            return Err(CatalogError::Empty);
        }
        if entries.iter().any(|entry| entry.unit_size == 0) {
            return Err(CatalogError::ZeroUnit);
        }

        entries.sort_by(|left, right| right.unit_size.cmp(&left.unit_size));
        for pair in entries.windows(2) {
            if pair[0].unit_size == pair[1].unit_size {
                return Err(CatalogError::DuplicateUnit(pair[0].unit_size));
            }
        }

        let minimum = entries[entries.len() - 1].unit_size;
        if let Some(entry) = entries.iter().find(|entry| entry.unit_size % minimum != 0) {
            return Err(CatalogError::NotMultipleOfMinimum { unit: entry.unit_size, minimum });
        }

        Ok(Self { entries })
    }

    pub fn minimum_unit(&self) -> u64 {
        self.entries.last().map(|entry| entry.unit_size).unwrap_or_default()
    }

    pub fn descending(&self) -> impl Iterator<Item = &Denomination> {
        self.entries.iter()
    }
}

impl Default for DenominationCatalog {
    fn default() -> Self {
        let entries = [
            (50, "678549030/"),
            (100, "678099847/"),
            (150, "1647150838/150"),
            (200, "1535869478/"),
            (300, "1536936054/"),
            (400, "1537173869/"),
            (500, "678482231/"),
            (600, "1536758039/"),
            (700, "1535869486/"),
            (800, "1535265655/"),
            (900, "1537281898/"),
            (1000, "678189829/"),
        ]
        .into_iter()
        .rev()
        .map(|(unit, path)| Denomination::new(unit, format!("{GAME_PASS_BASE}/{path}")))
        .collect();

        Self { entries }
    }
}
