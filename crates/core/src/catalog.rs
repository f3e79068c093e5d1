//! Action Catalog
//!
//! Fixed enumeration of (spreading factor, transmission power) pairs.
//! `action = sf_index * |TP| + tp_index`, both indices 0-based into the
//! configured option lists.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// EU868 spreading factors.
pub const DEFAULT_SPREADING_FACTORS: [u8; 6] = [7, 8, 9, 10, 11, 12];

/// EU868 transmission power steps in dBm.
pub const DEFAULT_TX_POWERS_DBM: [i8; 5] = [2, 5, 8, 11, 14];

/// Index of one catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId(pub u32);

impl ActionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ActionId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Transmission parameters applied by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxParams {
    pub spreading_factor: u8,
    pub tx_power_dbm: i8,
}

impl std::fmt::Display for TxParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SF{}/TP{}dBm", self.spreading_factor, self.tx_power_dbm)
    }
}

/// Bijective mapping between action ids and transmission parameters.
///
/// Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionCatalog {
    spreading_factors: Vec<u8>,
    tx_powers_dbm: Vec<i8>,
}

impl Default for ActionCatalog {
    fn default() -> Self {
        Self {
            spreading_factors: DEFAULT_SPREADING_FACTORS.to_vec(),
            tx_powers_dbm: DEFAULT_TX_POWERS_DBM.to_vec(),
        }
    }
}

impl ActionCatalog {
    pub fn new(spreading_factors: Vec<u8>, tx_powers_dbm: Vec<i8>) -> Result<Self> {
        if spreading_factors.is_empty() || tx_powers_dbm.is_empty() {
            return Err(CoreError::InvalidConfig(
                "spreading factor and power option lists must be non-empty".into(),
            ));
        }
        if has_duplicates(&spreading_factors) || has_duplicates(&tx_powers_dbm) {
            return Err(CoreError::InvalidConfig(
                "spreading factor and power option lists must not repeat values".into(),
            ));
        }
        if spreading_factors.len() * tx_powers_dbm.len() > u32::MAX as usize {
            return Err(CoreError::InvalidConfig("too many actions".into()));
        }

        Ok(Self {
            spreading_factors,
            tx_powers_dbm,
        })
    }

    /// Number of actions, `|SF| * |TP|`.
    pub fn len(&self) -> usize {
        self.spreading_factors.len() * self.tx_powers_dbm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn spreading_factors(&self) -> &[u8] {
        &self.spreading_factors
    }

    pub fn tx_powers_dbm(&self) -> &[i8] {
        &self.tx_powers_dbm
    }

    pub fn contains(&self, action: ActionId) -> bool {
        action.index() < self.len()
    }

    pub fn check(&self, action: ActionId) -> Result<ActionId> {
        if self.contains(action) {
            Ok(action)
        } else {
            Err(CoreError::InvalidAction {
                action,
                arms: self.len(),
            })
        }
    }

    pub fn encode(&self, spreading_factor: u8, tx_power_dbm: i8) -> Result<ActionId> {
        let sf_idx = self
            .spreading_factors
            .iter()
            .position(|&sf| sf == spreading_factor);
        let tp_idx = self.tx_powers_dbm.iter().position(|&tp| tp == tx_power_dbm);

        match (sf_idx, tp_idx) {
            (Some(sf_idx), Some(tp_idx)) => self.encode_index(sf_idx, tp_idx),
            _ => Err(CoreError::InvalidActionPair {
                sf: spreading_factor,
                tp_dbm: tx_power_dbm,
            }),
        }
    }

    pub fn encode_index(&self, sf_idx: usize, tp_idx: usize) -> Result<ActionId> {
        if sf_idx >= self.spreading_factors.len() || tp_idx >= self.tx_powers_dbm.len() {
            return Err(CoreError::InvalidActionIndex {
                sf_idx,
                tp_idx,
                sf_count: self.spreading_factors.len(),
                tp_count: self.tx_powers_dbm.len(),
            });
        }
        Ok(ActionId((sf_idx * self.tx_powers_dbm.len() + tp_idx) as u32))
    }

    pub fn decode(&self, action: ActionId) -> Result<TxParams> {
        let (sf_idx, tp_idx) = self.decode_index(action)?;
        Ok(TxParams {
            spreading_factor: self.spreading_factors[sf_idx],
            tx_power_dbm: self.tx_powers_dbm[tp_idx],
        })
    }

    pub fn decode_index(&self, action: ActionId) -> Result<(usize, usize)> {
        self.check(action)?;
        let width = self.tx_powers_dbm.len();
        Ok((action.index() / width, action.index() % width))
    }

    pub fn iter(&self) -> impl Iterator<Item = (ActionId, TxParams)> + '_ {
        (0..self.len() as u32).map(move |id| {
            let width = self.tx_powers_dbm.len();
            let idx = id as usize;
            (
                ActionId(id),
                TxParams {
                    spreading_factor: self.spreading_factors[idx / width],
                    tx_power_dbm: self.tx_powers_dbm[idx % width],
                },
            )
        })
    }
}

fn has_duplicates<T: PartialEq>(values: &[T]) -> bool {
    values
        .iter()
        .enumerate()
        .any(|(i, v)| values[..i].contains(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_size() {
        let catalog = ActionCatalog::default();
        assert_eq!(catalog.len(), 30);
        assert_eq!(catalog.spreading_factors(), &DEFAULT_SPREADING_FACTORS);
    }

    #[test]
    fn test_encode_layout() {
        let catalog = ActionCatalog::default();
        // sf_index 2 (SF9), tp_index 3 (11 dBm) -> 2 * 5 + 3
        assert_eq!(catalog.encode(9, 11).unwrap(), ActionId(13));
        assert_eq!(catalog.encode_index(0, 0).unwrap(), ActionId(0));
        assert_eq!(catalog.encode(12, 14).unwrap(), ActionId(29));
    }

    #[test]
    fn test_decode_encode_bijection() {
        let catalog = ActionCatalog::default();
        for id in 0..catalog.len() as u32 {
            let params = catalog.decode(ActionId(id)).unwrap();
            let back = catalog
                .encode(params.spreading_factor, params.tx_power_dbm)
                .unwrap();
            assert_eq!(back, ActionId(id));
        }
        for &sf in catalog.spreading_factors() {
            for &tp in catalog.tx_powers_dbm() {
                let params = catalog.decode(catalog.encode(sf, tp).unwrap()).unwrap();
                assert_eq!(params.spreading_factor, sf);
                assert_eq!(params.tx_power_dbm, tp);
            }
        }
    }

    #[test]
    fn test_out_of_range_action() {
        let catalog = ActionCatalog::default();
        let err = catalog.decode(ActionId(30)).unwrap_err();
        assert_eq!(
            err,
            CoreError::InvalidAction {
                action: ActionId(30),
                arms: 30
            }
        );
    }

    #[test]
    fn test_unknown_pair() {
        let catalog = ActionCatalog::default();
        assert!(matches!(
            catalog.encode(6, 14),
            Err(CoreError::InvalidActionPair { sf: 6, tp_dbm: 14 })
        ));
        assert!(catalog.encode(7, 3).is_err());
    }

    #[test]
    fn test_index_pair_outside_grid() {
        let catalog = ActionCatalog::default();
        assert!(matches!(
            catalog.encode_index(6, 0),
            Err(CoreError::InvalidActionIndex { sf_idx: 6, tp_idx: 0, sf_count: 6, tp_count: 5 })
        ));
        // tp overflow must not alias a valid id
        assert!(matches!(
            catalog.encode_index(0, 5),
            Err(CoreError::InvalidActionIndex { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_option_sets() {
        assert!(ActionCatalog::new(vec![], vec![2]).is_err());
        assert!(ActionCatalog::new(vec![7, 7], vec![2]).is_err());
        assert!(ActionCatalog::new(vec![7], vec![2, 2]).is_err());
    }

    #[test]
    fn test_iter_matches_decode() {
        let catalog = ActionCatalog::new(vec![7, 9], vec![2, 8, 14]).unwrap();
        let entries: Vec<_> = catalog.iter().collect();
        assert_eq!(entries.len(), 6);
        for (id, params) in entries {
            assert_eq!(catalog.decode(id).unwrap(), params);
        }
        assert_eq!(
            catalog.decode(ActionId(4)).unwrap().to_string(),
            "SF9/TP8dBm"
        );
    }
}
