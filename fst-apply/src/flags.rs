//! Flag diacritics: specially-formatted alphabet symbols that gate
//! traversal through a side-channel feature map.
//!
//! A symbol of the form `@<op>.<name>@` or `@<op>.<name>.<value>@` with
//! `<op>` one of `U R D C P N E` is a flag. Anything else, near-misses
//! included, is an ordinary symbol. Flag checks consume no input; mutating
//! operations record a shadow of the prior feature state so backtracking
//! can restore it exactly.

use log::warn;

use crate::alphabet::{Alphabet, SymbolId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlagOp {
    Unify,
    Require,
    Disallow,
    Clear,
    Positive,
    Negative,
    Equal,
}

impl FlagOp {
    fn from_letter(letter: char) -> Option<Self> {
        Some(match letter {
            'U' => FlagOp::Unify,
            'R' => FlagOp::Require,
            'D' => FlagOp::Disallow,
            'C' => FlagOp::Clear,
            'P' => FlagOp::Positive,
            'N' => FlagOp::Negative,
            'E' => FlagOp::Equal,
            _ => return None,
        })
    }

    /// Whether the operation writes the feature map on success.
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            FlagOp::Unify | FlagOp::Clear | FlagOp::Positive | FlagOp::Negative
        )
    }
}

/// The parsed form of a flag symbol string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlagDiacritic {
    pub op: FlagOp,
    pub name: String,
    pub value: Option<String>,
}

impl FlagDiacritic {
    /// `None` when `symbol` is not a well-formed flag; the caller treats it
    /// as an ordinary symbol in that case.
    pub fn parse(symbol: &str) -> Option<Self> {
        let inner = symbol.strip_prefix('@')?.strip_suffix('@')?;
        let mut parts = inner.splitn(3, '.');
        let op = parts.next()?;
        let mut letters = op.chars();
        let op = FlagOp::from_letter(letters.next()?)?;
        if letters.next().is_some() {
            return None;
        }
        let name = parts.next()?;
        if name.is_empty() {
            return None;
        }
        let value = match parts.next() {
            Some("") => return None,
            other => other.map(str::to_owned),
        };
        Some(FlagDiacritic {
            op,
            name: name.to_owned(),
            value,
        })
    }
}

/// A classified flag symbol with feature name and value interned to dense
/// ids, ready for the engine's hot path.
#[derive(Clone, Copy, Debug)]
pub struct FlagRef {
    pub op: FlagOp,
    pub feature: usize,
    pub value: Option<usize>,
    /// For [`FlagOp::Equal`]: the feature the value designates, when one of
    /// that name exists.
    pub other: Option<usize>,
}

/// Per-alphabet classification of symbols into ordinary vs. flag.
#[derive(Clone, Debug)]
pub struct FlagTable {
    by_symbol: Vec<Option<FlagRef>>,
    feature_names: Vec<String>,
    values: Vec<String>,
}

impl FlagTable {
    /// Scans an alphabet; `None` when it contains no flag symbols at all.
    pub fn scan(alphabet: &Alphabet) -> Option<FlagTable> {
        let mut parsed = Vec::new();
        for (id, symbol) in alphabet.iter() {
            if let Some(diacritic) = FlagDiacritic::parse(symbol) {
                parsed.push((id, diacritic));
            }
        }
        if parsed.is_empty() {
            return None;
        }

        let mut feature_names: Vec<String> = Vec::new();
        let mut values: Vec<String> = Vec::new();
        let feature_id = |names: &mut Vec<String>, name: &str| match names
            .iter()
            .position(|n| n == name)
        {
            Some(i) => i,
            None => {
                names.push(name.to_owned());
                names.len() - 1
            }
        };

        let mut by_symbol = vec![None; alphabet.len()];
        for (id, diacritic) in &parsed {
            let feature = feature_id(&mut feature_names, &diacritic.name);
            let value = diacritic.value.as_deref().map(|v| {
                match values.iter().position(|known| known == v) {
                    Some(i) => i,
                    None => {
                        values.push(v.to_owned());
                        values.len() - 1
                    }
                }
            });
            by_symbol[*id as usize] = Some(FlagRef {
                op: diacritic.op,
                feature,
                value,
                other: None,
            });
        }
        // An E flag's value names another feature; resolve it now that all
        // feature names are registered.
        for slot in by_symbol.iter_mut().flatten() {
            if slot.op == FlagOp::Equal {
                slot.other = slot
                    .value
                    .and_then(|v| feature_names.iter().position(|n| *n == values[v]));
            }
        }
        Some(FlagTable {
            by_symbol,
            feature_names,
            values,
        })
    }

    #[inline]
    pub fn get(&self, sym: SymbolId) -> Option<&FlagRef> {
        self.by_symbol.get(sym as usize)?.as_ref()
    }

    #[inline]
    pub fn is_flag(&self, sym: SymbolId) -> bool {
        self.get(sym).is_some()
    }

    pub fn feature_count(&self) -> usize {
        self.feature_names.len()
    }

    pub fn feature_name(&self, feature: usize) -> &str {
        &self.feature_names[feature]
    }
}

/// Runtime state of one feature: set to a value or absent, with polarity.
/// Absent features are always positive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeatureVal {
    pub value: Option<usize>,
    pub negative: bool,
}

/// Shadow of a feature's prior state, stored on the backtrack frame of the
/// arc that mutated it.
#[derive(Clone, Copy, Debug)]
pub struct FlagShadow {
    pub feature: usize,
    pub prior: FeatureVal,
}

/// The feature map of one apply session.
#[derive(Clone, Debug)]
pub struct FeatureSet {
    vals: Vec<FeatureVal>,
    last_shadow: Option<FlagShadow>,
}

impl FeatureSet {
    pub fn new(feature_count: usize) -> Self {
        Self {
            vals: vec![FeatureVal::default(); feature_count],
            last_shadow: None,
        }
    }

    pub fn clear_all(&mut self) {
        self.vals.fill(FeatureVal::default());
        self.last_shadow = None;
    }

    pub fn is_clear(&self) -> bool {
        self.vals.iter().all(|v| *v == FeatureVal::default())
    }

    fn set(&mut self, feature: usize, val: FeatureVal) {
        self.last_shadow = Some(FlagShadow {
            feature,
            prior: self.vals[feature],
        });
        self.vals[feature] = val;
    }

    /// Applies one flag operation and reports success. If the operation
    /// mutated the map, the prior state is retrievable once through
    /// [`FeatureSet::take_shadow`].
    pub fn check(&mut self, flag: &FlagRef) -> bool {
        self.last_shadow = None;
        let cur = self.vals[flag.feature];
        match flag.op {
            FlagOp::Unify => {
                if cur.value.is_none() {
                    self.set(
                        flag.feature,
                        FeatureVal {
                            value: flag.value,
                            negative: false,
                        },
                    );
                    true
                } else if cur.value == flag.value && !cur.negative {
                    true
                } else if cur.value != flag.value && cur.negative {
                    self.set(
                        flag.feature,
                        FeatureVal {
                            value: flag.value,
                            negative: false,
                        },
                    );
                    true
                } else {
                    false
                }
            }
            FlagOp::Clear => {
                self.set(flag.feature, FeatureVal::default());
                true
            }
            FlagOp::Positive => {
                self.set(
                    flag.feature,
                    FeatureVal {
                        value: flag.value,
                        negative: false,
                    },
                );
                true
            }
            FlagOp::Negative => {
                self.set(
                    flag.feature,
                    FeatureVal {
                        value: flag.value,
                        negative: true,
                    },
                );
                true
            }
            FlagOp::Require => match flag.value {
                None => cur.value.is_some(),
                Some(v) => cur.value == Some(v) && !cur.negative,
            },
            FlagOp::Disallow => match flag.value {
                None => cur.value.is_none(),
                Some(v) => {
                    if cur.value.is_none() {
                        true
                    } else if cur.value != Some(v) {
                        // Differing value passes unless negatively set.
                        !cur.negative
                    } else {
                        cur.negative
                    }
                }
            },
            FlagOp::Equal => match flag.other {
                // No feature of that name exists: equal iff this one is
                // absent too.
                None => cur.value.is_none(),
                Some(other) => {
                    let rhs = self.vals[other];
                    cur.value == rhs.value && cur.negative == rhs.negative
                }
            },
        }
    }

    pub fn take_shadow(&mut self) -> Option<FlagShadow> {
        self.last_shadow.take()
    }

    pub fn restore(&mut self, shadow: FlagShadow) {
        match self.vals.get_mut(shadow.feature) {
            Some(slot) => *slot = shadow.prior,
            None => warn!(
                "flag restore for unregistered feature {}; ignoring",
                shadow.feature
            ),
        }
    }
}
