use serde::{Deserialize, Serialize};
use std::fmt;

/// 三值逻辑结果
///
/// 条件门控只在结果为 `Inconclusive` 时放行实验。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Troolean {
    #[serde(rename = "TRUE")]
    True,
    #[serde(rename = "FALSE")]
    False,
    #[serde(rename = "INCONCLUSIVE")]
    Inconclusive,
}

impl Troolean {
    pub fn is_inconclusive(&self) -> bool {
        matches!(self, Troolean::Inconclusive)
    }

    pub fn not(self) -> Troolean {
        match self {
            Troolean::True => Troolean::False,
            Troolean::False => Troolean::True,
            Troolean::Inconclusive => Troolean::Inconclusive,
        }
    }

    pub fn and(self, other: Troolean) -> Troolean {
        match (self, other) {
            (Troolean::False, _) | (_, Troolean::False) => Troolean::False,
            (Troolean::True, Troolean::True) => Troolean::True,
            _ => Troolean::Inconclusive,
        }
    }

    pub fn or(self, other: Troolean) -> Troolean {
        match (self, other) {
            (Troolean::True, _) | (_, Troolean::True) => Troolean::True,
            (Troolean::False, Troolean::False) => Troolean::False,
            _ => Troolean::Inconclusive,
        }
    }
}

impl From<bool> for Troolean {
    fn from(value: bool) -> Self {
        if value {
            Troolean::True
        } else {
            Troolean::False
        }
    }
}

impl fmt::Display for Troolean {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Troolean::True => "TRUE",
            Troolean::False => "FALSE",
            Troolean::Inconclusive => "INCONCLUSIVE",
        };
        f.write_str(s)
    }
}
