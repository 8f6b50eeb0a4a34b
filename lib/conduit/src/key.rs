use serde_derive::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a computation or datum in the cluster. A key is either a
/// plain textual token or a tuple of a textual head and numeric indices, the
/// latter being how collection libraries address their chunks.
///
/// Keys are the unit of addressing for every scheduler interaction.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Key {
    Token(String),
    Part(String, Vec<u64>),
}

impl Key {
    #[inline]
    pub fn token<S: Into<String>>(name: S) -> Key {
        Key::Token(name.into())
    }

    #[inline]
    pub fn part<S: Into<String>>(name: S, index: Vec<u64>) -> Key {
        Key::Part(name.into(), index)
    }

    /// Textual head of the key.
    #[inline]
    pub fn name(&self) -> &str {
        match self {
            Key::Token(name) => name,
            Key::Part(name, _) => name,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Key::Token(name) => write!(f, "{}", name),
            Key::Part(name, index) => {
                write!(f, "({}", name)?;
                for part in index {
                    write!(f, ", {}", part)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<&str> for Key {
    #[inline]
    fn from(name: &str) -> Key {
        Key::Token(name.to_string())
    }
}

impl From<String> for Key {
    #[inline]
    fn from(name: String) -> Key {
        Key::Token(name)
    }
}
