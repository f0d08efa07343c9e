//! Purpose: Accept heterogeneous entry keys and normalize them to `u64`.
//! Exports: `EntryKey`, `UniqueId`.
//! Role: Key validation for indexer appends, run before any entry is buffered.
//! Invariants: Conversion is lossless; negative or non-numeric keys are `TypeMismatch`.
use std::fmt;
use std::str::FromStr;

use crate::core::error::{Error, ErrorKind};

pub const UNIQUE_ID_LEN: usize = 16;

pub trait EntryKey {
    fn to_key(&self) -> Result<u64, Error>;
}

macro_rules! unsigned_key {
    ($($ty:ty),*) => {
        $(impl EntryKey for $ty {
            fn to_key(&self) -> Result<u64, Error> {
                Ok(u64::from(*self))
            }
        })*
    };
}

macro_rules! signed_key {
    ($($ty:ty),*) => {
        $(impl EntryKey for $ty {
            fn to_key(&self) -> Result<u64, Error> {
                u64::try_from(*self).map_err(|_| {
                    Error::new(ErrorKind::TypeMismatch)
                        .with_message(format!("key {} is negative", self))
                })
            }
        })*
    };
}

unsigned_key!(u8, u16, u32, u64);
signed_key!(i8, i16, i32, i64, isize);

impl EntryKey for usize {
    fn to_key(&self) -> Result<u64, Error> {
        u64::try_from(*self).map_err(|_| {
            Error::new(ErrorKind::TypeMismatch).with_message(format!("key {self} exceeds u64"))
        })
    }
}

impl EntryKey for str {
    fn to_key(&self) -> Result<u64, Error> {
        self.trim().parse::<u64>().map_err(|err| {
            Error::new(ErrorKind::TypeMismatch)
                .with_message(format!("key {self:?} is not an unsigned integer"))
                .with_source(err)
        })
    }
}

impl EntryKey for String {
    fn to_key(&self) -> Result<u64, Error> {
        self.as_str().to_key()
    }
}

impl<K: EntryKey + ?Sized> EntryKey for &K {
    fn to_key(&self) -> Result<u64, Error> {
        (**self).to_key()
    }
}

/// Fixed-width hexadecimal document id, e.g. `000000000000002a`.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct UniqueId(u64);

impl UniqueId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for UniqueId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0width$x}", self.0, width = UNIQUE_ID_LEN)
    }
}

impl FromStr for UniqueId {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text.len() != UNIQUE_ID_LEN {
            return Err(Error::new(ErrorKind::TypeMismatch).with_message(format!(
                "unique id {text:?} must be {UNIQUE_ID_LEN} hex digits"
            )));
        }
        u64::from_str_radix(text, 16).map(Self).map_err(|err| {
            Error::new(ErrorKind::TypeMismatch)
                .with_message(format!("unique id {text:?} is not hexadecimal"))
                .with_source(err)
        })
    }
}

impl EntryKey for UniqueId {
    fn to_key(&self) -> Result<u64, Error> {
        Ok(self.0)
    }
}

/// Converts every key up front so a bad key rejects the whole batch.
pub(crate) fn collect_keys<K: EntryKey>(keys: &[K]) -> Result<Vec<u64>, Error> {
    keys.iter()
        .enumerate()
        .map(|(position, key)| {
            key.to_key().map_err(|err| {
                let message = err.message().unwrap_or("invalid key").to_string();
                err.with_message(format!("key at position {position}: {message}"))
            })
        })
        .collect()
}
