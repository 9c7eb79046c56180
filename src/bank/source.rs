// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::fmt;
use std::path::{Path, PathBuf};

use rust_embed::RustEmbed;

use crate::error::BankError;

/// The name of the bank shipped inside the binary.
pub const EMBEDDED_BANK_NAME: &str = "Modded.bank";

/// Supplies the raw bytes of a bank.
pub trait BankSource: fmt::Display + Send + Sync {
    /// Reads the whole bank.
    fn read(&self) -> Result<Vec<u8>, BankError>;
}

#[derive(RustEmbed)]
#[folder = "assets/"]
struct Assets;

/// The bank embedded in the binary at build time.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedBank;

impl BankSource for EmbeddedBank {
    fn read(&self) -> Result<Vec<u8>, BankError> {
        Assets::get(EMBEDDED_BANK_NAME)
            .map(|file| file.data.into_owned())
            .ok_or_else(|| BankError::MissingResourceStream(EMBEDDED_BANK_NAME.to_string()))
    }
}

impl fmt::Display for EmbeddedBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "embedded {}", EMBEDDED_BANK_NAME)
    }
}

/// A bank read from disk when the bank is loaded.
#[derive(Debug, Clone)]
pub struct FileBank {
    path: PathBuf,
}

impl FileBank {
    pub fn new<P: AsRef<Path>>(path: P) -> FileBank {
        FileBank {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl BankSource for FileBank {
    fn read(&self) -> Result<Vec<u8>, BankError> {
        std::fs::read(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                BankError::MissingResourceStream(self.path.display().to_string())
            }
            _ => BankError::Read {
                name: self.path.display().to_string(),
                message: e.to_string(),
            },
        })
    }
}

impl fmt::Display for FileBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// A bank already in memory. `None` behaves like a missing resource.
#[derive(Debug, Clone)]
pub struct MemoryBank {
    name: String,
    data: Option<Vec<u8>>,
}

impl MemoryBank {
    pub fn new(name: &str, data: Option<Vec<u8>>) -> MemoryBank {
        MemoryBank {
            name: name.to_string(),
            data,
        }
    }
}

impl BankSource for MemoryBank {
    fn read(&self) -> Result<Vec<u8>, BankError> {
        self.data
            .clone()
            .ok_or_else(|| BankError::MissingResourceStream(self.name.clone()))
    }
}

impl fmt::Display for MemoryBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "memory {}", self.name)
    }
}
