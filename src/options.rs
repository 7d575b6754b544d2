//! Configuration for opening hives and composing the virtual registry.

use crate::error::{RegistryError, Result};
use encoding_rs::Encoding;

/// Default codepage for compressed (8-bit) key and value names.
pub const DEFAULT_ASCII_CODEPAGE: &str = "windows-1252";

/// Options applied when a hive source is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct HiveOptions {
    /// Encoding label used for compressed names, e.g. `windows-1252` or `cp1251`.
    pub ascii_codepage: String,

    /// Reject hives whose checksum or format version is wrong.
    ///
    /// When false those problems are logged and kept on the source; only a
    /// missing `regf` signature fails the open.
    pub strict_header: bool,
}

impl Default for HiveOptions {
    fn default() -> Self {
        Self {
            ascii_codepage: DEFAULT_ASCII_CODEPAGE.to_string(),
            strict_header: false,
        }
    }
}

impl HiveOptions {
    /// Sets the codepage label.
    pub fn with_codepage(mut self, label: impl Into<String>) -> Self {
        self.ascii_codepage = label.into();
        self
    }

    /// Enables or disables strict header validation.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict_header = strict;
        self
    }

    /// Resolves the codepage label to an encoding.
    ///
    /// Labels follow the WHATWG encoding registry; `cpNNNN` is accepted as an
    /// alias of `windows-NNNN`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownCodepage`] for unrecognised labels.
    pub fn codepage(&self) -> Result<&'static Encoding> {
        let label = self.ascii_codepage.trim();
        if let Some(encoding) = Encoding::for_label(label.as_bytes()) {
            return Ok(encoding);
        }

        let lower = label.to_ascii_lowercase();
        lower
            .strip_prefix("cp")
            .and_then(|number| Encoding::for_label(format!("windows-{}", number).as_bytes()))
            .ok_or_else(|| RegistryError::UnknownCodepage(self.ascii_codepage.clone()))
    }
}

/// Which mount wins when several are registered at the same mount path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TieBreak {
    /// The most recently registered mount is served.
    #[default]
    MostRecent,

    /// The first registered mount is served; later ones stay shadowed.
    FirstRegistered,
}

/// Options for a [`crate::Registry`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RegistryOptions {
    /// Options for every hive the registry opens.
    pub hive: HiveOptions,

    /// Mount precedence at a shared mount path.
    pub tie_break: TieBreak,

    /// Open the standard hive files through the file reader on first use.
    pub auto_mount: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            hive: HiveOptions::default(),
            tie_break: TieBreak::default(),
            auto_mount: true,
        }
    }
}

impl RegistryOptions {
    /// Sets the hive options.
    pub fn with_hive_options(mut self, hive: HiveOptions) -> Self {
        self.hive = hive;
        self
    }

    /// Sets the tie-break policy.
    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// Enables or disables automatic mounting through the file reader.
    pub fn with_auto_mount(mut self, auto_mount: bool) -> Self {
        self.auto_mount = auto_mount;
        self
    }
}
