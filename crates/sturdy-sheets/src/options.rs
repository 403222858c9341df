//! Typed options for acquiring, saving and releasing workbooks.
//!
//! Policy tokens parse from their snake_case names (plus a few synonyms), so
//! the same options can come from code, from `key=value` pairs on a command
//! line, or from a JSON config file. Anything unrecognized is
//! [`Error::OptionInvalid`].

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::automation::InstanceId;
use crate::error::{Error, Result};
use crate::Calculation;

/// Generates `FromStr`, `TryFrom<String>`, `Display` and `as_str` for a policy
/// token enum. The first name of each variant is canonical.
macro_rules! policy_token {
    ($ty:ident, $option:literal, { $($variant:ident => [$($name:literal),+]),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => policy_token!(@first $($name),+),)+
                }
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($($name)|+ => Ok($ty::$variant),)+
                    other => Err(Error::option(format!(
                        "unknown {} policy '{}'",
                        $option, other
                    ))),
                }
            }
        }

        impl TryFrom<String> for $ty {
            type Error = Error;

            fn try_from(s: String) -> Result<Self> {
                s.parse()
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
    (@first $first:literal $(, $rest:literal)*) => {
        $first
    };
}

/// What to do when the requested workbook is already open with unsaved changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum IfUnsaved {
    /// Fail with [`Error::WorkbookNotSaved`].
    #[default]
    Raise,
    /// Return the open workbook untouched, ignoring conflicting options.
    Accept,
    /// Discard the changes and reopen from disk.
    Forget,
    /// Save the changes, then reopen with the requested options.
    Save,
    /// Leave the workbook alone and open a second copy in a new instance.
    NewExcel,
}

policy_token!(IfUnsaved, "if_unsaved", {
    Raise => ["raise"],
    Accept => ["accept"],
    Forget => ["forget"],
    Save => ["save"],
    NewExcel => ["new_excel", "new_app"],
});

/// What to do when a different workbook with the same file name blocks the
/// requested one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum IfObstructed {
    /// Fail with [`Error::WorkbookBlocked`].
    #[default]
    Raise,
    /// Close the blocking workbook, discarding its changes.
    Forget,
    /// Save and close the blocking workbook.
    Save,
    /// Close the blocking workbook only if it has no unsaved changes.
    CloseIfSaved,
    /// Open the requested workbook in a new instance.
    NewExcel,
}

policy_token!(IfObstructed, "if_obstructed", {
    Raise => ["raise"],
    Forget => ["forget"],
    Save => ["save"],
    CloseIfSaved => ["close_if_saved"],
    NewExcel => ["new_excel", "new_app"],
});

/// What to do when the requested file does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum IfAbsent {
    #[default]
    Raise,
    /// Create an empty workbook at the path.
    Create,
}

policy_token!(IfAbsent, "if_absent", {
    Raise => ["raise"],
    Create => ["create"],
});

/// How to release a workbook (or every workbook of an instance) that may
/// have unsaved changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum CloseMode {
    #[default]
    Raise,
    Forget,
    Save,
    /// Leave unsaved workbooks open.
    KeepOpen,
}

policy_token!(CloseMode, "close", {
    Raise => ["raise"],
    Forget => ["forget"],
    Save => ["save"],
    KeepOpen => ["keep_open"],
});

/// What to do when a save-as target already exists on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum IfExists {
    #[default]
    Raise,
    Overwrite,
}

policy_token!(IfExists, "if_exists", {
    Raise => ["raise"],
    Overwrite => ["overwrite"],
});

/// Which application instance to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "SelectorRepr")]
pub enum ExcelSelector {
    /// Always start a fresh instance.
    New,
    /// The most recently used live instance, or a new one if none is alive.
    #[default]
    Current,
    /// A specific instance.
    Instance(InstanceId),
}

impl FromStr for ExcelSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "new" => Ok(ExcelSelector::New),
            "current" | "reuse" | "active" => Ok(ExcelSelector::Current),
            other => other
                .parse::<u64>()
                .map(|id| ExcelSelector::Instance(InstanceId(id)))
                .map_err(|_| Error::option(format!("unknown excel selector '{other}'"))),
        }
    }
}

impl fmt::Display for ExcelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExcelSelector::New => f.write_str("new"),
            ExcelSelector::Current => f.write_str("current"),
            ExcelSelector::Instance(id) => write!(f, "{}", id.0),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SelectorRepr {
    Instance(u64),
    Token(String),
}

impl TryFrom<SelectorRepr> for ExcelSelector {
    type Error = Error;

    fn try_from(repr: SelectorRepr) -> Result<Self> {
        match repr {
            SelectorRepr::Instance(id) => Ok(ExcelSelector::Instance(InstanceId(id))),
            SelectorRepr::Token(s) => s.parse(),
        }
    }
}

/// Options for [`Keeper::acquire`](crate::Keeper::acquire).
///
/// Instance precedence: `excel` beats `force_excel`, which beats
/// `default_excel`. A forced selector applies even when the workbook is open
/// elsewhere; the default selector only applies when the workbook is not open
/// anywhere and was never opened before.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AcquireOptions {
    /// An explicit instance.
    pub excel: Option<InstanceId>,
    #[serde(alias = "force")]
    pub force_excel: Option<ExcelSelector>,
    #[serde(alias = "default")]
    pub default_excel: ExcelSelector,
    /// `None` keeps the mode of an open workbook; fresh opens are writable.
    pub read_only: Option<bool>,
    /// `None` keeps the visibility of the instance.
    pub visible: Option<bool>,
    pub if_unsaved: IfUnsaved,
    pub if_obstructed: IfObstructed,
    pub if_absent: IfAbsent,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            excel: None,
            force_excel: None,
            default_excel: ExcelSelector::Current,
            read_only: None,
            visible: None,
            if_unsaved: IfUnsaved::Raise,
            if_obstructed: IfObstructed::Raise,
            if_absent: IfAbsent::Raise,
        }
    }
}

/// The instance choice after applying precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    /// A specific instance; only a workbook open there counts as open.
    Pinned(InstanceId),
    /// `New` or `Current`, regardless of where the workbook is open.
    Forced(ExcelSelector),
    /// Used only if the workbook is not open and has no known instance.
    Default(ExcelSelector),
}

impl AcquireOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn excel(mut self, instance: InstanceId) -> Self {
        self.excel = Some(instance);
        self
    }

    pub fn force_excel(mut self, selector: ExcelSelector) -> Self {
        self.force_excel = Some(selector);
        self
    }

    pub fn default_excel(mut self, selector: ExcelSelector) -> Self {
        self.default_excel = selector;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = Some(read_only);
        self
    }

    pub fn visible(mut self, visible: bool) -> Self {
        self.visible = Some(visible);
        self
    }

    pub fn if_unsaved(mut self, policy: IfUnsaved) -> Self {
        self.if_unsaved = policy;
        self
    }

    pub fn if_obstructed(mut self, policy: IfObstructed) -> Self {
        self.if_obstructed = policy;
        self
    }

    pub fn if_absent(mut self, policy: IfAbsent) -> Self {
        self.if_absent = policy;
        self
    }

    /// Build options from `key=value` style pairs.
    ///
    /// Keys: `excel`/`e` (an instance number, or a selector token treated as
    /// `force_excel`), `force_excel`/`force`/`f`, `default_excel`/`default`/`d`,
    /// `read_only`, `visible`, `if_unsaved`, `if_obstructed`, `if_absent`.
    /// A `force_excel` of `nil` leaves the forced selector unset.
    pub fn parse<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut options = Self::default();
        for (key, value) in pairs {
            let value = value.as_ref().trim();
            match key.as_ref().trim() {
                "excel" | "e" => match value.parse::<ExcelSelector>()? {
                    ExcelSelector::Instance(id) => options.excel = Some(id),
                    selector => options.force_excel = Some(selector),
                },
                "force_excel" | "force" | "f" => {
                    options.force_excel = if is_nil(value) {
                        None
                    } else {
                        Some(value.parse()?)
                    };
                }
                "default_excel" | "default" | "d" => options.default_excel = value.parse()?,
                "read_only" => options.read_only = Some(parse_bool("read_only", value)?),
                "visible" => options.visible = Some(parse_bool("visible", value)?),
                "if_unsaved" => options.if_unsaved = value.parse()?,
                "if_obstructed" => options.if_obstructed = value.parse()?,
                "if_absent" => options.if_absent = value.parse()?,
                other => return Err(Error::option(format!("unknown option '{other}'"))),
            }
        }
        Ok(options)
    }

    pub(crate) fn target(&self) -> Target {
        if let Some(instance) = self.excel {
            return Target::Pinned(instance);
        }
        match self.force_excel {
            Some(ExcelSelector::Instance(instance)) => Target::Pinned(instance),
            Some(selector) => Target::Forced(selector),
            None => Target::Default(self.default_excel),
        }
    }
}

fn is_nil(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "nil" | "none" | "")
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        other => Err(Error::option(format!("{key} expects true or false, got '{other}'"))),
    }
}

/// Settings applied to instances the keeper starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExcelOptions {
    pub visible: bool,
    pub display_alerts: bool,
    pub calculation: Option<Calculation>,
}

impl Default for ExcelOptions {
    fn default() -> Self {
        Self {
            visible: false,
            display_alerts: false,
            calculation: None,
        }
    }
}

/// Options for [`Keeper::unobtrusively`](crate::Keeper::unobtrusively).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UnobtrusiveOptions {
    /// Persist the work's edits. When false, the workbook is left exactly as
    /// it was on disk and in memory.
    pub writable: bool,
    /// Where to open the workbook if it is not open yet.
    pub if_closed: ExcelSelector,
    /// Visibility while the work runs; restored afterwards.
    pub visible: Option<bool>,
}

impl Default for UnobtrusiveOptions {
    fn default() -> Self {
        Self {
            writable: true,
            if_closed: ExcelSelector::Current,
            visible: None,
        }
    }
}

/// Options for [`Book::save_as`](crate::Book::save_as).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SaveAsOptions {
    pub if_exists: IfExists,
    /// `NewExcel` is not meaningful here and is rejected.
    pub if_obstructed: IfObstructed,
}
