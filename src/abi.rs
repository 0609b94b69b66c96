//! ABI handling.
//!
//! Every test module is instantiated once per ABI the run targets. This
//! module knows which ABIs the suite supports, how they map onto a build
//! architecture, and how to intersect them with what a device reports.
//!
//! # Resolution
//!
//! | Input | Result |
//! |-------|--------|
//! | `requested = Some(abi)` | exactly that ABI, if the build supports it |
//! | `requested = None` | every device ABI the build also supports, in device order |
//!
//! Both paths fail with [`NoMatchingAbiError`] rather than returning an
//! empty set, so a run never reaches sharding without something to run.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// ABIs a compatibility build can be compiled for, with their bitness.
const SUPPORTED_ABIS: &[(&str, &str)] = &[
    ("armeabi-v7a", "32"),
    ("arm64-v8a", "64"),
    ("x86", "32"),
    ("x86_64", "64"),
    ("mips", "32"),
    ("mips64", "64"),
];

/// A single application binary interface variant, e.g. `arm64-v8a` / 64.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Abi {
    /// ABI name as reported by the device (`ro.product.cpu.abilist`).
    pub name: String,

    /// Bitness, `"32"` or `"64"`.
    pub bitness: String,
}

impl Abi {
    /// Creates an ABI with an explicit bitness.
    pub fn new(name: impl Into<String>, bitness: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bitness: bitness.into(),
        }
    }

    /// Creates a known ABI, looking its bitness up in the supported table.
    ///
    /// Returns `None` for names the suite does not know about.
    pub fn known(name: &str) -> Option<Self> {
        bitness_of(name).map(|bits| Self::new(name, bits))
    }
}

impl fmt::Display for Abi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Raised when no ABI can be selected for the run.
///
/// The message always carries both sides of the comparison so the operator
/// can see what the build supports and what was asked for or found.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NoMatchingAbiError {
    /// An explicitly requested ABI is not part of the build.
    #[error("this build hasn't been built with abi '{requested}' support, it currently supports {supported:?}")]
    Unsupported {
        requested: String,
        supported: Vec<String>,
    },

    /// The device and the build share no ABI.
    #[error("none of the abis supported by this build ({supported:?}) are supported by the device ({device:?})")]
    NoOverlap {
        supported: Vec<String>,
        device: Vec<String>,
    },
}

/// Returns the bitness of a supported ABI name.
pub fn bitness_of(name: &str) -> Option<&'static str> {
    SUPPORTED_ABIS
        .iter()
        .find(|(abi, _)| *abi == name)
        .map(|(_, bits)| *bits)
}

/// Returns `true` if the suite knows how to run the ABI at all.
pub fn is_supported(name: &str) -> bool {
    bitness_of(name).is_some()
}

/// Returns the ABI names a build for `arch` contains.
///
/// Unknown architectures yield an empty list.
pub fn abis_for_arch(arch: &str) -> Vec<String> {
    let abis: &[&str] = match arch {
        "arm" | "arm64" => &["armeabi-v7a", "arm64-v8a"],
        "x86" | "x86_64" => &["x86", "x86_64"],
        "mips" | "mips64" => &["mips", "mips64"],
        _ => &[],
    };
    abis.iter().map(|s| s.to_string()).collect()
}

/// Creates the module id `"<abi> <name>"`.
pub fn create_id(abi: &str, name: &str) -> String {
    format!("{} {}", abi, name)
}

/// Splits a module id back into `(abi, name)`.
pub fn parse_id(id: &str) -> Option<(&str, &str)> {
    id.split_once(' ')
}

/// Inputs for [`resolve_abis`].
#[derive(Debug, Clone, Default)]
pub struct AbiRequest<'a> {
    /// ABIs contained in the build (see [`abis_for_arch`]).
    pub build_abis: &'a [String],

    /// ABIs reported by the device, primary first.
    pub device_abis: &'a [String],

    /// A single ABI forced on the command line.
    pub requested: Option<&'a str>,

    /// Trust the device list instead of the build list.
    pub skip_host_arch_check: bool,
}

/// Computes the ABI set for a run.
pub fn resolve_abis(request: &AbiRequest<'_>) -> Result<Vec<Abi>, NoMatchingAbiError> {
    let in_build = |abi: &str| {
        (request.skip_host_arch_check || request.build_abis.iter().any(|b| b == abi))
            && is_supported(abi)
    };

    if let Some(requested) = request.requested {
        return match Abi::known(requested) {
            Some(abi) if in_build(requested) => Ok(vec![abi]),
            _ => Err(NoMatchingAbiError::Unsupported {
                requested: requested.to_string(),
                supported: request.build_abis.to_vec(),
            }),
        };
    }

    let mut abis: Vec<Abi> = Vec::new();
    for name in request.device_abis {
        match Abi::known(name) {
            Some(abi) if in_build(name) => {
                if !abis.contains(&abi) {
                    abis.push(abi);
                }
            }
            _ => debug!(
                "abi '{}' is supported by device but not by this build ({:?}), tests will not run against it",
                name, request.build_abis
            ),
        }
    }

    if abis.is_empty() {
        return Err(NoMatchingAbiError::NoOverlap {
            supported: request.build_abis.to_vec(),
            device: request.device_abis.to_vec(),
        });
    }
    Ok(abis)
}
